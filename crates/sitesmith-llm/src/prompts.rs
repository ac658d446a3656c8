//! Prompt contract with the generation service.
//!
//! The service is free text and does not reliably follow instructions, so
//! everything here is a request; the normalizer enforces the result.

/// Fixed system prompt sent with every generation call.
pub const SYSTEM_PROMPT: &str = r#"You are a professional web developer. Generate ONLY valid HTML/CSS/JavaScript code.
Rules:
1. No markdown, no explanations, no commentary about the code.
2. Start EXACTLY with: <!DOCTYPE html>
3. End EXACTLY with: </html>
4. Return one complete document with a <head> and a <body>.
5. Put all CSS in a <style> element and all JavaScript in a <script> element inside the document.
6. Include CSS @keyframes animations, hover transitions and a responsive layout with media queries.
7. Use real <img> tags with placeholder images, never markdown images.

Example of the expected shape:
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Website</title>
    <style>/* styles */</style>
</head>
<body>
    <!-- markup -->
    <script>// behaviour</script>
</body>
</html>"#;

/// User prompt for generating a brand-new document.
pub fn create_prompt(command: &str) -> String {
    format!(
        r#"Create a complete animated HTML website about: "{command}"

Requirements:
1. Output ONLY raw HTML/CSS/JS code
2. Start with <!DOCTYPE html>
3. Include working animations and interactive elements
4. Make it responsive and use a modern design with gradients

BEGIN CODE:"#
    )
}

/// User prompt for rewriting an existing document.
///
/// Only the first `context_chars` characters of the current document are
/// embedded; the service regenerates the whole document either way.
pub fn modify_prompt(command: &str, current_document: &str, context_chars: usize) -> String {
    let excerpt = truncate_chars(current_document, context_chars);
    let ellipsis = if excerpt.len() < current_document.len() { "..." } else { "" };
    format!(
        r#"MODIFY THIS WEBSITE:

Current website code:
{excerpt}{ellipsis}

MODIFICATION REQUEST: "{command}"

Instructions:
1. Apply ONLY the requested changes
2. Keep all existing functionality and the design language
3. Return ONLY the complete modified HTML/CSS/JavaScript document
4. Start with <!DOCTYPE html> and end with </html>
5. No explanations"#
    )
}

/// Prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_both_markers() {
        assert!(SYSTEM_PROMPT.contains("<!DOCTYPE html>"));
        assert!(SYSTEM_PROMPT.contains("</html>"));
    }

    #[test]
    fn create_prompt_quotes_command() {
        let p = create_prompt("build a bakery site");
        assert!(p.contains("\"build a bakery site\""));
    }

    #[test]
    fn modify_prompt_truncates_document() {
        let doc = "a".repeat(2000);
        let p = modify_prompt("make it blue", &doc, 1500);
        assert!(p.contains(&format!("{}...", "a".repeat(1500))));
        assert!(!p.contains(&"a".repeat(1501)));
        assert!(p.contains("\"make it blue\""));
    }

    #[test]
    fn modify_prompt_keeps_short_document_whole() {
        let p = modify_prompt("edit title", "<html></html>", 1500);
        assert!(p.contains("<html></html>\n"));
        assert!(!p.contains("</html>..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("✨✨✨", 1), "✨");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
