//! Repair of raw generation output into a well-formed document.
//!
//! `normalize` is total: any input yields a document with a matched
//! `<html`/`</html>` pair and every required resource reference present.
//! Running it on its own output returns the same string.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

const FALLBACK_DOCUMENT: &str = include_str!("fallback.html");

/// Fenced code block delimiter lines, with an optional language tag.
static FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)```[A-Za-z0-9_+-]*[ \t]*$\n?").unwrap());

/// A resource the rendered page depends on, detected by `marker`.
struct Resource {
    marker: &'static str,
    tag: &'static str,
}

const REQUIRED_RESOURCES: &[Resource] = &[
    Resource {
        marker: "animate.min.css",
        tag: r#"<link href="https://cdnjs.cloudflare.com/ajax/libs/animate.css/4.1.1/animate.min.css" rel="stylesheet">"#,
    },
    Resource {
        marker: "aos.css",
        tag: r#"<link href="https://unpkg.com/aos@2.3.1/dist/aos.css" rel="stylesheet">"#,
    },
    Resource {
        marker: "particles.min.js",
        tag: r#"<script src="https://cdn.jsdelivr.net/particles.js/2.0.0/particles.min.js"></script>"#,
    },
    Resource {
        marker: "fonts.googleapis.com/css2?family=Poppins",
        tag: r#"<link href="https://fonts.googleapis.com/css2?family=Poppins:wght@300;400;600;700&display=swap" rel="stylesheet">"#,
    },
];

const PARTICLE_CONTAINER: &str = r#"<div id="particles-js"></div>"#;

/// The self-contained document used when the service output is unusable.
pub fn fallback_document() -> &'static str {
    FALLBACK_DOCUMENT.trim()
}

/// Turn raw service text into a well-formed document.
pub fn normalize(raw: &str) -> String {
    let stripped = strip_fences(raw);
    let trimmed = trim_to_document(&stripped);

    let Some(root_end) = root_open_end(trimmed) else {
        warn!(raw_len = raw.len(), "no usable document in generation output, using fallback");
        return fallback_document().to_string();
    };

    let mut document = trimmed.to_string();
    let head_end = ensure_resources(&mut document, root_end);
    ensure_particle_container(&mut document, head_end);
    document
}

fn strip_fences(raw: &str) -> String {
    FENCE_LINE.replace_all(raw, "").replace('`', "")
}

/// Cut before the first document-start marker and after the last end marker.
///
/// Without a `<!DOCTYPE` the root open tag is used as the start marker.
fn trim_to_document(text: &str) -> &str {
    let start = find_ci(text, "<!doctype")
        .or_else(|| find_ci(text, "<html"))
        .unwrap_or(0);
    let text = &text[start..];

    let end = rfind_ci(text, "</html>")
        .map(|idx| idx + "</html>".len())
        .unwrap_or(text.len());
    text[..end].trim()
}

/// Offset just past the root open tag.
///
/// `None` unless a real `<html>` tag closes before the final `</html>`.
fn root_open_end(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let close = lower.rfind("</html>")?;
    open_tag_end(&lower, "<html", 0, close)
}

/// Offset of the final `</html>`, or the end of the text.
fn root_close(document: &str) -> usize {
    rfind_ci(document, "</html>").unwrap_or(document.len())
}

/// Injects missing resource tags into the head and returns the offset just
/// past the head, which is where body content may start.
fn ensure_resources(document: &mut String, root_end: usize) -> usize {
    let head_close = document.to_ascii_lowercase()[root_end..root_close(document)]
        .find("</head>")
        .map(|rel| root_end + rel);

    let missing: Vec<&Resource> = REQUIRED_RESOURCES
        .iter()
        .filter(|r| !document.contains(r.marker))
        .collect();
    if missing.is_empty() {
        return head_close.map_or(root_end, |idx| idx + "</head>".len());
    }
    debug!(count = missing.len(), "injecting resource references");

    let mut block = String::new();
    for resource in &missing {
        block.push_str("    ");
        block.push_str(resource.tag);
        block.push('\n');
    }

    match head_close {
        Some(idx) => {
            document.insert_str(idx, &block);
            idx + block.len() + "</head>".len()
        }
        None => {
            let head = format!("\n<head>\n{block}</head>");
            document.insert_str(root_end, &head);
            root_end + head.len()
        }
    }
}

fn ensure_particle_container(document: &mut String, from: usize) {
    if document.contains(r#"id="particles-js""#) || document.contains("id='particles-js'") {
        return;
    }

    let close = root_close(document);
    if let Some(at) = open_tag_end(&document.to_ascii_lowercase(), "<body", from, close) {
        document.insert_str(at, &format!("\n    {PARTICLE_CONTAINER}"));
        return;
    }

    // No body at all: wrap everything between the head and the root close tag.
    let opening = format!("\n<body>\n    {PARTICLE_CONTAINER}");
    document.insert_str(from, &opening);
    document.insert_str(close + opening.len(), "</body>\n");
}

/// Offset just past the `>` of the first `prefix` tag in `lower[from..limit]`.
///
/// The prefix must be followed by `>` or whitespace, so `<bodyguard>` is not
/// a `<body>`. A matching tag whose `>` falls at or past `limit` yields `None`.
fn open_tag_end(lower: &str, prefix: &str, mut from: usize, limit: usize) -> Option<usize> {
    while let Some(rel) = lower[from..limit].find(prefix) {
        let after = from + rel + prefix.len();
        match lower.as_bytes().get(after) {
            Some(b'>' | b' ' | b'\t' | b'\n' | b'\r') => {
                return lower[after..limit].find('>').map(|gt| after + gt + 1);
            }
            _ => from = after,
        }
    }
    None
}

// ASCII lowercasing keeps byte offsets stable, so indices map back onto the input.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

fn rfind_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().rfind(needle)
}
