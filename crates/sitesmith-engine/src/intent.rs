use serde::Serialize;

/// Keywords that mark a command as a modification request.
pub const DEFAULT_MODIFY_KEYWORDS: &[&str] = &[
    "change", "modify", "move", "update", "add to", "remove", "make", "adjust", "edit",
];

/// Documents at or below this many characters are regenerated rather than edited.
pub const DEFAULT_MIN_MODIFY_CHARS: usize = 100;

/// Whether a command produces a brand-new document or rewrites the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Modify,
}

/// Keyword based create/modify classifier.
#[derive(Clone, Debug)]
pub struct IntentClassifier {
    keywords: Vec<String>,
    min_document_chars: usize,
}

impl IntentClassifier {
    pub fn new<I, S>(keywords: I, min_document_chars: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            min_document_chars,
        }
    }

    /// True when the command reads like an edit, regardless of workspace state.
    pub fn is_modify_candidate(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    pub fn classify(
        &self,
        command: &str,
        has_prior_success: bool,
        document_chars: usize,
    ) -> Intent {
        if self.is_modify_candidate(command)
            && has_prior_success
            && document_chars > self.min_document_chars
        {
            Intent::Modify
        } else {
            Intent::Create
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MODIFY_KEYWORDS, DEFAULT_MIN_MODIFY_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_workspace_always_creates() {
        let c = IntentClassifier::default();
        assert_eq!(c.classify("change the button color", false, 0), Intent::Create);
        assert_eq!(c.classify("change the button color", false, 5000), Intent::Create);
    }

    #[test]
    fn edit_keyword_with_document_modifies() {
        let c = IntentClassifier::default();
        assert_eq!(
            c.classify("change the button color to blue", true, 500),
            Intent::Modify
        );
        assert_eq!(c.classify("build a bakery site", true, 500), Intent::Create);
    }

    #[test]
    fn short_document_falls_back_to_create() {
        let c = IntentClassifier::default();
        assert_eq!(c.classify("make it red", true, 100), Intent::Create);
        assert_eq!(c.classify("make it red", true, 101), Intent::Modify);
    }

    #[test]
    fn matching_ignores_case_and_accepts_phrases() {
        let c = IntentClassifier::default();
        assert!(c.is_modify_candidate("Please UPDATE the footer"));
        assert!(c.is_modify_candidate("add to the menu a dessert section"));
        assert!(!c.is_modify_candidate("add a contact form"));
    }

    #[test]
    fn keywords_match_as_substrings() {
        // "remake" contains "make"
        let c = IntentClassifier::default();
        assert!(c.is_modify_candidate("remake the landing page"));
    }

    #[test]
    fn custom_keywords_and_threshold() {
        let c = IntentClassifier::new(["Tweak", "  "], 10);
        assert!(c.is_modify_candidate("tweak the hero"));
        assert!(!c.is_modify_candidate("change the hero"));
        assert_eq!(c.classify("tweak the hero", true, 11), Intent::Modify);
    }
}
