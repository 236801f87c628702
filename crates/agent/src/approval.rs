//! Approval detection
//!
//! Bounded substring heuristic over a single user utterance. False negatives
//! are cheap (the user repeats themselves); substring false positives such as
//! "yes, but first" are accepted.

use specflow_config::ConversationConfig;

/// Classifies an utterance as "accept and proceed"
#[derive(Debug, Clone)]
pub struct ApprovalDetector {
    phrases: Vec<String>,
}

impl ApprovalDetector {
    pub fn new(config: &ConversationConfig) -> Self {
        Self::from_phrases(&config.approval_phrases)
    }

    pub fn from_phrases<S: AsRef<str>>(phrases: &[S]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// True iff the normalized utterance contains a configured phrase
    pub fn is_approval(&self, utterance: &str) -> bool {
        let text = normalize(utterance);
        !text.is_empty() && self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Case-fold, unify apostrophes, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ApprovalDetector {
        ApprovalDetector::new(&ConversationConfig::default())
    }

    #[test]
    fn test_scenario_utterance() {
        assert!(detector().is_approval("That looks great, let's build it!"));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let detector = detector();
        assert!(detector.is_approval("  LOOKS    GOOD  "));
        assert!(detector.is_approval("Let\u{2019}s\tbuild"));
        assert!(detector.is_approval("go\nahead"));
    }

    #[test]
    fn test_no_phrase_no_approval() {
        let detector = detector();
        assert!(!detector.is_approval("Can we change the colors first?"));
        assert!(!detector.is_approval(""));
        assert!(!detector.is_approval("   "));
    }

    #[test]
    fn test_substring_false_positive_is_accepted() {
        assert!(detector().is_approval("yes, but first change the name"));
    }

    #[test]
    fn test_custom_phrases() {
        let detector = ApprovalDetector::from_phrases(&["Ship It"]);
        assert!(detector.is_approval("ok ship   it"));
        assert!(!detector.is_approval("looks good"));
    }
}
