//! Specification Extraction
//!
//! Decides whether a candidate block of agent text contains a complete
//! specification. Completeness is all-or-nothing: a block missing any
//! required key yields `None`, never a partial result.
//!
//! Structural patterns are tried in priority order and the first one that
//! matches is used (patterns are never combined):
//! 1. fenced block with an explicit language tag and a newline before the close
//! 2. the same fence without that newline
//! 3. a generic fenced block
//! 4. a tagged fence that never closes
//!
//! When none match, a line-oriented fallback scan looks for an implicit block
//! that starts at the anchor key (`name`) and runs past the style/technology
//! keys up to the next blank line, fence, or closing phrase.

use regex::Regex;
use serde_json::{Map, Value};

use specflow_config::ConversationConfig;
use specflow_core::Specification;

/// Minimum distinct required keys for text to look like a specification
const LOOKS_LIKE_MIN_KEYS: usize = 3;

/// Extraction engine
#[derive(Debug, Clone)]
pub struct SpecExtractor {
    required_keys: Vec<String>,
    patterns: Vec<Regex>,
    open_markers: Vec<String>,
    close_marker: String,
    closing_phrases: Vec<String>,
}

impl SpecExtractor {
    /// Build from the conversation tables
    pub fn new(config: &ConversationConfig) -> Self {
        let tags: Vec<String> = config
            .open_markers
            .iter()
            .filter_map(|marker| marker.trim().strip_prefix("```"))
            .filter(|tag| !tag.is_empty())
            .map(regex::escape)
            .collect();

        Self {
            required_keys: config.required_keys.clone(),
            patterns: build_patterns(&tags),
            open_markers: config
                .open_markers
                .iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            close_marker: config.close_marker.trim().to_string(),
            closing_phrases: config
                .topic_shift_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Keys a specification must carry
    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    /// Extract a complete specification from `text`, if there is one
    pub fn extract(&self, text: &str) -> Option<Specification> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(text) {
                let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                return self.complete_block(inner);
            }
        }
        self.fallback_scan(text)
    }

    /// Cheap pre-check used by the relay to withhold spec text from the client
    ///
    /// True when the text carries an open marker or at least three of the
    /// required keys as `key:` lines. No parsing is attempted.
    pub fn looks_like_specification(&self, text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        if self.open_markers.iter().any(|m| lower.contains(m.as_str())) {
            return true;
        }

        let hits = self
            .required_keys
            .iter()
            .filter(|key| text.lines().any(|line| line_has_key(line, key)))
            .count();
        hits >= LOOKS_LIKE_MIN_KEYS.min(self.required_keys.len())
    }

    fn complete_block(&self, inner: &str) -> Option<Specification> {
        let spec = parse_yaml_mapping(inner).or_else(|| parse_key_lines(inner))?;
        if spec.contains_all(&self.required_keys) {
            Some(spec)
        } else {
            tracing::trace!(
                keys = spec.len(),
                required = self.required_keys.len(),
                "Candidate block incomplete"
            );
            None
        }
    }

    fn fallback_scan(&self, text: &str) -> Option<Specification> {
        let lines: Vec<&str> = text.lines().collect();
        let anchor = self.required_keys.first()?;
        let start = lines.iter().position(|line| line_has_key(line, anchor))?;

        // Style and technology choices close out the default key order
        let tail_keys: Vec<&String> = self.required_keys.iter().rev().take(2).collect();
        let tail = start
            + lines[start..]
                .iter()
                .position(|line| tail_keys.iter().any(|key| line_has_key(line, key)))?;

        let end = lines[tail + 1..]
            .iter()
            .position(|line| self.is_boundary(line))
            .map(|offset| tail + 1 + offset)
            .unwrap_or(lines.len());

        let candidate = lines[start..end].join("\n");
        self.complete_block(&candidate)
    }

    fn is_boundary(&self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() || (!self.close_marker.is_empty() && trimmed.starts_with(&self.close_marker)) {
            return true;
        }
        let lower = trimmed.to_lowercase();
        self.closing_phrases.iter().any(|p| lower.contains(p.as_str()))
    }
}

fn build_patterns(tags: &[String]) -> Vec<Regex> {
    let mut sources = Vec::with_capacity(4);
    let tagged = tags.join("|");

    if !tagged.is_empty() {
        sources.push(format!(r"(?is)```(?:{tagged})[ \t]*\r?\n(.*?)\r?\n[ \t]*```"));
        sources.push(format!(r"(?is)```(?:{tagged})[ \t]*(.*?)```"));
    }
    sources.push(r"(?s)```[^\n`]*\n(.*?)```".to_string());
    if !tagged.is_empty() {
        sources.push(format!(r"(?is)```(?:{tagged})[ \t]*\r?\n(.*)$"));
    }

    sources
        .iter()
        .filter_map(|source| match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern = %source, error = %e, "Skipping invalid extraction pattern");
                None
            },
        })
        .collect()
}

/// True when `line` declares `key` (`key:`, `- key:`, `**key**:`)
pub(crate) fn line_has_key(line: &str, key: &str) -> bool {
    let trimmed = strip_decoration(line);
    match trimmed.get(..key.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(key) => trimmed[key.len()..]
            .trim_start_matches('*')
            .trim_start()
            .starts_with(':'),
        _ => false,
    }
}

fn strip_decoration(line: &str) -> &str {
    let trimmed = line.trim_start();
    let trimmed = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .unwrap_or(trimmed);
    trimmed.trim_start_matches('*')
}

/// Top-level keys are folded to lowercase, matching the key-line scan;
/// the first spelling of a key wins.
fn parse_yaml_mapping(text: &str) -> Option<Specification> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).ok()?;
    if !value.is_mapping() {
        return None;
    }
    let Value::Object(parsed) = serde_json::to_value(value).ok()? else {
        return None;
    };

    let mut fields = Map::new();
    for (key, value) in parsed {
        fields.entry(key.to_ascii_lowercase()).or_insert(value);
    }
    Some(Specification::from_map(fields))
}

/// Lenient `key: value` reader for blocks that are not valid YAML
///
/// Unindented `key:` lines start a field; indented or bulleted lines that
/// follow are collected under it, as a list when they are bullets.
fn parse_key_lines(text: &str) -> Option<Specification> {
    let mut fields = Map::new();
    let mut current: Option<(String, String, Vec<String>)> = None;

    let flush = |fields: &mut Map<String, Value>, entry: Option<(String, String, Vec<String>)>| {
        if let Some((key, inline, items)) = entry {
            let value = if !items.is_empty() && inline.is_empty() {
                Value::Array(items.into_iter().map(Value::String).collect())
            } else if items.is_empty() {
                Value::String(inline)
            } else {
                Value::String(format!("{}\n{}", inline, items.join("\n")))
            };
            fields.insert(key, value);
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            if let Some((key, rest)) = split_key_line(line) {
                flush(&mut fields, current.take());
                current = Some((key, rest, Vec::new()));
                continue;
            }
        }
        if let Some((_, _, items)) = current.as_mut() {
            let item = line.trim();
            let item = item.strip_prefix("- ").unwrap_or(item);
            items.push(item.to_string());
        }
    }
    flush(&mut fields, current.take());

    if fields.is_empty() {
        None
    } else {
        Some(Specification::from_map(fields))
    }
}

fn split_key_line(line: &str) -> Option<(String, String)> {
    let stripped = strip_decoration(line);
    let (key, rest) = stripped.split_once(':')?;
    let key = key.trim().trim_end_matches('*').trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return None;
    }
    Some((key.to_ascii_lowercase(), rest.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "Here is what I have so far. ```yaml\nname: A\ndescription: d\nusers: [x]\ngoal: [g]\nfeatures: [f]\ntech_stack:\n  frontend: y\nui_style: s\n```";

    fn extractor() -> SpecExtractor {
        SpecExtractor::new(&ConversationConfig::default())
    }

    #[test]
    fn test_scenario_block_extracts_all_keys() {
        let spec = extractor().extract(SCENARIO).unwrap();
        assert_eq!(spec.len(), 7);
        assert_eq!(spec.name(), Some("A"));
        assert_eq!(spec.get("tech_stack").unwrap()["frontend"], "y");
        assert_eq!(spec.get("users").unwrap()[0], "x");
    }

    #[test]
    fn test_missing_any_key_is_not_found() {
        let extractor = extractor();
        for key in extractor.required_keys().to_vec() {
            let text: String = SCENARIO
                .lines()
                .filter(|line| !line.starts_with(&format!("{}:", key)))
                .filter(|line| !(key == "tech_stack" && line.starts_with("  frontend")))
                .collect::<Vec<_>>()
                .join("\n");
            assert!(
                extractor.extract(&text).is_none(),
                "extraction should fail without {}",
                key
            );
        }
    }

    #[test]
    fn test_fence_without_trailing_newline() {
        let text = "```yaml\nname: A\ndescription: d\nusers: x\ngoal: g\nfeatures: f\ntech_stack: y\nui_style: s```";
        let spec = extractor().extract(text).unwrap();
        assert_eq!(spec.get("ui_style").unwrap(), "s");
    }

    #[test]
    fn test_generic_fence() {
        let text = "```\nname: A\ndescription: d\nusers: x\ngoal: g\nfeatures: f\ntech_stack: y\nui_style: s\n```";
        assert!(extractor().extract(text).is_some());
    }

    #[test]
    fn test_unterminated_tagged_fence() {
        let text = "```YAML\nname: A\ndescription: d\nusers: x\ngoal: g\nfeatures: f\ntech_stack: y\nui_style: s\n";
        assert!(extractor().extract(text).is_some());
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        // The incomplete tagged block matches first; the complete generic
        // block after it is never considered.
        let text = "```yaml\nname: A\n```\n\n```\nname: A\ndescription: d\nusers: x\ngoal: g\nfeatures: f\ntech_stack: y\nui_style: s\n```";
        assert!(extractor().extract(text).is_none());
    }

    #[test]
    fn test_fallback_scan_implicit_block() {
        let text = "Great, so to recap:\nname: Habit Hero\ndescription: Track habits\nusers:\n  - students\ngoal: stay consistent\nfeatures:\n  - streaks\n  - reminders\ntech_stack:\n  frontend: react\nui_style: playful\nDoes this look right to you?";
        let spec = extractor().extract(text).unwrap();
        assert_eq!(spec.name(), Some("Habit Hero"));
        assert_eq!(spec.get("features").unwrap()[1], "reminders");
        assert_eq!(spec.get("ui_style").unwrap(), "playful");
    }

    #[test]
    fn test_fallback_stops_at_blank_line() {
        let text = "name: A\ndescription: d\nusers: x\ngoal: g\ntech_stack: y\n\nfeatures: f\nui_style: s";
        assert!(extractor().extract(text).is_none());
    }

    #[test]
    fn test_invalid_yaml_uses_lenient_reader() {
        let text = "```yaml\nname: Habit Hero\ndescription: Tracks habits: daily and weekly\nusers: students\ngoal: consistency\nfeatures:\n- streaks\n- reminders\ntech_stack: react\nui_style: playful\n```";
        let spec = extractor().extract(text).unwrap();
        assert_eq!(spec.get("description").unwrap(), "Tracks habits: daily and weekly");
        assert_eq!(spec.get("features").unwrap()[0], "streaks");
    }

    #[test]
    fn test_capitalised_keys_are_normalised() {
        let block = "Name: Habit Hero\nDescription: Track habits\nUsers: [students]\nGoal: [consistency]\nFeatures: [streaks]\nTech_Stack: react\nUI_Style: playful\n";

        let fenced = format!("```yaml\n{}```", block);
        let spec = extractor().extract(&fenced).unwrap();
        assert_eq!(spec.name(), Some("Habit Hero"));
        assert_eq!(spec.get("ui_style").unwrap(), "playful");
        assert!(spec.get("Name").is_none());

        let implicit = format!("Here's the recap:\n{}Shall I build it?", block);
        let spec = extractor().extract(&implicit).unwrap();
        assert_eq!(spec.get("tech_stack").unwrap(), "react");
        assert_eq!(spec.len(), 7);
    }

    #[test]
    fn test_plain_conversation_is_not_found() {
        let extractor = extractor();
        assert!(extractor.extract("What would you like to call the app?").is_none());
        assert!(extractor.extract("").is_none());
    }

    #[test]
    fn test_looks_like_specification() {
        let extractor = extractor();
        assert!(extractor.looks_like_specification("```yaml"));
        assert!(extractor.looks_like_specification("name: A\nusers: x\ngoal: g"));
        assert!(!extractor.looks_like_specification("Your app name: nice choice"));
        assert!(!extractor.looks_like_specification("Who are the users of this app?"));
    }

    #[test]
    fn test_line_has_key_variants() {
        assert!(line_has_key("name: A", "name"));
        assert!(line_has_key("  - name : A", "name"));
        assert!(line_has_key("**Name**: A", "name"));
        assert!(!line_has_key("names: A", "name"));
        assert!(!line_has_key("the name: A", "name"));
    }
}
