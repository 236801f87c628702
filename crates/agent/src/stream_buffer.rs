//! Stream Buffer
//!
//! Reconstructs a structured block that the upstream agent streams across
//! several text fragments. Fragments never arrive as whole sentences, so
//! markers may be split anywhere; the buffer keeps a short lookbehind of the
//! previous fragment while idle so a split open marker is still recognized.
//!
//! A block always starts at its open marker. Text before the marker belongs
//! to the surrounding conversation, which keeps the reconstructed block
//! identical however the same text was chunked.

use specflow_config::ConversationConfig;

/// Result of feeding one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// No block in flight; the fragment is a single-fragment candidate
    Single(String),
    /// Fragment was absorbed into the pending block
    Accumulating,
    /// The close marker arrived; the whole block is ready for extraction
    Complete(String),
    /// A topic-shift phrase cut the block short
    ///
    /// `block` is the accumulation before the shifting fragment, which is
    /// returned separately as ordinary text.
    ForcedComplete { block: String, fragment: String },
    /// The block outgrew the size limit and was dropped
    Abandoned,
}

#[derive(Debug, Clone)]
struct PendingBlock {
    text: String,
    /// Byte offset just past the open marker
    body_start: usize,
}

/// Per-connection block accumulator
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    open_markers: Vec<String>,
    close_marker: String,
    topic_shift_phrases: Vec<String>,
    separator: String,
    max_block_chars: usize,
    lookbehind: usize,
    tail: String,
    pending: Option<PendingBlock>,
}

impl StreamBuffer {
    pub fn new(config: &ConversationConfig) -> Self {
        let open_markers: Vec<String> = config
            .open_markers
            .iter()
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        let lookbehind = open_markers
            .iter()
            .map(|m| m.len())
            .max()
            .unwrap_or(1)
            .saturating_sub(1);

        Self {
            open_markers,
            close_marker: config.close_marker.trim().to_string(),
            topic_shift_phrases: config
                .topic_shift_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            separator: config.fragment_separator.clone(),
            max_block_chars: config.max_block_chars,
            lookbehind,
            tail: String::new(),
            pending: None,
        }
    }

    /// True while a block is open but not yet closed
    pub fn is_accumulating(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any in-flight block and lookbehind
    pub fn reset(&mut self) {
        self.pending = None;
        self.tail.clear();
    }

    /// Feed the next fragment from the agent
    pub fn push(&mut self, fragment: &str) -> Feed {
        match self.pending.take() {
            Some(pending) => self.push_pending(pending, fragment),
            None => self.push_idle(fragment),
        }
    }

    fn push_idle(&mut self, fragment: &str) -> Feed {
        let combined = format!("{}{}", self.tail, fragment);

        let Some((start, marker_len)) = self.find_open_marker(&combined) else {
            self.tail = tail_of(&combined, self.lookbehind).to_string();
            return Feed::Single(fragment.to_string());
        };

        self.tail.clear();
        let pending = PendingBlock {
            text: combined[start..].to_string(),
            body_start: marker_len,
        };
        tracing::debug!(offset = start, "Specification block opened");

        if self.closes(&pending) {
            return Feed::Complete(pending.text);
        }
        self.hold(pending)
    }

    fn push_pending(&mut self, mut pending: PendingBlock, fragment: &str) -> Feed {
        let before = pending.text.len();
        pending.text.push_str(&self.separator);
        pending.text.push_str(fragment);

        if self.closes(&pending) {
            tracing::debug!(chars = pending.text.len(), "Specification block closed");
            return Feed::Complete(pending.text);
        }

        let lower = fragment.to_lowercase();
        if let Some(phrase) = self
            .topic_shift_phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
        {
            tracing::debug!(phrase = %phrase, "Topic shift forced block completion");
            pending.text.truncate(before);
            return Feed::ForcedComplete {
                block: pending.text,
                fragment: fragment.to_string(),
            };
        }

        self.hold(pending)
    }

    fn hold(&mut self, pending: PendingBlock) -> Feed {
        if pending.text.len() > self.max_block_chars {
            tracing::warn!(
                chars = pending.text.len(),
                limit = self.max_block_chars,
                "Abandoning oversized specification block"
            );
            return Feed::Abandoned;
        }
        self.pending = Some(pending);
        Feed::Accumulating
    }

    fn closes(&self, pending: &PendingBlock) -> bool {
        !self.close_marker.is_empty() && pending.text[pending.body_start..].contains(&self.close_marker)
    }

    /// Earliest open marker in `text`, as (byte offset, marker length)
    fn find_open_marker(&self, text: &str) -> Option<(usize, usize)> {
        // ASCII lowering keeps byte offsets aligned with `text`
        let lower = text.to_ascii_lowercase();
        self.open_markers
            .iter()
            .filter_map(|marker| lower.find(marker.as_str()).map(|pos| (pos, marker.len())))
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
    }
}

/// Last `max_bytes` of `text`, widened to a char boundary
fn tail_of(text: &str, max_bytes: usize) -> &str {
    let mut start = text.len().saturating_sub(max_bytes);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
