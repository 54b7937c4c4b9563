//! Incremental message reassembly.
//!
//! Converts the inbound updates of one exchange into a single display string.
//! Servers stream either whole-text snapshots (`content` plus a completion
//! flag) or raw incremental chunks with no structure at all; both produce a
//! monotonically growing `current_text`.
//!
//! Snapshots **replace** the text. The first chunk of an exchange replaces,
//! later chunks **append**, and each append is followed by a cleanup pass that
//! removes whitespace the tokenizer left in front of trailing punctuation.
//!
//! Everything here is synchronous and free of I/O.

use std::sync::LazyLock;

use regex::Regex;

/// Whitespace run directly before a closing punctuation mark at the very end.
static SPACE_BEFORE_TRAILING_PUNCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+([,'`"])$"#).expect("static regex is valid")
});

/// One inbound update for the exchange in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The full current text, plus whether the exchange is finished.
    Snapshot { content: String, is_complete: bool },
    /// A raw incremental piece of text.
    Chunk(String),
}

/// The running display value for the exchange in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAccumulator {
    /// Authoritative, continuously updated display text.
    pub current_text: String,
    /// True between "response started" and "response complete".
    pub is_active: bool,
}

/// Owns the accumulator and applies the reassembly rules.
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    accumulator: StreamAccumulator,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    pub fn current_text(&self) -> &str {
        &self.accumulator.current_text
    }

    pub fn is_active(&self) -> bool {
        self.accumulator.is_active
    }

    /// Reset for a new logical exchange.
    pub fn begin_exchange(&mut self) {
        self.accumulator = StreamAccumulator::default();
    }

    /// Apply one update.
    ///
    /// Returns the finished text when the update completes the exchange; the
    /// accumulator is already cleared for the next exchange at that point.
    pub fn apply(&mut self, update: StreamUpdate) -> Option<String> {
        match update {
            StreamUpdate::Snapshot {
                content,
                is_complete,
            } => self.apply_snapshot(content, is_complete),
            StreamUpdate::Chunk(chunk) => {
                self.apply_chunk(&chunk);
                None
            }
        }
    }

    fn apply_snapshot(&mut self, content: String, is_complete: bool) -> Option<String> {
        if is_complete {
            self.accumulator = StreamAccumulator::default();
            return Some(content);
        }
        self.accumulator.current_text = content;
        self.accumulator.is_active = true;
        None
    }

    fn apply_chunk(&mut self, chunk: &str) {
        if !self.accumulator.is_active {
            self.accumulator.current_text = chunk.to_string();
            self.accumulator.is_active = true;
            return;
        }
        self.accumulator.current_text.push_str(chunk);
        collapse_space_before_trailing_punctuation(&mut self.accumulator.current_text);
    }
}

/// Pure form of [`Reassembler::apply`]: `(previous, update) -> (next, completed)`.
pub fn reassemble(
    previous: &StreamAccumulator,
    update: StreamUpdate,
) -> (StreamAccumulator, Option<String>) {
    let mut reassembler = Reassembler {
        accumulator: previous.clone(),
    };
    let completed = reassembler.apply(update);
    (reassembler.accumulator, completed)
}

/// Delete a trailing `<whitespace>+<punct>` run's whitespace, keeping the
/// punctuation. Punctuation is one of `,` `'` `` ` `` `"`.
pub fn collapse_space_before_trailing_punctuation(text: &mut String) {
    if let Some(caps) = SPACE_BEFORE_TRAILING_PUNCT.captures(text) {
        let (Some(whole), Some(punct)) = (caps.get(0), caps.get(1)) else {
            return;
        };
        let start = whole.start();
        let punct = punct.as_str().to_string();
        text.truncate(start);
        text.push_str(&punct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(content: &str, is_complete: bool) -> StreamUpdate {
        StreamUpdate::Snapshot {
            content: content.to_string(),
            is_complete,
        }
    }

    fn chunk(text: &str) -> StreamUpdate {
        StreamUpdate::Chunk(text.to_string())
    }

    #[test]
    fn test_snapshot_replaces_without_duplication() {
        let mut r = Reassembler::new();
        assert_eq!(r.apply(snapshot("X", false)), None);
        assert_eq!(r.current_text(), "X");
        assert_eq!(r.apply(snapshot("X", false)), None);
        assert_eq!(r.current_text(), "X");
        assert!(r.is_active());
    }

    #[test]
    fn test_snapshot_growth_replaces() {
        let mut r = Reassembler::new();
        r.apply(snapshot("Hi", false));
        r.apply(snapshot("Hi there", false));
        assert_eq!(r.current_text(), "Hi there");
    }

    #[test]
    fn test_complete_snapshot_closes_exchange() {
        let mut r = Reassembler::new();
        r.apply(snapshot("Hi", false));
        let done = r.apply(snapshot("Hi there", true));
        assert_eq!(done.as_deref(), Some("Hi there"));
        assert_eq!(r.current_text(), "");
        assert!(!r.is_active());
    }

    #[test]
    fn test_chunks_append_and_collapse_space_before_comma() {
        let mut r = Reassembler::new();
        for piece in ["Hello", " world", " ,"] {
            r.apply(chunk(piece));
        }
        assert_eq!(r.current_text(), "Hello world,");
    }

    #[test]
    fn test_first_chunk_replaces_stale_text() {
        let mut r = Reassembler::new();
        r.apply(chunk("old"));
        r.begin_exchange();
        r.apply(chunk("new"));
        assert_eq!(r.current_text(), "new");
    }

    #[test]
    fn test_first_chunk_is_not_cleaned() {
        let mut r = Reassembler::new();
        r.apply(chunk("  ,"));
        assert_eq!(r.current_text(), "  ,");
    }

    #[test]
    fn test_cleanup_handles_each_punctuation_mark() {
        for (input, expected) in [
            ("say \"", "say\""),
            ("it '", "it'"),
            ("code `", "code`"),
            ("a\t\n,", "a,"),
        ] {
            let mut text = input.to_string();
            collapse_space_before_trailing_punctuation(&mut text);
            assert_eq!(text, expected);
        }
    }

    #[test]
    fn test_cleanup_only_touches_the_end() {
        let mut text = "a , b".to_string();
        collapse_space_before_trailing_punctuation(&mut text);
        assert_eq!(text, "a , b");

        let mut text = "ends with period .".to_string();
        collapse_space_before_trailing_punctuation(&mut text);
        assert_eq!(text, "ends with period .");
    }

    #[test]
    fn test_pure_reassemble_leaves_previous_untouched() {
        let previous = StreamAccumulator {
            current_text: "Hello".to_string(),
            is_active: true,
        };
        let (next, completed) = reassemble(&previous, chunk(" world"));
        assert_eq!(previous.current_text, "Hello");
        assert_eq!(next.current_text, "Hello world");
        assert!(completed.is_none());
    }
}
