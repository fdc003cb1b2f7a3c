//! Sentence segmenter: groups visible text into speakable units.
//!
//! Visible text is appended to a running buffer.  As soon as a piece of
//! *newly added* text contains a sentence terminator the whole buffer is
//! released as one [`SpeechSegment`].  Whatever is left at the end of the
//! stream is released by [`SentenceSegmenter::finish`].  Blank segments are
//! never produced.

/// Characters that close a sentence (CJK and ASCII punctuation, newline).
pub const SENTENCE_TERMINATORS: &[char] = &[
    '。', '！', '？', '；', '!', '?', '.', ':', '：', '\n',
];

// ---------------------------------------------------------------------------
// SpeechSegment
// ---------------------------------------------------------------------------

/// A sentence-sized slice of visible text queued for synthesis.
///
/// Guaranteed to contain at least one non-whitespace character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment(String);

impl SpeechSegment {
    /// Wrap `text`, or `None` when it is empty or whitespace-only.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// ---------------------------------------------------------------------------
// SentenceSegmenter
// ---------------------------------------------------------------------------

/// # Example
/// ```rust
/// use voice_chat::stream::SentenceSegmenter;
///
/// let mut seg = SentenceSegmenter::new();
/// assert!(seg.push("Hello").is_none());
/// assert_eq!(seg.push(" world. And").unwrap().text(), "Hello world. And");
/// assert_eq!(seg.push(" more").map(|s| s.into_string()), None);
/// assert_eq!(seg.finish().unwrap().text(), " more");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    buf: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append visible text; returns a segment when `text` closes a sentence.
    pub fn push(&mut self, text: &str) -> Option<SpeechSegment> {
        self.buf.push_str(text);
        if text.contains(SENTENCE_TERMINATORS) {
            SpeechSegment::new(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// End of stream: release any remaining non-blank text.
    pub fn finish(&mut self) -> Option<SpeechSegment> {
        SpeechSegment::new(std::mem::take(&mut self.buf))
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
