//! Token stream classifier: separates hidden reasoning from visible text.
//!
//! Models that "think out loud" wrap their reasoning in a pair of literal
//! markers (`<think>` … `</think>` by default).  [`TokenClassifier`] consumes
//! the raw fragment stream one fragment at a time and emits only what the
//! user should see.
//!
//! # State machine
//!
//! ```text
//!            open marker
//!   Normal ──────────────▶ Thinking
//!     ▲                       │
//!     └───── close marker ────┘
//! ```
//!
//! * Fragment boundaries are arbitrary, so the longest buffer suffix that
//!   could still grow into the open marker is held back until the next
//!   fragment.
//! * A close marker with no open marker before it is ordinary text.
//! * While `Thinking`, nothing is emitted and the buffer is bounded: once it
//!   passes `reasoning_window_chars` it is cut down to its last
//!   `reasoning_keep_chars` characters.
//! * A single placeholder segment is shown the first time reasoning starts
//!   in a response.
//! * A stream that ends while `Thinking` loses the unterminated span.

use crate::config::StreamConfig;

// ---------------------------------------------------------------------------
// ClassifierState
// ---------------------------------------------------------------------------

/// Whether the classifier is currently inside a hidden reasoning span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierState {
    #[default]
    Normal,
    Thinking,
}

// ---------------------------------------------------------------------------
// DisplaySegment / ClassifierEvent
// ---------------------------------------------------------------------------

/// Visible output destined for the UI.
///
/// Never contains reasoning content or marker text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplaySegment {
    /// Model text outside any reasoning span.  Also spoken.
    Text(String),
    /// Stand-in shown once per response where reasoning was hidden.  Never
    /// spoken.
    Placeholder(String),
}

impl DisplaySegment {
    pub fn as_str(&self) -> &str {
        match self {
            DisplaySegment::Text(text) | DisplaySegment::Placeholder(text) => text,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, DisplaySegment::Placeholder(_))
    }
}

/// Output of [`TokenClassifier::push`] / [`TokenClassifier::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierEvent {
    Display(DisplaySegment),
    /// The first reasoning span of the response has opened.
    ReasoningStarted,
    /// A reasoning span has closed; visible output resumes.
    ReasoningFinished,
}

// ---------------------------------------------------------------------------
// TokenClassifier
// ---------------------------------------------------------------------------

/// Incremental splitter of visible text and hidden reasoning.
///
/// # Example
/// ```rust
/// use voice_chat::config::StreamConfig;
/// use voice_chat::stream::{ClassifierEvent, DisplaySegment, TokenClassifier};
///
/// let mut classifier = TokenClassifier::new(&StreamConfig::default());
/// let mut shown = String::new();
/// for fragment in ["Hi <th", "ink>secret</th", "ink> there"] {
///     for event in classifier.push(fragment) {
///         if let ClassifierEvent::Display(DisplaySegment::Text(t)) = event {
///             shown.push_str(&t);
///         }
///     }
/// }
/// classifier.finish();
/// assert_eq!(shown, "Hi  there");
/// ```
#[derive(Debug, Clone)]
pub struct TokenClassifier {
    state: ClassifierState,
    buf: String,
    open: String,
    close: String,
    placeholder: String,
    window_chars: usize,
    keep_chars: usize,
    placeholder_shown: bool,
}

impl TokenClassifier {
    pub fn new(config: &StreamConfig) -> Self {
        // The kept tail must be long enough to still hold a split close marker.
        let min_keep = config.close_marker.chars().count().saturating_sub(1);
        let keep_chars = config.reasoning_keep_chars.max(min_keep);
        let window_chars = config.reasoning_window_chars.max(keep_chars);

        Self {
            state: ClassifierState::Normal,
            buf: String::new(),
            open: config.open_marker.clone(),
            close: config.close_marker.clone(),
            placeholder: config.placeholder.clone(),
            window_chars,
            keep_chars,
            placeholder_shown: false,
        }
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// Text held back, waiting for more fragments.
    pub fn buffered(&self) -> &str {
        &self.buf
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &str) -> Vec<ClassifierEvent> {
        let mut events = Vec::new();
        if fragment.is_empty() {
            return events;
        }
        self.buf.push_str(fragment);

        loop {
            let progressed = match self.state {
                ClassifierState::Normal => self.step_normal(&mut events),
                ClassifierState::Thinking => self.step_thinking(&mut events),
            };
            if !progressed {
                break;
            }
        }

        events
    }

    /// End of stream.  Flushes held visible text, or drops an unterminated
    /// reasoning span.  The classifier is reset and can serve a new response.
    pub fn finish(&mut self) -> Vec<ClassifierEvent> {
        let mut events = Vec::new();
        match self.state {
            ClassifierState::Normal => {
                let rest = std::mem::take(&mut self.buf);
                emit_text(&mut events, rest);
            }
            ClassifierState::Thinking => {
                log::debug!(
                    "classifier: stream ended inside a reasoning span, discarding {} buffered char(s)",
                    self.buf.chars().count()
                );
                self.buf.clear();
            }
        }

        self.state = ClassifierState::Normal;
        self.placeholder_shown = false;
        events
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// One step in `Normal`.  Returns `true` when a marker was consumed and
    /// the remaining buffer needs another pass.
    fn step_normal(&mut self, events: &mut Vec<ClassifierEvent>) -> bool {
        if let Some(open) = self.buf.find(self.open.as_str()) {
            let rest = self.buf.split_off(open + self.open.len());
            self.buf.truncate(open);
            let before = std::mem::replace(&mut self.buf, rest);
            emit_text(events, before);
            self.enter_thinking(events);
            return true;
        }

        // A close marker outside a span is ordinary text.
        let held = self.partial_open_len();
        let ready = self.buf.len() - held;
        if ready > 0 {
            let rest = self.buf.split_off(ready);
            let visible = std::mem::replace(&mut self.buf, rest);
            emit_text(events, visible);
        }
        false
    }

    /// One step in `Thinking`.  Returns `true` after leaving the span.
    fn step_thinking(&mut self, events: &mut Vec<ClassifierEvent>) -> bool {
        if let Some(close) = self.buf.find(self.close.as_str()) {
            self.buf.drain(..close + self.close.len());
            self.state = ClassifierState::Normal;
            events.push(ClassifierEvent::ReasoningFinished);
            return true;
        }

        let count = self.buf.chars().count();
        if count > self.window_chars {
            let cut = self
                .buf
                .char_indices()
                .nth(count - self.keep_chars)
                .map_or(0, |(idx, _)| idx);
            self.buf.drain(..cut);
        }
        false
    }

    fn enter_thinking(&mut self, events: &mut Vec<ClassifierEvent>) {
        self.state = ClassifierState::Thinking;
        if !self.placeholder_shown {
            self.placeholder_shown = true;
            events.push(ClassifierEvent::ReasoningStarted);
            events.push(ClassifierEvent::Display(DisplaySegment::Placeholder(
                self.placeholder.clone(),
            )));
        }
    }

    /// Length in bytes of the longest buffer suffix that is a proper prefix
    /// of the open marker.
    fn partial_open_len(&self) -> usize {
        (1..self.open.len().min(self.buf.len() + 1))
            .rev()
            .find(|&n| {
                let start = self.buf.len() - n;
                self.buf.is_char_boundary(start)
                    && is_proper_prefix(&self.buf[start..], &self.open)
            })
            .unwrap_or(0)
    }
}

fn is_proper_prefix(candidate: &str, marker: &str) -> bool {
    candidate.len() < marker.len() && marker.starts_with(candidate)
}

fn emit_text(events: &mut Vec<ClassifierEvent>, text: String) {
    if !text.is_empty() {
        events.push(ClassifierEvent::Display(DisplaySegment::Text(text)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PLACEHOLDER: &str = "[thinking process hidden]";

    fn classifier() -> TokenClassifier {
        TokenClassifier::new(&StreamConfig::default())
    }

    /// Run a whole response and return every event.
    fn run(fragments: &[&str]) -> Vec<ClassifierEvent> {
        let mut c = classifier();
        let mut events: Vec<_> = fragments.iter().flat_map(|f| c.push(f)).collect();
        events.extend(c.finish());
        events
    }

    /// Concatenated display output, placeholder included.
    fn shown(events: &[ClassifierEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ClassifierEvent::Display(seg) => Some(seg.as_str()),
                _ => None,
            })
            .collect()
    }

    fn per_char(text: &str) -> Vec<String> {
        text.chars().map(String::from).collect()
    }

    // ---- Identity ----------------------------------------------------------

    #[test]
    fn text_without_markers_passes_through_unchanged() {
        let fragments = ["Hel", "lo, wor", "ld! <b>bold</b>", " a < b", " <", "t"];
        let events = run(&fragments);
        assert_eq!(shown(&events), fragments.concat());
        assert!(!events.contains(&ClassifierEvent::ReasoningStarted));
    }

    #[test]
    fn identity_holds_for_single_character_fragments() {
        let text = "1 < 2, <think-tank> and </thin ice>";
        let fragments = per_char(text);
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        assert_eq!(shown(&run(&refs)), text);
    }

    #[test]
    fn held_partial_marker_is_flushed_at_end() {
        let mut c = classifier();
        let events = c.push("Hello <thi");
        assert_eq!(shown(&events), "Hello ");
        assert_eq!(c.buffered(), "<thi");

        assert_eq!(shown(&c.finish()), "<thi");
        assert_eq!(c.buffered(), "");
    }

    // ---- Extraction --------------------------------------------------------

    #[test]
    fn reasoning_span_is_replaced_by_placeholder() {
        let events = run(&["A<think>B</think>C"]);
        assert_eq!(
            events,
            vec![
                ClassifierEvent::Display(DisplaySegment::Text("A".into())),
                ClassifierEvent::ReasoningStarted,
                ClassifierEvent::Display(DisplaySegment::Placeholder(PLACEHOLDER.into())),
                ClassifierEvent::ReasoningFinished,
                ClassifierEvent::Display(DisplaySegment::Text("C".into())),
            ]
        );
    }

    #[test]
    fn split_open_marker_matches_unsplit_case() {
        let unsplit = run(&["A<think>B</think>C"]);
        assert_eq!(run(&["A<th", "ink>B</think>C"]), unsplit);
    }

    #[test]
    fn split_close_marker_is_detected() {
        let events = run(&["A<think>B</th", "ink>C"]);
        assert_eq!(shown(&events), format!("A{PLACEHOLDER}C"));
    }

    #[test]
    fn any_fragmentation_gives_the_same_display() {
        let text = "A<think>B</think>C";
        let fragments = per_char(text);
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        let events = run(&refs);

        assert_eq!(shown(&events), format!("A{PLACEHOLDER}C"));
        assert!(!shown(&events).contains('B'));
    }

    #[test]
    fn placeholder_shown_once_per_response() {
        let events = run(&["x<think>1</think>y", "<think>2</think>z"]);
        assert_eq!(shown(&events), format!("x{PLACEHOLDER}yz"));

        let started = events
            .iter()
            .filter(|e| **e == ClassifierEvent::ReasoningStarted)
            .count();
        let finished = events
            .iter()
            .filter(|e| **e == ClassifierEvent::ReasoningFinished)
            .count();
        assert_eq!(started, 1);
        assert_eq!(finished, 2);
    }

    #[test]
    fn leading_reasoning_emits_no_empty_segment() {
        let events = run(&["<think>plan</think>", "Answer."]);
        assert_eq!(
            events[0],
            ClassifierEvent::ReasoningStarted,
            "no empty text segment before the span"
        );
        assert_eq!(shown(&events), format!("{PLACEHOLDER}Answer."));
    }

    #[test]
    fn unmatched_close_marker_stays_visible() {
        let events = run(&["plan done</think>Hello"]);
        assert_eq!(shown(&events), "plan done</think>Hello");

        let events = run(&["reasoning text</th", "ink>Answer."]);
        assert_eq!(shown(&events), "reasoning text</think>Answer.");
        assert!(events
            .iter()
            .all(|e| *e != ClassifierEvent::ReasoningFinished));
    }

    #[test]
    fn reasoning_content_never_displayed_with_cjk_text() {
        let events = run(&["你好<think>", "这是推理内容", "</think>世界。"]);
        let display = shown(&events);
        assert_eq!(display, format!("你好{PLACEHOLDER}世界。"));
        assert!(!display.contains("推理"));
    }

    // ---- State -------------------------------------------------------------

    #[test]
    fn state_alternates() {
        let mut c = classifier();
        assert_eq!(c.state(), ClassifierState::Normal);
        c.push("<think>");
        assert_eq!(c.state(), ClassifierState::Thinking);
        c.push("...</think>");
        assert_eq!(c.state(), ClassifierState::Normal);
    }

    // ---- Unterminated span -------------------------------------------------

    #[test]
    fn reasoning_buffer_stays_bounded() {
        let mut c = classifier();
        c.push("A<think>");
        for _ in 0..200 {
            let events = c.push("lots of reasoning ");
            assert!(events.is_empty());
            assert!(c.buffered().chars().count() <= 50);
        }
        assert_eq!(c.state(), ClassifierState::Thinking);
    }

    #[test]
    fn close_marker_found_after_truncation() {
        let mut c = classifier();
        c.push("<think>");
        c.push(&"思".repeat(120));
        let mut events = c.push("</thi");
        events.extend(c.push("nk>visible"));
        events.extend(c.finish());
        assert_eq!(shown(&events), "visible");
    }

    #[test]
    fn unterminated_span_discarded_at_end() {
        let mut c = classifier();
        let mut events = c.push("Before<think>never closed");
        events.extend(c.finish());

        assert_eq!(shown(&events), format!("Before{PLACEHOLDER}"));
        assert_eq!(c.state(), ClassifierState::Normal);
        assert_eq!(c.buffered(), "");
    }

    #[test]
    fn finish_resets_for_next_response() {
        let mut c = classifier();
        c.push("<think>x</think>one");
        c.finish();

        let events = c.push("<think>y</think>two");
        assert!(events.contains(&ClassifierEvent::ReasoningStarted));
        assert_eq!(shown(&events), format!("{PLACEHOLDER}two"));
    }

    #[test]
    fn custom_markers() {
        let config = StreamConfig {
            open_marker: "[[".into(),
            close_marker: "]]".into(),
            placeholder: "…".into(),
            ..StreamConfig::default()
        };
        let mut c = TokenClassifier::new(&config);
        let mut events = c.push("a[");
        events.extend(c.push("[hidden]"));
        events.extend(c.push("]b"));
        events.extend(c.finish());
        assert_eq!(shown(&events), "a…b");
    }

    #[test]
    fn empty_fragment_is_ignored() {
        let mut c = classifier();
        assert!(c.push("").is_empty());
        assert_eq!(c.state(), ClassifierState::Normal);
    }
}
