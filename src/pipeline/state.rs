//! Pipeline state machine and the events streamed to the front-end.
//!
//! [`PipelineState`] is the coarse phase of a response, reported through
//! [`StreamEvent::Status`].  The terminal front-end shows the `Thinking` and
//! `Speaking` phases inline with the reply.
//!
//! [`StreamEvent`] is everything the response worker tells the front-end,
//! delivered over a `tokio::sync::mpsc` unbounded channel (fire-and-forget,
//! FIFO per response).

use crate::stream::{DisplaySegment, SpeechSegment};

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of one response.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──turn started──▶ Generating ◀──span closed── Reasoning
///                         │    └──────span opened──────▶ │
///                         ▼
///                   stream ended, audio pending ──▶ Speaking
///                   stream ended, nothing to say ─▶ Idle
/// Speaking ──audio drained / stopped──▶ Idle
/// any state ──stream error──▶ Error
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for user input.
    #[default]
    Idle,

    /// Visible text is streaming in.
    Generating,

    /// The model is inside a hidden reasoning span.
    Reasoning,

    /// Text is complete; queued sentences are still being spoken.
    Speaking,

    /// The token stream failed.  The next turn starts from `Idle` again.
    Error,
}

impl PipelineState {
    /// Note printed inline with the reply when the phase is not obvious from
    /// the text itself.
    ///
    /// ```
    /// use voice_chat::pipeline::PipelineState;
    ///
    /// assert_eq!(PipelineState::Speaking.inline_note(), Some("(speaking...)"));
    /// assert_eq!(PipelineState::Generating.inline_note(), None);
    /// ```
    pub fn inline_note(&self) -> Option<&'static str> {
        match self {
            PipelineState::Reasoning => Some("(thinking...)"),
            PipelineState::Speaking => Some("(speaking...)"),
            _ => None,
        }
    }

    /// A short human-readable label for the status line.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Generating => "Generating",
            PipelineState::Reasoning => "Thinking",
            PipelineState::Speaking => "Speaking",
            PipelineState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// StreamEvent
// ---------------------------------------------------------------------------

/// Notification from the response worker to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text (or the reasoning placeholder) to append to the reply.
    Display(DisplaySegment),
    /// The response moved to a new phase.
    Status(PipelineState),
    /// A sentence was handed to the speech dispatcher.
    Sentence(SpeechSegment),
    /// The token stream failed; the reply is truncated.
    Error(String),
    /// Last event of a response.
    Finished,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- PipelineState::inline_note ---

    #[test]
    fn thinking_and_speaking_are_shown_inline() {
        assert_eq!(PipelineState::Reasoning.inline_note(), Some("(thinking...)"));
        assert_eq!(PipelineState::Speaking.inline_note(), Some("(speaking...)"));
        for state in [
            PipelineState::Idle,
            PipelineState::Generating,
            PipelineState::Error,
        ] {
            assert_eq!(state.inline_note(), None, "{state:?}");
        }
    }

    // ---- PipelineState::label ---

    #[test]
    fn labels() {
        assert_eq!(PipelineState::Idle.label(), "Idle");
        assert_eq!(PipelineState::Generating.label(), "Generating");
        assert_eq!(PipelineState::Reasoning.label(), "Thinking");
        assert_eq!(PipelineState::Speaking.label(), "Speaking");
        assert_eq!(PipelineState::Error.label(), "Error");
    }

    // ---- Default ---

    #[test]
    fn default_pipeline_state_is_idle() {
        assert_eq!(PipelineState::default(), PipelineState::Idle);
    }

    #[test]
    fn stream_event_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<StreamEvent>();
    }
}
