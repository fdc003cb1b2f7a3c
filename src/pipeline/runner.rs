//! Response runner: drives one model response from token stream to
//! display events and spoken sentences.
//!
//! # Flow
//!
//! ```text
//! TokenStream (blocking iterator)
//!   └─▶ TokenClassifier::push ──Display──▶ StreamEvent::Display  (front-end)
//!                │ Text only
//!                ▼
//!         SentenceSegmenter::push ──SpeechSegment──▶ ResponseSpeech::speak
//!                                                      (dispatch thread)
//! end of stream
//!   └─▶ classifier.finish + segmenter.finish → Speaking → wait_done → Idle
//! ```
//!
//! The token stream blocks between fragments, so the runner lives on the
//! blocking thread pool via `tokio::task::spawn_blocking`; the async side
//! only receives events.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::llm::TokenStream;
use crate::stream::{
    ClassifierEvent, ClassifierState, DisplaySegment, SentenceSegmenter, SpeechSegment,
    TokenClassifier,
};
use crate::tts::ResponseSpeech;

use super::state::{PipelineState, StreamEvent};

// ---------------------------------------------------------------------------
// ResponseOutcome
// ---------------------------------------------------------------------------

/// Summary of a finished response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseOutcome {
    /// Concatenated visible text, reasoning removed, placeholder excluded.
    pub visible: String,
    /// Number of sentences handed to the speech dispatcher.
    pub sentences: usize,
    /// Whether a reasoning span was hidden.
    pub reasoning_hidden: bool,
    /// Stream failure that cut the response short.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// ResponseRunner
// ---------------------------------------------------------------------------

/// Per-response classifier + segmenter state.
struct ResponseRunner<'a> {
    classifier: TokenClassifier,
    segmenter: SentenceSegmenter,
    speech: Option<&'a ResponseSpeech>,
    events: &'a UnboundedSender<StreamEvent>,
    state: PipelineState,
    outcome: ResponseOutcome,
}

impl<'a> ResponseRunner<'a> {
    fn new(
        config: &StreamConfig,
        speech: Option<&'a ResponseSpeech>,
        events: &'a UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            classifier: TokenClassifier::new(config),
            segmenter: SentenceSegmenter::new(),
            speech,
            events,
            state: PipelineState::Idle,
            outcome: ResponseOutcome::default(),
        }
    }

    /// Fire-and-forget; a closed receiver is noticed between fragments.
    fn send(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            self.state = state;
            self.send(StreamEvent::Status(state));
        }
    }

    fn handle(&mut self, events: Vec<ClassifierEvent>) {
        for event in events {
            match event {
                ClassifierEvent::Display(DisplaySegment::Text(text)) => {
                    self.outcome.visible.push_str(&text);
                    let sentence = self.segmenter.push(&text);
                    self.send(StreamEvent::Display(DisplaySegment::Text(text)));
                    if let Some(sentence) = sentence {
                        self.speak(sentence);
                    }
                }
                ClassifierEvent::Display(placeholder) => {
                    self.send(StreamEvent::Display(placeholder));
                }
                ClassifierEvent::ReasoningStarted => {
                    self.outcome.reasoning_hidden = true;
                }
                ClassifierEvent::ReasoningFinished => {}
            }
        }

        let phase = match self.classifier.state() {
            ClassifierState::Normal => PipelineState::Generating,
            ClassifierState::Thinking => PipelineState::Reasoning,
        };
        self.set_state(phase);
    }

    fn speak(&mut self, sentence: SpeechSegment) {
        log::debug!("pipeline: sentence ready {:?}", sentence.text());
        self.outcome.sentences += 1;
        self.send(StreamEvent::Sentence(sentence.clone()));
        if let Some(speech) = self.speech {
            if !speech.speak(sentence) {
                log::warn!("pipeline: speech dispatcher is gone, sentence dropped");
            }
        }
    }

    fn run(mut self, stream: TokenStream) -> ResponseOutcome {
        self.set_state(PipelineState::Generating);

        for item in stream {
            if self.events.is_closed() {
                // Returning drops the stream, which ends the model process.
                log::info!("pipeline: event receiver dropped, abandoning response");
                return self.outcome;
            }
            match item {
                Ok(fragment) => {
                    let events = self.classifier.push(&fragment);
                    self.handle(events);
                }
                Err(e) => {
                    log::warn!("pipeline: token stream failed: {e}");
                    self.outcome.error = Some(e.to_string());
                    self.send(StreamEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        let events = self.classifier.finish();
        self.handle(events);
        if let Some(last) = self.segmenter.finish() {
            self.speak(last);
        }

        if let Some(speech) = self.speech.filter(|_| self.outcome.sentences > 0) {
            self.set_state(PipelineState::Speaking);
            speech.wait_done();
        }

        let end = if self.outcome.error.is_some() {
            PipelineState::Error
        } else {
            PipelineState::Idle
        };
        self.set_state(end);
        self.send(StreamEvent::Finished);

        log::info!(
            "pipeline: response done, {} char(s), {} sentence(s){}",
            self.outcome.visible.chars().count(),
            self.outcome.sentences,
            if self.outcome.reasoning_hidden {
                ", reasoning hidden"
            } else {
                ""
            }
        );
        self.outcome
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Consume `stream` to the end on the calling thread.
///
/// Visible text is reported as [`StreamEvent::Display`]; every finished
/// sentence goes to `speech` (when present) in order.  Once text is complete
/// the call blocks until the dispatcher has spoken or skipped every sentence.
/// Stream errors end the response early but never propagate.
///
/// Dropping the event receiver abandons the response: the stream is dropped
/// at the next fragment and nothing further is spoken.
pub fn run_response(
    stream: TokenStream,
    config: &StreamConfig,
    speech: Option<&ResponseSpeech>,
    events: &UnboundedSender<StreamEvent>,
) -> ResponseOutcome {
    ResponseRunner::new(config, speech, events).run(stream)
}

/// [`run_response`] on the blocking thread pool.
pub fn spawn_response(
    stream: TokenStream,
    config: StreamConfig,
    speech: Option<ResponseSpeech>,
    events: UnboundedSender<StreamEvent>,
) -> JoinHandle<ResponseOutcome> {
    tokio::task::spawn_blocking(move || {
        run_response(stream, &config, speech.as_ref(), &events)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
