//! Chat session: ties the persona, rolling history, token source, speech
//! dispatcher and history store together for one conversation.
//!
//! A turn has two halves so the front-end can stay responsive (and handle
//! `/stop`) while the response streams:
//!
//! 1. [`ChatSession::start_turn`] records the user turn, builds and prunes
//!    the request, opens the token stream and spawns the response runner.
//! 2. [`ChatSession::complete_turn`] stores the visible reply and persists
//!    the history.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, StreamConfig};
use crate::conversation::{
    prune, CharRatioEstimator, ConversationHistory, ConversationTurn, HistoryStore, StoreError,
};
use crate::llm::{LlmError, TokenSource};
use crate::tts::SpeechDispatcher;

use super::runner::{spawn_response, ResponseOutcome};
use super::state::StreamEvent;

/// Characters shown per turn by [`ChatSession::recall`].
pub const RECALL_PREVIEW_CHARS: usize = 15;

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

pub struct ChatSession {
    persona: ConversationTurn,
    history: ConversationHistory,
    max_history: usize,
    budget: usize,
    estimator: CharRatioEstimator,
    stream_config: StreamConfig,
    source: Arc<dyn TokenSource>,
    dispatcher: Option<SpeechDispatcher>,
    store: Option<HistoryStore>,
}

impl ChatSession {
    /// Create a session, restoring history from `store` when present.
    ///
    /// An unreadable history file is logged and the session starts empty.
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn TokenSource>,
        dispatcher: Option<SpeechDispatcher>,
        store: Option<HistoryStore>,
    ) -> Self {
        let history = match store.as_ref().map(HistoryStore::load) {
            Some(Ok(history)) => history,
            Some(Err(e)) => {
                log::warn!("session: could not restore history ({e}), starting fresh");
                ConversationHistory::new()
            }
            None => ConversationHistory::new(),
        };
        if !history.is_empty() {
            log::info!("session: restored {} turn(s)", history.len());
        }

        Self {
            persona: ConversationTurn::system(config.persona.system_prompt.clone()),
            history,
            max_history: config.memory.max_history,
            budget: config.llm.prompt_budget(),
            estimator: CharRatioEstimator::new(config.llm.tokens_per_char),
            stream_config: config.stream.clone(),
            source,
            dispatcher,
            store,
        }
    }

    /// Persona followed by the history, pruned to the prompt budget.
    pub fn build_request(&self) -> Vec<ConversationTurn> {
        let mut request = Vec::with_capacity(self.history.len() + 1);
        request.push(self.persona.clone());
        request.extend_from_slice(&self.history);
        prune(&request, self.budget, &self.estimator)
    }

    /// Record `user_text` and start streaming the reply.
    ///
    /// Must be called from within a tokio runtime.  Events for the response
    /// arrive on `events`; the handle resolves once text is complete and
    /// every sentence has been spoken or skipped.
    ///
    /// # Errors
    ///
    /// When the token stream cannot be opened the user turn is rolled back
    /// and the error returned.
    pub fn start_turn(
        &mut self,
        user_text: &str,
        events: UnboundedSender<StreamEvent>,
    ) -> Result<JoinHandle<ResponseOutcome>, LlmError> {
        self.history.push(ConversationTurn::user(user_text));
        let request = self.build_request();
        log::debug!(
            "session: request of {} turn(s) for {} in history",
            request.len(),
            self.history.len()
        );

        let stream = match self.source.stream(&request) {
            Ok(stream) => stream,
            Err(e) => {
                self.history.pop();
                return Err(e);
            }
        };

        let speech = self
            .dispatcher
            .as_ref()
            .and_then(SpeechDispatcher::begin_response);
        Ok(spawn_response(
            stream,
            self.stream_config.clone(),
            speech,
            events,
        ))
    }

    /// Store the visible reply (reasoning already removed) and persist.
    ///
    /// A blank reply leaves the history untouched.
    pub fn complete_turn(&mut self, outcome: &ResponseOutcome) {
        if outcome.visible.trim().is_empty() {
            log::info!("session: empty reply, nothing stored");
            return;
        }
        self.history
            .push(ConversationTurn::assistant(outcome.visible.trim()));

        let excess = self.history.len().saturating_sub(self.max_history);
        self.history.drain(..excess);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.history) {
                log::warn!("session: failed to save history: {e}");
            }
        }
    }

    /// Role-labelled previews of the last `n` turns, oldest first.
    pub fn recall(&self, n: usize) -> Vec<String> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..]
            .iter()
            .map(|turn| {
                let mut preview: String =
                    turn.content().chars().take(RECALL_PREVIEW_CHARS).collect();
                if turn.content().chars().count() > RECALL_PREVIEW_CHARS {
                    preview.push_str("...");
                }
                format!("{}: {preview}", turn.role().as_str())
            })
            .collect()
    }

    /// Forget the conversation, in memory and on disk.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.history.clear();
        match &self.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    /// Stop speaking.  The response text keeps streaming.
    pub fn stop_speech(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.stop();
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn dispatcher(&self) -> Option<&SpeechDispatcher> {
        self.dispatcher.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
