//! Core `TokenSource` trait and `CommandTokenSource` implementation.
//!
//! `CommandTokenSource` runs the model as an external program: the request
//! (messages, temperature, max_tokens) is written to its stdin as one JSON
//! document and its stdout is read incrementally, each read becoming one
//! fragment.  All connection details come from [`LlmConfig`]; nothing is
//! hardcoded.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Serialize;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::conversation::ConversationTurn;

/// Bytes requested per read of the model's stdout.
const READ_CHUNK: usize = 256;

// ---------------------------------------------------------------------------
// LlmError
// ---------------------------------------------------------------------------

/// Errors that can occur while streaming a model response.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No model command is configured.
    #[error("no model command configured (set [llm] command in settings.toml)")]
    NotConfigured,

    #[error("failed to start model process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to encode model request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Reading the stream failed or the model exited unsuccessfully.
    #[error("model stream failed: {0}")]
    Stream(String),
}

// ---------------------------------------------------------------------------
// TokenSource trait
// ---------------------------------------------------------------------------

/// Lazy, finite sequence of text fragments; consumed once, in order.
pub type TokenStream = Box<dyn Iterator<Item = Result<String, LlmError>> + Send>;

/// Opens a streamed model response for a prepared request.
///
/// Implementors must be `Send + Sync` so they can be shared across threads
/// (e.g. wrapped in `Arc<dyn TokenSource>`).
pub trait TokenSource: Send + Sync {
    /// Start generating a reply to `messages` (anchor turn first).
    fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, LlmError>;
}

// ---------------------------------------------------------------------------
// CommandTokenSource
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ModelRequest<'a> {
    messages: &'a [ConversationTurn],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

/// Token source backed by an external model runner (one process per
/// response).
#[derive(Debug, Clone)]
pub struct CommandTokenSource {
    program: String,
    args: Vec<String>,
    temperature: f32,
    max_tokens: usize,
}

impl CommandTokenSource {
    /// Build from [`LlmConfig::command`].
    ///
    /// # Errors
    ///
    /// [`LlmError::NotConfigured`] when the command is empty.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or(LlmError::NotConfigured)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            temperature: config.temperature,
            max_tokens: config.max_response_tokens,
        })
    }
}

impl TokenSource for CommandTokenSource {
    fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, LlmError> {
        let request = serde_json::to_vec(&ModelRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // Detached writer: the model may start printing before it has
            // read the whole request.
            std::thread::Builder::new()
                .name("model-request".into())
                .spawn(move || match stdin.write_all(&request) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                    Err(e) => log::warn!("llm: failed to write request: {e}"),
                })?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::Stream("model stdout not captured".into()))?;

        log::debug!("llm: streaming reply for {} message(s)", messages.len());
        Ok(Box::new(CommandStream {
            child,
            stdout,
            pending: Vec::new(),
            queued: VecDeque::new(),
            finished: false,
        }))
    }
}

/// Iterator over the stdout of a running model process.
struct CommandStream {
    child: Child,
    stdout: ChildStdout,
    /// Bytes of an incomplete UTF-8 sequence from the previous read.
    pending: Vec<u8>,
    /// Items produced at end of stream (tail text, exit error).
    queued: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl CommandStream {
    fn finish(&mut self) {
        self.finished = true;
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.queued.push_back(Ok(tail));
        }
        match self.child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => self
                .queued
                .push_back(Err(LlmError::Stream(format!("model exited with {status}")))),
            Err(e) => self.queued.push_back(Err(LlmError::Stream(e.to_string()))),
        }
    }
}

impl Iterator for CommandStream {
    type Item = Result<String, LlmError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.finished {
                return self.queued.pop_front();
            }
            match self.stdout.read(&mut buf) {
                Ok(0) => self.finish(),
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    let text = take_utf8(&mut self.pending);
                    if !text.is_empty() {
                        return Some(Ok(text));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.finished = true;
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return Some(Err(LlmError::Stream(e.to_string())));
                }
            }
        }
    }
}

impl Drop for CommandStream {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned mid-response.
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Remove and return the longest decodable prefix of `pending`, leaving an
/// incomplete trailing UTF-8 sequence in place.  Invalid bytes become
/// U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                // `from_utf8` already validated this prefix.
                text.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                    None => {
                        pending.drain(..valid);
                        return text;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource  (test-only)
// ---------------------------------------------------------------------------

/// A test double that replays fixed fragments and records every request.
#[cfg(test)]
pub struct ScriptedSource {
    fragments: Vec<String>,
    fail_open: bool,
    fail_after: Option<usize>,
    requests: std::sync::Mutex<Vec<Vec<ConversationTurn>>>,
}

#[cfg(test)]
impl ScriptedSource {
    pub fn new<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail_open: false,
            fail_after: None,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// `stream()` itself fails.
    pub fn failing() -> Self {
        let mut source = Self::new(Vec::<String>::new());
        source.fail_open = true;
        source
    }

    /// Yield `n` fragments, then an error.
    pub fn erroring_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Every request passed to `stream()`, in order.
    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TokenSource for ScriptedSource {
    fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.fail_open {
            return Err(LlmError::NotConfigured);
        }
        let mut items: Vec<Result<String, LlmError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(LlmError::Stream("scripted failure".into())));
        }
        Ok(Box::new(items.into_iter()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> LlmConfig {
        LlmConfig {
            command: vec!["sh".into(), "-c".into(), script.into()],
            ..LlmConfig::default()
        }
    }

    fn collect(stream: TokenStream) -> (String, Vec<String>) {
        let mut text = String::new();
        let mut errors = Vec::new();
        for item in stream {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(e) => errors.push(e.to_string()),
            }
        }
        (text, errors)
    }

    // --- take_utf8 ---

    #[test]
    fn take_utf8_holds_incomplete_sequence() {
        let bytes = "你好".as_bytes();
        let mut pending = bytes[..4].to_vec(); // "你" + first byte of "好"
        assert_eq!(take_utf8(&mut pending), "你");
        assert_eq!(pending, bytes[3..4].to_vec());

        pending.extend_from_slice(&bytes[4..]);
        assert_eq!(take_utf8(&mut pending), "好");
        assert!(pending.is_empty());
    }

    #[test]
    fn take_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'a', 0xFF, b'b'];
        assert_eq!(take_utf8(&mut pending), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    // --- CommandTokenSource ---

    #[test]
    fn empty_command_is_not_configured() {
        assert!(matches!(
            CommandTokenSource::from_config(&LlmConfig::default()),
            Err(LlmError::NotConfigured)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn streams_program_output() {
        let source = CommandTokenSource::from_config(&sh(
            "cat >/dev/null; printf 'Hi <think>hmm</think>there. '; printf '你好。'",
        ))
        .unwrap();
        let (text, errors) = collect(source.stream(&[ConversationTurn::user("x")]).unwrap());
        assert_eq!(text, "Hi <think>hmm</think>there. 你好。");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[cfg(unix)]
    #[test]
    fn request_is_written_as_json() {
        let source = CommandTokenSource::from_config(&sh("cat")).unwrap();
        let messages = [
            ConversationTurn::system("persona"),
            ConversationTurn::user("你好"),
        ];
        let (text, _) = collect(source.stream(&messages).unwrap());

        let request: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][1]["content"], "你好");
        assert_eq!(request["max_tokens"], 600);
        assert_eq!(request["stream"], true);
    }

    #[cfg(unix)]
    #[test]
    fn failed_exit_is_reported_after_output() {
        let source =
            CommandTokenSource::from_config(&sh("cat >/dev/null; printf partial; exit 2")).unwrap();
        let (text, errors) = collect(source.stream(&[]).unwrap());
        assert_eq!(text, "partial");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let config = LlmConfig {
            command: vec!["/nonexistent/model-runner".into()],
            ..LlmConfig::default()
        };
        let source = CommandTokenSource::from_config(&config).unwrap();
        assert!(matches!(source.stream(&[]), Err(LlmError::Spawn(_))));
    }

    // --- ScriptedSource ---

    #[test]
    fn scripted_source_replays_and_records() {
        let source = ScriptedSource::new(["a", "b", "c"]).erroring_after(2);
        let (text, errors) = collect(source.stream(&[ConversationTurn::user("q")]).unwrap());
        assert_eq!(text, "ab");
        assert_eq!(errors.len(), 1);
        assert_eq!(source.requests()[0][0].content(), "q");
    }

    #[test]
    fn source_is_object_safe() {
        let source: Box<dyn TokenSource> = Box::new(ScriptedSource::failing());
        assert!(source.stream(&[]).is_err());
    }
}
