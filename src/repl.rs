//! Command parsing for the terminal front-end.
//!
//! Any line not starting with `/` is something to say to the assistant.
//!
//! | Input | Command |
//! |-------|---------|
//! | `/stop` | stop speaking (text keeps streaming) |
//! | `/clear` | forget the conversation |
//! | `/recall [n]` | preview the last `n` turns (default 4) |
//! | `/volume <v>` | set playback volume, 0.0 – 10.0 |
//! | `/help` | list commands |
//! | `/quit` | exit |

use thiserror::Error;

/// Turns shown by `/recall` without an argument.
pub const DEFAULT_RECALL_TURNS: usize = 4;

pub const HELP: &str = "\
commands:
  /stop          stop speaking
  /clear         forget the conversation
  /recall [n]    show the last n turns (default 4)
  /volume <v>    set volume (0.0 - 10.0)
  /help          show this help
  /quit          exit
anything else is sent to the assistant";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Say(String),
    Stop,
    Clear,
    Recall(usize),
    Volume(f32),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReplError {
    #[error("unknown command: {0} (try /help)")]
    UnknownCommand(String),

    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

impl ReplCommand {
    /// Parse one input line.  Blank lines yield `Ok(None)`.
    ///
    /// ```
    /// use voice_chat::repl::ReplCommand;
    ///
    /// assert_eq!(ReplCommand::parse("/volume 1.5").unwrap(), Some(ReplCommand::Volume(1.5)));
    /// assert_eq!(
    ///     ReplCommand::parse(" hi there ").unwrap(),
    ///     Some(ReplCommand::Say("hi there".into()))
    /// );
    /// assert_eq!(ReplCommand::parse("   ").unwrap(), None);
    /// ```
    pub fn parse(line: &str) -> Result<Option<Self>, ReplError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Some(ReplCommand::Say(line.to_string())));
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let parsed = match name {
            "stop" => ReplCommand::Stop,
            "clear" => ReplCommand::Clear,
            "help" => ReplCommand::Help,
            "quit" | "exit" => ReplCommand::Quit,
            "recall" => match arg {
                Some(n) => ReplCommand::Recall(
                    n.parse()
                        .map_err(|_| ReplError::InvalidNumber(n.to_string()))?,
                ),
                None => ReplCommand::Recall(DEFAULT_RECALL_TURNS),
            },
            "volume" => {
                let v = arg.ok_or(ReplError::MissingArgument("volume"))?;
                let volume: f32 = v
                    .parse()
                    .map_err(|_| ReplError::InvalidNumber(v.to_string()))?;
                if !volume.is_finite() {
                    return Err(ReplError::InvalidNumber(v.to_string()));
                }
                ReplCommand::Volume(volume)
            }
            other => return Err(ReplError::UnknownCommand(format!("/{other}"))),
        };
        Ok(Some(parsed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ReplCommand {
        ReplCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn plain_text_is_said() {
        assert_eq!(parse("你好"), ReplCommand::Say("你好".into()));
        assert_eq!(parse("  what time is it?\n"), ReplCommand::Say("what time is it?".into()));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("/stop"), ReplCommand::Stop);
        assert_eq!(parse("/clear"), ReplCommand::Clear);
        assert_eq!(parse("/help"), ReplCommand::Help);
        assert_eq!(parse("/quit"), ReplCommand::Quit);
        assert_eq!(parse("/exit"), ReplCommand::Quit);
    }

    #[test]
    fn recall_defaults_and_argument() {
        assert_eq!(parse("/recall"), ReplCommand::Recall(DEFAULT_RECALL_TURNS));
        assert_eq!(parse("/recall 10"), ReplCommand::Recall(10));
        assert_eq!(
            ReplCommand::parse("/recall many"),
            Err(ReplError::InvalidNumber("many".into()))
        );
    }

    #[test]
    fn volume_requires_a_finite_number() {
        assert_eq!(parse("/volume 3"), ReplCommand::Volume(3.0));
        assert_eq!(
            ReplCommand::parse("/volume"),
            Err(ReplError::MissingArgument("volume"))
        );
        assert_eq!(
            ReplCommand::parse("/volume loud"),
            Err(ReplError::InvalidNumber("loud".into()))
        );
        assert!(ReplCommand::parse("/volume NaN").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert_eq!(
            ReplCommand::parse("/dance"),
            Err(ReplError::UnknownCommand("/dance".into()))
        );
    }

    #[test]
    fn blank_line_is_nothing() {
        assert_eq!(ReplCommand::parse("").unwrap(), None);
        assert_eq!(ReplCommand::parse(" \t ").unwrap(), None);
    }
}
