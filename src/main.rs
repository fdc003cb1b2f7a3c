//! Application entry point: terminal voice chat.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk.  On first run the defaults are written
//!    out so the model command can be filled in.
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Create the playback queue and open the speaker (degrades to a
//!    discarding queue when no device is available).
//! 5. Build the synthesizer and spawn the speech dispatcher.
//! 6. Build the token source and history store, restore the session.
//! 7. Run the REPL on the runtime until `/quit` or end of input.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use voice_chat::{
    audio::{open_or_degrade, PlaybackQueue},
    config::{AppConfig, AppPaths},
    conversation::HistoryStore,
    llm::{CommandTokenSource, LlmError},
    pipeline::{ChatSession, ResponseOutcome, StreamEvent},
    repl::{ReplCommand, HELP},
    tts::{CommandSynthesizer, SpeechDispatcher, TtsError},
};

type StdinLines = Lines<BufReader<Stdin>>;

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice chat starting up");

    // 2. Configuration
    let paths = AppPaths::new();
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if !paths.settings_file.exists() {
        match config.save() {
            Ok(()) => log::info!("wrote default settings to {}", paths.settings_file.display()),
            Err(e) => log::warn!("could not write default settings: {e}"),
        }
    }

    // 3. Tokio runtime (2 worker threads; the REPL and the response runner
    //    on the blocking pool need little more)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Playback queue + speaker.  The stream handle must outlive the REPL.
    let queue = Arc::new(PlaybackQueue::new(&config.playback, config.tts.sample_rate));
    queue.set_volume(config.tts.initial_volume);
    let _output = open_or_degrade(&queue, config.tts.sample_rate, config.playback.block_size);

    // 5. Speech dispatcher (speech is optional)
    let dispatcher = match CommandSynthesizer::from_config(&config.tts) {
        Ok(synth) => Some(
            SpeechDispatcher::spawn(Arc::new(synth), Arc::clone(&queue))
                .context("failed to spawn speech-dispatch thread")?,
        ),
        Err(TtsError::NotConfigured) => {
            log::warn!("No [tts] command configured; replies will not be spoken");
            None
        }
        Err(e) => return Err(e.into()),
    };

    // 6. Token source, history, session
    let source = match CommandTokenSource::from_config(&config.llm) {
        Ok(source) => source,
        Err(LlmError::NotConfigured) => bail!(
            "no model command configured; set [llm] command in {}",
            paths.settings_file.display()
        ),
        Err(e) => return Err(e.into()),
    };
    let store = HistoryStore::new(config.memory_file(), config.memory.max_history);
    let session = ChatSession::new(&config, Arc::new(source), dispatcher, Some(store));

    // 7. REPL
    rt.block_on(run_repl(session, queue))
}

// ---------------------------------------------------------------------------
// REPL
// ---------------------------------------------------------------------------

async fn run_repl(mut session: ChatSession, queue: Arc<PlaybackQueue>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("voice chat ready; type /help for commands");

    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = match ReplCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            ReplCommand::Say(text) => {
                if converse(&mut session, &queue, &mut lines, &text).await? {
                    break;
                }
            }
            ReplCommand::Stop => session.stop_speech(),
            ReplCommand::Clear => match session.clear() {
                Ok(()) => println!("conversation cleared"),
                Err(e) => println!("could not delete history: {e}"),
            },
            ReplCommand::Recall(n) => {
                for preview in session.recall(n) {
                    println!("  {preview}");
                }
            }
            ReplCommand::Volume(v) => {
                queue.set_volume(v);
                println!("volume {:.1}", queue.volume());
            }
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
        }
    }

    if let Some(dispatcher) = session.dispatcher() {
        log::info!("speech stats: {:?}", dispatcher.stats());
    }
    log::info!("voice chat shutting down");
    Ok(())
}

/// Run one turn, rendering events as they arrive.  `/stop`, `/volume` and
/// `/quit` stay live while the reply streams; `/quit` abandons the reply.
/// Returns `true` on quit.
async fn converse(
    session: &mut ChatSession,
    queue: &PlaybackQueue,
    lines: &mut StdinLines,
    text: &str,
) -> Result<bool> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = match session.start_turn(text, tx) {
        Ok(handle) => handle,
        Err(e) => {
            println!("[error: {e}]");
            return Ok(false);
        }
    };

    let mut quit = false;
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => render(event),
                // Runner finished and dropped its sender.
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match ReplCommand::parse(&line) {
                    Ok(Some(ReplCommand::Stop)) => session.stop_speech(),
                    Ok(Some(ReplCommand::Volume(v))) => queue.set_volume(v),
                    Ok(Some(ReplCommand::Quit)) => {
                        quit = true;
                        break;
                    }
                    Ok(Some(_)) => println!("\n(busy: only /stop, /volume and /quit while replying)"),
                    Ok(None) => {}
                    Err(e) => println!("\n{e}"),
                },
                None => stdin_open = false,
            },
        }
    }

    if quit {
        session.stop_speech();
        // The runner notices the closed channel at its next fragment and
        // drops the model stream.
        drop(rx);
        if let Err(e) = handle.await {
            log::error!("response task failed: {e}");
        }
        println!();
        return Ok(true);
    }

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("response task failed: {e}");
            ResponseOutcome {
                error: Some(e.to_string()),
                ..ResponseOutcome::default()
            }
        }
    };
    session.complete_turn(&outcome);
    Ok(!stdin_open)
}

fn render(event: StreamEvent) {
    match event {
        StreamEvent::Display(segment) => {
            print!("{}", segment.as_str());
            let _ = std::io::stdout().flush();
        }
        StreamEvent::Status(state) => {
            log::debug!("status: {}", state.label());
            if let Some(note) = state.inline_note() {
                print!(" {note} ");
                let _ = std::io::stdout().flush();
            }
        }
        StreamEvent::Sentence(sentence) => log::trace!("sentence: {:?}", sentence.text()),
        StreamEvent::Error(message) => println!("\n[error: {message}]"),
        StreamEvent::Finished => println!(),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
