//! Speech dispatcher: one dedicated thread turning finished sentences into
//! queued audio, strictly in order.
//!
//! ```text
//! runner thread ──ResponseSpeech::speak──▶ mpsc ──▶ "speech-dispatch" thread
//!                                                   synthesize → resample
//!                                                   → PlaybackQueue::enqueue
//!                                                   → PlaybackQueue::wait
//! ```
//!
//! A single worker consumes a FIFO channel, so at most one synthesis +
//! enqueue is ever in flight and sentence N+1 is not synthesized before
//! sentence N has drained from the queue.
//!
//! Each response is an *utterance* with its own id.  Starting one
//! ([`SpeechDispatcher::begin_response`]) lowers the queue's cancellation
//! flag once every command sent before it has been handled.  After a
//! [`SpeechDispatcher::stop`], the remaining sentences of the current
//! utterance are skipped without being synthesized.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::{resample, PlaybackError, PlaybackQueue, WaitOutcome};
use crate::stream::SpeechSegment;

use super::SpeechSynthesizer;

enum DispatchCommand {
    Begin(u64),
    Speak(u64, SpeechSegment),
    Barrier(mpsc::Sender<()>),
}

// ---------------------------------------------------------------------------
// DispatchStats
// ---------------------------------------------------------------------------

/// Counters shared with the worker thread.
#[derive(Debug, Default)]
struct DispatchStats {
    spoken: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Sentences whose audio fully drained to the device.
    pub spoken: usize,
    /// Sentences dropped because synthesis failed, panicked or was empty.
    pub failed: usize,
    /// Sentences not (fully) spoken because playback was stopped.
    pub skipped: usize,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            spoken: self.spoken.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseSpeech
// ---------------------------------------------------------------------------

/// Sending half for one utterance, handed to the response runner.
#[derive(Clone)]
pub struct ResponseSpeech {
    id: u64,
    tx: mpsc::Sender<DispatchCommand>,
}

impl ResponseSpeech {
    /// Queue `segment` behind every segment sent before it.  Returns `false`
    /// if the dispatcher has shut down.
    pub fn speak(&self, segment: SpeechSegment) -> bool {
        self.tx
            .send(DispatchCommand::Speak(self.id, segment))
            .is_ok()
    }

    /// Block until every segment sent so far has been spoken or skipped.
    pub fn wait_done(&self) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(DispatchCommand::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv().is_ok()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

// ---------------------------------------------------------------------------
// SpeechDispatcher
// ---------------------------------------------------------------------------

/// Owner of the dispatch thread.  Dropping it closes the channel and joins
/// the thread once every outstanding [`ResponseSpeech`] is gone.
pub struct SpeechDispatcher {
    tx: Option<mpsc::Sender<DispatchCommand>>,
    queue: Arc<PlaybackQueue>,
    stats: Arc<DispatchStats>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl SpeechDispatcher {
    /// Start the `speech-dispatch` thread.
    pub fn spawn(
        synth: Arc<dyn SpeechSynthesizer>,
        queue: Arc<PlaybackQueue>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(DispatchStats::default());

        let worker = {
            let queue = Arc::clone(&queue);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("speech-dispatch".into())
                .spawn(move || run_worker(rx, synth.as_ref(), &queue, &stats))?
        };

        Ok(Self {
            tx: Some(tx),
            queue,
            stats,
            next_id: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    /// Start a new utterance.  Sentences of earlier utterances still waiting
    /// in the channel are skipped once this is reached.
    pub fn begin_response(&self) -> Option<ResponseSpeech> {
        let tx = self.tx.as_ref()?.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tx.send(DispatchCommand::Begin(id)).ok()?;
        Some(ResponseSpeech { id, tx })
    }

    /// Stop playback: discard queued audio and skip the rest of the current
    /// utterance.
    pub fn stop(&self) {
        self.queue.stop();
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for SpeechDispatcher {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("dispatcher: worker thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Spoken {
    Done,
    Aborted,
}

fn run_worker(
    rx: mpsc::Receiver<DispatchCommand>,
    synth: &dyn SpeechSynthesizer,
    queue: &PlaybackQueue,
    stats: &DispatchStats,
) {
    let mut current = None;
    let mut aborted = false;

    for command in rx {
        match command {
            DispatchCommand::Begin(id) => {
                queue.resume();
                current = Some(id);
                aborted = false;
            }
            DispatchCommand::Speak(id, segment) => {
                if current != Some(id) || aborted {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if let Spoken::Aborted = speak(synth, queue, stats, &segment) {
                    log::info!("dispatcher: utterance {id} stopped");
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                    aborted = true;
                }
            }
            DispatchCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    log::debug!("dispatcher: channel closed, worker exiting");
}

fn speak(
    synth: &dyn SpeechSynthesizer,
    queue: &PlaybackQueue,
    stats: &DispatchStats,
    segment: &SpeechSegment,
) -> Spoken {
    if queue.is_cancelled() {
        return Spoken::Aborted;
    }

    let samples = match catch_unwind(AssertUnwindSafe(|| synth.synthesize(segment.text()))) {
        Ok(Ok(samples)) if !samples.is_empty() => samples,
        Ok(Ok(_)) => {
            log::warn!("dispatcher: empty audio for {:?}, skipping", segment.text());
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return Spoken::Done;
        }
        Ok(Err(e)) => {
            log::warn!("dispatcher: synthesis failed for {:?}: {e}", segment.text());
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return Spoken::Done;
        }
        Err(_) => {
            log::error!("dispatcher: synthesis panicked for {:?}", segment.text());
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return Spoken::Done;
        }
    };

    // Stopped while synthesizing: the audio is stale.
    if queue.is_cancelled() {
        return Spoken::Aborted;
    }

    let samples = resample(&samples, synth.sample_rate(), queue.sample_rate());
    match queue.enqueue_samples(&samples) {
        Ok(_) => {}
        Err(PlaybackError::Cancelled) => return Spoken::Aborted,
        Err(e) => {
            log::error!("dispatcher: enqueue failed: {e}");
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return Spoken::Done;
        }
    }

    match queue.wait() {
        WaitOutcome::Drained => {
            stats.spoken.fetch_add(1, Ordering::Relaxed);
            Spoken::Done
        }
        WaitOutcome::Cancelled => Spoken::Aborted,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackConfig;
    use crate::tts::MockSynthesizer;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;

    const RATE: u32 = 16_000;

    fn seg(text: &str) -> SpeechSegment {
        SpeechSegment::new(text).unwrap()
    }

    fn new_queue() -> Arc<PlaybackQueue> {
        let config = PlaybackConfig {
            block_size: 4,
            max_queued_blocks: 2,
            wait_poll_ms: 2,
        };
        let queue = Arc::new(PlaybackQueue::new(&config, RATE));
        queue.set_volume(1.0);
        queue
    }

    /// Stand-in for the audio device: drains the queue on its own thread
    /// and records every non-silent sample.
    struct FakeDevice {
        played: Arc<Mutex<Vec<f32>>>,
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl FakeDevice {
        fn start(queue: &Arc<PlaybackQueue>) -> Self {
            let played = Arc::new(Mutex::new(Vec::new()));
            let running = Arc::new(AtomicBool::new(true));
            let thread = {
                let queue = Arc::clone(queue);
                let played = Arc::clone(&played);
                let running = Arc::clone(&running);
                std::thread::spawn(move || {
                    let mut out = [0.0f32; 5];
                    while running.load(Ordering::Acquire) {
                        queue.fill(&mut out, 1);
                        played
                            .lock()
                            .unwrap()
                            .extend(out.iter().copied().filter(|&s| s != 0.0));
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            };
            Self {
                played,
                running,
                thread: Some(thread),
            }
        }

        fn played(&self) -> Vec<f32> {
            self.played.lock().unwrap().clone()
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(t) = self.thread.take() {
                t.join().unwrap();
            }
        }
    }

    #[test]
    fn plays_segments_in_dispatch_order() {
        let queue = new_queue();
        let device = FakeDevice::start(&queue);
        let synth = Arc::new(MockSynthesizer::new(RATE));
        let dispatcher = SpeechDispatcher::spawn(synth.clone(), Arc::clone(&queue)).unwrap();

        let texts = ["First one.", "Second!", "第三句。", "last"];
        let speech = dispatcher.begin_response().unwrap();
        for text in texts {
            assert!(speech.speak(seg(text)));
        }
        assert!(speech.wait_done());

        let expected: Vec<f32> = texts
            .iter()
            .flat_map(|t| MockSynthesizer::samples_for(t))
            .collect();
        assert_eq!(device.played(), expected);
        assert_eq!(synth.calls(), texts);
        assert_eq!(
            dispatcher.stats(),
            DispatchSnapshot {
                spoken: 4,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[test]
    fn failures_and_panics_are_skipped() {
        let queue = new_queue();
        let device = FakeDevice::start(&queue);
        let synth = Arc::new(
            MockSynthesizer::new(RATE)
                .failing_on("bad.")
                .panicking_on("worse."),
        );
        let dispatcher = SpeechDispatcher::spawn(synth, Arc::clone(&queue)).unwrap();

        let speech = dispatcher.begin_response().unwrap();
        for text in ["a.", "bad.", "worse.", "b."] {
            speech.speak(seg(text));
        }
        assert!(speech.wait_done());

        let expected: Vec<f32> = ["a.", "b."]
            .iter()
            .flat_map(|t| MockSynthesizer::samples_for(t))
            .collect();
        assert_eq!(device.played(), expected);
        let stats = dispatcher.stats();
        assert_eq!(stats.spoken, 2);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn stop_skips_rest_of_utterance() {
        let queue = new_queue();
        let _device = FakeDevice::start(&queue);
        let synth = Arc::new(MockSynthesizer::new(RATE).with_delay(Duration::from_millis(30)));
        let dispatcher = SpeechDispatcher::spawn(synth.clone(), Arc::clone(&queue)).unwrap();

        let speech = dispatcher.begin_response().unwrap();
        for i in 0..5 {
            speech.speak(seg(&format!("sentence {i}.")));
        }
        while synth.calls().is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        dispatcher.stop();
        assert!(speech.wait_done());

        // The in-flight sentence finished synthesizing; nothing after it was
        // even synthesized.
        assert_eq!(synth.calls().len(), 1);
        assert!(queue.is_empty());
        assert!(queue.is_cancelled());
        let stats = dispatcher.stats();
        assert_eq!(stats.spoken, 0);
        assert_eq!(stats.skipped, 5);
    }

    #[test]
    fn new_response_resumes_after_stop() {
        let queue = new_queue();
        let device = FakeDevice::start(&queue);
        let synth = Arc::new(MockSynthesizer::new(RATE));
        let dispatcher = SpeechDispatcher::spawn(synth, Arc::clone(&queue)).unwrap();

        let first = dispatcher.begin_response().unwrap();
        assert!(first.wait_done());
        dispatcher.stop();
        // Stale segment of the first utterance: the flag is still raised
        // when the worker reaches it.
        first.speak(seg("stale."));
        assert!(first.wait_done());

        let second = dispatcher.begin_response().unwrap();
        assert_ne!(first.id(), second.id());
        second.speak(seg("fresh."));
        assert!(second.wait_done());

        assert!(!queue.is_cancelled());
        assert_eq!(device.played(), MockSynthesizer::samples_for("fresh."));
    }

    #[test]
    fn segments_of_superseded_response_are_skipped() {
        let queue = new_queue();
        let device = FakeDevice::start(&queue);
        let synth = Arc::new(MockSynthesizer::new(RATE));
        let dispatcher = SpeechDispatcher::spawn(synth.clone(), Arc::clone(&queue)).unwrap();

        let old = dispatcher.begin_response().unwrap();
        let new = dispatcher.begin_response().unwrap();
        old.speak(seg("old."));
        new.speak(seg("new."));
        assert!(new.wait_done());

        assert_eq!(synth.calls(), vec!["new."]);
        assert_eq!(device.played(), MockSynthesizer::samples_for("new."));
        assert_eq!(dispatcher.stats().skipped, 1);
    }

    #[test]
    fn audio_is_resampled_to_device_rate() {
        let queue = new_queue();
        queue.set_sample_rate(RATE * 2);
        let device = FakeDevice::start(&queue);
        let synth = Arc::new(MockSynthesizer::new(RATE));
        let dispatcher = SpeechDispatcher::spawn(synth, Arc::clone(&queue)).unwrap();

        let speech = dispatcher.begin_response().unwrap();
        speech.speak(seg("ok."));
        assert!(speech.wait_done());

        let source = MockSynthesizer::samples_for("ok.");
        assert_eq!(device.played().len(), source.len() * 2);
    }

    #[test]
    fn unavailable_output_does_not_block() {
        let queue = new_queue();
        queue.mark_output_unavailable();
        let synth = Arc::new(MockSynthesizer::new(RATE));
        let dispatcher = SpeechDispatcher::spawn(synth.clone(), Arc::clone(&queue)).unwrap();

        let speech = dispatcher.begin_response().unwrap();
        speech.speak(seg("into the void."));
        assert!(speech.wait_done());
        assert_eq!(synth.calls().len(), 1);
        assert_eq!(dispatcher.stats().spoken, 1);
    }
}
