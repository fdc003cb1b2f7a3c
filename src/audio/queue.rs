//! Playback queue: FIFO of fixed-size sample blocks drained by the audio
//! callback.
//!
//! The speech dispatcher (producer) pushes [`AudioChunk`]s; the cpal output
//! callback (consumer, real-time thread) pulls samples with
//! [`PlaybackQueue::fill`].  One mutex guards the blocks *and* the volume so
//! a volume change takes effect from the next callback.  The lock is only
//! ever held for queue bookkeeping and a copy, never across synthesis.
//!
//! # Cancellation
//!
//! [`PlaybackQueue::stop`] raises a cancellation flag and discards every
//! queued block.  While the flag is raised, [`PlaybackQueue::enqueue`]
//! refuses new audio and [`PlaybackQueue::wait`] returns immediately.  The
//! flag is lowered by [`PlaybackQueue::resume`] when a new utterance begins.
//!
//! # Backpressure
//!
//! With a non-zero capacity, `enqueue` blocks the producer while the queue is
//! full, so synthesis can never run arbitrarily far ahead of the device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::config::PlaybackConfig;

/// Upper bound of the volume multiplier.
pub const MAX_VOLUME: f32 = 10.0;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A block of mono `f32` samples, clipped to `[-1.0, 1.0]` on creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(mut samples: Vec<f32>) -> Self {
        for s in &mut samples {
            *s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
        }
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Split `samples` into clipped chunks of at most `block_size` samples.
///
/// ```
/// use voice_chat::audio::split_into_chunks;
///
/// let chunks = split_into_chunks(&[0.1; 10], 4);
/// let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
/// assert_eq!(sizes, vec![4, 4, 2]);
/// ```
pub fn split_into_chunks(samples: &[f32], block_size: usize) -> Vec<AudioChunk> {
    samples
        .chunks(block_size.max(1))
        .map(|block| AudioChunk::new(block.to_vec()))
        .collect()
}

// ---------------------------------------------------------------------------
// PlaybackError / WaitOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// `stop()` was called; audio is refused until the next utterance.
    #[error("playback was cancelled")]
    Cancelled,

    #[error("playback queue lock poisoned")]
    Poisoned,
}

/// Why [`PlaybackQueue::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every queued sample was handed to the device.
    Drained,
    /// Playback was stopped.
    Cancelled,
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

struct QueueState {
    chunks: VecDeque<AudioChunk>,
    /// Chunk being played, with the read position inside it.  Holds the
    /// remainder of a chunk larger than one device callback.
    current: Option<AudioChunk>,
    cursor: usize,
    volume: f32,
}

impl QueueState {
    /// Next raw sample, advancing through chunks.  Increments `released` for
    /// every chunk taken off the FIFO.
    fn next_sample(&mut self, released: &mut usize) -> Option<f32> {
        loop {
            if let Some(chunk) = &self.current {
                if self.cursor < chunk.samples.len() {
                    let sample = chunk.samples[self.cursor];
                    self.cursor += 1;
                    return Some(sample);
                }
            }
            self.current = self.chunks.pop_front();
            self.cursor = 0;
            match self.current {
                Some(_) => *released += 1,
                None => return None,
            }
        }
    }

    fn pending(&self) -> usize {
        let in_progress = self
            .current
            .as_ref()
            .is_some_and(|chunk| self.cursor < chunk.samples.len());
        self.chunks.len() + usize::from(in_progress)
    }

    fn discard_all(&mut self) -> usize {
        let discarded = self.pending();
        self.chunks.clear();
        self.current = None;
        self.cursor = 0;
        discarded
    }
}

/// Thread-safe audio FIFO shared by the speech dispatcher and the output
/// callback (usually behind an `Arc`).
///
/// # Example
/// ```rust
/// use voice_chat::audio::{PlaybackQueue, WaitOutcome};
/// use voice_chat::config::PlaybackConfig;
///
/// let queue = PlaybackQueue::new(&PlaybackConfig::default(), 22_050);
/// queue.set_volume(1.0);
/// queue.enqueue_samples(&[0.5; 6]).unwrap();
///
/// let mut out = [0.0f32; 8];
/// queue.fill(&mut out, 1);
/// assert_eq!(out, [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
/// assert_eq!(queue.wait(), WaitOutcome::Drained);
/// ```
pub struct PlaybackQueue {
    state: Mutex<QueueState>,
    /// Signalled whenever blocks leave the queue.
    space: Condvar,
    cancelled: AtomicBool,
    output_available: AtomicBool,
    sample_rate: AtomicU32,
    block_size: usize,
    capacity: Option<usize>,
    poll_interval: Duration,
}

impl PlaybackQueue {
    /// Create an empty queue playing at `sample_rate` Hz with volume 1.0.
    pub fn new(config: &PlaybackConfig, sample_rate: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                current: None,
                cursor: 0,
                volume: 1.0,
            }),
            space: Condvar::new(),
            cancelled: AtomicBool::new(false),
            output_available: AtomicBool::new(true),
            sample_rate: AtomicU32::new(sample_rate),
            block_size: config.block_size.max(1),
            capacity: (config.max_queued_blocks > 0).then_some(config.max_queued_blocks),
            poll_interval: Duration::from_millis(config.wait_poll_ms.max(1)),
        }
    }

    // -----------------------------------------------------------------------
    // Producer side
    // -----------------------------------------------------------------------

    /// Append one chunk.
    ///
    /// Blocks while the queue is at capacity.  When no output device is
    /// available the chunk is silently dropped.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Cancelled`] while the cancellation flag is raised.
    pub fn enqueue(&self, chunk: AudioChunk) -> Result<(), PlaybackError> {
        if !self.is_output_available() {
            log::trace!("playback: no output device, dropping {} samples", chunk.len());
            return Ok(());
        }

        let mut state = self.state.lock().map_err(|_| PlaybackError::Poisoned)?;
        loop {
            // Checked under the lock so a concurrent `stop()` either sees
            // this chunk and drains it, or we see its flag.
            if self.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            match self.capacity {
                Some(cap) if state.chunks.len() >= cap => {
                    state = self
                        .space
                        .wait_timeout(state, self.poll_interval)
                        .map_err(|_| PlaybackError::Poisoned)?
                        .0;
                }
                _ => break,
            }
        }

        state.chunks.push_back(chunk);
        Ok(())
    }

    /// Split `samples` into `block_size` chunks and enqueue them in order.
    /// Returns the number of chunks queued.
    pub fn enqueue_samples(&self, samples: &[f32]) -> Result<usize, PlaybackError> {
        let chunks = split_into_chunks(samples, self.block_size);
        let count = chunks.len();
        for chunk in chunks {
            self.enqueue(chunk)?;
        }
        Ok(count)
    }

    /// Block the calling (non-real-time) thread until every queued sample
    /// has been handed to the device, or playback is stopped.
    pub fn wait(&self) -> WaitOutcome {
        loop {
            if self.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if self.is_empty() {
                return WaitOutcome::Drained;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    // -----------------------------------------------------------------------
    // Consumer side (real-time callback)
    // -----------------------------------------------------------------------

    /// Fill an interleaved output buffer of `channels` channels.
    ///
    /// Samples are scaled by the current volume; the mono signal is copied to
    /// every channel.  Frames that cannot be served are silence.  Never
    /// blocks on anything but the queue mutex and never allocates.
    pub fn fill(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut state = self.lock_state();

        if self.is_cancelled() {
            drop(state);
            out.fill(0.0);
            return;
        }

        let volume = state.volume;
        let mut released = 0;
        for frame in out.chunks_mut(channels) {
            let sample = state
                .next_sample(&mut released)
                .map_or(0.0, |s| (s * volume).clamp(-1.0, 1.0));
            frame.fill(sample);
        }
        drop(state);

        if released > 0 {
            self.space.notify_all();
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Raise the cancellation flag and discard everything queued.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        let discarded = self.lock_state().discard_all();
        self.space.notify_all();
        log::info!("playback: stopped, {discarded} chunk(s) discarded");
    }

    /// Lower the cancellation flag; called when a new utterance begins.
    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Set the volume multiplier, clamped to `[0.0, MAX_VOLUME]`.
    ///
    /// Applied when samples are pulled by the device, so it affects audio
    /// not yet played, including audio already queued.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, MAX_VOLUME)
        };
        self.lock_state().volume = volume;
    }

    pub fn volume(&self) -> f32 {
        self.lock_state().volume
    }

    // -----------------------------------------------------------------------
    // Device health
    // -----------------------------------------------------------------------

    /// Switch to discard mode: no device will ever drain this queue.
    pub fn mark_output_unavailable(&self) {
        self.output_available.store(false, Ordering::Release);
        self.lock_state().discard_all();
        self.space.notify_all();
    }

    /// Health flag: `false` when the output device could not be opened.
    pub fn is_output_available(&self) -> bool {
        self.output_available.load(Ordering::Acquire)
    }

    /// Rate the device consumes samples at.  Producers resample to it.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Chunks not yet fully handed to the device (including a partly played
    /// one).
    pub fn len(&self) -> usize {
        self.lock_state().pending()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The state is plain data, so a poisoned lock is still usable; the
    /// audio callback must never panic.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn config(block_size: usize, max_queued_blocks: usize) -> PlaybackConfig {
        PlaybackConfig {
            block_size,
            max_queued_blocks,
            wait_poll_ms: 5,
        }
    }

    fn queue(block_size: usize) -> PlaybackQueue {
        PlaybackQueue::new(&config(block_size, 0), 22_050)
    }

    fn ramp(n: usize) -> Vec<f32> {
        (1..=n).map(|i| i as f32 / 100.0).collect()
    }

    // ---- AudioChunk --------------------------------------------------------

    #[test]
    fn chunk_clips_samples() {
        let chunk = AudioChunk::new(vec![-3.0, -1.0, 0.25, 1.0, 7.5, f32::NAN]);
        assert_eq!(chunk.samples(), &[-1.0, -1.0, 0.25, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn split_keeps_order_and_remainder() {
        let samples = ramp(10);
        let chunks = split_into_chunks(&samples, 4);
        let joined: Vec<f32> = chunks.iter().flat_map(|c| c.samples().to_vec()).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(joined, samples);
        assert!(split_into_chunks(&[], 4).is_empty());
    }

    // ---- fill --------------------------------------------------------------

    #[test]
    fn empty_queue_fills_silence() {
        let q = queue(4);
        let mut out = [1.0f32; 8];
        q.fill(&mut out, 1);
        assert_eq!(out, [0.0; 8]);
    }

    #[test]
    fn short_chunk_is_padded_with_silence() {
        let q = queue(4);
        q.enqueue_samples(&[0.1, 0.2]).unwrap();

        let mut out = [9.0f32; 5];
        q.fill(&mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.0, 0.0]);
        assert!(q.is_empty());
    }

    #[test]
    fn oversized_chunk_is_carried_over() {
        let q = queue(4);
        q.enqueue(AudioChunk::new(ramp(10))).unwrap();

        let mut first = [0.0f32; 4];
        q.fill(&mut first, 1);
        assert_eq!(first.to_vec(), ramp(10)[..4].to_vec());
        assert_eq!(q.len(), 1, "remainder still pending");

        let mut second = [0.0f32; 8];
        q.fill(&mut second, 1);
        assert_eq!(second[..6].to_vec(), ramp(10)[4..].to_vec());
        assert_eq!(&second[6..], &[0.0, 0.0]);
        assert!(q.is_empty());
    }

    #[test]
    fn consecutive_chunks_play_gaplessly_in_order() {
        let q = queue(3);
        let samples = ramp(9);
        assert_eq!(q.enqueue_samples(&samples).unwrap(), 3);

        let mut played = Vec::new();
        for _ in 0..4 {
            let mut out = [0.0f32; 2];
            q.fill(&mut out, 1);
            played.extend_from_slice(&out);
        }
        assert_eq!(played[..8].to_vec(), samples[..8].to_vec());

        let mut out = [0.0f32; 2];
        q.fill(&mut out, 1);
        assert_eq!(out, [samples[8], 0.0]);
    }

    #[test]
    fn mono_is_duplicated_across_channels() {
        let q = queue(4);
        q.enqueue_samples(&[0.1, 0.2]).unwrap();

        let mut out = [0.0f32; 6];
        q.fill(&mut out, 2);
        assert_eq!(out, [0.1, 0.1, 0.2, 0.2, 0.0, 0.0]);
    }

    // ---- Volume ------------------------------------------------------------

    #[test]
    fn volume_is_clamped() {
        let q = queue(4);
        q.set_volume(42.0);
        assert_eq!(q.volume(), MAX_VOLUME);
        q.set_volume(-1.0);
        assert_eq!(q.volume(), 0.0);
        q.set_volume(f32::NAN);
        assert_eq!(q.volume(), 0.0);
        q.set_volume(2.5);
        assert_eq!(q.volume(), 2.5);
    }

    #[test]
    fn volume_applies_at_dequeue_time() {
        let q = queue(2);
        q.set_volume(1.0);
        q.enqueue_samples(&[0.2, 0.2, 0.4, 0.4]).unwrap();

        let mut out = [0.0f32; 2];
        q.fill(&mut out, 1);
        assert_eq!(out, [0.2, 0.2]);

        // Changing volume after enqueue affects what is still queued.
        q.set_volume(0.5);
        q.fill(&mut out, 1);
        assert_eq!(out, [0.2, 0.2]);
    }

    #[test]
    fn amplified_output_stays_in_range() {
        let q = queue(4);
        q.set_volume(4.0);
        q.enqueue_samples(&[0.5, -0.5]).unwrap();
        let mut out = [0.0f32; 2];
        q.fill(&mut out, 1);
        assert_eq!(out, [1.0, -1.0]);
    }

    // ---- Cancellation ------------------------------------------------------

    #[test]
    fn stop_discards_and_refuses_until_resume() {
        let q = queue(2);
        q.enqueue_samples(&ramp(8)).unwrap();
        assert_eq!(q.len(), 4);

        q.stop();
        assert!(q.is_empty());
        assert!(q.is_cancelled());
        assert!(matches!(
            q.enqueue_samples(&[0.1]),
            Err(PlaybackError::Cancelled)
        ));

        // A volume change cannot bring discarded audio back.
        q.set_volume(5.0);
        let mut out = [1.0f32; 4];
        q.fill(&mut out, 1);
        assert_eq!(out, [0.0; 4]);

        q.resume();
        assert!(!q.is_cancelled());
        q.enqueue_samples(&[0.1]).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wait_returns_drained_when_empty() {
        assert_eq!(queue(4).wait(), WaitOutcome::Drained);
    }

    #[test]
    fn wait_returns_when_consumer_drains() {
        let q = Arc::new(queue(4));
        q.enqueue_samples(&ramp(12)).unwrap();

        let consumer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                for _ in 0..3 {
                    std::thread::sleep(Duration::from_millis(10));
                    let mut out = [0.0f32; 4];
                    q.fill(&mut out, 1);
                }
            })
        };

        assert_eq!(q.wait(), WaitOutcome::Drained);
        consumer.join().unwrap();
    }

    #[test]
    fn wait_is_released_by_stop() {
        let q = Arc::new(queue(4));
        q.enqueue_samples(&ramp(4)).unwrap();

        let stopper = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                q.stop();
            })
        };

        assert_eq!(q.wait(), WaitOutcome::Cancelled);
        stopper.join().unwrap();
    }

    // ---- Backpressure ------------------------------------------------------

    #[test]
    fn full_queue_blocks_producer_until_consumed() {
        let q = Arc::new(PlaybackQueue::new(&config(2, 2), 22_050));
        q.enqueue_samples(&ramp(4)).unwrap(); // two blocks: full

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                let started = Instant::now();
                q.enqueue_samples(&[0.9, 0.9]).unwrap();
                started.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 2, "producer must still be blocked");

        let mut out = [0.0f32; 2];
        q.fill(&mut out, 1);

        let waited = producer.join().unwrap();
        assert!(waited >= Duration::from_millis(40));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn stop_releases_blocked_producer() {
        let q = Arc::new(PlaybackQueue::new(&config(1, 1), 22_050));
        q.enqueue_samples(&[0.1]).unwrap();

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || q.enqueue_samples(&[0.2]))
        };

        std::thread::sleep(Duration::from_millis(20));
        q.stop();
        assert!(matches!(
            producer.join().unwrap(),
            Err(PlaybackError::Cancelled)
        ));
        assert!(q.is_empty());
    }

    // ---- Device health -----------------------------------------------------

    #[test]
    fn unavailable_output_discards_silently() {
        let q = queue(4);
        q.mark_output_unavailable();
        assert!(!q.is_output_available());

        assert_eq!(q.enqueue_samples(&ramp(8)).unwrap(), 2);
        assert!(q.is_empty());
        assert_eq!(q.wait(), WaitOutcome::Drained);
    }

    #[test]
    fn sample_rate_can_follow_device() {
        let q = queue(4);
        assert_eq!(q.sample_rate(), 22_050);
        q.set_sample_rate(48_000);
        assert_eq!(q.sample_rate(), 48_000);
    }
}
