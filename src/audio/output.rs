//! Speaker output via `cpal`.
//!
//! [`AudioOutput`] wraps the cpal host/device/stream lifecycle.  Call
//! [`AudioOutput::start`] to let the device pull samples from a
//! [`PlaybackQueue`].  The returned [`StreamHandle`] is a RAII guard:
//! dropping it stops the underlying cpal stream.
//!
//! Device selection prefers mono `f32` at the synthesis rate with a fixed
//! callback size of one queue block, and falls back to whatever the device
//! reports as its default configuration.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;

use super::PlaybackQueue;

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up the audio output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to query supported output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("unsupported output sample format: {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Speaker device wrapper built on top of `cpal`.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use voice_chat::audio::{AudioOutput, PlaybackQueue};
/// use voice_chat::config::PlaybackConfig;
///
/// let queue = Arc::new(PlaybackQueue::new(&PlaybackConfig::default(), 22_050));
/// let output = AudioOutput::new(22_050, 4096).unwrap();
/// let _handle = output.start(Arc::clone(&queue)).unwrap();
/// // `_handle` keeps the stream alive; drop it to stop playback.
/// ```
pub struct AudioOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl AudioOutput {
    /// Open the system default output device.
    ///
    /// `preferred_rate` is the synthesis rate; `block_size` the queue block
    /// size, requested as the callback buffer size when the device allows.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::NoDevice`] when no output device is available,
    /// or [`OutputError::DefaultConfig`] when no preferred configuration
    /// matched and the device cannot report a default one.
    pub fn new(preferred_rate: u32, block_size: usize) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;

        let preferred = match device.supported_output_configs() {
            Ok(ranges) => {
                let ranges: Vec<_> = ranges.collect();
                pick_config(&ranges, preferred_rate)
            }
            Err(e) => {
                log::warn!("output: cannot list supported configs ({e}), using default");
                None
            }
        };

        let supported = match preferred {
            Some(config) => config,
            None => device.default_output_config()?,
        };

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let buffer_size = buffer_size_for(supported.buffer_size(), block_size);
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = buffer_size;

        log::info!(
            "output: {} channel(s) @ {sample_rate}Hz, {sample_format:?}, buffer {:?}",
            channels,
            config.buffer_size
        );

        Ok(Self {
            device,
            config,
            sample_format,
            sample_rate,
            channels,
        })
    }

    /// Start playback: the cpal callback pulls from `queue` on the audio
    /// thread.  Also points the queue at the device's sample rate.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::BuildStream`] or [`OutputError::PlayStream`]
    /// if the platform rejects the stream configuration.
    pub fn start(&self, queue: Arc<PlaybackQueue>) -> Result<StreamHandle, OutputError> {
        queue.set_sample_rate(self.sample_rate);

        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(queue)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(queue)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(queue)?,
            other => return Err(OutputError::UnsupportedFormat(other)),
        };

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    fn build_stream<T>(&self, queue: Arc<PlaybackQueue>) -> Result<cpal::Stream, OutputError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.channels as usize;
        // Grown once to the device's callback size, then reused.
        let mut scratch: Vec<f32> = Vec::new();

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                queue.fill(&mut scratch, channels);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal stream error: {err}");
            },
            None, // no timeout
        )?;
        Ok(stream)
    }

    /// Rate the device plays at in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved device channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Open the default output and start draining `queue`.
///
/// On any failure the queue is switched to discard mode (see
/// [`PlaybackQueue::mark_output_unavailable`]) and `None` is returned, so a
/// session without speakers still runs.
pub fn open_or_degrade(
    queue: &Arc<PlaybackQueue>,
    preferred_rate: u32,
    block_size: usize,
) -> Option<StreamHandle> {
    let started = AudioOutput::new(preferred_rate, block_size).and_then(|output| {
        let handle = output.start(Arc::clone(queue))?;
        log::info!(
            "output: speaker open, {} channel(s) @ {}Hz",
            output.channels(),
            output.sample_rate()
        );
        Ok(handle)
    });
    match started {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("output: audio device unavailable ({e}), speech will be discarded");
            queue.mark_output_unavailable();
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Config selection
// ---------------------------------------------------------------------------

/// Choose an `f32` configuration that supports `rate`, preferring the fewest
/// channels.
fn pick_config(
    ranges: &[cpal::SupportedStreamConfigRange],
    rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .iter()
        .filter(|r| r.sample_format() == cpal::SampleFormat::F32)
        .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
        .min_by_key(|r| r.channels())
        .map(|r| r.clone().with_sample_rate(cpal::SampleRate(rate)))
}

fn buffer_size_for(supported: &cpal::SupportedBufferSize, block_size: usize) -> cpal::BufferSize {
    match (supported, u32::try_from(block_size)) {
        (cpal::SupportedBufferSize::Range { min, max }, Ok(frames))
            if *min <= frames && frames <= *max =>
        {
            cpal::BufferSize::Fixed(frames)
        }
        _ => cpal::BufferSize::Default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
