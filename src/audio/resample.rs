//! Sample-rate conversion between the synthesizer and the output device.
//!
//! Speech engines produce audio at a fixed rate (commonly 22 050 Hz) while
//! many output devices only accept 44 100 or 48 000 Hz.  [`resample`] bridges
//! the two with linear interpolation: fast and more than adequate for speech.

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return the input unchanged (no interpolation performed).
/// * Empty input, or a zero rate on either side, yields an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// # Example
///
/// ```rust
/// use voice_chat::audio::resample;
///
/// // 22.05 kHz → 44.1 kHz doubles the sample count
/// let speech = vec![0.25_f32; 220];
/// let out = resample(&speech, 22_050, 44_100);
/// assert_eq!(out.len(), 440);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = match (samples.get(idx), samples.get(idx + 1)) {
            (Some(&a), Some(&b)) => a * (1.0 - frac) + b * frac,
            (Some(&a), None) => a,
            _ => 0.0,
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
