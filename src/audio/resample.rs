//! Linear sample-rate conversion

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::AudioChunk;
use crate::{Error, Result};

/// Frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Resample a mono chunk to `dst_rate`
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
pub fn resample(chunk: &AudioChunk, dst_rate: u32) -> Result<AudioChunk> {
    let samples = resample_samples(chunk.samples(), chunk.sample_rate(), dst_rate)?;
    Ok(AudioChunk::new(samples, dst_rate))
}

/// Resample mono i16 samples from `src_rate` to `dst_rate` by linear interpolation
///
/// The output holds `round(len * dst / src)` samples, so durations survive
/// round trips.
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample_samples(samples: &[i16], src_rate: u32, dst_rate: u32) -> Result<Vec<i16>> {
    if src_rate == 0 || dst_rate == 0 {
        return Err(Error::Audio(format!(
            "invalid resample rates {src_rate} -> {dst_rate}"
        )));
    }
    if src_rate == dst_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = f64::from(dst_rate) / f64::from(src_rate);
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler =
        FastFixedIn::<f64>::new(ratio, 1.0, PolynomialDegree::Linear, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;
    let delay = resampler.output_delay();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s) / 32768.0).collect();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    while input.len() - pos >= resampler.input_frames_next() {
        let next = resampler.input_frames_next();
        let frames = resampler
            .process(&[input[pos..pos + next].to_vec()], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
        pos += next;
    }

    if pos < input.len() {
        let frames = resampler
            .process_partial(Some(&[input[pos..].to_vec()]), None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the interpolator's delay line
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial(None::<&[Vec<f64>]>, None)
            .map_err(|e| Error::Audio(format!("resample flush failed: {e}")))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, rate: u32) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let t = i as f32 / rate as f32;
                #[allow(clippy::cast_possible_truncation)]
                let s = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16;
                s
            })
            .collect()
    }

    #[test]
    fn same_rate_is_identity() {
        let input = tone(500, 16000);
        assert_eq!(resample_samples(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            resample_samples(&[1, 2, 3], 0, 16000),
            Err(Error::Audio(_))
        ));
    }

    #[test]
    fn downsample_one_second() {
        let input = tone(44100, 44100);
        let output = resample_samples(&input, 44100, 16000).unwrap();
        assert!(output.len().abs_diff(16000) <= 1024);
    }

    #[test]
    fn upsample_keeps_signal_energy() {
        let input = tone(16000, 16000);
        let output = resample_samples(&input, 16000, 48000).unwrap();
        assert!(output.len().abs_diff(48000) <= 1024);

        let before = crate::audio::rms(&input);
        let after = crate::audio::rms(&output);
        assert!((before - after).abs() / before < 0.2);
    }

    #[test]
    fn chunk_resample_sets_rate() {
        let chunk = AudioChunk::new(tone(4410, 44100), 44100);
        let out = resample(&chunk, 16000).unwrap();
        assert_eq!(out.sample_rate(), 16000);
        assert!(out.len().abs_diff(1600) <= 1024);
    }
}
