//! Audio devices, chunks and sample-rate conversion
//!
//! All hardware access goes through [`AudioBackend`] so the pipeline runs the
//! same way against real devices ([`CpalBackend`]) and scripted ones
//! ([`MockBackend`]). [`AudioDeviceManager`] layers device resolution, rate
//! negotiation, exclusive claims and bounded reopen retries on top.

mod codec;
mod cpal_backend;
mod device;
pub mod mock;
mod resample;

use std::time::Duration;

pub use codec::{decode_audio, samples_to_wav};
pub use cpal_backend::CpalBackend;
pub use device::{
    AudioDeviceManager, CaptureHandle, DeviceHint, MAX_REOPEN_ATTEMPTS, PlaybackHandle,
    order_candidates,
};
pub use mock::{MockBackend, MockDevice, MockSignal};
pub use resample::{resample, resample_samples};

use crate::Result;

/// Canonical sample rate for STT input (16kHz mono)
pub const CANONICAL_RATE: u32 = 16000;

/// Default number of frames per capture chunk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// A fixed block of mono 16-bit PCM samples at a known sample rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioChunk {
    /// Wrap samples captured at `sample_rate`
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A chunk of digital silence
    #[must_use]
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; frames], sample_rate)
    }

    /// The samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Consume the chunk, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the chunk
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// RMS amplitude on the i16 scale (0..=32768)
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Root-mean-square amplitude of 16-bit samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// A physical audio device as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Enumeration index (the "hardware index" an override refers to)
    pub index: usize,
    /// Human-readable device name
    pub name: String,
    /// Maximum number of input channels (0 = not a capture device)
    pub max_input_channels: u16,
    /// Maximum number of output channels (0 = not a playback device)
    pub max_output_channels: u16,
}

impl DeviceInfo {
    /// Whether the device can capture audio
    #[must_use]
    pub const fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    /// Whether the device can play audio
    #[must_use]
    pub const fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Access to audio hardware
///
/// Implementations only open what they are asked for. Candidate ordering,
/// rate negotiation and exclusivity live in [`AudioDeviceManager`].
pub trait AudioBackend: Send + Sync {
    /// Enumerate all devices
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot be queried
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a mono capture stream at exactly `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses the rate or cannot be opened
    fn open_input(
        &self,
        device: &DeviceInfo,
        sample_rate: u32,
        frames_per_chunk: usize,
    ) -> Result<Box<dyn InputStream>>;

    /// Open a playback stream at exactly `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses the rate or cannot be opened
    fn open_output(&self, device: &DeviceInfo, sample_rate: u32) -> Result<Box<dyn OutputStream>>;
}

/// An open capture stream delivering mono samples
pub trait InputStream {
    /// Block until `frames` samples are available and return them
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CaptureFailure`] on a stream error or read timeout
    fn read(&mut self, frames: usize) -> Result<Vec<i16>>;

    /// Channel count the hardware was opened with (before downmix)
    fn channels(&self) -> u16;
}

/// An open playback stream accepting mono samples
pub trait OutputStream {
    /// Queue samples for playback
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Playback`] if the stream has failed
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Block until everything queued has been played
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Playback`] if the stream has failed
    fn drain(&mut self) -> Result<()>;

    /// Channel count the hardware was opened with (mono is fanned out)
    fn channels(&self) -> u16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_and_square_wave() {
        assert!(rms(&[0; 128]) < f32::EPSILON);

        let square: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
        assert!((rms(&square) - 1000.0).abs() < 0.5);
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert!(rms(&[]) < f32::EPSILON);
    }

    #[test]
    fn chunk_duration() {
        let chunk = AudioChunk::silence(8000, 16000);
        assert_eq!(chunk.duration(), Duration::from_millis(500));
        assert_eq!(chunk.len(), 8000);
        assert!(!chunk.is_empty());
        assert_eq!(AudioChunk::silence(0, 0).duration(), Duration::ZERO);
    }
}
