//! Record-until-silence capture

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{
    AudioChunk, AudioDeviceManager, CANONICAL_RATE, DeviceHint, resample_samples, samples_to_wav,
};
use crate::session::SessionSignals;
use crate::Result;

/// Recorder settings
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// RMS a chunk must exceed to count as speech
    pub threshold: f32,
    /// Silence after speech that ends the recording
    pub silence_duration: Duration,
    /// Hard cap on recording length
    pub max_duration: Duration,
    /// Microphone preference
    pub hint: DeviceHint,
    /// Capture rates to try, in order
    pub capture_rates: Vec<u32>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            threshold: 500.0,
            silence_duration: Duration::from_millis(1500),
            max_duration: Duration::from_secs(10),
            hint: DeviceHint::any(),
            capture_rates: vec![16000, 44100, 48000, 32000, 22050, 8000],
        }
    }
}

/// One recording pass, normalized to the canonical rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingBuffer {
    chunks: Vec<AudioChunk>,
    speech_detected: bool,
}

impl RecordingBuffer {
    /// Chunks in capture order
    #[must_use]
    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    /// All samples, concatenated
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.chunks.iter().flat_map(|c| c.samples().iter().copied()).collect()
    }

    /// Total number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(AudioChunk::len).sum()
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate of the buffer (always canonical)
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        CANONICAL_RATE
    }

    /// Recorded duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / f64::from(CANONICAL_RATE))
    }

    /// Whether any chunk exceeded the speech threshold
    #[must_use]
    pub const fn speech_detected(&self) -> bool {
        self.speech_detected
    }

    /// Encode as a mono 16-bit WAV file for speech-to-text
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), CANONICAL_RATE)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn chunks_for(duration: Duration, sample_rate: u32, chunk_size: usize) -> usize {
    let chunks = duration.as_secs_f64() * f64::from(sample_rate) / chunk_size.max(1) as f64;
    (chunks.round() as usize).max(1)
}

/// Captures a spoken command on its own capture handle
#[derive(Debug, Clone)]
pub struct Recorder {
    devices: AudioDeviceManager,
    config: RecorderConfig,
    signals: Option<Arc<SessionSignals>>,
}

impl Recorder {
    /// Create a recorder
    #[must_use]
    pub const fn new(devices: AudioDeviceManager, config: RecorderConfig) -> Self {
        Self {
            devices,
            config,
            signals: None,
        }
    }

    /// Stop recording early when these signals request a stop
    #[must_use]
    pub fn with_signals(mut self, signals: Arc<SessionSignals>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Settings this recorder was built with
    #[must_use]
    pub const fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record with the configured threshold and durations
    ///
    /// # Errors
    ///
    /// See [`record`](Self::record)
    pub fn record_default(&self) -> Result<RecordingBuffer> {
        self.record(
            self.config.threshold,
            self.config.silence_duration,
            self.config.max_duration,
        )
    }

    /// Record until `silence_duration` of quiet follows speech, or `max_duration` passes
    ///
    /// Silence only counts once a chunk has exceeded `threshold`, so leading
    /// silence never cuts a recording short. An all-silent input yields a full
    /// `max_duration` buffer. A read failure mid-recording ends the pass early
    /// and returns what was captured.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DeviceUnavailable`] if no capture device opens,
    /// or an audio error if resampling fails
    pub fn record(
        &self,
        threshold: f32,
        silence_duration: Duration,
        max_duration: Duration,
    ) -> Result<RecordingBuffer> {
        let mut handle = self
            .devices
            .open_capture(&self.config.hint, &self.config.capture_rates)?;
        let rate = handle.sample_rate();
        let chunk_size = handle.chunk_size();

        let silence_chunks = chunks_for(silence_duration, rate, chunk_size);
        let max_chunks = chunks_for(max_duration, rate, chunk_size);

        let mut captured: Vec<i16> = Vec::with_capacity(max_chunks * chunk_size);
        let mut recorded = 0usize;
        let mut silent_run = 0usize;
        let mut speech_detected = false;

        while recorded < max_chunks {
            if self.signals.as_ref().is_some_and(|s| s.is_stopped()) {
                tracing::debug!("recording interrupted by stop");
                break;
            }

            let chunk = match self.devices.read_chunk(&mut handle) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, chunks = recorded, "capture failed mid-recording");
                    break;
                }
            };

            if chunk.rms() > threshold {
                speech_detected = true;
                silent_run = 0;
            } else if speech_detected {
                silent_run += 1;
            }

            captured.extend_from_slice(chunk.samples());
            recorded += 1;

            if speech_detected && silent_run >= silence_chunks {
                break;
            }
        }
        drop(handle);

        let samples = resample_samples(&captured, rate, CANONICAL_RATE)?;
        let chunks = samples
            .chunks(chunk_size.max(1))
            .map(|c| AudioChunk::new(c.to_vec(), CANONICAL_RATE))
            .collect();

        let buffer = RecordingBuffer {
            chunks,
            speech_detected,
        };
        tracing::debug!(
            chunks = recorded,
            duration_ms = u64::try_from(buffer.duration().as_millis()).unwrap_or(u64::MAX),
            speech_detected,
            "recording complete"
        );

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockBackend, MockDevice, MockSignal};

    fn recorder(backend: MockBackend) -> Recorder {
        let devices = AudioDeviceManager::new(Arc::new(backend));
        Recorder::new(devices, RecorderConfig::default())
    }

    #[test]
    fn chunk_counts_round() {
        assert_eq!(chunks_for(Duration::from_millis(1500), 16000, 1024), 23);
        assert_eq!(chunks_for(Duration::from_secs(10), 16000, 1024), 156);
        assert_eq!(chunks_for(Duration::ZERO, 16000, 1024), 1);
    }

    #[test]
    fn silence_before_speech_keeps_recording() {
        let backend = MockBackend::new()
            .with_devices(vec![MockDevice::input(0, "mic", &[16000])])
            .with_signal(MockSignal::new().silence(3.0).tone(0.5, 3000));
        let buffer = recorder(backend).record_default().unwrap();

        // 3s silence + 0.5s speech + 1.5s trailing silence
        assert!(buffer.speech_detected());
        let secs = buffer.duration().as_secs_f64();
        assert!((secs - 5.0).abs() < 0.13, "got {secs}");
    }

    #[test]
    fn stop_ends_recording() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[16000])]);
        let signals = Arc::new(SessionSignals::new());
        signals.request_stop();

        let buffer = recorder(backend).with_signals(signals).record_default().unwrap();
        assert!(buffer.is_empty());
    }

    #[test]
    fn read_failure_returns_partial_buffer() {
        let backend = MockBackend::new()
            .with_devices(vec![MockDevice::input(0, "mic", &[16000])])
            .with_signal(MockSignal::new().then_tone(3000));
        let devices = AudioDeviceManager::new(Arc::new(backend.clone()))
            .with_reopen_backoff(Duration::from_millis(1));
        backend.unplug_after(20);

        let buffer = Recorder::new(devices, RecorderConfig::default())
            .record_default()
            .unwrap();

        // Everything read before the device went away is kept
        assert!(buffer.speech_detected());
        assert_eq!(buffer.len(), 20 * 1024);
        assert!(buffer.duration() < RecorderConfig::default().max_duration);
        // One reopen sequence was attempted and failed
        assert_eq!(backend.inputs_opened().len(), 1);
    }

    #[test]
    fn wav_is_canonical_rate() {
        let backend = MockBackend::new().with_signal(MockSignal::new().tone(0.2, 2000));
        let buffer = recorder(backend).record_default().unwrap();
        assert_eq!(buffer.sample_rate(), CANONICAL_RATE);

        let wav = buffer.to_wav().unwrap();
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, CANONICAL_RATE);
        assert_eq!(reader.spec().channels, 1);
    }
}
