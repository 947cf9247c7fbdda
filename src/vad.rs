//! Voice activity detection with ambient-noise calibration
//!
//! The detector owns the session's passive capture handle. [`pause`] gives the
//! microphone up so the recorder can open its own handle; [`resume`] takes it
//! back on the same device and rate.
//!
//! [`pause`]: VoiceActivityDetector::pause
//! [`resume`]: VoiceActivityDetector::resume

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioDeviceManager, CaptureHandle, DeviceHint, DeviceInfo};
use crate::session::SessionSignals;
use crate::{Error, Result};

/// Lowest threshold a calibration may produce
pub const MIN_THRESHOLD: f32 = 200.0;

/// Highest threshold a calibration may produce
pub const MAX_THRESHOLD: f32 = 800.0;

/// How long a FALLBACK-mode listen waits for a trigger before returning
const TRIGGER_POLL: Duration = Duration::from_millis(200);

/// How the detector decides there is activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// Only an explicit trigger counts as activity
    Fallback,
    /// Sustained loudness above the calibrated threshold
    #[default]
    Vad,
    /// Every listen succeeds immediately
    AlwaysOn,
}

impl FromStr for DetectorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fallback" | "manual" => Ok(Self::Fallback),
            "vad" => Ok(Self::Vad),
            "always_on" => Ok(Self::AlwaysOn),
            other => Err(Error::Config(format!("unknown detector mode: {other}"))),
        }
    }
}

/// Threshold for a measured noise floor
///
/// The multiplier `3 - 2 * sensitivity` shrinks as sensitivity grows, so a
/// more sensitive detector never has a higher threshold.
#[must_use]
pub fn threshold_for(noise_floor: f32, sensitivity: f32) -> f32 {
    let multiplier = 2.0f32.mul_add(-sensitivity.clamp(0.0, 1.0), 3.0);
    (noise_floor * multiplier).clamp(MIN_THRESHOLD, MAX_THRESHOLD)
}

/// Consecutive loud chunks that make up `min_duration` of speech (at least one)
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn min_active_chunks(min_duration: Duration, sample_rate: u32, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 1;
    }
    let chunks = min_duration.as_secs_f64() * f64::from(sample_rate) / chunk_size as f64;
    (chunks.floor() as usize).max(1)
}

/// Result of ambient-noise calibration; lives as long as the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    /// Mean RMS of the ambient sample
    pub noise_floor: f32,
    /// RMS a chunk must exceed to count as active
    pub threshold: f32,
    /// Sensitivity the threshold was derived with
    pub sensitivity: f32,
    /// Active chunks needed to declare activity
    pub min_active_chunks: usize,
}

impl CalibrationProfile {
    /// Derive a profile from a measured noise floor
    #[must_use]
    pub fn new(
        noise_floor: f32,
        sensitivity: f32,
        min_duration: Duration,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Self {
        Self {
            noise_floor,
            threshold: threshold_for(noise_floor, sensitivity),
            sensitivity: sensitivity.clamp(0.0, 1.0),
            min_active_chunks: min_active_chunks(min_duration, sample_rate, chunk_size),
        }
    }
}

/// Detector settings
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Requested operating mode
    pub mode: DetectorMode,
    /// 0..=1, higher means a lower threshold
    pub sensitivity: f32,
    /// Sustained loudness needed to declare activity
    pub min_duration: Duration,
    /// Ambient sample length for calibration
    pub calibration: Duration,
    /// Quiet chunks tolerated inside an active run
    pub max_gap_chunks: usize,
    /// Microphone preference
    pub hint: DeviceHint,
    /// Capture rates to try, in order
    pub capture_rates: Vec<u32>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Vad,
            sensitivity: 0.6,
            min_duration: Duration::from_millis(500),
            calibration: Duration::from_millis(500),
            max_gap_chunks: 2,
            hint: DeviceHint::any(),
            capture_rates: vec![16000, 44100, 48000, 32000, 22050, 8000],
        }
    }
}

/// Amplitude-based wake and speech detector
#[derive(Debug)]
pub struct VoiceActivityDetector {
    devices: AudioDeviceManager,
    config: DetectorConfig,
    mode: DetectorMode,
    signals: Arc<SessionSignals>,
    profile: Option<CalibrationProfile>,
    handle: Option<CaptureHandle>,
    negotiated: Option<(DeviceInfo, u32)>,
}

impl VoiceActivityDetector {
    /// Create a detector, opening the microphone in VAD mode
    ///
    /// If no capture device can be opened the detector degrades to
    /// [`DetectorMode::Fallback`] instead of failing.
    #[must_use]
    pub fn new(devices: AudioDeviceManager, config: DetectorConfig, signals: Arc<SessionSignals>) -> Self {
        let mode = config.mode;
        let mut detector = Self {
            devices,
            config,
            mode,
            signals,
            profile: None,
            handle: None,
            negotiated: None,
        };

        if mode == DetectorMode::Vad
            && let Err(e) = detector.open()
        {
            tracing::warn!(error = %e, "no capture device, falling back to manual trigger");
            detector.mode = DetectorMode::Fallback;
        }

        detector
    }

    /// Effective mode (may differ from the configured one after a degrade)
    #[must_use]
    pub const fn mode(&self) -> DetectorMode {
        self.mode
    }

    /// Current calibration, if any
    #[must_use]
    pub const fn profile(&self) -> Option<&CalibrationProfile> {
        self.profile.as_ref()
    }

    /// Whether the detector currently holds the microphone
    #[must_use]
    pub const fn holds_device(&self) -> bool {
        self.handle.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = match &self.negotiated {
            Some((device, rate)) => self
                .devices
                .open_capture_on(device, &[*rate])
                .or_else(|_| self.devices.open_capture(&self.config.hint, &self.config.capture_rates))?,
            None => self
                .devices
                .open_capture(&self.config.hint, &self.config.capture_rates)?,
        };

        self.negotiated = Some((handle.device().clone(), handle.sample_rate()));
        self.handle = Some(handle);
        Ok(())
    }

    /// Measure ambient noise and derive the detection threshold
    ///
    /// Reads about [`DetectorConfig::calibration`] worth of chunks. A failed
    /// calibration in VAD mode degrades the detector to FALLBACK.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or read
    pub fn calibrate(&mut self) -> Result<CalibrationProfile> {
        let result = self.measure();
        match &result {
            Ok(profile) => {
                tracing::info!(
                    noise_floor = profile.noise_floor,
                    threshold = profile.threshold,
                    min_active_chunks = profile.min_active_chunks,
                    "detector calibrated"
                );
                self.profile = Some(*profile);
            }
            Err(e) if self.mode == DetectorMode::Vad => {
                tracing::warn!(error = %e, "calibration failed, falling back to manual trigger");
                self.handle = None;
                self.mode = DetectorMode::Fallback;
            }
            Err(_) => {}
        }
        result
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn measure(&mut self) -> Result<CalibrationProfile> {
        self.open()?;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("capture handle missing".to_string()))?;
        let rate = handle.sample_rate();
        let chunk_size = handle.chunk_size().max(1);

        let wanted = (self.config.calibration.as_secs_f64() * f64::from(rate) / chunk_size as f64)
            .ceil()
            .max(1.0) as usize;

        let mut total = 0.0f32;
        let mut count = 0usize;
        for _ in 0..wanted {
            if self.signals.is_stopped() {
                break;
            }
            total += self.devices.read_chunk(handle)?.rms();
            count += 1;
        }

        let noise_floor = if count == 0 { 0.0 } else { total / count as f32 };
        Ok(CalibrationProfile::new(
            noise_floor,
            self.config.sensitivity,
            self.config.min_duration,
            rate,
            chunk_size,
        ))
    }

    /// Block until activity, a trigger, a pause, or a stop
    ///
    /// Returns false on stop, pause, FALLBACK poll timeout, or an unrecoverable
    /// read error; the caller loops and calls again.
    pub fn listen(&mut self) -> bool {
        if self.signals.is_stopped() {
            return false;
        }

        match self.mode {
            DetectorMode::AlwaysOn => true,
            DetectorMode::Fallback => self.signals.wait_for_trigger(TRIGGER_POLL),
            DetectorMode::Vad => self.listen_vad(),
        }
    }

    fn listen_vad(&mut self) -> bool {
        let profile = match self.profile {
            Some(profile) => profile,
            None => match self.calibrate() {
                Ok(profile) => profile,
                Err(_) => return false,
            },
        };

        if let Err(e) = self.open() {
            tracing::warn!(error = %e, "capture device unavailable this cycle");
            return false;
        }

        let mut active = 0usize;
        let mut gap = 0usize;

        loop {
            if self.signals.is_stopped() || self.signals.is_paused() {
                return false;
            }
            if self.signals.take_trigger() {
                tracing::debug!("manual trigger while listening");
                return true;
            }

            let Some(handle) = self.handle.as_mut() else {
                return false;
            };
            let level = match self.devices.read_chunk(handle) {
                Ok(chunk) => chunk.rms(),
                Err(e) => {
                    tracing::warn!(error = %e, "capture lost while listening");
                    self.handle = None;
                    return false;
                }
            };

            if level > profile.threshold {
                active += 1;
                gap = 0;
                if active >= profile.min_active_chunks {
                    tracing::debug!(level, active, "voice activity detected");
                    return true;
                }
            } else if active > 0 {
                gap += 1;
                if gap > self.config.max_gap_chunks {
                    active = 0;
                    gap = 0;
                }
            }
        }
    }

    /// Release the microphone so another consumer can open it
    pub fn pause(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!("detector released capture device");
        }
    }

    /// Reopen the microphone on the previously negotiated device and rate
    ///
    /// No-op outside VAD mode.
    ///
    /// # Errors
    ///
    /// Returns error if neither the previous device nor any other can be opened
    pub fn resume(&mut self) -> Result<()> {
        if self.mode != DetectorMode::Vad {
            return Ok(());
        }
        self.open()?;
        tracing::debug!("detector reacquired capture device");
        Ok(())
    }

    /// Pause now and resume when the returned guard drops
    ///
    /// Resuming on drop keeps the handoff intact on every exit path of the
    /// code holding the guard.
    pub fn pause_guard(&mut self) -> PauseGuard<'_> {
        self.pause();
        PauseGuard { detector: self }
    }

    /// Signal stop and release the microphone
    pub fn stop(&mut self) {
        self.signals.request_stop();
        self.handle = None;
    }
}

/// Resumes the detector when dropped; see [`VoiceActivityDetector::pause_guard`]
#[derive(Debug)]
pub struct PauseGuard<'a> {
    detector: &'a mut VoiceActivityDetector,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if self.detector.signals.is_stopped() {
            return;
        }
        if let Err(e) = self.detector.resume() {
            tracing::warn!(error = %e, "detector could not reacquire capture device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockBackend, MockDevice, MockSignal};

    fn detector(backend: MockBackend, mode: DetectorMode) -> VoiceActivityDetector {
        let devices = AudioDeviceManager::new(Arc::new(backend));
        let config = DetectorConfig {
            mode,
            capture_rates: vec![16000],
            ..DetectorConfig::default()
        };
        VoiceActivityDetector::new(devices, config, Arc::new(SessionSignals::new()))
    }

    fn mic_16k() -> MockBackend {
        MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[16000])])
    }

    #[test]
    fn threshold_is_clamped() {
        assert!((threshold_for(0.0, 0.5) - MIN_THRESHOLD).abs() < f32::EPSILON);
        assert!((threshold_for(10_000.0, 0.5) - MAX_THRESHOLD).abs() < f32::EPSILON);
        assert!((threshold_for(200.0, 0.5) - 400.0).abs() < 0.01);
    }

    #[test]
    fn sensitivity_never_raises_threshold() {
        for floor in [0.0_f32, 90.0, 150.0, 250.0, 399.0, 1000.0] {
            let mut previous = f32::MAX;
            for step in 0..=10_u8 {
                let sensitivity = f32::from(step) / 10.0;
                let threshold = threshold_for(floor, sensitivity);
                assert!(threshold <= previous);
                assert!((MIN_THRESHOLD..=MAX_THRESHOLD).contains(&threshold));
                previous = threshold;
            }
        }
    }

    #[test]
    fn min_active_chunks_floor_and_minimum() {
        assert_eq!(min_active_chunks(Duration::from_millis(500), 16000, 1024), 7);
        assert_eq!(min_active_chunks(Duration::ZERO, 16000, 1024), 1);
        assert_eq!(min_active_chunks(Duration::from_millis(500), 16000, 0), 1);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("always-on".parse::<DetectorMode>().unwrap(), DetectorMode::AlwaysOn);
        assert_eq!("FALLBACK".parse::<DetectorMode>().unwrap(), DetectorMode::Fallback);
        assert!("wakeword".parse::<DetectorMode>().is_err());
    }

    #[test]
    fn calibration_measures_noise_floor() {
        let backend = mic_16k().with_signal(MockSignal::new().tone(5.0, 150));
        let mut vad = detector(backend, DetectorMode::Vad);

        let profile = vad.calibrate().unwrap();
        assert!((profile.noise_floor - 150.0).abs() < 1.0);
        assert!((profile.threshold - 270.0).abs() < 2.0);
        assert_eq!(profile.min_active_chunks, 7);
    }

    #[test]
    fn sustained_loudness_is_activity() {
        let backend = mic_16k().with_signal(MockSignal::new().silence(1.0).tone(1.0, 3000));
        let mut vad = detector(backend, DetectorMode::Vad);
        assert!(vad.listen());
    }

    #[test]
    fn short_blips_reset_the_counter() {
        // 3 loud chunks then 4 quiet ones, repeated: never 7 in a row
        let mut signal = MockSignal::new().silence(0.6);
        for _ in 0..10 {
            signal = signal.tone(3.0 * 1024.0 / 16000.0, 3000).silence(4.0 * 1024.0 / 16000.0);
        }
        let backend = mic_16k().with_signal(signal);
        let mut vad = detector(backend, DetectorMode::Vad);
        vad.calibrate().unwrap();

        let signals = Arc::clone(&vad.signals);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            signals.request_stop();
        });
        assert!(!vad.listen());
        stopper.join().unwrap();
    }

    #[test]
    fn missing_device_degrades_to_fallback() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::output(0, "speaker", &[24000])]);
        let vad = detector(backend, DetectorMode::Vad);
        assert_eq!(vad.mode(), DetectorMode::Fallback);
    }

    #[test]
    fn fallback_needs_trigger() {
        let mut vad = detector(mic_16k(), DetectorMode::Fallback);
        assert!(!vad.listen());
        vad.signals.trigger();
        assert!(vad.listen());
        assert!(!vad.holds_device());
    }

    #[test]
    fn always_on_returns_immediately() {
        let mut vad = detector(mic_16k(), DetectorMode::AlwaysOn);
        assert!(vad.listen());
    }

    #[test]
    fn pause_guard_hands_device_back() {
        let backend = mic_16k();
        let devices = AudioDeviceManager::new(Arc::new(backend.clone()));
        let mut vad = VoiceActivityDetector::new(
            devices.clone(),
            DetectorConfig {
                capture_rates: vec![16000],
                ..DetectorConfig::default()
            },
            Arc::new(SessionSignals::new()),
        );
        assert!(vad.holds_device());
        assert!(devices.open_capture(&DeviceHint::any(), &[16000]).is_err());

        {
            let _guard = vad.pause_guard();
            let borrowed = devices.open_capture(&DeviceHint::any(), &[16000]).unwrap();
            drop(borrowed);
        }

        assert!(vad.holds_device());
        assert_eq!(backend.inputs_opened(), vec![(0, 16000), (0, 16000), (0, 16000)]);
    }

    #[test]
    fn read_failure_returns_false_when_reopen_fails() {
        let backend = mic_16k();
        let devices = AudioDeviceManager::new(Arc::new(backend.clone()))
            .with_reopen_backoff(Duration::from_millis(1));
        let mut vad = VoiceActivityDetector::new(
            devices,
            DetectorConfig {
                capture_rates: vec![16000],
                ..DetectorConfig::default()
            },
            Arc::new(SessionSignals::new()),
        );
        vad.calibrate().unwrap();

        backend.fail_reads(1);
        backend.fail_opens(3);
        assert!(!vad.listen());
        assert!(!vad.holds_device());
    }
}
