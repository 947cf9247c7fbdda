//! Device resolution, rate negotiation and exclusive claims

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    AudioBackend, AudioChunk, DEFAULT_CHUNK_SIZE, DeviceInfo, InputStream, OutputStream, resample,
};
use crate::{Error, Result};

/// Attempts made to reopen a capture stream after a read failure
pub const MAX_REOPEN_ATTEMPTS: u32 = 3;

const DEFAULT_REOPEN_BACKOFF: Duration = Duration::from_millis(200);

/// Which device to prefer when opening a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceHint {
    /// Explicit hardware index; wins when it names a capable device
    pub index: Option<usize>,
    /// Case-insensitive name substrings, in priority order
    pub name_patterns: Vec<String>,
}

impl DeviceHint {
    /// No preference beyond "first capable device"
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Prefer devices whose names contain any of `patterns`
    #[must_use]
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            index: None,
            name_patterns: patterns.iter().map(|p| p.as_ref().to_lowercase()).collect(),
        }
    }

    /// Set the explicit index override
    #[must_use]
    pub const fn with_index(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }
}

/// Order devices for opening: override index, then name patterns, then the rest
///
/// Only devices capable of the requested direction are returned, each at most
/// once.
#[must_use]
pub fn order_candidates(devices: &[DeviceInfo], hint: &DeviceHint, input: bool) -> Vec<DeviceInfo> {
    let capable: Vec<&DeviceInfo> = devices
        .iter()
        .filter(|d| if input { d.is_input() } else { d.is_output() })
        .collect();
    let mut ordered: Vec<DeviceInfo> = Vec::with_capacity(capable.len());

    if let Some(index) = hint.index {
        match capable.iter().find(|d| d.index == index) {
            Some(device) => ordered.push((*device).clone()),
            None => tracing::warn!(index, "device override does not name a capable device"),
        }
    }

    for pattern in &hint.name_patterns {
        let pattern = pattern.to_lowercase();
        for device in &capable {
            if device.name.to_lowercase().contains(&pattern)
                && !ordered.iter().any(|d| d.index == device.index)
            {
                ordered.push((*device).clone());
            }
        }
    }

    for device in capable {
        if !ordered.iter().any(|d| d.index == device.index) {
            ordered.push(device.clone());
        }
    }

    ordered
}

/// Backend error text without the variant prefix, for re-wrapping
fn detail(error: Error) -> String {
    match error {
        Error::DeviceUnavailable(message) | Error::CaptureFailure(message) => message,
        other => other.to_string(),
    }
}

type ClaimSet = Arc<Mutex<HashSet<String>>>;

/// Exclusive use of one device direction, released on drop
#[derive(Debug)]
struct DeviceClaim {
    claims: ClaimSet,
    key: String,
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        if let Ok(mut claims) = self.claims.lock() {
            claims.remove(&self.key);
        }
    }
}

/// An open capture stream; the device stays claimed until this is dropped
pub struct CaptureHandle {
    stream: Option<Box<dyn InputStream>>,
    device: DeviceInfo,
    sample_rate: u32,
    chunk_size: usize,
    _claim: DeviceClaim,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("device", &self.device.name)
            .field("sample_rate", &self.sample_rate)
            .field("chunk_size", &self.chunk_size)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl CaptureHandle {
    /// The claimed device
    #[must_use]
    pub const fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Negotiated sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per chunk
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read one chunk without any recovery
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailure`] if the stream is closed or the read fails
    pub fn read_chunk(&mut self) -> Result<AudioChunk> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::CaptureFailure("capture stream is closed".to_string()))?;

        let samples = stream.read(self.chunk_size).map_err(|e| match e {
            Error::CaptureFailure(_) => e,
            other => Error::CaptureFailure(other.to_string()),
        })?;

        Ok(AudioChunk::new(samples, self.sample_rate))
    }
}

/// An open playback stream; the device stays claimed until this is dropped
pub struct PlaybackHandle {
    stream: Box<dyn OutputStream>,
    device: DeviceInfo,
    sample_rate: u32,
    _claim: DeviceClaim,
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("device", &self.device.name)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl PlaybackHandle {
    /// The claimed device
    #[must_use]
    pub const fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Negotiated sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Write a chunk, converting it to the stream rate first
    ///
    /// # Errors
    ///
    /// Returns error if resampling or the write fails
    pub fn write_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        if chunk.sample_rate() == self.sample_rate {
            return self.stream.write(chunk.samples());
        }

        let converted = resample(chunk, self.sample_rate)?;
        self.stream.write(converted.samples())
    }

    /// Block until all written audio has played
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the stream failed
    pub fn drain(&mut self) -> Result<()> {
        self.stream.drain()
    }
}

/// Opens capture and playback streams with fallback and recovery
///
/// Cheap to clone; clones share the claim set, so a device claimed through one
/// clone is busy for all of them.
#[derive(Clone)]
pub struct AudioDeviceManager {
    backend: Arc<dyn AudioBackend>,
    claims: ClaimSet,
    chunk_size: usize,
    reopen_backoff: Duration,
}

impl std::fmt::Debug for AudioDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDeviceManager")
            .field("chunk_size", &self.chunk_size)
            .field("reopen_backoff", &self.reopen_backoff)
            .finish_non_exhaustive()
    }
}

impl AudioDeviceManager {
    /// Create a manager over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            claims: Arc::new(Mutex::new(HashSet::new())),
            chunk_size: DEFAULT_CHUNK_SIZE,
            reopen_backoff: DEFAULT_REOPEN_BACKOFF,
        }
    }

    /// Set frames per capture chunk
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the base delay between reopen attempts (grows linearly per attempt)
    #[must_use]
    pub const fn with_reopen_backoff(mut self, backoff: Duration) -> Self {
        self.reopen_backoff = backoff;
        self
    }

    /// Frames per capture chunk
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Enumerate all devices
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be queried
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.backend.devices()
    }

    fn claim(&self, key: String) -> Option<DeviceClaim> {
        let mut claims = self.claims.lock().ok()?;
        if !claims.insert(key.clone()) {
            return None;
        }
        Some(DeviceClaim {
            claims: Arc::clone(&self.claims),
            key,
        })
    }

    /// Open a capture stream on the first device and rate that works
    ///
    /// Devices are tried in [`order_candidates`] order and, for each, the
    /// rates in `candidate_rates` order. Devices claimed by another handle are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if every combination fails
    pub fn open_capture(&self, hint: &DeviceHint, candidate_rates: &[u32]) -> Result<CaptureHandle> {
        let candidates = order_candidates(&self.backend.devices()?, hint, true);
        if candidates.is_empty() {
            return Err(Error::DeviceUnavailable("no input-capable device".to_string()));
        }

        let mut last_error = Error::DeviceUnavailable("no candidate sample rate".to_string());
        for device in candidates {
            match self.open_capture_on(&device, candidate_rates) {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    tracing::debug!(device = %device.name, error = %e, "capture candidate rejected");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Open a capture stream on one specific device
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the device is busy or refuses every rate
    pub fn open_capture_on(&self, device: &DeviceInfo, candidate_rates: &[u32]) -> Result<CaptureHandle> {
        let claim = self
            .claim(format!("in:{}", device.index))
            .ok_or_else(|| Error::DeviceUnavailable(format!("{} is busy", device.name)))?;

        let mut last_error = String::from("no candidate sample rate");
        for &rate in candidate_rates {
            match self.backend.open_input(device, rate, self.chunk_size) {
                Ok(stream) => {
                    tracing::info!(
                        device = %device.name,
                        index = device.index,
                        sample_rate = rate,
                        chunk_size = self.chunk_size,
                        "capture device opened"
                    );
                    return Ok(CaptureHandle {
                        stream: Some(stream),
                        device: device.clone(),
                        sample_rate: rate,
                        chunk_size: self.chunk_size,
                        _claim: claim,
                    });
                }
                Err(e) => {
                    tracing::debug!(device = %device.name, sample_rate = rate, error = %e, "sample rate rejected");
                    last_error = detail(e);
                }
            }
        }

        Err(Error::DeviceUnavailable(last_error))
    }

    /// Read one chunk, reopening the stream once on failure
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailure`] if the stream cannot be recovered
    pub fn read_chunk(&self, handle: &mut CaptureHandle) -> Result<AudioChunk> {
        match handle.read_chunk() {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                tracing::warn!(device = %handle.device.name, error = %e, "capture read failed, reopening");
                self.reopen(handle)?;
                handle.read_chunk()
            }
        }
    }

    /// Close and reopen a capture stream with the same device and rate
    ///
    /// Makes up to [`MAX_REOPEN_ATTEMPTS`] attempts with a linearly growing
    /// backoff. The claim is held throughout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureFailure`] once every attempt has failed
    pub fn reopen(&self, handle: &mut CaptureHandle) -> Result<()> {
        handle.stream = None;

        let mut last_error = String::new();
        for attempt in 1..=MAX_REOPEN_ATTEMPTS {
            std::thread::sleep(self.reopen_backoff * attempt);
            match self
                .backend
                .open_input(&handle.device, handle.sample_rate, handle.chunk_size)
            {
                Ok(stream) => {
                    handle.stream = Some(stream);
                    tracing::info!(device = %handle.device.name, attempt, "capture stream reopened");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(device = %handle.device.name, attempt, error = %e, "capture reopen failed");
                    last_error = detail(e);
                }
            }
        }

        Err(Error::CaptureFailure(format!(
            "reopen failed after {MAX_REOPEN_ATTEMPTS} attempts: {last_error}"
        )))
    }

    /// Open a playback stream on the first device and rate that works
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if every combination fails
    pub fn open_playback(&self, hint: &DeviceHint, candidate_rates: &[u32]) -> Result<PlaybackHandle> {
        let candidates = order_candidates(&self.backend.devices()?, hint, false);
        if candidates.is_empty() {
            return Err(Error::DeviceUnavailable("no output-capable device".to_string()));
        }

        let mut last_error = String::from("no candidate sample rate");
        for device in candidates {
            let Some(claim) = self.claim(format!("out:{}", device.index)) else {
                last_error = format!("{} is busy", device.name);
                continue;
            };

            for &rate in candidate_rates {
                match self.backend.open_output(&device, rate) {
                    Ok(stream) => {
                        tracing::debug!(device = %device.name, sample_rate = rate, "playback device opened");
                        return Ok(PlaybackHandle {
                            stream,
                            device,
                            sample_rate: rate,
                            _claim: claim,
                        });
                    }
                    Err(e) => last_error = detail(e),
                }
            }
        }

        Err(Error::DeviceUnavailable(last_error))
    }

    /// Play one chunk to completion on the best available output
    ///
    /// The chunk's own rate is tried first so no conversion is needed when the
    /// device supports it.
    ///
    /// # Errors
    ///
    /// Returns error if no output can be opened or playback fails
    pub fn play(&self, hint: &DeviceHint, candidate_rates: &[u32], chunk: &AudioChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut rates = vec![chunk.sample_rate()];
        rates.extend(candidate_rates.iter().filter(|&&r| r != chunk.sample_rate()));

        let mut handle = self.open_playback(hint, &rates)?;
        handle.write_chunk(chunk)?;
        handle.drain()?;

        tracing::debug!(
            samples = chunk.len(),
            sample_rate = handle.sample_rate,
            "playback complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockBackend, MockDevice};

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                index: 0,
                name: "HDA Intel PCH".to_string(),
                max_input_channels: 2,
                max_output_channels: 2,
            },
            DeviceInfo {
                index: 1,
                name: "seeed-2mic-voicecard".to_string(),
                max_input_channels: 2,
                max_output_channels: 2,
            },
            DeviceInfo {
                index: 2,
                name: "USB PnP Sound Device".to_string(),
                max_input_channels: 1,
                max_output_channels: 0,
            },
            DeviceInfo {
                index: 3,
                name: "HDMI".to_string(),
                max_input_channels: 0,
                max_output_channels: 8,
            },
        ]
    }

    fn indices(list: &[DeviceInfo]) -> Vec<usize> {
        list.iter().map(|d| d.index).collect()
    }

    #[test]
    fn patterns_order_before_enumeration() {
        let hint = DeviceHint::with_patterns(&["usb pnp", "seeed"]);
        assert_eq!(indices(&order_candidates(&devices(), &hint, true)), vec![2, 1, 0]);
    }

    #[test]
    fn override_index_wins() {
        let hint = DeviceHint::with_patterns(&["usb"]).with_index(Some(1));
        assert_eq!(indices(&order_candidates(&devices(), &hint, true)), vec![1, 2, 0]);
    }

    #[test]
    fn override_to_output_only_device_is_ignored() {
        let hint = DeviceHint::any().with_index(Some(3));
        assert_eq!(indices(&order_candidates(&devices(), &hint, true)), vec![0, 1, 2]);
    }

    #[test]
    fn output_direction_filters_inputs() {
        assert_eq!(
            indices(&order_candidates(&devices(), &DeviceHint::any(), false)),
            vec![0, 1, 3]
        );
    }

    #[test]
    fn negotiates_first_supported_rate() {
        let manager = AudioDeviceManager::new(Arc::new(MockBackend::new()));
        let handle = manager
            .open_capture(&DeviceHint::any(), &[16000, 48000, 44100])
            .unwrap();
        assert_eq!(handle.sample_rate(), 48000);
        assert_eq!(handle.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn claimed_device_is_busy_until_dropped() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[16000])]);
        let manager = AudioDeviceManager::new(Arc::new(backend));

        let first = manager.open_capture(&DeviceHint::any(), &[16000]).unwrap();
        let second = manager.open_capture(&DeviceHint::any(), &[16000]);
        assert!(matches!(second, Err(Error::DeviceUnavailable(_))));

        drop(first);
        assert!(manager.open_capture(&DeviceHint::any(), &[16000]).is_ok());
    }

    #[test]
    fn busy_device_falls_through_to_next() {
        let backend = MockBackend::new().with_devices(vec![
            MockDevice::input(0, "USB mic", &[16000]),
            MockDevice::input(1, "onboard", &[16000]),
        ]);
        let manager = AudioDeviceManager::new(Arc::new(backend));
        let hint = DeviceHint::with_patterns(&["usb"]);

        let first = manager.open_capture(&hint, &[16000]).unwrap();
        let second = manager.open_capture(&hint, &[16000]).unwrap();
        assert_eq!(first.device().index, 0);
        assert_eq!(second.device().index, 1);
    }

    #[test]
    fn no_input_device_is_unavailable() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::output(0, "speaker", &[24000])]);
        let manager = AudioDeviceManager::new(Arc::new(backend));
        assert!(matches!(
            manager.open_capture(&DeviceHint::any(), &[16000]),
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn unsupported_rate_error_names_device_once() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[48000])]);
        let manager = AudioDeviceManager::new(Arc::new(backend));

        let Err(err) = manager.open_capture(&DeviceHint::any(), &[16000]) else {
            panic!("16 kHz should be refused");
        };
        assert_eq!(err.to_string(), "audio device unavailable: mic does not support 16000 Hz");
    }

    #[test]
    fn failed_reopen_keeps_backend_reason() {
        let backend = MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[16000])]);
        let manager = AudioDeviceManager::new(Arc::new(backend.clone()))
            .with_reopen_backoff(Duration::from_millis(1));
        let mut handle = manager.open_capture(&DeviceHint::any(), &[16000]).unwrap();

        backend.unplug_after(0);
        let err = manager.read_chunk(&mut handle).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::CaptureFailure(_)));
        assert!(message.ends_with(": mic was unplugged"), "{message}");
        assert!(!message.contains("unavailable"), "{message}");
    }

    #[test]
    fn read_failure_triggers_reopen() {
        let backend = MockBackend::new();
        let manager = AudioDeviceManager::new(Arc::new(backend.clone()))
            .with_reopen_backoff(Duration::from_millis(1));
        let mut handle = manager.open_capture(&DeviceHint::any(), &[44100]).unwrap();

        backend.fail_reads(1);
        let chunk = manager.read_chunk(&mut handle).unwrap();
        assert_eq!(chunk.len(), DEFAULT_CHUNK_SIZE);
        assert_eq!(backend.inputs_opened().len(), 2);
    }

    #[test]
    fn reopen_gives_up_after_bounded_attempts() {
        let backend = MockBackend::new();
        let manager = AudioDeviceManager::new(Arc::new(backend.clone()))
            .with_reopen_backoff(Duration::from_millis(1));
        let mut handle = manager.open_capture(&DeviceHint::any(), &[44100]).unwrap();

        backend.fail_reads(1);
        backend.fail_opens(usize::try_from(MAX_REOPEN_ATTEMPTS).unwrap());
        assert!(matches!(
            manager.read_chunk(&mut handle),
            Err(Error::CaptureFailure(_))
        ));
    }

    #[test]
    fn playback_resamples_to_device_rate() {
        let backend = MockBackend::new();
        let manager = AudioDeviceManager::new(Arc::new(backend.clone()));

        let chunk = AudioChunk::new(vec![1000; 1600], 16000);
        manager.play(&DeviceHint::any(), &[24000, 48000], &chunk).unwrap();

        assert_eq!(backend.played_rate(), Some(24000));
        assert!(backend.played().len().abs_diff(2400) <= 1024);
    }
}
