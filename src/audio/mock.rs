//! Scripted audio backend for tests and hardware-free runs
//!
//! Each mock device keeps its own timeline: reopening a stream continues where
//! the previous stream stopped, the way a real microphone keeps hearing the room
//! between opens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AudioBackend, DeviceInfo, InputStream, OutputStream};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Segment {
    amplitude: i16,
    seconds: f64,
}

/// A piecewise-constant loudness script; past the end it is silent
#[derive(Debug, Clone, Default)]
pub struct MockSignal {
    segments: Vec<Segment>,
    tail_amplitude: i16,
}

impl MockSignal {
    /// Silence forever
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `seconds` of silence
    #[must_use]
    pub fn silence(self, seconds: f64) -> Self {
        self.tone(seconds, 0)
    }

    /// Append `seconds` of a square wave whose RMS equals `amplitude`
    #[must_use]
    pub fn tone(mut self, seconds: f64, amplitude: i16) -> Self {
        self.segments.push(Segment { amplitude, seconds });
        self
    }

    /// After the scripted segments, keep playing a tone instead of silence
    #[must_use]
    pub const fn then_tone(mut self, amplitude: i16) -> Self {
        self.tail_amplitude = amplitude;
        self
    }

    fn amplitude_at(&self, t: f64) -> i16 {
        let mut start = 0.0;
        for segment in &self.segments {
            if t < start + segment.seconds {
                return segment.amplitude;
            }
            start += segment.seconds;
        }
        self.tail_amplitude
    }
}

/// A device exposed by [`MockBackend`]
#[derive(Debug, Clone)]
pub struct MockDevice {
    info: DeviceInfo,
    input_rates: Vec<u32>,
    output_rates: Vec<u32>,
}

impl MockDevice {
    /// A capture-only device accepting `rates`
    #[must_use]
    pub fn input(index: usize, name: &str, rates: &[u32]) -> Self {
        Self {
            info: DeviceInfo {
                index,
                name: name.to_string(),
                max_input_channels: 1,
                max_output_channels: 0,
            },
            input_rates: rates.to_vec(),
            output_rates: Vec::new(),
        }
    }

    /// A playback-only device accepting `rates`
    #[must_use]
    pub fn output(index: usize, name: &str, rates: &[u32]) -> Self {
        Self {
            info: DeviceInfo {
                index,
                name: name.to_string(),
                max_input_channels: 0,
                max_output_channels: 2,
            },
            input_rates: Vec::new(),
            output_rates: rates.to_vec(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    positions: HashMap<usize, f64>,
    read_failures: usize,
    open_failures: usize,
    unplug_after: Option<usize>,
    reads: usize,
    inputs_opened: Vec<(usize, u32)>,
    played: Vec<i16>,
    played_rate: Option<u32>,
}

impl State {
    fn unplugged(&self) -> bool {
        self.unplug_after.is_some_and(|limit| self.reads >= limit)
    }
}

/// In-memory [`AudioBackend`] with scripted input and recorded output
///
/// Clones share state, so a test can keep one clone for assertions while the
/// pipeline owns another.
#[derive(Debug, Clone)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
    signal: MockSignal,
    realtime: bool,
    state: Arc<Mutex<State>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A USB microphone at 44.1/48 kHz and a speaker, hearing silence
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: vec![
                MockDevice::input(0, "USB PnP Sound Device", &[44100, 48000]),
                MockDevice::output(1, "Mock Speaker", &[24000, 44100, 48000]),
            ],
            signal: MockSignal::new(),
            realtime: false,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Replace the device list
    #[must_use]
    pub fn with_devices(mut self, devices: Vec<MockDevice>) -> Self {
        self.devices = devices;
        self
    }

    /// Replace what the microphones hear
    #[must_use]
    pub fn with_signal(mut self, signal: MockSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Pace reads and drains at wall-clock speed
    #[must_use]
    pub const fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next `count` reads fail with a capture error
    pub fn fail_reads(&self, count: usize) {
        self.state().read_failures = count;
    }

    /// Make the next `count` input opens fail
    pub fn fail_opens(&self, count: usize) {
        self.state().open_failures = count;
    }

    /// Unplug the inputs once `reads` chunks have been read: later reads and opens fail
    pub fn unplug_after(&self, reads: usize) {
        self.state().unplug_after = Some(reads);
    }

    /// Samples written to any output so far
    #[must_use]
    pub fn played(&self) -> Vec<i16> {
        self.state().played.clone()
    }

    /// Rate of the most recent output stream
    #[must_use]
    pub fn played_rate(&self) -> Option<u32> {
        self.state().played_rate
    }

    /// Successful input opens as `(device index, rate)`
    #[must_use]
    pub fn inputs_opened(&self) -> Vec<(usize, u32)> {
        self.state().inputs_opened.clone()
    }

    /// Number of successful chunk reads
    #[must_use]
    pub fn reads(&self) -> usize {
        self.state().reads
    }

    fn device(&self, info: &DeviceInfo) -> Result<&MockDevice> {
        self.devices
            .iter()
            .find(|d| d.info.index == info.index)
            .ok_or_else(|| Error::DeviceUnavailable(format!("{} is gone", info.name)))
    }
}

impl AudioBackend for MockBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open_input(
        &self,
        info: &DeviceInfo,
        sample_rate: u32,
        _frames_per_chunk: usize,
    ) -> Result<Box<dyn InputStream>> {
        let device = self.device(info)?;
        if !device.input_rates.contains(&sample_rate) {
            return Err(Error::DeviceUnavailable(format!(
                "{} does not support {sample_rate} Hz",
                info.name
            )));
        }

        let mut state = self.state();
        if state.unplugged() {
            return Err(Error::DeviceUnavailable(format!("{} was unplugged", info.name)));
        }
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(Error::DeviceUnavailable(format!("{} disappeared", info.name)));
        }
        state.inputs_opened.push((info.index, sample_rate));

        Ok(Box::new(MockInput {
            device: info.index,
            sample_rate,
            signal: self.signal.clone(),
            realtime: self.realtime,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_output(&self, info: &DeviceInfo, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        let device = self.device(info)?;
        if !device.output_rates.contains(&sample_rate) {
            return Err(Error::DeviceUnavailable(format!(
                "{} does not support {sample_rate} Hz",
                info.name
            )));
        }

        self.state().played_rate = Some(sample_rate);
        Ok(Box::new(MockOutput {
            sample_rate,
            pending: 0,
            realtime: self.realtime,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockInput {
    device: usize,
    sample_rate: u32,
    signal: MockSignal,
    realtime: bool,
    state: Arc<Mutex<State>>,
}

impl InputStream for MockInput {
    #[allow(clippy::cast_precision_loss)]
    fn read(&mut self, frames: usize) -> Result<Vec<i16>> {
        let rate = f64::from(self.sample_rate);
        let chunk_seconds = frames as f64 / rate;

        let start = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if state.unplugged() {
                return Err(Error::CaptureFailure("device unplugged".to_string()));
            }
            if state.read_failures > 0 {
                state.read_failures -= 1;
                return Err(Error::CaptureFailure("input overflow".to_string()));
            }
            state.reads += 1;
            let position = state.positions.entry(self.device).or_insert(0.0);
            let start = *position;
            *position += chunk_seconds;
            start
        };

        if self.realtime {
            std::thread::sleep(Duration::from_secs_f64(chunk_seconds));
        }

        Ok((0..frames)
            .map(|i| {
                let amplitude = self.signal.amplitude_at(start + i as f64 / rate);
                if (i / 4) % 2 == 0 { amplitude } else { -amplitude }
            })
            .collect())
    }

    fn channels(&self) -> u16 {
        1
    }
}

struct MockOutput {
    sample_rate: u32,
    pending: usize,
    realtime: bool,
    state: Arc<Mutex<State>>,
}

impl OutputStream for MockOutput {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .played
            .extend_from_slice(samples);
        self.pending += samples.len();
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn drain(&mut self) -> Result<()> {
        if self.realtime && self.sample_rate > 0 {
            std::thread::sleep(Duration::from_secs_f64(
                self.pending as f64 / f64::from(self.sample_rate),
            ));
        }
        self.pending = 0;
        Ok(())
    }

    fn channels(&self) -> u16 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::rms;

    #[test]
    fn signal_follows_script() {
        let signal = MockSignal::new().silence(0.5).tone(1.0, 3000);
        assert_eq!(signal.amplitude_at(0.1), 0);
        assert_eq!(signal.amplitude_at(0.7), 3000);
        assert_eq!(signal.amplitude_at(2.0), 0);
        assert_eq!(signal.then_tone(900).amplitude_at(10.0), 900);
    }

    #[test]
    fn timeline_survives_reopen() {
        let backend = MockBackend::new().with_signal(MockSignal::new().silence(0.1).tone(1.0, 2000));
        let mic = backend.devices().unwrap().remove(0);

        let mut first = backend.open_input(&mic, 48000, 1024).unwrap();
        assert!(rms(&first.read(4800).unwrap()) < 1.0);
        drop(first);

        let mut second = backend.open_input(&mic, 48000, 1024).unwrap();
        assert!((rms(&second.read(1024).unwrap()) - 2000.0).abs() < 1.0);
    }

    #[test]
    fn unsupported_rate_is_refused() {
        let backend = MockBackend::new();
        let mic = backend.devices().unwrap().remove(0);
        assert!(backend.open_input(&mic, 8000, 1024).is_err());
        assert!(backend.open_input(&mic, 44100, 1024).is_ok());
        assert_eq!(backend.inputs_opened(), vec![(0, 44100)]);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let backend = MockBackend::new();
        let mic = backend.devices().unwrap().remove(0);
        let mut stream = backend.open_input(&mic, 48000, 1024).unwrap();

        backend.fail_reads(1);
        assert!(matches!(stream.read(1024), Err(Error::CaptureFailure(_))));
        assert!(stream.read(1024).is_ok());
    }
}
