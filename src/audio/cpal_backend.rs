//! Real audio hardware through cpal

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, SupportedStreamConfigRange};

use super::{AudioBackend, DeviceInfo, InputStream, OutputStream};
use crate::{Error, Result};

/// How long a read may wait for the driver before it counts as a failure
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Extra time allowed past the expected drain duration
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Backend over the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// Create a backend over the default host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn max_channels<I>(configs: std::result::Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    configs
        .map(|cs| cs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Find the cpal device behind a [`DeviceInfo`], by index then by name
fn find_device(info: &DeviceInfo) -> Result<Device> {
    let host = cpal::default_host();
    let mut devices: Vec<Device> = host
        .devices()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .collect();
    let matches = |d: &Device| d.name().ok().as_deref() == Some(info.name.as_str());

    if devices.get(info.index).is_some_and(matches) {
        return Ok(devices.swap_remove(info.index));
    }

    // Enumeration order shifted (hotplug); fall back to the name
    devices
        .into_iter()
        .find(|d| matches(d))
        .ok_or_else(|| Error::DeviceUnavailable(format!("{} is gone", info.name)))
}

/// Pick the config range supporting `rate` with the fewest channels
fn pick_range(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> Option<SupportedStreamConfigRange> {
    ranges
        .filter(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate))
        .min_by_key(SupportedStreamConfigRange::channels)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> i16) -> Vec<i16> {
    if channels <= 1 {
        return data.iter().map(|&s| convert(s)).collect();
    }

    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(convert(s))).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[allow(clippy::cast_possible_truncation)]
fn u16_to_i16(s: u16) -> i16 {
    (i32::from(s) - 32768) as i16
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| DeviceInfo {
                index,
                name: device.name().unwrap_or_default(),
                max_input_channels: max_channels(device.supported_input_configs()),
                max_output_channels: max_channels(device.supported_output_configs()),
            })
            .collect())
    }

    fn open_input(
        &self,
        info: &DeviceInfo,
        sample_rate: u32,
        _frames_per_chunk: usize,
    ) -> Result<Box<dyn InputStream>> {
        let device = find_device(info)?;
        let range = pick_range(
            device
                .supported_input_configs()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?,
            sample_rate,
        )
        .ok_or_else(|| {
            Error::DeviceUnavailable(format!("{} does not support {sample_rate} Hz", info.name))
        })?;

        let supported = range.with_sample_rate(SampleRate(sample_rate));
        let format = supported.sample_format();
        let config = supported.config();
        let channels = config.channels;
        let width = usize::from(channels);

        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let failure = Arc::new(Mutex::new(None::<String>));
        let failure_slot = Arc::clone(&failure);
        let on_error = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio capture error");
            if let Ok(mut slot) = failure_slot.lock() {
                *slot = Some(err.to_string());
            }
        };

        let stream = match format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, width, |s| s));
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, width, f32_to_i16));
                },
                on_error,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(downmix(data, width, u16_to_i16));
                },
                on_error,
                None,
            ),
            other => {
                return Err(Error::DeviceUnavailable(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        tracing::debug!(
            device = %info.name,
            sample_rate,
            channels,
            "audio capture stream started"
        );

        Ok(Box::new(CpalInput {
            _stream: stream,
            rx,
            pending: VecDeque::new(),
            failure,
            channels,
        }))
    }

    fn open_output(&self, info: &DeviceInfo, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        let device = find_device(info)?;
        let range = pick_range(
            device
                .supported_output_configs()
                .map_err(|e| Error::DeviceUnavailable(e.to_string()))?,
            sample_rate,
        )
        .ok_or_else(|| {
            Error::DeviceUnavailable(format!("{} does not support {sample_rate} Hz", info.name))
        })?;

        let supported = range.with_sample_rate(SampleRate(sample_rate));
        let format = supported.sample_format();
        let config = supported.config();
        let channels = config.channels;
        let width = usize::from(channels);

        let queue = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let failure = Arc::new(Mutex::new(None::<String>));
        let failure_slot = Arc::clone(&failure);
        let on_error = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio playback error");
            if let Ok(mut slot) = failure_slot.lock() {
                *slot = Some(err.to_string());
            }
        };

        let source = Arc::clone(&queue);
        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = source.lock() else { return };
                    for frame in data.chunks_mut(width) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut queue) = source.lock() else { return };
                    for frame in data.chunks_mut(width) {
                        let sample = f32_to_i16(queue.pop_front().unwrap_or(0.0));
                        frame.fill(sample);
                    }
                },
                on_error,
                None,
            ),
            other => {
                return Err(Error::DeviceUnavailable(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        tracing::debug!(
            device = %info.name,
            sample_rate,
            channels,
            "audio playback stream started"
        );

        Ok(Box::new(CpalOutput {
            _stream: stream,
            queue,
            failure,
            sample_rate,
            channels,
        }))
    }
}

struct CpalInput {
    _stream: Stream,
    rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
    failure: Arc<Mutex<Option<String>>>,
    channels: u16,
}

impl InputStream for CpalInput {
    fn read(&mut self, frames: usize) -> Result<Vec<i16>> {
        while self.pending.len() < frames {
            if let Some(err) = self.failure.lock().ok().and_then(|mut slot| slot.take()) {
                return Err(Error::CaptureFailure(err));
            }

            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(buf) => self.pending.extend(buf),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::CaptureFailure(format!(
                        "no audio within {}ms",
                        READ_TIMEOUT.as_millis()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::CaptureFailure("capture stream closed".to_string()));
                }
            }
        }

        Ok(self.pending.drain(..frames).collect())
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

struct CpalOutput {
    _stream: Stream,
    queue: Arc<Mutex<VecDeque<f32>>>,
    failure: Arc<Mutex<Option<String>>>,
    sample_rate: u32,
    channels: u16,
}

impl CpalOutput {
    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().ok().and_then(|mut slot| slot.take()) {
            Some(err) => Err(Error::Playback(err)),
            None => Ok(()),
        }
    }

    fn queued(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl OutputStream for CpalOutput {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        self.check_failure()?;
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::Playback("playback queue poisoned".to_string()))?;
        queue.extend(samples.iter().map(|&s| f32::from(s) / 32768.0));
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let pending = u64::try_from(self.queued()).unwrap_or(u64::MAX);
        let expected = Duration::from_millis(pending.saturating_mul(1000) / u64::from(self.sample_rate.max(1)));
        let deadline = Instant::now() + expected + DRAIN_SLACK;

        while self.queued() > 0 {
            self.check_failure()?;
            if Instant::now() > deadline {
                tracing::warn!(remaining = self.queued(), "playback drain timed out");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device flush its own buffer
        std::thread::sleep(Duration::from_millis(100));
        self.check_failure()
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_converts_and_averages() {
        let stereo = [0.5_f32, -0.5, 1.0, 1.0];
        assert_eq!(downmix(&stereo, 2, f32_to_i16), vec![0, 32767]);
        assert_eq!(downmix(&[32768_u16, 0], 1, u16_to_i16), vec![0, -32768]);
    }

    #[test]
    fn out_of_range_floats_clamp() {
        assert_eq!(f32_to_i16(4.0), 32767);
        assert_eq!(f32_to_i16(-4.0), -32767);
    }
}
