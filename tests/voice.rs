//! Audio pipeline integration tests
//!
//! Tests audio components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use voicebox::audio::{
    AudioChunk, CANONICAL_RATE, DeviceHint, MockBackend, MockDevice, MockSignal, decode_audio, resample,
    samples_to_wav,
};
use voicebox::vad::{MAX_THRESHOLD, MIN_THRESHOLD};
use voicebox::{DetectorConfig, DetectorMode, Error, Recorder, RecorderConfig, SessionSignals, VoiceActivityDetector};

mod common;
use common::test_devices;

/// Generate sine wave samples
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<i16> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * f32::from(i16::MAX)) as i16
        })
        .collect()
}

fn detector_config(mode: DetectorMode) -> DetectorConfig {
    DetectorConfig {
        mode,
        min_duration: Duration::from_millis(200),
        calibration: Duration::from_millis(200),
        ..DetectorConfig::default()
    }
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, CANONICAL_RATE);
    let wav_data = samples_to_wav(&samples, CANONICAL_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // 44-byte header plus 16-bit samples
    assert_eq!(wav_data.len(), 44 + samples.len() * 2);
}

#[test]
fn test_wav_readable_by_hound() {
    let original: Vec<i16> = vec![0, 16000, -16000, i16::MAX, i16::MIN, 8000];
    let wav_data = samples_to_wav(&original, CANONICAL_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, CANONICAL_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let read_back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_back, original);
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(decode_audio(b"definitely not audio").is_err());
    assert!(decode_audio(&[]).is_err());
}

#[test]
fn test_resample_preserves_duration() {
    let samples = generate_sine_samples(440.0, 1.0, 44100);
    let chunk = AudioChunk::new(samples, 44100);

    let converted = resample(&chunk, CANONICAL_RATE).unwrap();
    assert_eq!(converted.sample_rate(), CANONICAL_RATE);
    let diff = converted.duration().as_millis().abs_diff(chunk.duration().as_millis());
    assert!(diff <= 1, "duration drifted by {diff} ms");

    // Same-rate conversion is the identity
    let same = resample(&chunk, 44100).unwrap();
    assert_eq!(same, chunk);
}

#[test]
fn test_capture_prefers_named_device_and_negotiates_rate() {
    let backend = MockBackend::new().with_devices(vec![
        MockDevice::input(0, "HDA Intel PCH", &[48000]),
        MockDevice::input(1, "USB PnP Sound Device", &[44100]),
    ]);
    let devices = test_devices(&backend);

    let handle = devices
        .open_capture(&DeviceHint::with_patterns(&["USB"]), &[16000, 44100, 48000])
        .unwrap();
    assert_eq!(handle.device().index, 1);
    assert_eq!(handle.sample_rate(), 44100);

    // An explicit index beats the patterns
    drop(handle);
    let hint = DeviceHint::with_patterns(&["USB"]).with_index(Some(0));
    let handle = devices.open_capture(&hint, &[16000, 44100, 48000]).unwrap();
    assert_eq!(handle.device().index, 0);
    assert_eq!(handle.sample_rate(), 48000);
}

#[test]
fn test_one_holder_per_capture_device() {
    let backend = MockBackend::new();
    let devices = test_devices(&backend);

    let first = devices.open_capture(&DeviceHint::any(), &[44100]).unwrap();
    let second = devices.clone().open_capture(&DeviceHint::any(), &[44100]);
    assert!(matches!(second, Err(Error::DeviceUnavailable(_))));

    drop(first);
    assert!(devices.open_capture(&DeviceHint::any(), &[44100]).is_ok());
}

#[test]
fn test_read_recovers_after_transient_failure() {
    let backend = MockBackend::new();
    let devices = test_devices(&backend);
    let mut handle = devices.open_capture(&DeviceHint::any(), &[44100]).unwrap();

    backend.fail_reads(1);
    let chunk = devices.read_chunk(&mut handle).unwrap();
    assert_eq!(chunk.len(), devices.chunk_size());
    assert_eq!(backend.inputs_opened().len(), 2);
}

#[test]
fn test_playback_uses_clip_rate_when_supported() {
    let backend = MockBackend::new();
    let devices = test_devices(&backend);

    let clip = AudioChunk::new(generate_sine_samples(440.0, 0.1, 24000), 24000);
    devices.play(&DeviceHint::any(), &[48000], &clip).unwrap();

    assert_eq!(backend.played_rate(), Some(24000));
    assert_eq!(backend.played().len(), clip.len());
}

#[test]
fn test_recorder_stops_after_trailing_silence() {
    let backend = MockBackend::new().with_signal(MockSignal::new().tone(1.0, 3000));
    let recorder = Recorder::new(
        test_devices(&backend),
        RecorderConfig {
            silence_duration: Duration::from_millis(500),
            ..RecorderConfig::default()
        },
    );

    let buffer = recorder.record_default().unwrap();
    assert!(buffer.speech_detected());
    assert_eq!(buffer.sample_rate(), CANONICAL_RATE);
    assert!(buffer.duration() >= Duration::from_millis(1400));
    assert!(buffer.duration() < Duration::from_secs(2));

    let wav = buffer.to_wav().unwrap();
    let decoded = decode_audio(&wav).unwrap();
    assert_eq!(decoded.sample_rate(), CANONICAL_RATE);
    assert_eq!(decoded.len(), buffer.len());
}

#[test]
fn test_recorder_caps_silent_input_at_max_duration() {
    let backend = MockBackend::new();
    let recorder = Recorder::new(
        test_devices(&backend),
        RecorderConfig {
            max_duration: Duration::from_secs(2),
            ..RecorderConfig::default()
        },
    );

    let buffer = recorder.record_default().unwrap();
    assert!(!buffer.speech_detected());
    assert!(buffer.duration() >= Duration::from_millis(1900));
}

#[test]
fn test_recorder_without_microphone_fails() {
    let backend = MockBackend::new().with_devices(vec![MockDevice::output(0, "speaker", &[48000])]);
    let recorder = Recorder::new(test_devices(&backend), RecorderConfig::default());

    assert!(matches!(recorder.record_default(), Err(Error::DeviceUnavailable(_))));
}

#[test]
fn test_detector_calibrates_against_room_noise() {
    let backend = MockBackend::new().with_signal(MockSignal::new().then_tone(300));
    let mut detector = VoiceActivityDetector::new(
        test_devices(&backend),
        detector_config(DetectorMode::Vad),
        Arc::new(SessionSignals::new()),
    );

    let profile = detector.calibrate().unwrap();
    assert!((profile.noise_floor - 300.0).abs() < 1.0);
    assert!(profile.threshold >= MIN_THRESHOLD);
    assert!(profile.threshold <= MAX_THRESHOLD);
    assert!(profile.threshold > profile.noise_floor);
    assert!(profile.min_active_chunks >= 1);
}

#[test]
fn test_detector_ignores_steady_noise_and_wakes_on_speech() {
    let signal = MockSignal::new().tone(0.3, 100).tone(0.5, 100).tone(1.0, 4000);
    let backend = MockBackend::new().with_signal(signal);
    let mut detector = VoiceActivityDetector::new(
        test_devices(&backend),
        detector_config(DetectorMode::Vad),
        Arc::new(SessionSignals::new()),
    );

    detector.calibrate().unwrap();
    assert!(detector.listen());
    assert_eq!(detector.mode(), DetectorMode::Vad);
}

#[test]
fn test_detector_without_microphone_degrades_to_fallback() {
    let backend = MockBackend::new().with_devices(vec![MockDevice::output(0, "speaker", &[48000])]);
    let signals = Arc::new(SessionSignals::new());
    let mut detector = VoiceActivityDetector::new(
        test_devices(&backend),
        detector_config(DetectorMode::Vad),
        Arc::clone(&signals),
    );

    assert_eq!(detector.mode(), DetectorMode::Fallback);
    assert!(!detector.holds_device());

    signals.trigger();
    assert!(detector.listen());
}

#[test]
fn test_detector_hands_microphone_to_recorder() {
    let backend = MockBackend::new().with_signal(MockSignal::new().tone(0.5, 3000));
    let devices = test_devices(&backend);
    let mut detector = VoiceActivityDetector::new(
        devices.clone(),
        detector_config(DetectorMode::Vad),
        Arc::new(SessionSignals::new()),
    );
    assert!(detector.holds_device());

    let recorder = Recorder::new(devices, RecorderConfig::default());
    assert!(recorder.record_default().is_err());

    {
        let _paused = detector.pause_guard();
        assert!(recorder.record_default().unwrap().speech_detected());
    }
    assert!(detector.holds_device());
}

#[test]
fn test_stopped_detector_releases_microphone() {
    let backend = MockBackend::new();
    let devices = test_devices(&backend);
    let signals = Arc::new(SessionSignals::new());
    let mut detector = VoiceActivityDetector::new(
        devices.clone(),
        detector_config(DetectorMode::Vad),
        Arc::clone(&signals),
    );

    detector.stop();
    assert!(signals.is_stopped());
    assert!(!detector.holds_device());
    assert!(!detector.listen());
    assert!(devices.open_capture(&DeviceHint::any(), &[44100]).is_ok());
}
