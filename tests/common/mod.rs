//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use voicebox::audio::{AudioDeviceManager, MockBackend, samples_to_wav};
use voicebox::db::{self, HistoryRepo, User, UserRepo};
use voicebox::feedback::{ChannelFeedback, FeedbackEvent};
use voicebox::services::{SpeechToText, TextToSpeech};
use voicebox::{
    CommandRouter, DbPool, DetectorConfig, DetectorMode, Error, PipelineServices, RecorderConfig,
    Result, SessionConfig, SessionLifecycleManager,
};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Create a test user in the database
pub fn create_test_user(db: &DbPool, user_id: &str, language: &str) -> User {
    UserRepo::new(db.clone())
        .upsert(user_id, language, None)
        .expect("failed to create test user")
}

/// Device manager over `backend` that retries without sleeping
pub fn test_devices(backend: &MockBackend) -> AudioDeviceManager {
    AudioDeviceManager::new(Arc::new(backend.clone())).with_reopen_backoff(Duration::ZERO)
}

/// Speech-to-text that replays scripted transcripts, then empty strings
#[derive(Default)]
pub struct ScriptedStt {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<(usize, String)>>,
}

impl ScriptedStt {
    pub fn new<S: AsRef<str>>(transcripts: &[S]) -> Self {
        Self {
            replies: Mutex::new(transcripts.iter().map(|t| Ok(t.as_ref().to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(Error::Stt("service down".to_string()))])),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(wav size, language)` for every call
    pub fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechToText for ScriptedStt {
    fn transcribe(&self, wav: &[u8], language: &str) -> Result<String> {
        self.calls.lock().unwrap().push((wav.len(), language.to_string()));
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}

/// Text-to-speech that records what it was asked to say and returns a short WAV
#[derive(Default)]
pub struct RecordingTts {
    spoken: Mutex<Vec<String>>,
}

impl RecordingTts {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl TextToSpeech for RecordingTts {
    fn synthesize(&self, text: &str, _language: &str, _voice: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        samples_to_wav(&vec![1000_i16; 2400], 24000)
    }
}

/// Fast pipeline timings for tests
pub fn fast_session_config(mode: DetectorMode) -> SessionConfig {
    SessionConfig {
        detector: DetectorConfig {
            mode,
            min_duration: Duration::from_millis(200),
            calibration: Duration::from_millis(200),
            ..DetectorConfig::default()
        },
        recorder: RecorderConfig {
            silence_duration: Duration::from_millis(500),
            max_duration: Duration::from_secs(3),
            ..RecorderConfig::default()
        },
        stt_timeout: Duration::from_secs(2),
        tts_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

/// Everything a session test needs to inspect afterwards
pub struct Harness {
    pub db: DbPool,
    pub backend: MockBackend,
    pub stt: Arc<ScriptedStt>,
    pub tts: Arc<RecordingTts>,
    pub feedback: std::sync::mpsc::Receiver<FeedbackEvent>,
    pub manager: SessionLifecycleManager,
}

/// A session manager over a mock backend, in-memory stores and scripted services
pub fn harness(backend: MockBackend, stt: ScriptedStt, mode: DetectorMode) -> Harness {
    let db = setup_test_db();
    let stt = Arc::new(stt);
    let tts = Arc::new(RecordingTts::default());
    let (feedback, rx) = ChannelFeedback::channel();

    let router = CommandRouter::new()
        .expect("router")
        .with_history(Arc::new(HistoryRepo::new(db.clone())));

    let services = PipelineServices {
        devices: test_devices(&backend),
        stt: stt.clone(),
        tts: tts.clone(),
        router: Arc::new(router),
        feedback: Arc::new(feedback),
    };

    let manager = SessionLifecycleManager::new(
        Arc::new(UserRepo::new(db.clone())),
        services,
        fast_session_config(mode),
    )
    .with_stop_timeout(Duration::from_secs(3));

    Harness {
        db,
        backend,
        stt,
        tts,
        feedback: rx,
        manager,
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
