//! The per-user pipeline state machine

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use super::SessionSignals;
use crate::audio::{AudioDeviceManager, DeviceHint, decode_audio};
use crate::feedback::{FeedbackEvent, FeedbackIndicator};
use crate::i18n::{self, Language};
use crate::recorder::{Recorder, RecorderConfig, RecordingBuffer};
use crate::router::CommandRouter;
use crate::services::{SpeechToText, TextToSpeech, call_with_deadline};
use crate::vad::{DetectorConfig, DetectorMode, VoiceActivityDetector};
use crate::Result;

/// How often a paused session re-checks its flags
const PAUSE_POLL: Duration = Duration::from_millis(250);

/// Wait before retrying when the microphone could not be read
const DEVICE_RETRY: Duration = Duration::from_millis(500);

/// Where a session is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet listening
    Idle,
    /// Waiting for voice activity or a trigger
    AwaitingWake,
    /// Capturing a command
    Recording,
    /// Waiting for speech-to-text
    Transcribing,
    /// Classifying and answering
    Routing,
    /// Waiting for text-to-speech
    Synthesizing,
    /// Playing the reply
    Playing,
    /// Worker has exited its loop
    Stopped,
}

/// Who a session belongs to and how to talk to them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    /// User identifier
    pub user_id: String,
    /// Language for recognition, routing and replies
    pub language: Language,
    /// Extra LLM personality instructions
    pub personality_text: Option<String>,
}

/// Collaborators shared by every session
#[derive(Clone)]
pub struct PipelineServices {
    /// Audio hardware
    pub devices: AudioDeviceManager,
    /// Speech recognition
    pub stt: Arc<dyn SpeechToText>,
    /// Speech synthesis
    pub tts: Arc<dyn TextToSpeech>,
    /// Intent routing
    pub router: Arc<CommandRouter>,
    /// Visual feedback sink
    pub feedback: Arc<dyn FeedbackIndicator>,
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("devices", &self.devices)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Per-session pipeline settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wake detection
    pub detector: DetectorConfig,
    /// Command capture
    pub recorder: RecorderConfig,
    /// Speaker preference
    pub playback_hint: DeviceHint,
    /// Playback rates to try, in order
    pub playback_rates: Vec<u32>,
    /// TTS voice
    pub voice: String,
    /// Deadline for speech-to-text
    pub stt_timeout: Duration,
    /// Deadline for text-to-speech
    pub tts_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            recorder: RecorderConfig::default(),
            playback_hint: DeviceHint::any(),
            playback_rates: vec![24000, 48000, 44100, 16000],
            voice: "alloy".to_string(),
            stt_timeout: Duration::from_secs(30),
            tts_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs one user's Detector → Recorder → STT → Router → TTS → Playback loop
///
/// Every stage handles its own failures; nothing short of a stop request ends
/// the loop.
pub struct SessionOrchestrator {
    session: UserSession,
    services: PipelineServices,
    config: SessionConfig,
    detector: VoiceActivityDetector,
    recorder: Recorder,
    signals: Arc<SessionSignals>,
    state: Arc<Mutex<SessionState>>,
    listen_now: bool,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("session", &self.session)
            .field("mode", &self.detector.mode())
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    /// Build the pipeline for `session`
    ///
    /// In VAD mode this opens the microphone; if none is available the
    /// detector degrades to manual triggering.
    #[must_use]
    pub fn new(
        session: UserSession,
        services: PipelineServices,
        config: SessionConfig,
        signals: Arc<SessionSignals>,
        listen_immediately: bool,
    ) -> Self {
        let detector = VoiceActivityDetector::new(
            services.devices.clone(),
            config.detector.clone(),
            Arc::clone(&signals),
        );
        let recorder = Recorder::new(services.devices.clone(), config.recorder.clone())
            .with_signals(Arc::clone(&signals));

        Self {
            session,
            services,
            config,
            detector,
            recorder,
            signals,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            listen_now: listen_immediately,
        }
    }

    /// Publish state changes into `state` (shared with the registry)
    #[must_use]
    pub fn with_state(mut self, state: Arc<Mutex<SessionState>>) -> Self {
        self.state = state;
        self.publish(SessionState::Idle);
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Effective detector mode
    #[must_use]
    pub const fn detector_mode(&self) -> DetectorMode {
        self.detector.mode()
    }

    fn publish(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state();
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "state transition");
        }
        self.publish(next);
    }

    fn feedback(&self, event: FeedbackEvent) {
        self.services.feedback.trigger(event);
    }

    /// Run until a stop is requested
    pub fn run(mut self) {
        tracing::info!(
            language = %self.session.language,
            mode = ?self.detector.mode(),
            "session started"
        );
        self.transition(SessionState::AwaitingWake);

        if self.detector.mode() == DetectorMode::Vad
            && let Err(e) = self.detector.calibrate()
        {
            tracing::warn!(error = %e, "calibration failed");
        }
        self.feedback(FeedbackEvent::Idle);

        while !self.signals.is_stopped() {
            if self.signals.is_paused() {
                self.wait_out_pause();
                continue;
            }

            let activated = std::mem::take(&mut self.listen_now)
                || self.signals.take_trigger()
                || self.detector.listen();

            if activated {
                if !self.signals.is_stopped() {
                    self.handle_command();
                }
            } else if self.detector.mode() == DetectorMode::Vad
                && !self.detector.holds_device()
                && !self.signals.is_paused()
            {
                // Microphone lost; back off instead of spinning, but honour triggers
                self.listen_now = self.signals.wait_for_trigger(DEVICE_RETRY);
            }
        }

        self.detector.pause();
        self.transition(SessionState::Stopped);
        self.feedback(FeedbackEvent::Off);
        tracing::info!("session stopped");
    }

    fn wait_out_pause(&mut self) {
        self.detector.pause();
        tracing::info!("listening paused");

        while self.signals.wait_while_paused(PAUSE_POLL) {
            if self.signals.is_stopped() {
                return;
            }
        }

        if self.signals.is_stopped() {
            return;
        }
        if let Err(e) = self.detector.resume() {
            tracing::warn!(error = %e, "could not reacquire microphone after pause");
        }
        tracing::info!("listening resumed");
    }

    /// One pass: record, transcribe, route, answer
    pub fn handle_command(&mut self) {
        self.transition(SessionState::Recording);
        self.feedback(FeedbackEvent::Listening);

        let recording = {
            let _handoff = self.detector.pause_guard();
            self.recorder.record_default()
        };

        if self.signals.is_stopped() {
            return;
        }
        let buffer = match recording {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!(error = %e, "recording failed");
                self.feedback(FeedbackEvent::Error);
                self.transition(SessionState::AwaitingWake);
                return;
            }
        };

        self.transition(SessionState::Transcribing);
        self.feedback(FeedbackEvent::Thinking);
        let transcript = match self.transcribe(&buffer) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.feedback(FeedbackEvent::Error);
                self.respond(i18n::apology(self.session.language));
                return;
            }
        };

        if self.signals.is_stopped() {
            return;
        }
        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::debug!("empty transcript");
            self.respond(i18n::did_not_hear(self.session.language));
            return;
        }

        self.transition(SessionState::Routing);
        let (_, reply) = self.services.router.route_as(
            transcript,
            self.session.language.code(),
            &self.session.user_id,
            self.session.personality_text.as_deref(),
        );

        if self.signals.is_stopped() {
            return;
        }
        self.respond(&reply);
    }

    /// Synthesize and play `text`, ending in `AwaitingWake` whatever happens
    fn respond(&mut self, text: &str) {
        self.transition(SessionState::Synthesizing);
        let audio = match self.synthesize(text) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                self.feedback(FeedbackEvent::Error);
                self.transition(SessionState::AwaitingWake);
                return;
            }
        };

        if self.signals.is_stopped() {
            return;
        }
        self.transition(SessionState::Playing);
        self.feedback(FeedbackEvent::Speaking);
        match self.play(&audio) {
            Ok(()) => self.feedback(FeedbackEvent::Success),
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                self.feedback(FeedbackEvent::Error);
            }
        }

        self.transition(SessionState::AwaitingWake);
        self.feedback(FeedbackEvent::Idle);
    }

    fn transcribe(&self, buffer: &RecordingBuffer) -> Result<String> {
        let wav = buffer.to_wav()?;
        let stt = Arc::clone(&self.services.stt);
        let language = self.session.language.code();
        call_with_deadline(self.config.stt_timeout, "speech-to-text", move || {
            stt.transcribe(&wav, language)
        })
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let tts = Arc::clone(&self.services.tts);
        let text = text.to_string();
        let language = self.session.language.code();
        let voice = self.config.voice.clone();
        call_with_deadline(self.config.tts_timeout, "text-to-speech", move || {
            tts.synthesize(&text, language, &voice)
        })
    }

    fn play(&self, audio: &[u8]) -> Result<()> {
        let chunk = decode_audio(audio)?;
        self.services
            .devices
            .play(&self.config.playback_hint, &self.config.playback_rates, &chunk)
    }
}
