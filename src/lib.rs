//! Voicebox - on-device voice interaction pipeline
//!
//! This library provides the pieces of a single-board voice appliance:
//! - Audio device negotiation, resampling and codecs
//! - Amplitude-based wake detection with auto-calibration
//! - Record-until-silence command capture
//! - Intent classification and dispatch
//! - One pipeline thread per user, managed by a session registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Control API  │  CLI  │  Chat front end      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            SessionLifecycleManager                   │
//! │   one SessionOrchestrator thread per user            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  Detector → Recorder → STT → Router → TTS → Speaker  │
//! │        AudioDeviceManager (device claims)            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod feedback;
pub mod i18n;
pub mod recorder;
pub mod router;
pub mod services;
pub mod session;
pub mod vad;

pub use audio::{AudioChunk, AudioDeviceManager, DeviceHint, DeviceInfo};
pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use feedback::{FeedbackEvent, FeedbackIndicator};
pub use i18n::Language;
pub use recorder::{Recorder, RecorderConfig, RecordingBuffer};
pub use router::{CommandIntent, CommandRouter, IntentKind};
pub use session::{
    PipelineServices, SessionConfig, SessionLifecycleManager, SessionOrchestrator, SessionSignals,
    SessionState, UserSession,
};
pub use vad::{CalibrationProfile, DetectorConfig, DetectorMode, VoiceActivityDetector};
