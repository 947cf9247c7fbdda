//! Process wiring: stores, audio, providers, sessions and the control API

use std::sync::Arc;

use crate::api::{ApiServer, ApiState};
use crate::audio::{AudioBackend, AudioDeviceManager};
use crate::config::Config;
use crate::db::{self, DbPool, HistoryRepo, UserRepo};
use crate::feedback::ChannelFeedback;
use crate::router::CommandRouter;
use crate::services::{
    HttpSpeechToText, HttpTextToSpeech, OpenAiCommandProcessor, SpeechToText, TextToSpeech,
    Unconfigured,
};
use crate::session::{PipelineServices, SessionLifecycleManager};
use crate::Result;

/// The voicebox daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
    devices: AudioDeviceManager,
    sessions: Arc<SessionLifecycleManager>,
}

impl Daemon {
    /// Open the database and build every collaborator a session needs
    ///
    /// Providers without an API key are replaced by stand-ins that fail each
    /// call, so sessions still run and answer with an apology.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or a client cannot be built
    pub fn new(config: Config, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        let db_path = config.db_path();
        let db = db::init(&db_path)?;
        tracing::info!(path = %db_path.display(), "database ready");

        let users = Arc::new(UserRepo::new(db.clone()));
        let history = Arc::new(HistoryRepo::new(db.clone()));
        let devices = AudioDeviceManager::new(backend).with_chunk_size(config.audio.chunk_size);

        let stt: Arc<dyn SpeechToText> = match config.stt_api_key() {
            Some(key) => Arc::new(HttpSpeechToText::new(
                config.stt.provider,
                key.to_string(),
                config.stt.model.clone(),
                config.stt.timeout,
            )?),
            None => {
                tracing::warn!(provider = ?config.stt.provider, "no STT API key, transcription disabled");
                Arc::new(Unconfigured)
            }
        };

        let tts: Arc<dyn TextToSpeech> = match config.tts_api_key() {
            Some(key) => Arc::new(HttpTextToSpeech::new(
                config.tts.provider,
                key.to_string(),
                config.tts.model.clone(),
                config.tts.speed,
                config.tts.timeout,
            )?),
            None => {
                tracing::warn!(provider = ?config.tts.provider, "no TTS API key, speech output disabled");
                Arc::new(Unconfigured)
            }
        };

        let mut router = CommandRouter::new()?.with_history(history);
        match (&config.api_keys.openai, config.llm.enabled) {
            (Some(key), true) => {
                let processor =
                    OpenAiCommandProcessor::new(key.clone(), config.llm.model.clone(), config.llm.timeout)?
                        .with_settings(users.clone());
                router = router.with_processor(Arc::new(processor), config.llm.timeout);
                tracing::info!(model = %config.llm.model, "LLM fallback enabled");
            }
            (None, true) => tracing::warn!("no OpenAI API key, LLM fallback disabled"),
            (_, false) => tracing::info!("LLM fallback disabled by config"),
        }

        // Detached; the logger exits when the last sender is dropped
        let (feedback, _logger) = ChannelFeedback::spawn_logger()?;

        let services = PipelineServices {
            devices: devices.clone(),
            stt,
            tts,
            router: Arc::new(router),
            feedback: Arc::new(feedback),
        };

        let sessions = Arc::new(
            SessionLifecycleManager::new(users, services, config.session_config())
                .with_stop_timeout(config.stop_timeout),
        );

        Ok(Self {
            config,
            db,
            devices,
            sessions,
        })
    }

    /// The session registry
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionLifecycleManager> {
        Arc::clone(&self.sessions)
    }

    /// Serve the control API until Ctrl-C, then stop every session
    ///
    /// `autostart` starts a session for that user before serving.
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self, autostart: Option<String>, listen_now: bool) -> Result<()> {
        tracing::info!(
            port = self.config.api_server.port,
            mode = ?self.config.detector.mode,
            "daemon running"
        );

        if let Some(user_id) = autostart {
            let sessions = self.sessions();
            let started = tokio::task::spawn_blocking(move || sessions.start_session(&user_id, listen_now))
                .await
                .unwrap_or(false);
            if !started {
                tracing::warn!("autostart session did not start");
            }
        }

        let state = Arc::new(ApiState {
            sessions: self.sessions(),
            devices: self.devices.clone(),
            db: self.db.clone(),
        });
        let server = ApiServer::new(state, self.config.api_server.port).spawn();

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                Ok(())
            }
            joined = server => match joined {
                Ok(result) => result,
                Err(e) => Err(crate::Error::Config(format!("API server task failed: {e}"))),
            },
        };

        let sessions = self.sessions();
        let stopped = tokio::task::spawn_blocking(move || sessions.stop_all())
            .await
            .unwrap_or(0);
        tracing::info!(stopped, "sessions stopped");

        outcome
    }
}
