//! Registry of running per-user sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use super::orchestrator::{PipelineServices, SessionConfig, SessionOrchestrator, SessionState, UserSession};
use super::SessionSignals;
use crate::Error;
use crate::i18n::Language;
use crate::services::SettingsStore;

/// How often `stop_session` checks whether the worker has exited
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Default bound on waiting for a worker to exit
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct SessionEntry {
    handle: JoinHandle<()>,
    signals: Arc<SessionSignals>,
    state: Arc<Mutex<SessionState>>,
    language: Language,
}

impl SessionEntry {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }

    fn worker(&self) -> ThreadId {
        self.handle.thread().id()
    }
}

/// Snapshot of one session for status queries
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionStatus {
    /// User identifier
    pub user_id: String,
    /// Whether the worker thread is alive
    pub running: bool,
    /// Whether listening is paused
    pub paused: bool,
    /// Pipeline state
    pub state: SessionState,
    /// Session language code
    pub language: &'static str,
}

/// Starts, stops and steers one worker thread per user
///
/// Constructed once and shared by reference (usually in an `Arc`) with
/// whatever layer needs it.
pub struct SessionLifecycleManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    settings: Arc<dyn SettingsStore>,
    services: PipelineServices,
    config: SessionConfig,
    stop_timeout: Duration,
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("sessions", &self.running_sessions())
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionLifecycleManager {
    /// Create an empty registry
    #[must_use]
    pub fn new(settings: Arc<dyn SettingsStore>, services: PipelineServices, config: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            settings,
            services,
            config,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Override how long `stop_session` waits for a worker
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session for `user_id`
    ///
    /// Returns false when the user already has a live session, the user is
    /// unknown, or the worker thread cannot be spawned.
    pub fn start_session(&self, user_id: &str, listen_immediately: bool) -> bool {
        let mut sessions = self.lock();

        if let Some(entry) = sessions.get(user_id) {
            if entry.is_live() {
                tracing::info!(user_id, "session already running");
                return false;
            }
            if let Some(stale) = sessions.remove(user_id)
                && stale.handle.join().is_err()
            {
                tracing::error!(user_id, "previous session thread panicked");
            }
        }

        let settings = match self.settings.get(user_id) {
            Ok(settings) => settings,
            Err(e @ Error::UserNotFound(_)) => {
                tracing::warn!(user_id, error = %e, "cannot start session");
                return false;
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "settings lookup failed");
                return false;
            }
        };

        let session = UserSession {
            user_id: user_id.to_string(),
            language: Language::from_code(&settings.language),
            personality_text: settings.personality_text,
        };
        let language = session.language;
        let signals = Arc::new(SessionSignals::new());
        let state = Arc::new(Mutex::new(SessionState::Idle));

        let services = self.services.clone();
        let config = self.config.clone();
        let worker_signals = Arc::clone(&signals);
        let worker_state = Arc::clone(&state);
        let span = tracing::info_span!("session", user_id);

        let spawned = std::thread::Builder::new()
            .name(format!("session-{user_id}"))
            .spawn(move || {
                let _entered = span.entered();
                SessionOrchestrator::new(session, services, config, worker_signals, listen_immediately)
                    .with_state(worker_state)
                    .run();
            });

        match spawned {
            Ok(handle) => {
                sessions.insert(
                    user_id.to_string(),
                    SessionEntry {
                        handle,
                        signals,
                        state,
                        language,
                    },
                );
                tracing::info!(user_id, %language, listen_immediately, "session spawned");
                true
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to spawn session thread");
                false
            }
        }
    }

    /// Stop the session for `user_id`
    ///
    /// Signals the worker, waits up to the stop timeout, then removes the
    /// registry entry if it still belongs to that worker. Returns false for
    /// unknown users, and when the worker had to be abandoned after the timeout.
    pub fn stop_session(&self, user_id: &str) -> bool {
        let worker = {
            let sessions = self.lock();
            let Some(entry) = sessions.get(user_id) else {
                tracing::debug!(user_id, "no session to stop");
                return false;
            };
            entry.signals.request_stop();
            entry.worker()
        };

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            let finished = match self.lock().get(user_id) {
                Some(entry) if entry.worker() == worker => !entry.is_live(),
                // Removed by a concurrent stop, or already replaced by a new session
                _ => return true,
            };
            if finished || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(JOIN_POLL);
        }

        let Some(entry) = self.take_worker(user_id, worker) else {
            return true;
        };

        if entry.is_live() {
            let e = Error::RegistryTimeout(user_id.to_string());
            tracing::warn!(user_id, error = %e, "session did not stop in time, abandoning worker");
            return false;
        }

        if entry.handle.join().is_err() {
            tracing::error!(user_id, "session thread panicked");
        }
        tracing::info!(user_id, "session stopped");
        true
    }

    /// Remove the entry for `user_id` only if it still belongs to `worker`
    fn take_worker(&self, user_id: &str, worker: ThreadId) -> Option<SessionEntry> {
        let mut sessions = self.lock();
        if sessions.get(user_id)?.worker() != worker {
            return None;
        }
        sessions.remove(user_id)
    }

    /// Whether `user_id` has a live worker
    pub fn is_running(&self, user_id: &str) -> bool {
        self.lock().get(user_id).is_some_and(SessionEntry::is_live)
    }

    /// Release the microphone and stop listening until resumed
    pub fn pause_listening(&self, user_id: &str) -> bool {
        self.with_live(user_id, |entry| entry.signals.pause())
    }

    /// Resume listening after a pause
    pub fn resume_listening(&self, user_id: &str) -> bool {
        self.with_live(user_id, |entry| entry.signals.resume())
    }

    /// Fire a one-shot "listen now" request
    pub fn trigger_listening(&self, user_id: &str) -> bool {
        self.with_live(user_id, |entry| entry.signals.trigger())
    }

    fn with_live(&self, user_id: &str, action: impl FnOnce(&SessionEntry)) -> bool {
        match self.lock().get(user_id) {
            Some(entry) if entry.is_live() => {
                action(entry);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of a session, if one is registered
    pub fn status(&self, user_id: &str) -> Option<SessionStatus> {
        self.lock().get(user_id).map(|entry| SessionStatus {
            user_id: user_id.to_string(),
            running: entry.is_live(),
            paused: entry.signals.is_paused(),
            state: *entry.state.lock().unwrap_or_else(PoisonError::into_inner),
            language: entry.language.code(),
        })
    }

    /// Users with live sessions, sorted
    pub fn running_sessions(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(user_id, _)| user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Stop every registered session; returns how many stopped cleanly
    pub fn stop_all(&self) -> usize {
        let users: Vec<String> = self.lock().keys().cloned().collect();
        users.iter().filter(|user_id| self.stop_session(user_id)).count()
    }
}
