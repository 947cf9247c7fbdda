//! Cross-thread control flags for one session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Stop, pause and "listen now" flags shared between a session worker and its controller
///
/// All waits wake on any state change so a blocked worker notices a stop
/// request immediately.
#[derive(Debug, Default)]
pub struct SessionSignals {
    stop: AtomicBool,
    paused: AtomicBool,
    triggered: Mutex<bool>,
    changed: Condvar,
}

impl SessionSignals {
    /// Fresh signals: running, not paused, no trigger pending
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.triggered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _guard = self.lock();
        self.changed.notify_all();
    }

    /// Ask the worker to stop at its next check
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Stop listening and release the microphone until resumed
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Resume listening after [`pause`](Self::pause)
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify();
    }

    /// Whether listening is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Request a one-shot "listen now"
    pub fn trigger(&self) {
        let mut triggered = self.lock();
        *triggered = true;
        self.changed.notify_all();
    }

    /// Consume a pending trigger
    #[must_use]
    pub fn take_trigger(&self) -> bool {
        std::mem::take(&mut *self.lock())
    }

    /// Block until a trigger arrives, a stop is requested, or `timeout` passes
    ///
    /// Returns true only when a trigger was consumed.
    #[must_use]
    pub fn wait_for_trigger(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut triggered, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |triggered| {
                !*triggered && !self.is_stopped()
            })
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *triggered)
    }

    /// Block while paused, up to `timeout`; returns whether still paused
    #[must_use]
    pub fn wait_while_paused(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let _guard = self
            .changed
            .wait_timeout_while(guard, timeout, |_| self.is_paused() && !self.is_stopped())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn trigger_is_one_shot() {
        let signals = SessionSignals::new();
        assert!(!signals.take_trigger());
        signals.trigger();
        assert!(signals.take_trigger());
        assert!(!signals.take_trigger());
    }

    #[test]
    fn wait_for_trigger_times_out() {
        let signals = SessionSignals::new();
        let start = Instant::now();
        assert!(!signals.wait_for_trigger(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn trigger_wakes_waiter() {
        let signals = Arc::new(SessionSignals::new());
        let waiter = {
            let signals = Arc::clone(&signals);
            std::thread::spawn(move || signals.wait_for_trigger(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        signals.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn stop_wakes_waiter_without_trigger() {
        let signals = Arc::new(SessionSignals::new());
        let waiter = {
            let signals = Arc::clone(&signals);
            std::thread::spawn(move || {
                let start = Instant::now();
                let fired = signals.wait_for_trigger(Duration::from_secs(5));
                (fired, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        signals.request_stop();

        let (fired, elapsed) = waiter.join().unwrap();
        assert!(!fired);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn pause_and_resume() {
        let signals = SessionSignals::new();
        signals.pause();
        assert!(signals.is_paused());
        assert!(signals.wait_while_paused(Duration::from_millis(5)));
        signals.resume();
        assert!(!signals.wait_while_paused(Duration::from_millis(5)));
    }
}
