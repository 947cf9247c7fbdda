//! Hard deadlines for blocking external calls

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::{Error, Result};

/// Run `call` on a helper thread and give up after `timeout`
///
/// A call that misses the deadline keeps running in the background; its
/// result is dropped.
///
/// # Errors
///
/// Returns [`Error::Timeout`] labelled with `label` when the deadline passes,
/// otherwise whatever `call` returned
pub fn call_with_deadline<T, F>(timeout: Duration, label: &str, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("call-{label}"))
        .spawn(move || {
            let _ = tx.send(call());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(call = label, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "external call timed out");
            Err(Error::Timeout(label.to_string()))
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Io(std::io::Error::other(format!(
            "{label} worker exited without a result"
        )))),
    }
}
