//! Session lifecycle events for visual feedback (LEDs, screens)
//!
//! The orchestrator only sends events; a consumer on its own thread decides
//! how to render them. Sending never blocks and never fails the pipeline.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use serde::Serialize;

/// Something the user should see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackEvent {
    /// Recording a command
    Listening,
    /// Transcribing or routing
    Thinking,
    /// Playing a reply
    Speaking,
    /// A command completed
    Success,
    /// A stage failed
    Error,
    /// Waiting for the wake trigger
    Idle,
    /// Session stopped
    Off,
}

/// Fire-and-forget sink for feedback events
pub trait FeedbackIndicator: Send + Sync {
    /// Deliver `event`; failures are swallowed
    fn trigger(&self, event: FeedbackEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFeedback;

impl FeedbackIndicator for NoFeedback {
    fn trigger(&self, _event: FeedbackEvent) {}
}

/// Sends events over a channel to a consumer
#[derive(Debug, Clone)]
pub struct ChannelFeedback {
    tx: Sender<FeedbackEvent>,
}

impl ChannelFeedback {
    /// Create a sender and the receiving end for a custom consumer
    #[must_use]
    pub fn channel() -> (Self, Receiver<FeedbackEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Create a sender whose events are written to the log on a consumer thread
    ///
    /// The thread exits once every clone of the sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the consumer thread cannot be spawned
    pub fn spawn_logger() -> std::io::Result<(Self, JoinHandle<()>)> {
        let (feedback, rx) = Self::channel();
        let handle = std::thread::Builder::new()
            .name("feedback".to_string())
            .spawn(move || {
                for event in rx {
                    tracing::debug!(event = ?event, "feedback");
                }
            })?;
        Ok((feedback, handle))
    }
}

impl FeedbackIndicator for ChannelFeedback {
    fn trigger(&self, event: FeedbackEvent) {
        let _ = self.tx.send(event);
    }
}
