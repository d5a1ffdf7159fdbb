//! Outcome reporting for the capture loop.
//!
//! Every failure the loop swallows (and every notable transition) is both
//! logged through `tracing` and, if a listener is attached, sent as a
//! [`CaptureEvent`] over an unbounded channel. The loop never blocks on a
//! slow listener.

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use crate::error::{CameraError, ErrorKind};
use crate::state::CaptureState;

pub type CaptureEventReceiver = UnboundedReceiver<CaptureEvent>;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A reset sequence is starting.
    Initializing,
    /// The device accepted the reset and settled.
    Initialized,
    /// The reset sequence failed; it will be retried after a backoff.
    InitFailed,
    /// A capture, transfer or flush failed; the loop is recovering.
    CycleFailed,
    /// The retry bound was reached; the next step re-initializes.
    ForcedReinit,
    /// A queued configuration intent was applied.
    ConfigApplied,
    /// A queued configuration intent failed.
    ConfigFailed,
    /// The loop shut down.
    Stopped,
}

/// One reported loop outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEvent {
    pub kind: EventKind,
    /// Loop state at the time of the event.
    pub state: CaptureState,
    pub message: String,
    /// Consecutive-failure count after the event.
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CaptureEvent {
    pub fn is_failure(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// Sends events to an optional listener and mirrors them to the log.
#[derive(Debug, Default)]
pub struct EventReporter {
    tx: Option<UnboundedSender<CaptureEvent>>,
}

impl EventReporter {
    /// A reporter plus the receiving end of its channel.
    pub fn channel() -> (Self, CaptureEventReceiver) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn info(&self, kind: EventKind, state: CaptureState, retries: u32, message: impl Into<String>) {
        let message = message.into();
        info!(%state, retries, "{message}");
        self.send(CaptureEvent {
            kind,
            state,
            message,
            retries,
            error_kind: None,
        });
    }

    pub fn failure(&self, kind: EventKind, state: CaptureState, retries: u32, err: &CameraError) {
        let message = err.to_string();
        warn!(%state, retries, "{kind:?}: {message}");
        self.send(CaptureEvent {
            kind,
            state,
            message,
            retries,
            error_kind: Some(err.kind()),
        });
    }

    fn send(&self, event: CaptureEvent) {
        if let Some(tx) = &self.tx {
            // A dropped listener only stops the channel, never the loop.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_error_kind() {
        let (reporter, mut rx) = EventReporter::channel();
        reporter.failure(
            EventKind::CycleFailed,
            CaptureState::Capturing,
            1,
            &CameraError::EmptyImage,
        );
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::CycleFailed);
        assert_eq!(ev.error_kind, Some(ErrorKind::Protocol));
        assert!(ev.is_failure());
        assert_eq!(ev.retries, 1);
    }

    #[test]
    fn info_has_no_error_kind() {
        let (reporter, mut rx) = EventReporter::channel();
        reporter.info(EventKind::Initialized, CaptureState::Initializing, 0, "ok");
        let ev = rx.try_recv().unwrap();
        assert!(!ev.is_failure());
        assert_eq!(ev.message, "ok");
    }

    #[test]
    fn dropped_listener_is_ignored() {
        let (reporter, rx) = EventReporter::channel();
        drop(rx);
        reporter.info(EventKind::Stopped, CaptureState::Stopped, 0, "bye");
        EventReporter::default().info(EventKind::Stopped, CaptureState::Stopped, 0, "bye");
    }
}
