//! Capture loop states and the bounded retry counter.

use serde::Serialize;

// ── CaptureState ─────────────────────────────────────────────────

/// Where the capture loop currently is.
///
/// ```text
///  Idle ──► Initializing ──► Capturing ──► Downloading ──► Flushing
///            ▲  ↺ (fail)       ▲    │            │            │  │
///            │                 │    ▼            ▼            │  │ (ok)
///            └──(at bound)── Recovering ◄────────┴────────────┘  │
///                              │  (below bound)                  │
///                              └──────────► Capturing ◄──────────┘
///
///  any state ──(stop)──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureState {
    /// Created but not started.
    #[default]
    Idle,
    /// Resetting the device and waiting out the settle delay.
    Initializing,
    /// Triggering a still capture and querying its size.
    Capturing,
    /// Pulling `len` bytes of JPEG from the device.
    Downloading { len: u32 },
    /// Releasing the device frame buffer, then applying queued config.
    Flushing,
    /// Backing off after a failed operation.
    Recovering,
    /// Terminal: transport closed, nothing more is attempted.
    Stopped,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Capturing => write!(f, "Capturing"),
            Self::Downloading { len } => write!(f, "Downloading({len} bytes)"),
            Self::Flushing => write!(f, "Flushing"),
            Self::Recovering => write!(f, "Recovering"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl CaptureState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

// ── RetryCounter ─────────────────────────────────────────────────

/// Consecutive-failure counter bounded to `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
    max: u32,
}

impl RetryCounter {
    /// `max` is clamped to at least 1.
    pub fn new(max: u32) -> Self {
        Self {
            count: 0,
            max: max.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Record one failure; saturates at the bound.
    pub fn increment(&mut self) -> u32 {
        self.count = (self.count + 1).min(self.max);
        self.count
    }

    /// `true` once the bound is reached and a full re-init is due.
    pub fn exhausted(&self) -> bool {
        self.count >= self.max
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates_at_bound() {
        let mut c = RetryCounter::new(3);
        assert_eq!(c.increment(), 1);
        assert_eq!(c.increment(), 2);
        assert!(!c.exhausted());
        assert_eq!(c.increment(), 3);
        assert!(c.exhausted());
        assert_eq!(c.increment(), 3);
        c.reset();
        assert_eq!(c.count(), 0);
    }

    #[test]
    fn zero_bound_is_clamped() {
        let mut c = RetryCounter::new(0);
        assert_eq!(c.max(), 1);
        c.increment();
        assert!(c.exhausted());
    }

    #[test]
    fn display_format() {
        assert_eq!(CaptureState::Idle.to_string(), "Idle");
        assert_eq!(
            CaptureState::Downloading { len: 42 }.to_string(),
            "Downloading(42 bytes)"
        );
        assert_eq!(CaptureState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(CaptureState::default(), CaptureState::Idle);
        assert!(!CaptureState::default().is_stopped());
        assert!(CaptureState::Stopped.is_stopped());
    }
}
