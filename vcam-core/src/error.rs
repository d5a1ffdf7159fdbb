//! Domain-specific error types for the camera driver.
//!
//! All fallible operations return `Result<T, CameraError>`.
//! The codec and driver never retry: every error travels straight up to
//! the capture loop, which is the only place that decides on backoff.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// The canonical error type for the camera stack.
#[derive(Debug, Error)]
pub enum CameraError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The serial layer reported an I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Fewer bytes than requested arrived before the read deadline.
    #[error("read timed out after {timeout:?}: expected {expected} bytes, got {received}")]
    Timeout {
        expected: usize,
        received: usize,
        timeout: Duration,
    },

    /// The transport has been closed; no further exchanges are possible.
    #[error("transport closed")]
    TransportClosed,

    // ── Protocol Errors ──────────────────────────────────────────
    /// The device reply header differs from the expected one.
    #[error("protocol mismatch on {operation}: expected [{}], got [{}]", Hex(.expected), Hex(.actual))]
    ProtocolMismatch {
        operation: &'static str,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    /// A chunk of a frame transfer failed; the whole frame is dropped.
    #[error("frame transfer aborted at offset {offset}: {source}")]
    TransferAborted {
        offset: u32,
        #[source]
        source: Box<CameraError>,
    },

    /// The device reported an empty image buffer after a capture.
    #[error("device reported an empty image")]
    EmptyImage,

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration intent carried an invalid parameter.
    #[error("configuration rejected: {0}")]
    ConfigRejected(String),

    // ── Device State Errors ──────────────────────────────────────
    /// A command was attempted before the device finished initializing.
    #[error("device not ready{}", unready_detail(.remaining))]
    DeviceUnready { remaining: Option<Duration> },

    // ── Startup Errors ───────────────────────────────────────────
    /// The port chooser returned without a selection.
    #[error("no serial port selected")]
    NoPortSelected,

    /// The requested baud rate is not offered by the module.
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),
}

/// Coarse classification used by the reporting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Protocol,
    Config,
    Unready,
    Startup,
}

impl CameraError {
    /// Classify this error for telemetry.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Serial(_) | Self::Timeout { .. } | Self::TransportClosed => {
                ErrorKind::Io
            }
            Self::ProtocolMismatch { .. } | Self::EmptyImage => ErrorKind::Protocol,
            Self::TransferAborted { source, .. } => source.kind(),
            Self::ConfigRejected(_) => ErrorKind::Config,
            Self::DeviceUnready { .. } => ErrorKind::Unready,
            Self::NoPortSelected | Self::UnsupportedBaudRate(_) => ErrorKind::Startup,
        }
    }

    /// Offset of the failing chunk, when this error aborted a transfer.
    pub fn transfer_offset(&self) -> Option<u32> {
        match self {
            Self::TransferAborted { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

fn unready_detail(remaining: &Option<Duration>) -> String {
    match remaining {
        Some(d) => format!(" (settling for another {d:?})"),
        None => " (not initialized)".to_string(),
    }
}

/// Space-separated hex rendering for diagnostics.
pub(crate) struct Hex<'a>(pub &'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}
