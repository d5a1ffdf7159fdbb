//! # vcam-core
//!
//! Driver and capture pipeline for VC0706-style UART JPEG cameras.
//!
//! This crate contains:
//! - **Transport**: `Transport` contract and the `serialport`-backed `SerialTransport`
//! - **Codec**: bit-exact command encoding and reply validation
//! - **Driver**: `Vc0706`, one half-duplex exchange per operation
//! - **Transfer**: chunked, all-or-nothing JPEG download
//! - **Capture**: `CaptureLoop`, the retrying state machine on its own thread
//! - **Mailbox**: latest-frame `FrameSink` and FIFO `ConfigSink`
//! - **Events**: structured outcome reports for logging/telemetry
//! - **Sim**: `SimulatedCamera`, an in-process device for tests and demos
//! - **Error**: `CameraError`, typed, `thiserror`-based error hierarchy

pub mod capture;
pub mod codec;
pub mod driver;
pub mod error;
pub mod events;
pub mod mailbox;
pub mod port;
pub mod sim;
pub mod state;
pub mod transfer;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{CaptureConfig, CaptureEndpoints, CaptureHandle, CaptureLoop, StopHandle};
pub use codec::{Command, Operation};
pub use driver::{DriverConfig, Vc0706};
pub use error::{CameraError, ErrorKind};
pub use events::{CaptureEvent, CaptureEventReceiver, EventKind};
pub use mailbox::{ConfigIntent, ConfigSink, FrameSink};
pub use port::{DEFAULT_BAUD_RATE, PortChoice, PortSelector, SUPPORTED_BAUD_RATES};
pub use sim::{Fault, SimHandle, SimulatedCamera};
pub use state::{CaptureState, RetryCounter};
pub use transport::{SerialTransport, Transport};
pub use types::{Frame, Resolution};
