//! Cross-thread hand-off between the capture loop and its consumers.
//!
//! These are the only pieces of state shared across threads:
//!
//! - [`FrameMailbox`] / [`FrameSink`]: latest-value slot carrying frames
//!   out of the capture thread.
//! - [`ConfigSink`] / [`ConfigMailbox`]: FIFO of configuration intents
//!   carried into the capture thread and applied between cycles.

mod config;
mod frame;

pub use config::{ConfigIntent, ConfigMailbox, ConfigSink, config_channel};
pub use frame::{FrameMailbox, FrameSink};
