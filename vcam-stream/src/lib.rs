//! # vcam-stream: headless camera streaming service
//!
//! Opens a VC0706-style camera on a serial port (or the in-process
//! simulator), runs the capture loop on its own thread and consumes the
//! frames it publishes.
//!
//! ## Runtime
//!
//! - **Frame poller**: takes the latest frame every poll interval and logs
//!   its size, resolution and JPEG markers.
//! - **Console**: `resolution WxH` / `compression N` lines on stdin become
//!   config intents, applied between frames.
//! - **Events**: `--events-json` prints loop events as JSON lines.

pub mod config;
pub mod select;
pub mod service;
