//! FIFO of configuration intents.
//!
//! Any thread may enqueue through a [`ConfigSink`]; only the capture loop
//! drains the [`ConfigMailbox`], and only while it is between frames, so
//! a resolution change can never land in the middle of a transfer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::error::CameraError;
use crate::types::Resolution;

// ── ConfigIntent ─────────────────────────────────────────────────

/// A requested change to the device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", content = "value", rename_all = "snake_case")]
pub enum ConfigIntent {
    SetResolution(Resolution),
    SetCompression(u8),
}

impl fmt::Display for ConfigIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetResolution(res) => write!(f, "resolution {res}"),
            Self::SetCompression(rate) => write!(f, "compression {rate:#04x}"),
        }
    }
}

/// Parses `resolution WxH` and `compression N` (decimal or `0x` hex).
impl FromStr for ConfigIntent {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let (Some(key), Some(value), None) = (words.next(), words.next(), words.next()) else {
            return Err(CameraError::ConfigRejected(format!(
                "expected `<setting> <value>`, got {s:?}"
            )));
        };
        match key.to_ascii_lowercase().as_str() {
            "resolution" | "res" => value.parse().map(Self::SetResolution),
            "compression" | "quality" => parse_rate(value).map(Self::SetCompression),
            other => Err(CameraError::ConfigRejected(format!(
                "unknown setting {other:?}"
            ))),
        }
    }
}

fn parse_rate(value: &str) -> Result<u8, CameraError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| {
        CameraError::ConfigRejected(format!("compression rate {value:?} is not a byte"))
    })
}

// ── Channel ──────────────────────────────────────────────────────

/// Create a connected sink/mailbox pair.
pub fn config_channel() -> (ConfigSink, ConfigMailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConfigSink { tx }, ConfigMailbox { rx })
}

/// Producer side. Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct ConfigSink {
    tx: UnboundedSender<ConfigIntent>,
}

impl ConfigSink {
    /// Queue an intent without waiting for it to be applied.
    ///
    /// Returns `false` if the capture loop is gone.
    pub fn request(&self, intent: ConfigIntent) -> bool {
        if self.tx.send(intent).is_err() {
            warn!("capture loop gone; dropping config intent: {intent}");
            return false;
        }
        true
    }

    pub fn request_resolution(&self, resolution: Resolution) -> bool {
        self.request(ConfigIntent::SetResolution(resolution))
    }

    pub fn request_compression(&self, rate: u8) -> bool {
        self.request(ConfigIntent::SetCompression(rate))
    }
}

/// Consumer side, owned by the capture loop.
#[derive(Debug)]
pub struct ConfigMailbox {
    rx: UnboundedReceiver<ConfigIntent>,
}

impl ConfigMailbox {
    /// Take every intent queued so far, in arrival order.
    ///
    /// Intents enqueued while the caller applies this batch wait for the
    /// next drain.
    pub fn drain(&mut self) -> Vec<ConfigIntent> {
        let mut batch = Vec::new();
        while let Ok(intent) = self.rx.try_recv() {
            batch.push(intent);
        }
        batch
    }
}
