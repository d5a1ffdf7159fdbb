//! Shared value types: image resolution and captured frames.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CameraError;

// ── Resolution ───────────────────────────────────────────────────

/// Image sizes supported by the camera module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "640x480")]
    Vga,
    #[serde(rename = "320x240")]
    Qvga,
    #[serde(rename = "160x120")]
    Qqvga,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Vga, Resolution::Qvga, Resolution::Qqvga];

    /// Parameter byte carried by the set-size command.
    pub const fn size_byte(self) -> u8 {
        match self {
            Resolution::Vga => 0x00,
            Resolution::Qvga => 0x11,
            Resolution::Qqvga => 0x22,
        }
    }

    /// `(width, height)` in pixels.
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Vga => (640, 480),
            Resolution::Qvga => (320, 240),
            Resolution::Qqvga => (160, 120),
        }
    }

    pub fn from_size_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.size_byte() == byte)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

impl FromStr for Resolution {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "640x480" => Ok(Resolution::Vga),
            "320x240" => Ok(Resolution::Qvga),
            "160x120" => Ok(Resolution::Qqvga),
            other => Err(CameraError::ConfigRejected(format!(
                "unknown resolution {other:?} (expected 640x480, 320x240 or 160x120)"
            ))),
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One complete JPEG image downloaded from the device.
///
/// The payload is a reference-counted [`Bytes`], so handing a frame to
/// several consumers never copies the image.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    resolution: Option<Resolution>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Bytes, resolution: Option<Resolution>) -> Self {
        Self {
            data,
            resolution,
            captured_at: Instant::now(),
        }
    }

    /// Raw JPEG bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resolution the device was last configured with, if known.
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// `true` when the payload starts with SOI and ends with EOI.
    pub fn is_jpeg(&self) -> bool {
        self.data.len() >= 4
            && self.data.starts_with(&[0xFF, 0xD8])
            && self.data.ends_with(&[0xFF, 0xD9])
    }
}
