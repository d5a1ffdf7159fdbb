//! Configuration for the streaming service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vcam_core::{
    CaptureConfig, ConfigIntent, DEFAULT_BAUD_RATE, DriverConfig, Resolution,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Serial link settings.
    pub serial: SerialConfig,
    /// Camera and transfer settings.
    pub camera: CameraConfig,
    /// Retry and backoff policy.
    pub recovery: RecoveryConfig,
    /// Frame consumer settings.
    pub consumer: ConsumerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`. Empty means unset.
    pub port: String,
    /// Line speed; must be one the module supports.
    pub baud: u32,
}

/// Camera configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Image size applied at the first frame boundary: "640x480",
    /// "320x240" or "160x120". Unset keeps the device's current size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// JPEG compression rate applied at the first frame boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<u8>,
    /// Largest chunk requested per read.
    pub packet_len: u32,
    /// Post-reset quiet period in milliseconds.
    pub settle_ms: u64,
    /// Deadline for a single reply, in milliseconds.
    pub read_timeout_ms: u64,
}

/// Recovery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive failed cycles before a full re-init.
    pub max_retries: u32,
    /// Backoff after a failed cycle, in milliseconds.
    pub backoff_ms: u64,
    /// Backoff after a failed initialization, in milliseconds.
    pub init_backoff_ms: u64,
}

/// Frame consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// How often to check for a new frame, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: DEFAULT_BAUD_RATE,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: None,
            compression: None,
            packet_len: 984,
            settle_ms: 2500,
            read_timeout_ms: 5000,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 5000,
            init_backoff_ms: 5000,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl StreamConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The default configuration rendered as TOML.
    pub fn default_toml() -> std::io::Result<String> {
        toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)
    }

    /// Driver timing, with the packet length clamped to at least 1.
    pub fn to_driver_config(&self) -> DriverConfig {
        DriverConfig {
            read_timeout: Duration::from_millis(self.camera.read_timeout_ms.max(1)),
            settle: Duration::from_millis(self.camera.settle_ms),
            packet_len: self.camera.packet_len.max(1),
        }
    }

    /// Retry policy, with the bound clamped to at least 1.
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            max_retries: self.recovery.max_retries.max(1),
            backoff: Duration::from_millis(self.recovery.backoff_ms),
            init_backoff: Duration::from_millis(self.recovery.init_backoff_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.consumer.poll_interval_ms.max(1))
    }

    /// Camera settings to queue before the first frame, in apply order.
    pub fn initial_intents(&self) -> Vec<ConfigIntent> {
        let mut intents = Vec::new();
        if let Some(res) = self.camera.resolution {
            intents.push(ConfigIntent::SetResolution(res));
        }
        if let Some(rate) = self.camera.compression {
            intents.push(ConfigIntent::SetCompression(rate));
        }
        intents
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = StreamConfig::default_toml().unwrap();
        assert!(text.contains("[serial]"));
        assert!(text.contains("baud = 38400"));
        assert!(text.contains("packet_len = 984"));
        assert!(!text.contains("resolution"));
    }

    #[test]
    fn roundtrip_config() {
        let text = StreamConfig::default_toml().unwrap();
        let parsed: StreamConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.serial.baud, 38400);
        assert_eq!(parsed.consumer.poll_interval_ms, 100);
        assert_eq!(parsed.recovery.max_retries, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: StreamConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyUSB0"

            [camera]
            resolution = "320x240"
            compression = 54
            "#,
        )
        .unwrap();
        assert_eq!(parsed.serial.port, "/dev/ttyUSB0");
        assert_eq!(parsed.serial.baud, 38400);
        assert_eq!(parsed.camera.packet_len, 984);
        assert_eq!(
            parsed.initial_intents(),
            vec![
                ConfigIntent::SetResolution(Resolution::Qvga),
                ConfigIntent::SetCompression(54),
            ]
        );
    }

    #[test]
    fn unknown_resolution_is_a_parse_error() {
        let parsed = toml::from_str::<StreamConfig>("[camera]\nresolution = \"800x600\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn conversions_clamp() {
        let mut cfg = StreamConfig::default();
        cfg.camera.packet_len = 0;
        cfg.recovery.max_retries = 0;
        assert_eq!(cfg.to_driver_config().packet_len, 1);
        assert_eq!(cfg.to_capture_config().max_retries, 1);
        assert_eq!(cfg.to_driver_config().settle, Duration::from_millis(2500));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = StreamConfig::load(Path::new("/nonexistent/vcam-stream.toml"));
        assert_eq!(cfg.camera.read_timeout_ms, 5000);
    }
}
