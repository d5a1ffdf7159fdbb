//! Port selection from command-line flags and the config file.

use vcam_core::{PortChoice, PortSelector};

use crate::config::SerialConfig;

/// Picks the port given on the command line, else the configured one.
#[derive(Debug, Clone)]
pub struct ConfiguredPort {
    port: Option<String>,
    baud: u32,
}

impl ConfiguredPort {
    pub fn new(cli_port: Option<String>, cli_baud: Option<u32>, serial: &SerialConfig) -> Self {
        let port = cli_port
            .or_else(|| Some(serial.port.clone()))
            .filter(|p| !p.trim().is_empty());
        Self {
            port,
            baud: cli_baud.unwrap_or(serial.baud),
        }
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl PortSelector for ConfiguredPort {
    fn select(&mut self) -> Option<PortChoice> {
        let path = self.port.clone()?;
        Some(PortChoice {
            path,
            baud: self.baud,
        })
    }
}
