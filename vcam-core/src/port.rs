//! Serial port discovery and the port/baud selection hook.
//!
//! The driver never chooses a port itself. A [`PortSelector`] (a CLI
//! flag, a config file, an interactive picker) produces a [`PortChoice`],
//! and [`open_selected`] validates and opens it.

use std::time::Duration;

use tracing::info;

use crate::error::CameraError;
use crate::transport::SerialTransport;

/// Baud rates the camera module can be switched to.
pub const SUPPORTED_BAUD_RATES: [u32; 7] = [1200, 4800, 9600, 19200, 38400, 57600, 115200];

/// Rate the module powers up with.
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// A serial device path and line speed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChoice {
    pub path: String,
    pub baud: u32,
}

/// Source of the port to open at startup.
pub trait PortSelector {
    /// `None` means the user declined to pick one.
    fn select(&mut self) -> Option<PortChoice>;
}

impl<F> PortSelector for F
where
    F: FnMut() -> Option<PortChoice>,
{
    fn select(&mut self) -> Option<PortChoice> {
        self()
    }
}

pub fn validate_baud(baud: u32) -> Result<u32, CameraError> {
    if SUPPORTED_BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(CameraError::UnsupportedBaudRate(baud))
    }
}

/// Ask `selector` for a port and open it.
pub fn open_selected<S>(selector: &mut S, read_timeout: Duration) -> Result<SerialTransport, CameraError>
where
    S: PortSelector + ?Sized,
{
    let choice = selector.select().ok_or(CameraError::NoPortSelected)?;
    validate_baud(choice.baud)?;
    info!("opening {} at {} baud", choice.path, choice.baud);
    SerialTransport::open(&choice.path, choice.baud, read_timeout)
}

/// Names of the serial devices currently present.
pub fn available_ports() -> Result<Vec<String>, CameraError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
