//! UART transport backed by the `serialport` crate.

use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, trace};

use crate::error::CameraError;
use crate::transport::Transport;

/// Serial link to the camera module.
pub struct SerialTransport {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1, with `timeout` as the initial read
    /// deadline.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self, CameraError> {
        let port = serialport::new(path, baud).timeout(timeout).open()?;
        debug!("opened {path} at {baud} baud");
        Ok(Self {
            path: path.to_string(),
            baud,
            port: Some(port),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, CameraError> {
        self.port.as_mut().ok_or(CameraError::TransportClosed)
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CameraError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!("tx {} bytes", bytes.len());
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes, CameraError> {
        let port = self.port()?;
        let deadline = Instant::now() + timeout;
        let mut buf = BytesMut::zeroed(n);
        let mut filled = 0;

        while filled < n {
            let now = Instant::now();
            let short = CameraError::Timeout {
                expected: n,
                received: filled,
                timeout,
            };
            if now >= deadline {
                return Err(short);
            }
            port.set_timeout(deadline - now)?;
            match port.read(&mut buf[filled..]) {
                Ok(0) => return Err(short),
                Ok(k) => filled += k,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Err(short),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        trace!("rx {n} bytes");
        Ok(buf.freeze())
    }

    fn discard_input_buffer(&mut self) -> Result<(), CameraError> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.port.take().is_some() {
            debug!("closed {}", self.path);
        }
        Ok(())
    }
}
