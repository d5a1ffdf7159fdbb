//! Device driver for the VC0706-style UART JPEG camera.
//!
//! Each public operation is one (or a short fixed sequence of) strictly
//! half-duplex exchanges:
//!
//! 1. Discard stale input.
//! 2. Write the encoded command.
//! 3. Block-read the expected reply header and validate it.
//! 4. Read any trailing bytes the reply declares.
//!
//! The driver never retries. Any failure leaves the device session in an
//! unknown state and is returned to the caller as-is.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::codec::{self, Command, Operation};
use crate::error::{CameraError, Hex};
use crate::transfer;
use crate::transport::Transport;
use crate::types::{Frame, Resolution};

// ── DriverConfig ─────────────────────────────────────────────────

/// Timing and transfer tunables for [`Vc0706`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Deadline for a single reply read.
    pub read_timeout: Duration,
    /// Mandatory quiet period after a reset ack.
    pub settle: Duration,
    /// Largest chunk requested per read-data exchange.
    pub packet_len: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            settle: Duration::from_millis(2500),
            packet_len: 65536,
        }
    }
}

// ── Readiness ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// No reset has been acknowledged since open (or the last one failed).
    Uninitialized,
    /// Reset acknowledged; commands are accepted from this instant on.
    ReadyAt(Instant),
}

// ── Vc0706 ───────────────────────────────────────────────────────

/// Driver for one camera on one transport.
///
/// Holding `&mut self` for every exchange is what keeps the link
/// half-duplex: there is never more than one command awaiting a reply.
pub struct Vc0706<T: Transport> {
    transport: T,
    config: DriverConfig,
    readiness: Readiness,
    resolution: Option<Resolution>,
    compression: Option<u8>,
}

impl<T: Transport> Vc0706<T> {
    pub fn new(transport: T, config: DriverConfig) -> Self {
        Self {
            transport,
            config,
            readiness: Readiness::Uninitialized,
            resolution: None,
            compression: None,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Last resolution the device acknowledged.
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Last compression rate the device acknowledged.
    pub fn compression(&self) -> Option<u8> {
        self.compression
    }

    /// `true` once a reset was acknowledged and its settle window elapsed.
    pub fn is_ready(&self) -> bool {
        matches!(self.readiness, Readiness::ReadyAt(at) if Instant::now() >= at)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Reset the device and wait out the settle delay.
    ///
    /// On return the device accepts commands; no command can be issued
    /// by this driver inside the settle window.
    pub fn initialize(&mut self) -> Result<(), CameraError> {
        self.readiness = Readiness::Uninitialized;
        self.exchange(Operation::Reset)?;

        let ready_at = Instant::now() + self.config.settle;
        self.readiness = Readiness::ReadyAt(ready_at);
        debug!("reset acknowledged; settling for {:?}", self.config.settle);
        thread::sleep(self.config.settle);
        info!("camera initialized");
        Ok(())
    }

    /// Change the image size. The device resets its state on a size
    /// change, so this re-runs [`initialize`](Self::initialize).
    pub fn set_resolution(&mut self, resolution: Resolution) -> Result<(), CameraError> {
        self.exchange(Operation::SetResolution(resolution))?;
        self.resolution = Some(resolution);
        info!("resolution set to {resolution}");
        self.initialize()
    }

    /// Change the JPEG compression rate.
    pub fn set_compression(&mut self, rate: u8) -> Result<(), CameraError> {
        self.exchange(Operation::SetCompression(rate))?;
        self.compression = Some(rate);
        info!("compression rate set to {rate:#04x}");
        Ok(())
    }

    /// Freeze a still image and return its JPEG length in bytes.
    pub fn capture_and_query_size(&mut self) -> Result<u32, CameraError> {
        self.exchange(Operation::Capture)?;
        let field = self.exchange(Operation::QuerySize)?;
        let size = codec::decode_size(&field)?;
        if size == 0 {
            return Err(CameraError::EmptyImage);
        }
        debug!("captured image of {size} bytes");
        Ok(size)
    }

    /// Download the buffered image in chunks of at most `packet_len`.
    pub fn fetch(&mut self, total_len: u32) -> Result<Frame, CameraError> {
        let packet_len = self.config.packet_len;
        let data = transfer::fetch_chunked(total_len, packet_len, |req| {
            self.exchange(Operation::ReadData {
                offset: req.offset,
                len: req.len,
            })
        })?;
        Ok(Frame::new(data, self.resolution))
    }

    /// Release the device's frame buffer so the next capture can run.
    pub fn flush(&mut self) -> Result<(), CameraError> {
        self.exchange(Operation::Flush)?;
        Ok(())
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<(), CameraError> {
        self.readiness = Readiness::Uninitialized;
        self.transport.close()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn ensure_ready(&self) -> Result<(), CameraError> {
        match self.readiness {
            Readiness::Uninitialized => Err(CameraError::DeviceUnready { remaining: None }),
            Readiness::ReadyAt(at) => {
                let now = Instant::now();
                if now < at {
                    Err(CameraError::DeviceUnready {
                        remaining: Some(at - now),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// One request/response exchange. Returns the bytes after the header.
    fn exchange(&mut self, op: Operation) -> Result<Bytes, CameraError> {
        if op != Operation::Reset {
            self.ensure_ready()?;
        }

        let command = Command::encode(&op);
        let expected = op.expected_response();
        let timeout = self.config.read_timeout;

        self.transport.discard_input_buffer()?;
        self.transport.write(command.as_bytes())?;

        let header = self.transport.read_exact(expected.header().len(), timeout)?;
        if let Err(e) = codec::validate(&header, &expected, op.name()) {
            warn!(
                "{} failed; received [{}], expected [{}]",
                op.name(),
                Hex(&header),
                Hex(expected.header())
            );
            return Err(e);
        }

        match expected.trailing_len() {
            0 => Ok(Bytes::new()),
            n => self.transport.read_exact(n, timeout),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
