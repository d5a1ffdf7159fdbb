//! Byte transport contract required by the driver.
//!
//! The driver speaks a strictly half-duplex request/response protocol,
//! so the contract is deliberately small: write a command, read exactly
//! `n` reply bytes within a deadline, and drop stale input before each
//! exchange.
//!
//! | Implementation    | Purpose                                     |
//! |-------------------|---------------------------------------------|
//! | `SerialTransport` | Real UART link via the `serialport` crate   |
//! | `SimulatedCamera` | In-process device model (see [`crate::sim`]) |

mod serial;

use std::time::Duration;

use bytes::Bytes;

use crate::error::CameraError;

pub use serial::SerialTransport;

/// A synchronous byte channel to the camera.
///
/// Implementations must treat a short read as an error: either all `n`
/// bytes arrive before `timeout`, or the call fails with
/// [`CameraError::Timeout`].
pub trait Transport: Send {
    /// Write the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> Result<(), CameraError>;

    /// Read exactly `n` bytes, failing if the deadline passes first.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes, CameraError>;

    /// Drop any bytes already buffered on the input side.
    fn discard_input_buffer(&mut self) -> Result<(), CameraError>;

    /// Release the underlying device. Later calls fail with
    /// [`CameraError::TransportClosed`].
    fn close(&mut self) -> Result<(), CameraError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CameraError> {
        (**self).write(bytes)
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes, CameraError> {
        (**self).read_exact(n, timeout)
    }

    fn discard_input_buffer(&mut self) -> Result<(), CameraError> {
        (**self).discard_input_buffer()
    }

    fn close(&mut self) -> Result<(), CameraError> {
        (**self).close()
    }
}
