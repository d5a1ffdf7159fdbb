//! In-process model of the camera module.
//!
//! [`SimulatedCamera`] implements [`Transport`] by interpreting the same
//! wire protocol the hardware speaks, so the driver and capture loop can
//! run end to end without a UART. A cloneable [`SimHandle`] observes the
//! device state and injects faults from another thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Operation;
use crate::error::CameraError;
use crate::transfer::ChunkRequest;
use crate::transport::Transport;
use crate::types::Resolution;

/// Status byte the module returns when a command fails.
const STATUS_FAILED: u8 = 0x01;

// ── Fault ────────────────────────────────────────────────────────

/// A misbehaviour to inject into the simulated device.
///
/// `nth` counts matching commands from the moment the fault is injected:
/// `nth: 1` hits the very next one. A fault fires once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reply with a non-zero status byte.
    BadStatus { operation: &'static str, nth: u32 },
    /// Do not reply at all; the host read times out.
    Silent { operation: &'static str, nth: u32 },
    /// Reply to the chunk read at `offset` with a failed header.
    CorruptChunk { offset: u32 },
}

impl Fault {
    fn matches(&self, op: &Operation) -> bool {
        match self {
            Fault::BadStatus { operation, .. } | Fault::Silent { operation, .. } => {
                *operation == op.name()
            }
            Fault::CorruptChunk { offset } => {
                matches!(op, Operation::ReadData { offset: o, .. } if o == offset)
            }
        }
    }

    /// Count one matching command; `true` when the fault fires now.
    fn tick(&mut self) -> bool {
        match self {
            Fault::BadStatus { nth, .. } | Fault::Silent { nth, .. } => {
                *nth = nth.saturating_sub(1);
                *nth == 0
            }
            Fault::CorruptChunk { .. } => true,
        }
    }
}

// ── Device ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Device {
    resolution: Resolution,
    compression: u8,
    image: Option<Bytes>,
    settle: Duration,
    busy_until: Option<Instant>,
    wire_delay_per_byte: Option<Duration>,
    unplugged: bool,
    closed: bool,
    output: BytesMut,
    faults: Vec<Fault>,
    log: Vec<Operation>,
    resets: u64,
    captures: u64,
    flushes: u64,
}

impl Device {
    fn new() -> Self {
        Self {
            resolution: Resolution::Vga,
            compression: 0x36,
            image: None,
            settle: Duration::ZERO,
            busy_until: None,
            wire_delay_per_byte: None,
            unplugged: false,
            closed: false,
            output: BytesMut::new(),
            faults: Vec::new(),
            log: Vec::new(),
            resets: 0,
            captures: 0,
            flushes: 0,
        }
    }

    fn take_fault(&mut self, op: &Operation) -> Option<Fault> {
        let idx = self
            .faults
            .iter_mut()
            .position(|f| f.matches(op) && f.tick())?;
        Some(self.faults.remove(idx))
    }

    fn ack(&mut self, op: &Operation, status: u8) {
        self.output.put_slice(&[0x76, 0x00, op.opcode() as u8, status]);
        if *op != Operation::Reset {
            self.output.put_u8(0x00);
        }
    }

    fn handle(&mut self, op: Operation) {
        self.log.push(op);

        if self.unplugged {
            return;
        }
        if let Some(until) = self.busy_until {
            if Instant::now() < until {
                return;
            }
            self.busy_until = None;
        }
        match self.take_fault(&op) {
            Some(Fault::Silent { .. }) => return,
            Some(_) => {
                self.output
                    .put_slice(&[0x76, 0x00, op.opcode() as u8, STATUS_FAILED, 0x00]);
                return;
            }
            None => {}
        }

        match op {
            Operation::Reset => {
                self.resets += 1;
                self.image = None;
                self.ack(&op, 0x00);
                if !self.settle.is_zero() {
                    self.busy_until = Some(Instant::now() + self.settle);
                }
            }
            Operation::SetResolution(res) => {
                self.resolution = res;
                self.ack(&op, 0x00);
            }
            Operation::SetCompression(rate) => {
                self.compression = rate;
                self.ack(&op, 0x00);
            }
            Operation::Capture => {
                self.captures += 1;
                self.image = Some(synth_image(self.resolution, self.captures));
                self.ack(&op, 0x00);
            }
            Operation::Flush => {
                self.flushes += 1;
                self.image = None;
                self.ack(&op, 0x00);
            }
            Operation::QuerySize => {
                let len = self.image.as_ref().map_or(0, |img| img.len() as u32);
                self.output.put_slice(&[0x76, 0x00, op.opcode() as u8, 0x00, 0x04]);
                self.output.put_u32(len);
            }
            Operation::ReadData { offset, len } => {
                let start = offset as usize;
                let end = start + len as usize;
                let chunk = self
                    .image
                    .as_ref()
                    .filter(|img| end <= img.len())
                    .map(|img| img.slice(start..end));
                match chunk {
                    Some(chunk) => {
                        self.ack(&op, 0x00);
                        self.output.put_slice(&chunk);
                        self.ack(&op, 0x00);
                    }
                    None => self.ack(&op, STATUS_FAILED),
                }
            }
        }
    }
}

/// JPEG-shaped test image whose size depends on the resolution.
fn synth_image(resolution: Resolution, seq: u64) -> Bytes {
    let base = match resolution {
        Resolution::Vga => 6000,
        Resolution::Qvga => 2400,
        Resolution::Qqvga => 900,
    };
    let len = base + (seq % 7) as usize * 13;
    let mut img = BytesMut::with_capacity(len);
    img.put_slice(&[0xFF, 0xD8]);
    for i in 0..len - 4 {
        img.put_u8(((i as u64 + seq) % 251) as u8);
    }
    img.put_slice(&[0xFF, 0xD9]);
    img.freeze()
}

fn lock(shared: &Mutex<Device>) -> MutexGuard<'_, Device> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SimulatedCamera ──────────────────────────────────────────────

/// A [`Transport`] backed by the device model above.
pub struct SimulatedCamera {
    shared: Arc<Mutex<Device>>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Device::new())),
        }
    }

    /// Ignore commands for `settle` after every reset, like the hardware.
    pub fn with_settle(self, settle: Duration) -> Self {
        lock(&self.shared).settle = settle;
        self
    }

    /// Pace replies as if they travelled over a UART at `baud` (8N1).
    pub fn with_baud(self, baud: u32) -> Self {
        let per_byte = Duration::from_secs(10) / baud.max(1);
        lock(&self.shared).wire_delay_per_byte = Some(per_byte);
        self
    }

    /// Observer / fault-injection handle.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedCamera {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CameraError> {
        let mut dev = lock(&self.shared);
        if dev.closed {
            return Err(CameraError::TransportClosed);
        }
        // Unknown commands get no reply, as on the real module.
        if let Some(op) = Operation::parse(bytes) {
            dev.handle(op);
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes, CameraError> {
        let (result, delay) = {
            let mut dev = lock(&self.shared);
            if dev.closed {
                return Err(CameraError::TransportClosed);
            }
            let available = dev.output.len();
            let delay = dev
                .wire_delay_per_byte
                .map(|d| d * n.min(available) as u32);
            if available >= n {
                (Ok(dev.output.split_to(n).freeze()), delay)
            } else {
                dev.output.clear();
                let err = CameraError::Timeout {
                    expected: n,
                    received: available,
                    timeout,
                };
                (Err(err), delay.map(|_| timeout))
            }
        };
        if let Some(d) = delay {
            thread::sleep(d);
        }
        result
    }

    fn discard_input_buffer(&mut self) -> Result<(), CameraError> {
        let mut dev = lock(&self.shared);
        if dev.closed {
            return Err(CameraError::TransportClosed);
        }
        dev.output.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        lock(&self.shared).closed = true;
        Ok(())
    }
}

// ── SimHandle ────────────────────────────────────────────────────

/// Shared view of a [`SimulatedCamera`].
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<Device>>,
}

impl SimHandle {
    pub fn inject(&self, fault: Fault) {
        lock(&self.shared).faults.push(fault);
    }

    /// Make the device ignore every command until plugged back in.
    pub fn set_unplugged(&self, unplugged: bool) {
        lock(&self.shared).unplugged = unplugged;
    }

    pub fn resolution(&self) -> Resolution {
        lock(&self.shared).resolution
    }

    pub fn compression(&self) -> u8 {
        lock(&self.shared).compression
    }

    /// Image currently held in the device frame buffer.
    pub fn current_image(&self) -> Option<Bytes> {
        lock(&self.shared).image.clone()
    }

    pub fn image_len(&self) -> usize {
        lock(&self.shared).image.as_ref().map_or(0, Bytes::len)
    }

    /// Every command received, in order (including ignored ones).
    pub fn command_log(&self) -> Vec<Operation> {
        lock(&self.shared).log.clone()
    }

    pub fn read_requests(&self) -> Vec<ChunkRequest> {
        lock(&self.shared)
            .log
            .iter()
            .filter_map(|op| match *op {
                Operation::ReadData { offset, len } => Some(ChunkRequest { offset, len }),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self) -> u64 {
        lock(&self.shared).resets
    }

    pub fn capture_count(&self) -> u64 {
        lock(&self.shared).captures
    }

    pub fn flush_count(&self) -> u64 {
        lock(&self.shared).flushes
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Command, READ_TRAILER_LEN};

    const T: Duration = Duration::from_millis(10);

    fn send(cam: &mut SimulatedCamera, op: Operation) {
        cam.write(Command::encode(&op).as_bytes()).unwrap();
    }

    #[test]
    fn reset_ack_is_four_bytes() {
        let mut cam = SimulatedCamera::new();
        send(&mut cam, Operation::Reset);
        assert_eq!(&cam.read_exact(4, T).unwrap()[..], &[0x76, 0x00, 0x26, 0x00]);
        assert!(cam.read_exact(1, T).is_err());
    }

    #[test]
    fn read_data_carries_payload_and_trailer() {
        let mut cam = SimulatedCamera::new();
        send(&mut cam, Operation::Capture);
        cam.discard_input_buffer().unwrap();
        send(&mut cam, Operation::ReadData { offset: 0, len: 8 });
        let reply = cam.read_exact(5 + 8 + READ_TRAILER_LEN, T).unwrap();
        assert_eq!(&reply[..5], &[0x76, 0x00, 0x32, 0x00, 0x00]);
        assert_eq!(&reply[5..7], &[0xFF, 0xD8]);
        assert_eq!(&reply[13..], &[0x76, 0x00, 0x32, 0x00, 0x00]);
    }

    #[test]
    fn image_size_tracks_resolution() {
        let small = synth_image(Resolution::Qqvga, 1);
        let large = synth_image(Resolution::Vga, 1);
        assert!(small.len() < large.len());
        assert_eq!(&small[small.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn busy_after_reset_when_settle_configured() {
        let mut cam = SimulatedCamera::new().with_settle(Duration::from_millis(40));
        send(&mut cam, Operation::Reset);
        cam.read_exact(4, T).unwrap();
        send(&mut cam, Operation::Capture);
        assert!(cam.read_exact(5, T).is_err());
        thread::sleep(Duration::from_millis(50));
        send(&mut cam, Operation::Capture);
        assert!(cam.read_exact(5, T).is_ok());
    }

    #[test]
    fn nth_fault_fires_once() {
        let mut cam = SimulatedCamera::new();
        cam.handle().inject(Fault::BadStatus {
            operation: "flush",
            nth: 2,
        });
        for expected_status in [0x00, STATUS_FAILED, 0x00] {
            cam.discard_input_buffer().unwrap();
            send(&mut cam, Operation::Flush);
            assert_eq!(cam.read_exact(5, T).unwrap()[3], expected_status);
        }
    }

    #[test]
    fn closed_camera_refuses_io() {
        let mut cam = SimulatedCamera::new();
        cam.close().unwrap();
        assert!(matches!(
            cam.write(&[0x56, 0x00, 0x26, 0x00]),
            Err(CameraError::TransportClosed)
        ));
    }
}
