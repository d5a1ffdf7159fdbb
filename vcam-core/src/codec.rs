//! Command codec for the camera's serial protocol.
//!
//! Every command is laid out as:
//!
//! ```text
//! 0x56 0x00 | opcode: u8 | param_count: u8 | params: [u8; param_count]
//! ```
//!
//! Every reply starts with `0x76 0x00`, echoes the opcode, then carries a
//! status byte and a trailing-length byte. Replies are never parsed
//! loosely: the header must match the expected bytes exactly.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CameraError;
use crate::types::Resolution;

// ── Constants ────────────────────────────────────────────────────

/// Leading bytes of every host → camera command.
pub const COMMAND_LEAD: [u8; 2] = [0x56, 0x00];

/// Leading bytes of every camera → host reply.
pub const RESPONSE_LEAD: [u8; 2] = [0x76, 0x00];

/// Length of the trailer that follows each chunk of image data.
pub const READ_TRAILER_LEN: usize = 5;

/// Length of the big-endian image size that follows the query-size ack.
pub const SIZE_FIELD_LEN: usize = 4;

const SET_SIZE_PARAMS: [u8; 4] = [0x04, 0x01, 0x00, 0x19];
const SET_COMPRESSION_PARAMS: [u8; 4] = [0x01, 0x01, 0x12, 0x04];
const READ_MODE: [u8; 2] = [0x00, 0x0A];
const READ_DELAY: [u8; 2] = [0x00, 0xFF];

// ── Opcode ───────────────────────────────────────────────────────

/// Raw operation codes understood by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Reset = 0x26,
    WriteData = 0x31,
    ReadFrame = 0x32,
    FrameLength = 0x34,
    FrameControl = 0x36,
}

impl Opcode {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x26 => Some(Opcode::Reset),
            0x31 => Some(Opcode::WriteData),
            0x32 => Some(Opcode::ReadFrame),
            0x34 => Some(Opcode::FrameLength),
            0x36 => Some(Opcode::FrameControl),
            _ => None,
        }
    }
}

// ── Operation ────────────────────────────────────────────────────

/// A typed device operation, before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Reset,
    SetResolution(Resolution),
    SetCompression(u8),
    Capture,
    Flush,
    QuerySize,
    ReadData { offset: u32, len: u32 },
}

impl Operation {
    /// Short name used in logs and mismatch errors.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Reset => "reset",
            Operation::SetResolution(_) => "set-resolution",
            Operation::SetCompression(_) => "set-compression",
            Operation::Capture => "capture",
            Operation::Flush => "flush",
            Operation::QuerySize => "query-size",
            Operation::ReadData { .. } => "read-data",
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Operation::Reset => Opcode::Reset,
            Operation::SetResolution(_) | Operation::SetCompression(_) => Opcode::WriteData,
            Operation::Capture | Operation::Flush => Opcode::FrameControl,
            Operation::QuerySize => Opcode::FrameLength,
            Operation::ReadData { .. } => Opcode::ReadFrame,
        }
    }

    fn params(&self, out: &mut BytesMut) {
        match *self {
            Operation::Reset => {}
            Operation::SetResolution(res) => {
                out.put_slice(&SET_SIZE_PARAMS);
                out.put_u8(res.size_byte());
            }
            Operation::SetCompression(rate) => {
                out.put_slice(&SET_COMPRESSION_PARAMS);
                out.put_u8(rate);
            }
            Operation::Capture => out.put_u8(0x00),
            Operation::Flush => out.put_u8(0x03),
            Operation::QuerySize => out.put_u8(0x00),
            Operation::ReadData { offset, len } => {
                out.put_slice(&READ_MODE);
                out.put_u32(offset);
                out.put_u32(len);
                out.put_slice(&READ_DELAY);
            }
        }
    }

    /// Parse an encoded command back into an operation.
    ///
    /// Returns `None` for anything this codec would never emit.
    pub fn parse(bytes: &[u8]) -> Option<Operation> {
        let (head, params) = bytes.split_at_checked(4)?;
        if head[..2] != COMMAND_LEAD || head[3] as usize != params.len() {
            return None;
        }
        match (Opcode::from_byte(head[2])?, params) {
            (Opcode::Reset, []) => Some(Operation::Reset),
            (Opcode::WriteData, [a, b, c, d, value]) => match [*a, *b, *c, *d] {
                SET_SIZE_PARAMS => Resolution::from_size_byte(*value).map(Operation::SetResolution),
                SET_COMPRESSION_PARAMS => Some(Operation::SetCompression(*value)),
                _ => None,
            },
            (Opcode::FrameControl, [0x00]) => Some(Operation::Capture),
            (Opcode::FrameControl, [0x03]) => Some(Operation::Flush),
            (Opcode::FrameLength, [0x00]) => Some(Operation::QuerySize),
            (Opcode::ReadFrame, p) if p.len() == 12 && p[..2] == READ_MODE && p[10..] == READ_DELAY => {
                Some(Operation::ReadData {
                    offset: u32::from_be_bytes([p[2], p[3], p[4], p[5]]),
                    len: u32::from_be_bytes([p[6], p[7], p[8], p[9]]),
                })
            }
            _ => None,
        }
    }

    /// The reply this operation must produce.
    pub fn expected_response(&self) -> ExpectedResponse {
        let ack = |tail: &[u8], trailing: usize| {
            let mut header = BytesMut::with_capacity(5);
            header.put_slice(&RESPONSE_LEAD);
            header.put_u8(self.opcode() as u8);
            header.put_slice(tail);
            ExpectedResponse {
                header: header.freeze(),
                trailing,
            }
        };
        match *self {
            Operation::Reset => ack(&[0x00], 0),
            Operation::QuerySize => ack(&[0x00, SIZE_FIELD_LEN as u8], SIZE_FIELD_LEN),
            Operation::ReadData { len, .. } => ack(&[0x00, 0x00], len as usize + READ_TRAILER_LEN),
            _ => ack(&[0x00, 0x00], 0),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// An encoded, immutable command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(Bytes);

impl Command {
    /// Encode `op` into its wire form. Pure and deterministic.
    pub fn encode(op: &Operation) -> Self {
        let mut params = BytesMut::with_capacity(12);
        op.params(&mut params);

        let mut buf = BytesMut::with_capacity(4 + params.len());
        buf.put_slice(&COMMAND_LEAD);
        buf.put_u8(op.opcode() as u8);
        buf.put_u8(params.len() as u8);
        buf.put_slice(&params);
        Self(buf.freeze())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn opcode(&self) -> u8 {
        self.0[2]
    }

    /// Parameter bytes after the declared count.
    pub fn params(&self) -> &[u8] {
        &self.0[4..]
    }
}

// ── ExpectedResponse ─────────────────────────────────────────────

/// Reply header the device must send back, plus how many bytes follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedResponse {
    header: Bytes,
    trailing: usize,
}

impl ExpectedResponse {
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Bytes that follow a valid header (size field, chunk payload + trailer).
    pub fn trailing_len(&self) -> usize {
        self.trailing
    }
}

/// Compare a received header byte-for-byte against the expected one.
pub fn validate(
    received: &[u8],
    expected: &ExpectedResponse,
    operation: &'static str,
) -> Result<(), CameraError> {
    if received == expected.header() {
        Ok(())
    } else {
        Err(CameraError::ProtocolMismatch {
            operation,
            expected: expected.header().to_vec(),
            actual: received.to_vec(),
        })
    }
}

/// Decode the 4-byte big-endian image size that follows the query-size ack.
pub fn decode_size(field: &[u8]) -> Result<u32, CameraError> {
    let bytes: [u8; SIZE_FIELD_LEN] =
        field
            .try_into()
            .map_err(|_| CameraError::ProtocolMismatch {
                operation: "query-size",
                expected: vec![0; SIZE_FIELD_LEN],
                actual: field.to_vec(),
            })?;
    Ok(u32::from_be_bytes(bytes))
}

// ── Tests ────────────────────────────────────────────────────────
