//! Chunked retrieval of a buffered JPEG.
//!
//! The image is pulled in offset-addressed packets of at most
//! `packet_len` bytes. Each packet reply is `payload ++ trailer`, where the
//! 5-byte trailer is dropped. Offsets are addresses only: no byte is ever
//! skipped or read twice, so on success the payload lengths sum to exactly
//! `total_len`.
//!
//! Any failed chunk aborts the whole transfer. The bytes accumulated so
//! far are dropped with the buffer; a partial frame never escapes.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::READ_TRAILER_LEN;
use crate::error::CameraError;

/// One packet of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub offset: u32,
    pub len: u32,
}

/// Iterator over the packets needed to read `total_len` bytes.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    offset: u32,
    total_len: u32,
    packet_len: u32,
}

impl ChunkPlan {
    pub fn new(total_len: u32, packet_len: u32) -> Self {
        Self {
            offset: 0,
            total_len,
            packet_len: packet_len.max(1),
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkRequest;

    fn next(&mut self) -> Option<ChunkRequest> {
        if self.offset >= self.total_len {
            return None;
        }
        let len = self.packet_len.min(self.total_len - self.offset);
        let req = ChunkRequest {
            offset: self.offset,
            len,
        };
        self.offset += len;
        Some(req)
    }
}

/// Fetch `total_len` bytes using `read_chunk` for each packet.
///
/// `read_chunk` performs one validated request/response exchange and
/// returns everything after the reply header, i.e. `len + 5` bytes.
pub fn fetch_chunked<F>(total_len: u32, packet_len: u32, mut read_chunk: F) -> Result<Bytes, CameraError>
where
    F: FnMut(ChunkRequest) -> Result<Bytes, CameraError>,
{
    if packet_len == 0 {
        return Err(CameraError::ConfigRejected(
            "packet length must be non-zero".into(),
        ));
    }

    debug!("ready to receive {total_len} bytes");
    // Grow as chunks arrive; the size comes from the device.
    let mut image = BytesMut::with_capacity(total_len.min(packet_len) as usize);

    for req in ChunkPlan::new(total_len, packet_len) {
        debug!("receiving {} / {total_len}", req.offset);
        let abort = |source: CameraError| CameraError::TransferAborted {
            offset: req.offset,
            source: Box::new(source),
        };

        let chunk = read_chunk(req).map_err(abort)?;
        let expected = req.len as usize + READ_TRAILER_LEN;
        if chunk.len() != expected {
            return Err(abort(CameraError::Timeout {
                expected,
                received: chunk.len(),
                timeout: std::time::Duration::ZERO,
            }));
        }
        image.extend_from_slice(&chunk[..req.len as usize]);
    }

    debug_assert_eq!(image.len(), total_len as usize);
    Ok(image.freeze())
}

// ── Tests ────────────────────────────────────────────────────────
