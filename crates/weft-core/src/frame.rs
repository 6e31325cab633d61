//! Stream framing
//!
//! Connections carry a sequence of frames:
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │ Length (u32 little-endian)   │ Payload (Length bytes)       │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//! The payload is one encoded message (see [`crate::codec`]).

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length prefix
pub const HEADER_SIZE: usize = 4;

/// Default upper bound on a single payload
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefix `payload` with its length
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len()).map_err(|_| Error::LengthOverflow(payload.len() as u64))?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Payload length announced by a buffered header, if the header is complete
pub fn payload_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(header) as usize)
}

/// Total size of the first frame in `buf`, or `None` if more bytes are needed
pub fn check_complete(buf: &[u8]) -> Option<usize> {
    let total = HEADER_SIZE + payload_len(buf)?;
    (buf.len() >= total).then_some(total)
}
