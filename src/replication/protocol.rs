//! Replication wire protocol
//!
//! Every frame is a kind byte, a big-endian payload length and the payload.
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Frames
//! - 0x01: SUBSCRIBE         replica → primary. Payload: empty, or the last
//!                           applied TGID (8 bytes, BE) to resume after
//! - 0x10: TRANSACTION_GROUP primary → replica. Payload: serialized TG
//! - 0x11: HEARTBEAT         primary → replica. Payload: empty

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::{Result, StoreError};

/// Header size: 1 byte kind + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (256 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Subscribe = 0x01,
    TransactionGroup = 0x10,
    Heartbeat = 0x11,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(FrameKind::Subscribe),
            0x10 => Ok(FrameKind::TransactionGroup),
            0x11 => Ok(FrameKind::Heartbeat),
            _ => Err(StoreError::Protocol(format!("Unknown frame kind: 0x{:02x}", byte))),
        }
    }
}

/// A decoded replication frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribe { resume_after: Option<i64> },
    TransactionGroup(Bytes),
    Heartbeat,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Subscribe { .. } => FrameKind::Subscribe,
            Frame::TransactionGroup(_) => FrameKind::TransactionGroup,
            Frame::Heartbeat => FrameKind::Heartbeat,
        }
    }
}

// =============================================================================
// Encoding/Decoding
// =============================================================================

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let resume;
    let payload: &[u8] = match frame {
        Frame::Subscribe { resume_after: Some(tgid) } => {
            resume = tgid.to_be_bytes();
            &resume
        }
        Frame::Subscribe { resume_after: None } | Frame::Heartbeat => &[],
        Frame::TransactionGroup(tg) => &tg[..],
    };
    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(frame.kind() as u8);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    Ok(message)
}

fn decode_payload(kind: FrameKind, payload: Vec<u8>) -> Result<Frame> {
    match kind {
        FrameKind::Subscribe => match payload.len() {
            0 => Ok(Frame::Subscribe { resume_after: None }),
            8 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&payload);
                Ok(Frame::Subscribe {
                    resume_after: Some(i64::from_be_bytes(word)),
                })
            }
            n => Err(StoreError::Protocol(format!(
                "SUBSCRIBE: unexpected payload of {} bytes",
                n
            ))),
        },
        FrameKind::TransactionGroup => {
            if payload.is_empty() {
                return Err(StoreError::Protocol("TRANSACTION_GROUP: empty payload".to_string()));
            }
            Ok(Frame::TransactionGroup(Bytes::from(payload)))
        }
        FrameKind::Heartbeat => {
            if !payload.is_empty() {
                return Err(StoreError::Protocol(format!(
                    "HEARTBEAT: unexpected payload of {} bytes",
                    payload.len()
                )));
            }
            Ok(Frame::Heartbeat)
        }
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let kind = FrameKind::from_byte(header[0])?;
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }
    decode_payload(kind, payload)
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
