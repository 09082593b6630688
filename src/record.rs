//! Binary framing shared by the file-backed operation log.
//!
//! All integers in the on-disk format are big-endian, matching spec §4.1.
//! Layout:
//!
//! ```text
//! Header (32 bytes):
//!   magic: u32, format_version: u32, reserved: u32, mode: u32, tx_id: [u8; 16]
//!
//! Record (variable):
//!   magic: u32, length: u32 (= len(description_frame) + len(payload))
//!   description: i32 length prefix (-1 = null, 0 = empty) + utf8 bytes
//!   payload: resource-owned bytes
//! ```

use crate::error::{OpLogError, Result};
use crate::tx_id::TxId;

/// Fixed magic value stamping both the header and every record frame.
pub const MAGIC: u32 = 0x214A_08A6;

/// The only format version this crate knows how to read or write.
pub const FORMAT_VERSION: u32 = 0;

/// Size in bytes of the fixed-layout file header.
pub const HEADER_LEN: u64 = 32;

/// Size in bytes of a record frame's fixed prefix (magic + length).
pub const RECORD_PREFIX_LEN: u64 = 8;

/// The UNDO/REDO discriminator persisted in the header and used to gate
/// which operations a log accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Open for appends; the only mode in which `write`/`position`/`truncate` succeed.
    Undo,
    /// Read-only and terminal; reached exactly once, at commit time.
    Redo,
}

impl Mode {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            Self::Undo => 0,
            Self::Redo => 1,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Undo),
            1 => Ok(Self::Redo),
            other => Err(OpLogError::corrupt(format!("unknown log mode discriminator {other}"))),
        }
    }
}

/// The fixed-layout file header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub mode: Mode,
    pub tx_id: TxId,
}

impl Header {
    #[must_use]
    pub fn encode(self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf[8..12].copy_from_slice(&0u32.to_be_bytes()); // reserved
        buf[12..16].copy_from_slice(&self.mode.to_u32().to_be_bytes());
        buf[16..32].copy_from_slice(&self.tx_id.to_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN as usize {
            return Err(OpLogError::corrupt("header shorter than 32 bytes"));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(OpLogError::corrupt(format!("bad header magic {magic:#x}")));
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(OpLogError::corrupt(format!("unsupported format version {version}")));
        }
        let mode_raw = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let mode = Mode::from_u32(mode_raw)?;
        let mut tx_bytes = [0u8; 16];
        tx_bytes.copy_from_slice(&buf[16..32]);
        Ok(Self { mode, tx_id: TxId::from_bytes(tx_bytes) })
    }
}

/// A decoded description field: `None` is the "null description" sentinel
/// (length -1), `Some(String::new())` is the distinct "empty description"
/// (length 0).
pub(crate) fn encode_description(description: &Option<String>) -> Vec<u8> {
    match description {
        None => (-1i32).to_be_bytes().to_vec(),
        Some(text) => {
            let bytes = text.as_bytes();
            let mut out = Vec::with_capacity(4 + bytes.len());
            out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            out.extend_from_slice(bytes);
            out
        }
    }
}

pub(crate) fn decode_description(buf: &[u8]) -> Result<(Option<String>, usize)> {
    if buf.len() < 4 {
        return Err(OpLogError::corrupt("record frame truncated before description length"));
    }
    let len = i32::from_be_bytes(buf[0..4].try_into().unwrap());
    if len == -1 {
        return Ok((None, 4));
    }
    if len < 0 {
        return Err(OpLogError::corrupt(format!("negative description length {len}")));
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Err(OpLogError::corrupt("record frame truncated inside description"));
    }
    let text = std::str::from_utf8(&buf[4..4 + len])
        .map_err(|e| OpLogError::corrupt(format!("description is not valid utf-8: {e}")))?
        .to_owned();
    Ok((Some(text), 4 + len))
}

/// A single logged operation as seen by callers: a human-readable
/// description (possibly absent) and the resource-owned opaque payload that
/// the adapter serialized.
#[derive(Debug, Clone)]
pub struct Operation<P> {
    pub description: Option<String>,
    pub payload: P,
}
