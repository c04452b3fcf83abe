//! Wire frame scanning
//!
//! Every frame starts with two native-endian words: the target object id,
//! then `size << 16 | opcode`, where `size` counts the header too. Only
//! whole frames are consumed; a trailing partial frame is left for the
//! engine to present again once the rest has arrived.

use thiserror::Error;

pub const HEADER_SIZE: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame at offset {offset} declares size {size}, below the 8-byte header")]
    Undersized { offset: usize, size: usize },

    #[error("frame at offset {offset} declares size {size}, not a multiple of 4")]
    Misaligned { offset: usize, size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub object_id: u32,
    pub opcode: u16,
    /// Total frame size in bytes, header included
    pub size: usize,
}

impl FrameHeader {
    /// Decode the header at the start of `bytes`, if there is one
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let object_id = u32::from_ne_bytes(bytes.get(0..4)?.try_into().ok()?);
        let word = u32::from_ne_bytes(bytes.get(4..8)?.try_into().ok()?);
        Some(Self {
            object_id,
            opcode: (word & 0xffff) as u16,
            size: (word >> 16) as usize,
        })
    }
}

/// Complete frames found at the start of a buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameScan {
    pub frames: Vec<FrameHeader>,
    /// Bytes covered by `frames`
    pub consumed: usize,
}

/// Scan `bytes` for its leading run of complete frames
pub fn scan_frames(bytes: &[u8]) -> Result<FrameScan, FramingError> {
    let mut scan = FrameScan::default();
    while let Some(header) = FrameHeader::parse(&bytes[scan.consumed..]) {
        let offset = scan.consumed;
        if header.size < HEADER_SIZE {
            return Err(FramingError::Undersized {
                offset,
                size: header.size,
            });
        }
        if header.size % 4 != 0 {
            return Err(FramingError::Misaligned {
                offset,
                size: header.size,
            });
        }
        if bytes.len() - offset < header.size {
            break;
        }
        scan.consumed += header.size;
        scan.frames.push(header);
    }
    Ok(scan)
}
