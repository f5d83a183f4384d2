#![no_std]

//! On-wire contract shared between the in-host sampler and offline tooling.
//!
//! A profile stream is a plain concatenation of records:
//!
//! ```text
//! record := frame_count:u8 frame[frame_count]:u64-le
//! ```
//!
//! There is no header or footer. A reader stops at end of stream, and a
//! truncated trailing record marks the end of valid data.

/// Hard limit on the number of frames captured per sample.
pub const MAX_DEPTH: usize = 64;

/// Size of the frame count prefix.
pub const RECORD_HEADER_SIZE: usize = 1;

/// Size of a single encoded frame. Frames are always widened to 64 bits.
pub const FRAME_SIZE: usize = 8;

/// Largest possible encoded record.
pub const MAX_RECORD_SIZE: usize = RECORD_HEADER_SIZE + MAX_DEPTH * FRAME_SIZE;

/// Address width of the guest at sampling time.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(u8)]
pub enum PointerWidth {
    /// 32-bit execution mode
    Four = 4,
    /// 64-bit execution mode
    Eight = 8,
}

impl PointerWidth {
    /// Number of bytes occupied by a pointer
    pub const fn bytes(self) -> usize {
        self as usize
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(PointerWidth::Four),
            8 => Some(PointerWidth::Eight),
            _ => None,
        }
    }
}

pub fn read_u32_le(buf: [u8; 4]) -> u32 {
    u32::from_le_bytes(buf)
}

pub fn read_u64_le(buf: [u8; 8]) -> u64 {
    u64::from_le_bytes(buf)
}

/// Decodes a guest pointer of the given width, zero-extended to 64 bits.
///
/// Returns `None` if `buf` is shorter than the pointer width.
pub fn read_pointer(buf: &[u8], width: PointerWidth) -> Option<u64> {
    match width {
        PointerWidth::Four => {
            let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
            Some(read_u32_le(bytes) as u64)
        }
        PointerWidth::Eight => {
            let bytes: [u8; 8] = buf.get(..8)?.try_into().ok()?;
            Some(read_u64_le(bytes))
        }
    }
}

/// Encoded length of a record holding `frame_count` frames.
pub const fn record_len(frame_count: usize) -> usize {
    RECORD_HEADER_SIZE + frame_count * FRAME_SIZE
}
