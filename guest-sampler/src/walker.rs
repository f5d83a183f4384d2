//! Frame pointer stack walker.
//!
//! With frame pointers, every frame starts with the saved frame pointer of
//! the caller, immediately followed by the return address pushed by `call`:
//!
//! ```text
//!   [... callee locals]  [caller's frame pointer]  [return address]  [... caller frame]
//!                        ^ fp                      ^ fp + width
//! ```
//!
//! so the chain is a linked list living on the guest stack.

use std::fmt;

use guest_sampler_common::{PointerWidth, MAX_DEPTH};

use crate::memory::GuestMemory;

/// One sampled call stack, innermost frame first.
///
/// Fixed capacity so that sampling never allocates.
#[derive(Clone, Copy)]
pub struct Sample {
    frames: [u64; MAX_DEPTH],
    len: u8,
}

impl Sample {
    pub const fn new() -> Self {
        Self {
            frames: [0; MAX_DEPTH],
            len: 0,
        }
    }

    /// Returns `None` if `frames` holds more than `MAX_DEPTH` entries.
    pub fn from_frames(frames: &[u64]) -> Option<Self> {
        if frames.len() > MAX_DEPTH {
            return None;
        }
        let mut sample = Self::new();
        sample.frames[..frames.len()].copy_from_slice(frames);
        sample.len = frames.len() as u8;
        Some(sample)
    }

    pub fn frames(&self) -> &[u64] {
        &self.frames[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAX_DEPTH
    }

    /// Callers check `is_full` first.
    fn push(&mut self, addr: u64) {
        self.frames[self.len as usize] = addr;
        self.len += 1;
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Sample {
    fn eq(&self, other: &Self) -> bool {
        self.frames() == other.frames()
    }
}

impl Eq for Sample {}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames().iter().map(|a| format!("{:#x}", a)))
            .finish()
    }
}

/// Walks the frame pointer chain starting at `frame_pointer`.
///
/// The first frame is always `ip`. The walk stops on a zero frame pointer,
/// on the first failed memory read, or once `MAX_DEPTH` frames are
/// collected. A return address that was read before the saved frame
/// pointer failed to read is kept. Cyclic chains are cut by the depth bound
/// only.
///
/// No range check is applied to the recovered addresses.
pub fn walk<M>(ip: u64, frame_pointer: u64, width: PointerWidth, memory: &M) -> Sample
where
    M: GuestMemory + ?Sized,
{
    let mut sample = Sample::new();
    sample.push(ip);

    let step = width.bytes() as u64;
    let mut fp = frame_pointer;

    while !sample.is_full() && fp != 0 {
        let Some(ret_slot) = fp.checked_add(step) else {
            break;
        };
        let Ok(ret) = memory.read_pointer(ret_slot, width) else {
            break;
        };
        sample.push(ret);

        match memory.read_pointer(fp, width) {
            Ok(next) => fp = next,
            Err(_) => break,
        }
    }

    sample
}
