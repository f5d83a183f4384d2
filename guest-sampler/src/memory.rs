//! Guest memory access.
//!
//! The walker treats every frame pointer as untrusted. The only safety net
//! is the reader returning an error for addresses it cannot resolve.

use std::collections::BTreeMap;

use guest_sampler_common::{read_pointer, PointerWidth};

use crate::error::MemoryError;

/// Debug read access to the guest's virtual address space.
///
/// Implementations must never abort on a bad address (unmapped, device
/// memory, misaligned or wrapping); they report `MemoryError` instead.
pub trait GuestMemory: Send + Sync {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Reads one guest pointer, zero-extended to 64 bits.
    fn read_pointer(&self, addr: u64, width: PointerWidth) -> Result<u64, MemoryError> {
        let mut buf = [0u8; 8];
        let buf = &mut buf[..width.bytes()];
        self.read(addr, buf)?;
        read_pointer(buf, width).ok_or(MemoryError::Unmapped(addr))
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for &T {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read(addr, buf)
    }
}

/// In-memory guest address space made of disjoint mapped regions.
///
/// Reads spanning two adjacent regions are rejected.
#[derive(Debug, Default, Clone)]
pub struct RegionMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl RegionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `data` at `base`, replacing any region starting at the same address.
    pub fn map(&mut self, base: u64, data: Vec<u8>) {
        self.regions.insert(base, data);
    }

    /// Maps a region filled with little-endian pointers of `width` bytes.
    pub fn map_pointers(&mut self, base: u64, width: PointerWidth, values: &[u64]) {
        let mut data = Vec::with_capacity(values.len() * width.bytes());
        for v in values {
            match width {
                PointerWidth::Four => data.extend_from_slice(&(*v as u32).to_le_bytes()),
                PointerWidth::Eight => data.extend_from_slice(&v.to_le_bytes()),
            }
        }
        self.map(base, data);
    }
}

impl GuestMemory for RegionMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let end = addr
            .checked_add(buf.len() as u64)
            .ok_or(MemoryError::Overflow(addr))?;

        let (base, data) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or(MemoryError::Unmapped(addr))?;

        let start = (addr - base) as usize;
        let stop = (end - base) as usize;
        let src = data.get(start..stop).ok_or(MemoryError::Unmapped(addr))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}
