//! MemoryProbe: validity checks and bounded reads by address.
//!
//! The walker never assumes how bytes are fetched. It asks a
//! [`MemoryProbe`] whether an address is mapped and reads through it.
//! [`SliceMemory`] maps owned byte buffers at fixed addresses and is what
//! tests and simple hosts use.

use serde::{Deserialize, Serialize};

/// Byte source consumed by the analysis core.
pub trait MemoryProbe {
    /// True if `addr` is mapped and readable
    fn is_valid(&self, addr: u64) -> bool;

    /// Fill `buf` with bytes starting at `addr`.
    ///
    /// Returns the number of leading bytes that are backed by memory; the
    /// remainder of `buf` is filled with `0xff`.
    fn read_at(&self, addr: u64, buf: &mut [u8]) -> usize;

    /// Name of the section holding `addr`
    fn section_name(&self, _addr: u64) -> Option<String> {
        None
    }

    /// Read one word of `size` bytes (1, 2, 4 or 8).
    fn read_word(&self, addr: u64, size: usize, big_endian: bool) -> Option<u64> {
        let mut b = [0u8; 8];
        let size = size.clamp(1, 8);
        if self.read_at(addr, &mut b[..size]) < size {
            return None;
        }
        let mut value = 0u64;
        for i in 0..size {
            let byte = if big_endian { b[i] } else { b[size - 1 - i] };
            value = (value << 8) | u64::from(byte);
        }
        Some(value)
    }
}

/// One mapped buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base: u64,
    pub data: Vec<u8>,
    pub name: Option<String>,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.data.len() as u64)
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Memory made of owned buffers mapped at fixed addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceMemory {
    regions: Vec<MemoryRegion>,
}

impl SliceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory holding a single unnamed buffer at `base`.
    pub fn with_bytes(base: u64, data: impl Into<Vec<u8>>) -> Self {
        let mut mem = Self::new();
        mem.map(base, data, None);
        mem
    }

    /// Map `data` at `base`, optionally naming the section.
    pub fn map(&mut self, base: u64, data: impl Into<Vec<u8>>, name: Option<&str>) -> &mut Self {
        self.regions.push(MemoryRegion {
            base,
            data: data.into(),
            name: name.map(str::to_string),
        });
        self.regions.sort_by_key(|r| r.base);
        self
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn region(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }
}

impl MemoryProbe for SliceMemory {
    fn is_valid(&self, addr: u64) -> bool {
        self.region(addr).is_some()
    }

    fn read_at(&self, addr: u64, buf: &mut [u8]) -> usize {
        let mut filled = 0usize;
        while filled < buf.len() {
            let cur = addr.saturating_add(filled as u64);
            let Some(region) = self.region(cur) else {
                break;
            };
            let start = (cur - region.base) as usize;
            let n = (region.data.len() - start).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&region.data[start..start + n]);
            filled += n;
        }
        buf[filled..].fill(0xff);
        filled
    }

    fn section_name(&self, addr: u64) -> Option<String> {
        self.region(addr).and_then(|r| r.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_pads_unmapped_tail() {
        let mem = SliceMemory::with_bytes(0x1000, vec![1, 2, 3, 4]);
        let mut buf = [0u8; 6];
        assert_eq!(mem.read_at(0x1002, &mut buf), 2);
        assert_eq!(buf, [3, 4, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(mem.read_at(0x2000, &mut buf), 0);
        assert!(mem.is_valid(0x1003));
        assert!(!mem.is_valid(0x1004));
    }

    #[test]
    fn read_spans_adjacent_regions() {
        let mut mem = SliceMemory::new();
        mem.map(0x2000, vec![0xaa; 2], Some(".data"))
            .map(0x1ffe, vec![0x11, 0x22], Some(".text"));
        let mut buf = [0u8; 4];
        assert_eq!(mem.read_at(0x1ffe, &mut buf), 4);
        assert_eq!(buf, [0x11, 0x22, 0xaa, 0xaa]);
        assert_eq!(mem.section_name(0x2001).as_deref(), Some(".data"));
        assert_eq!(mem.section_name(0x1fff).as_deref(), Some(".text"));
    }

    #[test]
    fn read_word_endianness() {
        let mem = SliceMemory::with_bytes(0, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_word(0, 4, false), Some(0x12345678));
        assert_eq!(mem.read_word(0, 4, true), Some(0x78563412));
        assert_eq!(mem.read_word(0, 2, false), Some(0x5678));
        assert_eq!(mem.read_word(2, 4, false), None);
    }
}
