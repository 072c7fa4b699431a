use std::sync::Arc;

use super::cpu::Bus;
use super::error::EmuError;

pub const STACK_BASE: u16 = 0x0100;

#[derive(Debug, Clone)]
enum Backing {
    Ram(Vec<u8>),
    Rom {
        data: Arc<[u8]>,
        offset: usize,
        len: usize,
    },
}

#[derive(Debug, Clone)]
struct Region {
    base: u16,
    span: u32,
    backing: Backing,
}

impl Region {
    fn contains(&self, addr: u16) -> bool {
        let addr = addr as u32;
        let base = self.base as u32;
        addr >= base && addr < base + self.span
    }

    fn index(&self, addr: u16) -> usize {
        let rel = (addr - self.base) as usize;
        match &self.backing {
            Backing::Ram(bytes) => rel % bytes.len(),
            Backing::Rom { offset, len, .. } => offset + rel % len,
        }
    }
}

/// What a region is backed by, as reported by [`MemoryMap::layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSource {
    Ram { len: usize },
    Rom { offset: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub base: u16,
    pub span: u32,
    pub source: RegionSource,
}

/// CPU-visible address space built from disjoint regions.
///
/// A region covers `span` addresses starting at `base`; when its backing is
/// shorter than the span it repeats, which is how the 2 KB work RAM shows up
/// four times below $2000. The region count stays small, so lookups scan the
/// list.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    regions: Vec<Region>,
    stack_base: u16,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            regions: Vec::with_capacity(16),
            stack_base: STACK_BASE,
        }
    }

    pub fn stack_base(&self) -> u16 {
        self.stack_base
    }

    pub fn map_ram(&mut self, base: u16, span: u32, size: usize) -> Result<(), EmuError> {
        let size = size.max(1);
        self.insert(Region {
            base,
            span,
            backing: Backing::Ram(vec![0; size]),
        })
    }

    /// Maps `len` bytes of `data` starting at `offset` into `base..base+span`.
    pub fn map_rom(
        &mut self,
        base: u16,
        span: u32,
        data: Arc<[u8]>,
        offset: usize,
        len: usize,
    ) -> Result<(), EmuError> {
        if len == 0 || offset + len > data.len() {
            return Err(EmuError::BankOutOfRange {
                offset,
                len,
                rom_len: data.len(),
            });
        }
        self.insert(Region {
            base,
            span,
            backing: Backing::Rom { data, offset, len },
        })
    }

    fn insert(&mut self, region: Region) -> Result<(), EmuError> {
        let start = region.base as u32;
        let end = start + region.span;
        if region.span == 0 || end > 0x1_0000 {
            return Err(EmuError::RegionOverlap {
                base: region.base,
                span: region.span,
            });
        }
        let overlaps = self.regions.iter().any(|r| {
            let r_start = r.base as u32;
            let r_end = r_start + r.span;
            start < r_end && r_start < end
        });
        if overlaps {
            return Err(EmuError::RegionOverlap {
                base: region.base,
                span: region.span,
            });
        }
        let pos = self
            .regions
            .iter()
            .position(|r| r.base > region.base)
            .unwrap_or(self.regions.len());
        self.regions.insert(pos, region);
        Ok(())
    }

    /// Removes the region starting exactly at `base`. Returns whether one existed.
    pub fn unmap(&mut self, base: u16) -> bool {
        match self.regions.iter().position(|r| r.base == base) {
            Some(pos) => {
                self.regions.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every region that intersects `base..base+span`.
    pub fn unmap_range(&mut self, base: u16, span: u32) {
        let start = base as u32;
        let end = start + span;
        self.regions.retain(|r| {
            let r_start = r.base as u32;
            let r_end = r_start + r.span;
            !(start < r_end && r_start < end)
        });
    }

    fn find(&self, addr: u16) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn is_mapped(&self, addr: u16) -> bool {
        self.find(addr).is_some()
    }

    pub fn read(&self, addr: u16) -> Result<u8, EmuError> {
        let region = self
            .find(addr)
            .ok_or(EmuError::AccessFault { addr, write: false })?;
        let idx = region.index(addr);
        Ok(match &region.backing {
            Backing::Ram(bytes) => bytes[idx],
            Backing::Rom { data, .. } => data[idx],
        })
    }

    /// Stores into RAM regions. Writes that land in ROM are dropped, as on
    /// the real bus.
    pub fn write(&mut self, addr: u16, value: u8) -> Result<(), EmuError> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.contains(addr))
            .ok_or(EmuError::AccessFault { addr, write: true })?;
        let idx = region.index(addr);
        if let Backing::Ram(bytes) = &mut region.backing {
            bytes[idx] = value;
        }
        Ok(())
    }

    /// Side-effect-free read for debuggers; unmapped addresses read as `None`.
    pub fn peek(&self, addr: u16) -> Option<u8> {
        self.read(addr).ok()
    }

    pub fn layout(&self) -> Vec<RegionInfo> {
        self.regions
            .iter()
            .map(|r| RegionInfo {
                base: r.base,
                span: r.span,
                source: match &r.backing {
                    Backing::Ram(bytes) => RegionSource::Ram { len: bytes.len() },
                    Backing::Rom { offset, len, .. } => RegionSource::Rom {
                        offset: *offset,
                        len: *len,
                    },
                },
            })
            .collect()
    }
}

impl Bus for MemoryMap {
    fn read(&mut self, addr: u16) -> Result<u8, EmuError> {
        MemoryMap::read(self, addr)
    }

    fn write(&mut self, addr: u16, value: u8) -> Result<(), EmuError> {
        MemoryMap::write(self, addr, value)
    }

    fn is_code(&self, addr: u16) -> bool {
        self.is_mapped(addr)
    }

    fn stack_base(&self) -> u16 {
        self.stack_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom(len: usize) -> Arc<[u8]> {
        (0..len).map(|i| (i / 0x1000) as u8).collect()
    }

    #[test]
    fn ram_mirrors_across_span() {
        let mut map = MemoryMap::new();
        map.map_ram(0x0000, 0x2000, 0x0800).unwrap();
        map.write(0x0012, 0xAB).unwrap();
        assert_eq!(map.read(0x0812).unwrap(), 0xAB);
        assert_eq!(map.read(0x1812).unwrap(), 0xAB);
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let mut map = MemoryMap::new();
        map.map_ram(0x6000, 0x2000, 0x2000).unwrap();
        let err = map.map_ram(0x7000, 0x1000, 0x1000).unwrap_err();
        assert_eq!(
            err,
            EmuError::RegionOverlap {
                base: 0x7000,
                span: 0x1000
            }
        );
        assert_eq!(map.layout().len(), 1);
    }

    #[test]
    fn unmapped_access_is_a_fault() {
        let mut map = MemoryMap::new();
        assert_eq!(
            map.read(0x4020),
            Err(EmuError::AccessFault {
                addr: 0x4020,
                write: false
            })
        );
        assert_eq!(
            map.write(0x4020, 1),
            Err(EmuError::AccessFault {
                addr: 0x4020,
                write: true
            })
        );
    }

    #[test]
    fn rom_window_reads_offset_and_ignores_writes() {
        let mut map = MemoryMap::new();
        map.map_rom(0x8000, 0x4000, rom(0x8000), 0x4000, 0x4000)
            .unwrap();
        assert_eq!(map.read(0x8000).unwrap(), 4);
        map.write(0x8000, 0xFF).unwrap();
        assert_eq!(map.read(0x8000).unwrap(), 4);
    }

    #[test]
    fn rom_window_past_end_is_out_of_range() {
        let mut map = MemoryMap::new();
        let err = map
            .map_rom(0x8000, 0x4000, rom(0x4000), 0x4000, 0x4000)
            .unwrap_err();
        assert!(matches!(err, EmuError::BankOutOfRange { .. }));
    }

    #[test]
    fn unmap_then_remap_restores_layout() {
        let mut map = MemoryMap::new();
        let data = rom(0x8000);
        map.map_rom(0xC000, 0x4000, data.clone(), 0x4000, 0x4000)
            .unwrap();
        let before = map.layout();
        assert!(map.unmap(0xC000));
        assert!(!map.is_mapped(0xC000));
        map.map_rom(0xC000, 0x4000, data, 0x4000, 0x4000).unwrap();
        assert_eq!(map.layout(), before);
    }
}
