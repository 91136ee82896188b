//! Guest physical memory as seen by the GPU.
//!
//! The surface cache reads and writes guest memory through [`MemorySystem`] and
//! tells it which pages are shadowed by host textures, so that CPU accesses to
//! those pages can be routed through the cache first.
//!
//! # References
//! - <https://www.3dbrew.org/wiki/Memory_layout>

use crate::interval::{IntervalSet, PAddr, SurfaceInterval};
use oxidiz3ds_hw::memory_map;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("access of {len:#X} bytes at {addr:#010X} is not backed by memory")]
    Unmapped { addr: PAddr, len: usize },
    #[error("region {name} at {base:#010X} overlaps an existing mapping")]
    Overlap { name: String, base: PAddr },
}

pub trait MemorySystem {
    /// Backing bytes from `addr` to the end of its region.
    fn physical_ref(&mut self, addr: PAddr) -> Option<&mut [u8]>;

    /// Marks `[addr, addr + size)` as shadowed (or no longer shadowed) by the cache.
    fn mark_region_cached(&mut self, addr: PAddr, size: u32, cached: bool);

    fn read(&mut self, addr: PAddr, buf: &mut [u8]) -> Result<(), MemoryError> {
        let len = buf.len();
        let src = self
            .physical_ref(addr)
            .and_then(|bytes| bytes.get(..len))
            .ok_or(MemoryError::Unmapped { addr, len })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, addr: PAddr, buf: &[u8]) -> Result<(), MemoryError> {
        let len = buf.len();
        let dst = self
            .physical_ref(addr)
            .and_then(|bytes| bytes.get_mut(..len))
            .ok_or(MemoryError::Unmapped { addr, len })?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}

#[derive(Debug)]
struct Region {
    name: String,
    base: PAddr,
    data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base as u64 + self.data.len() as u64
    }
}

/// Flat byte-vector backed memory with named regions.
#[derive(Debug, Default)]
pub struct PhysicalMemory {
    regions: Vec<Region>,
    cached: IntervalSet,
}

impl PhysicalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// VRAM, AXI WRAM and FCRAM at their 3DS physical addresses.
    pub fn new_3ds() -> Self {
        let mut memory = Self::new();
        for (name, base, size) in [
            ("VRAM", memory_map::vram::BASE, memory_map::vram::SIZE),
            ("AXI WRAM", memory_map::axi_wram::BASE, memory_map::axi_wram::SIZE),
            ("FCRAM", memory_map::fcram::BASE, memory_map::fcram::SIZE),
        ] {
            debug!("  Mapping {} at {:#X} ({}KB)", name, base, size / 1024);
            if let Err(err) = memory.map(name, base, size) {
                debug!("  Skipping {}: {}", name, err);
            }
        }
        memory
    }

    pub fn map(&mut self, name: &str, base: PAddr, size: usize) -> Result<(), MemoryError> {
        let end = base as u64 + size as u64;
        if self.regions.iter().any(|r| (base as u64) < r.end() && (r.base as u64) < end) {
            return Err(MemoryError::Overlap {
                name: name.to_string(),
                base,
            });
        }
        self.regions.push(Region {
            name: name.to_string(),
            base,
            data: vec![0; size],
        });
        self.regions.sort_by_key(|r| r.base);
        Ok(())
    }

    /// Name of the region holding `addr`.
    pub fn region_name(&self, addr: PAddr) -> Option<&str> {
        self.regions
            .iter()
            .find(|r| r.base <= addr && (addr as u64) < r.end())
            .map(|r| r.name.as_str())
    }

    pub fn is_region_cached(&self, addr: PAddr, size: u32) -> bool {
        self.cached.intersects(SurfaceInterval::from_size(addr, size))
    }

    pub fn cached_regions(&self) -> impl Iterator<Item = SurfaceInterval> + '_ {
        self.cached.intervals()
    }
}

impl MemorySystem for PhysicalMemory {
    fn physical_ref(&mut self, addr: PAddr) -> Option<&mut [u8]> {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.base <= addr && (addr as u64) < r.end())?;
        let offset = (addr - region.base) as usize;
        Some(&mut region.data[offset..])
    }

    fn mark_region_cached(&mut self, addr: PAddr, size: u32, cached: bool) {
        let interval = SurfaceInterval::from_size(addr, size);
        if cached {
            self.cached.insert(interval);
        } else {
            self.cached.erase(interval);
        }
    }
}
