//! Hardware constants for the 3DS: physical memory layout, MMIO register
//! offsets and display specifications.

pub mod memory_map;
pub mod mmio;
pub mod specs;
