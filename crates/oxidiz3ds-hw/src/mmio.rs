//! MMIO register blocks used by the video crate.

pub mod gpu;
