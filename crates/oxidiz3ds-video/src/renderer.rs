//! Renderer front end.
//!
//! A [`Renderer`] owns one [`RasterizerCache`] together with the latched GPU
//! external registers. Register writes that start a memory fill or a display
//! transfer are executed on the host when the cache can do it, and in guest
//! memory otherwise. CPU accesses go through [`Renderer::cpu_read`] and
//! [`Renderer::cpu_write`] so the cache sees them.

use crate::backend::GraphicsBackend;
use crate::cache::{CacheStats, RasterizerCache, SurfaceHandle, TextureConfig, copy_geometry};
use crate::config::CacheConfig;
use crate::custom_tex::CustomTextureManager;
use crate::interval::PAddr;
use crate::memory::{MemoryError, MemorySystem};
use crate::params::{Rect, align_down};
use crate::regs::{DisplayTransferConfig, GpuCommand, GpuRegs, MemoryFillConfig, Screen};
use tracing::{debug, info, instrument, trace, warn};

pub struct Renderer<B: GraphicsBackend> {
    regs: GpuRegs,
    cache: RasterizerCache<B>,
    frame: u64,
}

impl<B: GraphicsBackend> Renderer<B> {
    pub fn new(
        memory: Box<dyn MemorySystem>,
        backend: B,
        custom_textures: Box<dyn CustomTextureManager>,
        config: CacheConfig,
    ) -> Self {
        info!("=== Creating Renderer ===");
        info!(
            "Resolution scale: {}x, texture filter: {}, custom textures: {}, dumping: {}",
            config.resolution_scale, config.texture_filter, config.use_custom_textures, config.dump_textures
        );
        Self {
            regs: GpuRegs::new(),
            cache: RasterizerCache::new(memory, backend, custom_textures, config),
            frame: 0,
        }
    }

    pub fn cache(&self) -> &RasterizerCache<B> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RasterizerCache<B> {
        &mut self.cache
    }

    pub fn regs(&self) -> &GpuRegs {
        &self.regs
    }

    /// Frames completed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Handle a write to a GPU external register, running any operation it triggers.
    pub fn write_register(&mut self, offset: u32, value: u32) {
        if let Some(command) = self.regs.write(offset, value) {
            self.execute(command);
        }
    }

    pub fn read_register(&self, offset: u32) -> u32 {
        self.regs.read(offset)
    }

    #[instrument(level = "trace", skip(self))]
    fn execute(&mut self, command: GpuCommand) {
        match command {
            GpuCommand::MemoryFill { unit, config } => {
                if !self.cache.accelerate_fill(&config) {
                    self.software_fill(&config);
                }
                self.regs.complete_fill(unit);
            }
            GpuCommand::DisplayTransfer(config) if config.is_texture_copy => {
                if !self.cache.accelerate_texture_copy(&config) {
                    self.software_texture_copy(&config);
                }
                self.regs.complete_transfer();
            }
            GpuCommand::DisplayTransfer(config) => {
                if !self.cache.accelerate_display_transfer(&config) {
                    warn!(
                        "Display transfer {:#010X} -> {:#010X} not performed",
                        config.input_address, config.output_address
                    );
                }
                self.regs.complete_transfer();
            }
        }
    }

    /// Writes the fill pattern straight into guest memory.
    fn software_fill(&mut self, config: &MemoryFillConfig) {
        if config.end <= config.start {
            debug!("Ignoring empty memory fill at {:#010X}", config.start);
            return;
        }
        let size = config.end - config.start;
        self.cache.invalidate_region(config.start, size, None);

        let pattern = config.fill_data();
        let fill_size = config.fill_size() as usize;
        let Some(dest) = self.cache.memory_mut().physical_ref(config.start) else {
            warn!("Memory fill of unmapped range {:#010X}", config.start);
            return;
        };
        let len = (size as usize).min(dest.len());
        for (offset, byte) in dest[..len].iter_mut().enumerate() {
            *byte = pattern[offset % fill_size];
        }
        trace!("Software fill {:#010X}..{:#010X}", config.start, config.end);
    }

    /// Copies the texture copy lines through guest memory.
    fn software_texture_copy(&mut self, config: &DisplayTransferConfig) {
        let copy = &config.texture_copy;
        let copy_size = align_down(copy.size, 16);
        if copy_size == 0 {
            return;
        }
        let geometry = copy_geometry(copy_size, copy.input_width, copy.input_gap)
            .zip(copy_geometry(copy_size, copy.output_width, copy.output_gap));
        let Some(((input_width, input_gap), (output_width, output_gap))) = geometry else {
            warn!("Texture copy with unsupported line geometry: {:?}", copy);
            return;
        };

        let src_len = line_span(copy_size, input_width, input_gap);
        let dst_len = line_span(copy_size, output_width, output_gap);
        self.cache.flush_region(config.input_address, src_len, None);
        // Gaps between output lines keep their contents
        self.cache.flush_region(config.output_address, dst_len, None);
        self.cache.invalidate_region(config.output_address, dst_len, None);

        let memory = self.cache.memory_mut();
        let mut source = vec![0; src_len as usize];
        if let Err(err) = memory.read(config.input_address, &mut source) {
            warn!("Texture copy source: {}", err);
            return;
        }
        let data: Vec<u8> = source
            .chunks((input_width + input_gap) as usize)
            .flat_map(|line| &line[..line.len().min(input_width as usize)])
            .copied()
            .take(copy_size as usize)
            .collect();

        for (index, line) in data.chunks(output_width as usize).enumerate() {
            let addr = config.output_address + index as u32 * (output_width + output_gap);
            if let Err(err) = memory.write(addr, line) {
                warn!("Texture copy destination: {}", err);
                return;
            }
        }
        trace!(
            "Software texture copy {:#010X} -> {:#010X} ({} bytes)",
            config.input_address, config.output_address, copy_size
        );
    }

    /// CPU read of guest memory. Dirty surface data is written back first.
    pub fn cpu_read(&mut self, addr: PAddr, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.cache.flush_region(addr, buf.len() as u32, None);
        self.cache.memory_mut().read(addr, buf)
    }

    /// CPU write of guest memory. Surfaces over the range are invalidated first.
    pub fn cpu_write(&mut self, addr: PAddr, data: &[u8]) -> Result<(), MemoryError> {
        self.cache.invalidate_region(addr, data.len() as u32, None);
        self.cache.memory_mut().write(addr, data)
    }

    /// Surface a texture unit samples from.
    pub fn texture(&mut self, config: &TextureConfig) -> Option<SurfaceHandle<B>> {
        self.cache.get_texture_surface(config)
    }

    /// Surface and rectangle a screen scans out from.
    pub fn present(&mut self, screen: Screen, right_eye: bool) -> Option<(SurfaceHandle<B>, Rect)> {
        let scanout = self.regs.scanout(screen);
        let presented = self.cache.accelerate_display(&scanout, right_eye);
        if presented.is_none() {
            debug!("Nothing to present on {:?} screen", screen);
        }
        presented
    }

    /// Ends the current frame, applying `config` to the cache.
    pub fn end_frame(&mut self, config: &CacheConfig) {
        self.cache.tick_frame(config);
        self.frame += 1;
        trace!("Frame {} complete", self.frame);
    }
}

fn line_span(copy_size: u32, width: u32, gap: u32) -> u32 {
    (copy_size / width - 1) * (width + gap) + width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::custom_tex::NoCustomTextures;
    use crate::memory::PhysicalMemory;
    use crate::params::SurfaceParams;
    use crate::matcher::ScaleMatch;
    use crate::pixel_format::PixelFormat;
    use oxidiz3ds_hw::mmio::gpu::{fill_control, registers as hw_regs, transfer_flags};
    use pretty_assertions::assert_eq;

    const VRAM: PAddr = 0x1800_0000;

    fn renderer() -> Renderer<SoftwareBackend> {
        let mut memory = PhysicalMemory::new();
        memory.map("VRAM", VRAM, 0x80000).unwrap();
        Renderer::new(
            Box::new(memory),
            SoftwareBackend::new(),
            Box::new(NoCustomTextures),
            CacheConfig::default(),
        )
    }

    fn trigger_fill(renderer: &mut Renderer<SoftwareBackend>, start: PAddr, end: PAddr, value: u32, control: u32) {
        let base = hw_regs::MEMORY_FILL_0;
        renderer.write_register(base + hw_regs::MEMORY_FILL_START, start >> 3);
        renderer.write_register(base + hw_regs::MEMORY_FILL_END, end >> 3);
        renderer.write_register(base + hw_regs::MEMORY_FILL_VALUE, value);
        renderer.write_register(base + hw_regs::MEMORY_FILL_CONTROL, control | fill_control::TRIGGER);
    }

    #[test]
    fn test_fill_is_visible_to_cpu_reads() {
        let mut renderer = renderer();
        trigger_fill(&mut renderer, VRAM, VRAM + 0x100, 0x1122, 0);
        assert_eq!(renderer.stats().fill_surfaces, 1);
        assert_eq!(
            renderer.read_register(hw_regs::MEMORY_FILL_0 + hw_regs::MEMORY_FILL_CONTROL) & fill_control::FINISHED,
            fill_control::FINISHED
        );

        let mut buf = [0u8; 8];
        renderer.cpu_read(VRAM + 0x10, &mut buf).unwrap();
        assert_eq!(buf, [0x22, 0x11, 0x22, 0x11, 0x22, 0x11, 0x22, 0x11]);
    }

    #[test]
    fn test_cpu_write_drops_stale_surface() {
        let mut renderer = renderer();
        let params = SurfaceParams {
            addr: VRAM,
            width: 8,
            height: 8,
            pixel_format: PixelFormat::Rgba8,
            ..Default::default()
        }
        .updated();
        renderer.cache_mut().get_surface(&params, ScaleMatch::Exact, true).unwrap();
        assert_eq!(renderer.stats().surfaces, 1);

        renderer.cpu_write(VRAM + 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(renderer.stats().surfaces, 0);

        let mut buf = [0u8; 4];
        renderer.cpu_read(VRAM + 4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_uncached_texture_copy_falls_back_to_memory() {
        let mut renderer = renderer();
        let data: Vec<u8> = (0..96u8).collect();
        renderer.cpu_write(VRAM, &data).unwrap();

        renderer.write_register(hw_regs::TRANSFER_INPUT_ADDR, VRAM >> 3);
        renderer.write_register(hw_regs::TRANSFER_OUTPUT_ADDR, (VRAM + 0x1000) >> 3);
        renderer.write_register(hw_regs::TEXCOPY_SIZE, 64);
        // 32 byte input lines separated by 16 byte gaps
        renderer.write_register(hw_regs::TEXCOPY_INPUT_LINE, (1 << 16) | 2);
        renderer.write_register(hw_regs::TRANSFER_FLAGS, transfer_flags::IS_TEXTURE_COPY);
        renderer.write_register(hw_regs::TRANSFER_TRIGGER, 1);
        assert_eq!(renderer.read_register(hw_regs::TRANSFER_TRIGGER) & 1, 0);

        let mut out = vec![0u8; 64];
        renderer.cpu_read(VRAM + 0x1000, &mut out).unwrap();
        let expected = [&data[..32], &data[48..80]].concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_texture_copy_fallback_keeps_output_gaps() {
        let mut renderer = renderer();
        let data: Vec<u8> = (0..96u8).collect();
        renderer.cpu_write(VRAM, &data).unwrap();
        trigger_fill(&mut renderer, VRAM + 0x1000, VRAM + 0x1100, 0xABAB_ABAB, fill_control::FILL_32BIT);
        assert_eq!(renderer.stats().dirty_bytes, 0x100);

        renderer.write_register(hw_regs::TRANSFER_INPUT_ADDR, VRAM >> 3);
        renderer.write_register(hw_regs::TRANSFER_OUTPUT_ADDR, (VRAM + 0x1000) >> 3);
        renderer.write_register(hw_regs::TEXCOPY_SIZE, 64);
        renderer.write_register(hw_regs::TEXCOPY_INPUT_LINE, 2);
        // 32 byte output lines separated by 16 byte gaps
        renderer.write_register(hw_regs::TEXCOPY_OUTPUT_LINE, (1 << 16) | 2);
        renderer.write_register(hw_regs::TRANSFER_FLAGS, transfer_flags::IS_TEXTURE_COPY);
        renderer.write_register(hw_regs::TRANSFER_TRIGGER, 1);

        let mut out = vec![0u8; 96];
        renderer.cpu_read(VRAM + 0x1000, &mut out).unwrap();
        let fill = [0xABu8; 16];
        let expected = [&data[..32], &fill, &data[32..64], &fill].concat();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_present_without_framebuffer() {
        let mut renderer = renderer();
        assert!(renderer.present(Screen::Top, false).is_none());

        renderer.write_register(hw_regs::FRAMEBUFFER_BOTTOM_LEFT, VRAM);
        renderer.write_register(hw_regs::FRAMEBUFFER_BOTTOM_FORMAT, 0);
        renderer.write_register(hw_regs::FRAMEBUFFER_BOTTOM_STRIDE, 240 * 4);
        let (surface, rect) = renderer.present(Screen::Bottom, false).unwrap();
        assert_eq!(surface.params().pixel_format, PixelFormat::Rgba8);
        assert_eq!((rect.width(), rect.height()), (240, 320));
    }

    #[test]
    fn test_end_frame_counts_frames() {
        let mut renderer = renderer();
        renderer.end_frame(&CacheConfig::default());
        renderer.end_frame(&CacheConfig::default());
        assert_eq!(renderer.frame(), 2);
    }
}
