use super::*;
use crate::backend::software::SoftwareBackend;
use crate::backend::{ClearValue, Extent, HostTexture, TextureClear};
use crate::custom_tex::{CustomPixelFormat, NoCustomTextures, TexturePack, TexturePackOptions, compute_hash};
use crate::interval::IntervalSet;
use crate::memory::PhysicalMemory;
use crate::regs::{DisplayTransferConfig, MemoryFillConfig, ScalingMode, TextureCopyConfig};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;

const VRAM: PAddr = 0x1800_0000;

type Cache = RasterizerCache<SoftwareBackend>;

/// Physical memory that also publishes its cached page marks to the test.
struct TestMemory {
    inner: PhysicalMemory,
    cached: Rc<RefCell<IntervalSet>>,
}

impl MemorySystem for TestMemory {
    fn physical_ref(&mut self, addr: PAddr) -> Option<&mut [u8]> {
        self.inner.physical_ref(addr)
    }

    fn mark_region_cached(&mut self, addr: PAddr, size: u32, cached: bool) {
        self.inner.mark_region_cached(addr, size, cached);
        let interval = SurfaceInterval::from_size(addr, size);
        let mut marks = self.cached.borrow_mut();
        if cached {
            marks.insert(interval);
        } else {
            marks.erase(interval);
        }
    }
}

fn build(config: CacheConfig, custom: Box<dyn CustomTextureManager>) -> (Cache, Rc<RefCell<IntervalSet>>) {
    let mut inner = PhysicalMemory::new();
    inner.map("LOW", 0, 0x10000).unwrap();
    inner.map("VRAM", VRAM, 0x10000).unwrap();
    let cached = Rc::new(RefCell::new(IntervalSet::new()));
    let memory = TestMemory {
        inner,
        cached: Rc::clone(&cached),
    };
    let cache = RasterizerCache::new(Box::new(memory), SoftwareBackend::new(), custom, config);
    (cache, cached)
}

fn cache() -> (Cache, Rc<RefCell<IntervalSet>>) {
    build(CacheConfig::default(), Box::new(NoCustomTextures))
}

fn linear(addr: PAddr, width: u32, height: u32, format: PixelFormat) -> SurfaceParams {
    SurfaceParams {
        addr,
        width,
        height,
        pixel_format: format,
        ..Default::default()
    }
    .updated()
}

fn tiled(addr: PAddr, width: u32, height: u32, format: PixelFormat) -> SurfaceParams {
    SurfaceParams {
        is_tiled: true,
        ..linear(addr, width, height, format)
    }
    .updated()
}

fn scaled(params: SurfaceParams, res_scale: u16) -> SurfaceParams {
    SurfaceParams { res_scale, ..params }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn read(cache: &mut Cache, addr: PAddr, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    cache.memory_mut().read(addr, &mut buf).unwrap();
    buf
}

fn texel(surface: &SurfaceHandle<SoftwareBackend>, x: u32, y: u32) -> [u8; 4] {
    surface.borrow().texture.as_ref().unwrap().read_rgba(0, 0, x, y)
}

#[test]
fn test_mip_levels() {
    assert_eq!(mip_levels(32, 32, 7), 3);
    assert_eq!(mip_levels(256, 128, 2), 3);
    assert_eq!(mip_levels(8, 8, 5), 1);
}

#[test]
fn test_get_surface_rejects_null_and_empty() {
    let (mut cache, _) = cache();
    assert!(cache.get_surface(&linear(0, 16, 16, PixelFormat::Rgba8), ScaleMatch::Exact, true).is_none());
    assert!(cache.get_surface(&linear(VRAM, 0, 16, PixelFormat::Rgba8), ScaleMatch::Exact, true).is_none());
    assert!(cache.get_surface(&linear(VRAM, 0x1_0000, 0, PixelFormat::Rgba8), ScaleMatch::Exact, true).is_none());
    assert!(
        cache
            .get_surface_sub_rect(&linear(VRAM, 0, 0x1_0000, PixelFormat::Rgba8), ScaleMatch::Ignore, true)
            .is_none()
    );
    assert_eq!(cache.stats().surfaces, 0);
}

#[test]
fn test_upload_download_round_trip() {
    let (mut cache, _) = cache();
    for params in [
        linear(VRAM, 16, 8, PixelFormat::Rgba8),
        tiled(VRAM + 0x1000, 16, 16, PixelFormat::Rgb565),
    ] {
        let data = pattern(params.size as usize);
        cache.memory_mut().write(params.addr, &data).unwrap();
        let surface = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();

        cache.invalidate_region(params.addr, params.size, Some(&surface));
        cache.memory_mut().write(params.addr, &vec![0; data.len()]).unwrap();
        cache.flush_region(params.addr, params.size, None);

        assert_eq!(read(&mut cache, params.addr, data.len()), data);
    }
}

#[test]
fn test_second_flush_writes_nothing() {
    let (mut cache, _) = cache();
    let params = linear(VRAM, 16, 8, PixelFormat::Rgba8);
    cache.memory_mut().write(VRAM, &pattern(params.size as usize)).unwrap();
    let surface = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    cache.invalidate_region(VRAM, params.size, Some(&surface));

    cache.flush_region(VRAM, params.size, None);
    assert!(cache.dirty_owner(VRAM).is_none());

    cache.memory_mut().write(VRAM, &[0xAA; 16]).unwrap();
    cache.flush_region(VRAM, params.size, None);
    assert_eq!(read(&mut cache, VRAM, 16), vec![0xAA; 16]);
}

#[test]
fn test_exact_upscale_prefers_higher_scale() {
    let (mut cache, _) = cache();
    let params = linear(VRAM, 64, 64, PixelFormat::Rgba8);
    let low = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    let high = cache.get_surface(&scaled(params, 2), ScaleMatch::Exact, true).unwrap();
    assert!(low != high);

    let found = cache.find_match(&params, MatchFlags::EXACT, ScaleMatch::Upscale, None);
    assert_eq!(found, Some(high));
}

#[test]
fn test_new_surface_inherits_scale_of_overlapping_surface() {
    let (mut cache, _) = cache();
    let base = scaled(linear(VRAM, 64, 16, PixelFormat::Rgba8), 2);
    cache.get_surface(&base, ScaleMatch::Exact, false).unwrap();

    let overlapping = linear(VRAM + base.size / 2, 64, 16, PixelFormat::Rgba8);
    let surface = cache.get_surface(&overlapping, ScaleMatch::Upscale, false).unwrap();
    assert_eq!(surface.params().res_scale, 2);

    let exact = linear(VRAM + 0x8000, 64, 16, PixelFormat::Rgba8);
    let surface = cache.get_surface(&exact, ScaleMatch::Exact, false).unwrap();
    assert_eq!(surface.params().res_scale, 1);
}

#[test]
fn test_small_cpu_write_evicts_surface() {
    let (mut cache, cached) = cache();
    let params = linear(VRAM, 16, 16, PixelFormat::Rgba8);
    let surface = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    assert!(cached.borrow().intersects(params.interval()));
    assert_eq!(cache.stats().cached_pages, 1);

    cache.invalidate_region(VRAM + 4, 4, None);

    assert!(!surface.borrow().registered);
    assert_eq!(cache.stats().surfaces, 0);
    assert_eq!(cache.stats().cached_pages, 0);
    assert!(cached.borrow().is_empty());
}

#[test]
fn test_small_cpu_write_flushes_dirty_surface_first() {
    let (mut cache, _) = cache();
    let params = linear(VRAM, 16, 16, PixelFormat::Rgba8);
    let data = pattern(params.size as usize);
    cache.memory_mut().write(VRAM, &data).unwrap();
    let surface = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    cache.invalidate_region(VRAM, params.size, Some(&surface));
    cache.memory_mut().write(VRAM, &vec![0; data.len()]).unwrap();

    cache.invalidate_region(VRAM + 100, 4, None);

    assert_eq!(read(&mut cache, VRAM, data.len()), data);
    assert!(cache.dirty_owner(VRAM).is_none());
}

#[test]
fn test_fill_then_read() {
    let (mut cache, _) = cache();
    let config = MemoryFillConfig {
        start: 0x1000,
        end: 0x2000,
        value: 0xFFFF_FFFF,
        fill_32bit: true,
        ..Default::default()
    };
    assert!(cache.accelerate_fill(&config));
    assert_eq!(cache.stats().fill_surfaces, 1);

    let surface = cache
        .get_surface(&linear(0x1000, 64, 16, PixelFormat::Rgba8), ScaleMatch::Upscale, true)
        .unwrap();
    for y in 0..16 {
        for x in 0..64 {
            assert_eq!(texel(&surface, x, y), [0xFF; 4]);
        }
    }

    cache.flush_all();
    assert_eq!(read(&mut cache, 0x1000, 0x1000), vec![0xFF; 0x1000]);
}

#[test]
fn test_fill_flush_keeps_pattern_phase_and_neighbours() {
    let (mut cache, _) = cache();
    cache.memory_mut().write(0x1000, &[0x11; 16]).unwrap();
    let config = MemoryFillConfig {
        start: 0x1003,
        end: 0x100C,
        value: 0x00AA_BBCC,
        fill_24bit: true,
        ..Default::default()
    };
    assert!(cache.accelerate_fill(&config));
    cache.flush_region(0x1000, 0x10, None);

    let fill = config.fill_data();
    let mut expected = vec![0x11; 16];
    for (i, byte) in expected.iter_mut().enumerate().take(12).skip(3) {
        *byte = fill[(i - 3) % 3];
    }
    assert_eq!(read(&mut cache, 0x1000, 16), expected);
}

#[test]
fn test_validate_copies_from_new_owner() {
    let (mut cache, _) = cache();
    let params = linear(VRAM, 16, 16, PixelFormat::Rgba8);
    let target = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    let owner = cache.get_surface(&scaled(params, 2), ScaleMatch::Exact, false).unwrap();
    {
        let mut inner = owner.borrow_mut();
        let clear = TextureClear {
            level: 0,
            rect: Rect::new(0, 32, 32, 0),
            value: ClearValue {
                color: [255, 0, 0, 255],
                ..Default::default()
            },
        };
        cache.backend_mut().clear_texture(inner.texture.as_mut().unwrap(), &clear);
    }

    let half = params.size / 2;
    cache.invalidate_region(VRAM, half, Some(&owner));
    assert!(target.borrow().registered);
    assert!(!target.borrow().is_region_valid(SurfaceInterval::from_size(VRAM, half)));

    cache.validate_surface(&target, VRAM, params.size);
    assert!(target.borrow().is_region_valid(params.interval()));
    assert_eq!(texel(&target, 0, 0), [255, 0, 0, 255]);
    assert_eq!(texel(&target, 15, 7), [255, 0, 0, 255]);
    assert_eq!(texel(&target, 0, 8), [0, 0, 0, 0]);
    assert_eq!(cache.dirty_owner(VRAM), Some(owner));
}

#[test]
fn test_texture_copy_validates_destination() {
    let (mut cache, _) = cache();
    let data = pattern(1024);
    cache.memory_mut().write(VRAM, &data).unwrap();
    cache
        .get_surface(&linear(VRAM, 16, 16, PixelFormat::Rgba8), ScaleMatch::Exact, true)
        .unwrap();

    let config = DisplayTransferConfig {
        input_address: VRAM,
        output_address: VRAM + 0x2000,
        is_texture_copy: true,
        texture_copy: TextureCopyConfig {
            size: 256,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(cache.accelerate_texture_copy(&config));

    let copied = SurfaceInterval::from_size(VRAM + 0x2000, 256);
    let dst = cache.dirty_owner(VRAM + 0x2000).unwrap();
    assert!(dst.borrow().is_region_valid(copied));

    cache.flush_all();
    assert_eq!(read(&mut cache, VRAM + 0x2000, 256), data[..256].to_vec());
}

#[test]
fn test_texture_copy_rejects_bad_geometry() {
    let (mut cache, _) = cache();
    let mut config = DisplayTransferConfig {
        input_address: VRAM,
        output_address: VRAM + 0x2000,
        is_texture_copy: true,
        ..Default::default()
    };
    config.texture_copy.size = 8;
    assert!(!cache.accelerate_texture_copy(&config));

    config.texture_copy = TextureCopyConfig {
        size: 256,
        input_gap: 1,
        ..Default::default()
    };
    assert!(!cache.accelerate_texture_copy(&config));

    // Nothing cached at the source
    config.texture_copy = TextureCopyConfig {
        size: 256,
        ..Default::default()
    };
    assert!(!cache.accelerate_texture_copy(&config));
}

#[test]
fn test_display_transfer_downscales_and_flips() {
    let (mut cache, _) = cache();
    let mut data = Vec::new();
    for row in 0..16u8 {
        for _ in 0..16 {
            data.extend_from_slice(&[row, row, row, 0xFF]);
        }
    }
    cache.memory_mut().write(VRAM, &data).unwrap();

    let config = DisplayTransferConfig {
        input_address: VRAM,
        output_address: VRAM + 0x2000,
        input_width: 16,
        input_height: 16,
        output_width: 16,
        output_height: 16,
        flip_vertically: true,
        input_linear: true,
        dont_swizzle: true,
        scaling: ScalingMode::XY,
        ..Default::default()
    };
    assert!(cache.accelerate_display_transfer(&config));
    cache.flush_all();

    let out = read(&mut cache, VRAM + 0x2000, 8 * 8 * 4);
    for y in 0..8 {
        let expected = (15 - 2 * y) as u8;
        assert_eq!(out[y * 32..y * 32 + 4].to_vec(), vec![expected, expected, expected, 0xFF]);
    }
}

#[test]
fn test_texture_cube_copies_only_changed_faces() {
    let (mut cache, _) = cache();
    let faces: [PAddr; 6] = std::array::from_fn(|i| VRAM + i as u32 * 0x100);
    for addr in faces {
        cache.memory_mut().write(addr, &pattern(256)).unwrap();
    }
    let config = TextureCubeConfig {
        px: faces[0],
        nx: faces[1],
        py: faces[2],
        ny: faces[3],
        pz: faces[4],
        nz: faces[5],
        width: 8,
        levels: 1,
        format: PixelFormat::Rgba8,
    };

    let cube = cache.get_texture_cube(&config).unwrap();
    assert!(!cube.borrow().registered);
    let first = cache.backend().stats();
    assert_eq!(first.copies + first.blits, 6);

    let again = cache.get_texture_cube(&config).unwrap();
    assert_eq!(again, cube);
    assert_eq!(cache.backend().stats(), first);

    cache.invalidate_region(faces[2], 64, None);
    cache.get_texture_cube(&config).unwrap();
    let stats = cache.backend().stats();
    assert_eq!(stats.copies + stats.blits, first.copies + first.blits + 1);
    assert_eq!(cache.stats().texture_cubes, 1);
}

#[test]
fn test_clear_all_unmarks_pages() {
    let (mut cache, cached) = cache();
    let a = cache
        .get_surface(&linear(VRAM, 16, 16, PixelFormat::Rgba8), ScaleMatch::Exact, false)
        .unwrap();
    let b = cache
        .get_surface(&linear(VRAM + 0x4000, 16, 16, PixelFormat::Rgba8), ScaleMatch::Exact, false)
        .unwrap();
    assert_eq!(cached.borrow().intervals().count(), 2);

    cache.clear_all(false);

    assert!(cached.borrow().is_empty());
    assert!(!a.borrow().registered);
    assert!(!b.borrow().registered);
    assert_eq!(
        cache.stats(),
        CacheStats {
            surfaces_created: 2,
            ..Default::default()
        }
    );
}

#[test]
fn test_overlapping_sub_rect_expands_surface() {
    let (mut cache, _) = cache();
    let top = linear(VRAM, 16, 8, PixelFormat::Rgba8);
    let (first, _) = cache.get_surface_sub_rect(&top, ScaleMatch::Ignore, false).unwrap();

    let lower = linear(VRAM + 256, 16, 8, PixelFormat::Rgba8);
    let (expanded, rect) = cache.get_surface_sub_rect(&lower, ScaleMatch::Ignore, false).unwrap();
    assert!(expanded != first);
    assert_eq!(expanded.params().interval(), SurfaceInterval::new(VRAM, VRAM + 768));
    assert_eq!(rect, Rect::new(0, 12, 16, 4));
    assert_eq!(cache.stats().surfaces, 2);

    // The superseded surface leaves on the next invalidation
    cache.invalidate_region(VRAM + 0x8000, 16, None);
    assert_eq!(cache.stats().surfaces, 1);
    assert!(!first.borrow().registered);
}

#[test]
fn test_superseded_render_target_hands_over_dirty_data() {
    let (mut cache, _) = cache();
    let top = linear(VRAM, 16, 8, PixelFormat::Rgba8);
    let data = pattern(768);
    cache.memory_mut().write(VRAM, &data).unwrap();
    let (first, _) = cache.get_surface_sub_rect(&top, ScaleMatch::Ignore, true).unwrap();
    cache.invalidate_region(VRAM, top.size, Some(&first));

    let lower = linear(VRAM + 256, 16, 8, PixelFormat::Rgba8);
    let (expanded, _) = cache.get_surface_sub_rect(&lower, ScaleMatch::Ignore, true).unwrap();
    assert_eq!(cache.dirty_owner(VRAM), Some(expanded.clone()));

    cache.memory_mut().write(VRAM, &[0; 768]).unwrap();
    cache.flush_all();
    assert_eq!(read(&mut cache, VRAM, 512), data[..512].to_vec());
}

#[test]
fn test_framebuffer_surfaces() {
    let (mut cache, _) = build(
        CacheConfig {
            resolution_scale: 2,
            ..Default::default()
        },
        Box::new(NoCustomTextures),
    );
    let config = FramebufferConfig {
        color_addr: VRAM,
        depth_addr: VRAM + 0x4000,
        width: 16,
        height: 16,
        color_format: PixelFormat::Rgba8,
        depth_format: PixelFormat::D24S8,
        viewport: Viewport {
            left: 0,
            top: 16,
            right: 8,
            bottom: -4,
        },
    };

    let framebuffer = cache.get_framebuffer_surfaces(&config, true, true);
    let color = framebuffer.color.clone().unwrap();
    assert!(framebuffer.depth.is_some());
    assert_eq!(framebuffer.res_scale, 2);
    assert_eq!(framebuffer.surfaces_rect, Rect::new(0, 32, 32, 0));
    assert_eq!(framebuffer.draw_rect, Rect::new(0, 32, 16, 0));

    cache.invalidate_framebuffer(&framebuffer);
    assert_eq!(cache.dirty_owner(framebuffer.color_interval.start), Some(color));

    let overlapping = FramebufferConfig {
        depth_addr: VRAM,
        ..config
    };
    let framebuffer = cache.get_framebuffer_surfaces(&overlapping, true, true);
    assert!(framebuffer.color.is_some());
    assert!(framebuffer.depth.is_none());
}

#[test]
fn test_tick_frame_resets_on_scale_change() {
    let (mut cache, _) = cache();
    cache
        .get_surface(&linear(VRAM, 16, 16, PixelFormat::Rgba8), ScaleMatch::Exact, true)
        .unwrap();

    cache.tick_frame(&CacheConfig {
        dump_textures: true,
        ..Default::default()
    });
    assert_eq!(cache.stats().surfaces, 1);

    cache.tick_frame(&CacheConfig {
        resolution_scale: 2,
        ..Default::default()
    });
    assert_eq!(cache.stats().surfaces, 0);
    assert_eq!(cache.config().resolution_scale, 2);
}

#[test]
fn test_sub_tile_texture_uses_private_copy() {
    let (mut cache, _) = cache();
    cache.memory_mut().write(VRAM, &pattern(256)).unwrap();
    let config = TextureConfig {
        addr: VRAM,
        width: 4,
        height: 4,
        format: PixelFormat::Rgba8,
        max_level: 0,
    };
    let texture = cache.get_texture_surface(&config).unwrap();
    assert!(!texture.borrow().registered);
    assert_eq!((texture.params().width, texture.params().height), (4, 4));

    let sources = cache.surfaces_in(SurfaceInterval::from_size(VRAM, 256));
    assert_eq!(sources.len(), 1);
    assert_eq!(texel(&texture, 0, 3), texel(&sources[0], 0, 7));
}

#[test]
fn test_misaligned_texture_is_rejected() {
    let (mut cache, _) = cache();
    let config = TextureConfig {
        addr: VRAM,
        width: 6,
        height: 6,
        format: PixelFormat::Rgba8,
        max_level: 0,
    };
    assert!(cache.get_texture_surface(&config).is_none());
}

#[test]
fn test_reinterprets_depth_as_color() {
    let (mut cache, _) = cache();
    let depth_params = tiled(VRAM, 8, 8, PixelFormat::D24S8);
    let depth = cache.get_surface(&depth_params, ScaleMatch::Exact, false).unwrap();
    {
        let mut inner = depth.borrow_mut();
        let clear = TextureClear {
            level: 0,
            rect: Rect::new(0, 8, 8, 0),
            value: ClearValue {
                raw: [0x10, 0x20, 0x30, 0x40],
                ..Default::default()
            },
        };
        cache.backend_mut().clear_texture(inner.texture.as_mut().unwrap(), &clear);
    }
    cache.invalidate_region(VRAM, depth_params.size, Some(&depth));

    let color = cache
        .get_surface(&tiled(VRAM, 8, 8, PixelFormat::Rgba8), ScaleMatch::Ignore, true)
        .unwrap();
    assert_eq!(cache.backend().stats().reinterpretations, 1);
    // Color texels keep the guest byte layout, so the depth bytes carry over as is
    assert_eq!(
        texel(&color, 3, 5),
        crate::codec::decode_pixel(PixelFormat::Rgba8, &[0x10, 0x20, 0x30, 0x40])
    );
}

#[test]
fn test_custom_texture_replaces_upload() {
    let data = pattern(256);
    let mut pack = TexturePack::new(TexturePackOptions::default());
    pack.insert(compute_hash(&data), 16, 16, CustomPixelFormat::Rgba8, [1u8, 2, 3, 4].repeat(16 * 16))
        .unwrap();
    let config = CacheConfig {
        use_custom_textures: true,
        ..Default::default()
    };
    let (mut cache, _) = build(config, Box::new(pack));
    cache.memory_mut().write(VRAM, &data).unwrap();

    let surface = cache
        .get_texture_surface(&TextureConfig {
            addr: VRAM,
            width: 8,
            height: 8,
            format: PixelFormat::Rgba8,
            max_level: 0,
        })
        .unwrap();

    assert!(surface.borrow().is_custom());
    assert_eq!(
        surface.borrow().texture.as_ref().unwrap().extent(),
        Extent {
            width: 16,
            height: 16
        }
    );
    assert_eq!(texel(&surface, 15, 15), [1, 2, 3, 4]);
}

#[test]
fn test_async_custom_texture_applies_on_tick() {
    let data = pattern(256);
    let mut pack = TexturePack::new(TexturePackOptions {
        async_loading: true,
        ..Default::default()
    });
    pack.insert(compute_hash(&data), 8, 8, CustomPixelFormat::Rgba8, [9u8; 4].repeat(64))
        .unwrap();
    let config = CacheConfig {
        use_custom_textures: true,
        ..Default::default()
    };
    let (mut cache, _) = build(config.clone(), Box::new(pack));
    cache.memory_mut().write(VRAM, &data).unwrap();

    let texture = TextureConfig {
        addr: VRAM,
        width: 8,
        height: 8,
        format: PixelFormat::Rgba8,
        max_level: 0,
    };
    let surface = cache.get_texture_surface(&texture).unwrap();
    assert!(surface.borrow().is_custom());

    for _ in 0..1000 {
        cache.tick_frame(&config);
        if cache.stats().pending_custom_uploads == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(cache.stats().pending_custom_uploads, 0);
    assert_eq!(texel(&surface, 0, 0), [9; 4]);
}

/// Records dump requests.
#[derive(Default, Clone)]
struct DumpLog(Rc<RefCell<Vec<(u64, u32)>>>);

impl CustomTextureManager for DumpLog {
    fn get_material(&mut self, _hash: u64) -> Option<Arc<Material>> {
        None
    }

    fn decode(&mut self, _material: &Arc<Material>) -> bool {
        false
    }

    fn dump_texture(&mut self, _params: &SurfaceParams, level: u32, _data: &[u8], hash: u64) {
        self.0.borrow_mut().push((hash, level));
    }

    fn skip_mipmaps(&self) -> bool {
        false
    }

    fn use_new_hash(&self) -> bool {
        true
    }

    fn tick_frame(&mut self) {}
}

#[test]
fn test_dump_textures_reports_uploads() {
    let log = DumpLog::default();
    let config = CacheConfig {
        dump_textures: true,
        ..Default::default()
    };
    let (mut cache, _) = build(config, Box::new(log.clone()));
    let data = pattern(256);
    cache.memory_mut().write(VRAM, &data).unwrap();

    cache
        .get_surface(&tiled(VRAM, 8, 8, PixelFormat::Rgba8), ScaleMatch::Exact, true)
        .unwrap();
    assert_eq!(*log.0.borrow(), vec![(compute_hash(&data), 0)]);
}

#[test]
fn test_small_flush_writes_whole_dirty_run() {
    let (mut cache, _) = cache();
    let params = linear(VRAM, 16, 16, PixelFormat::Rgba8);
    let data = pattern(params.size as usize);
    cache.memory_mut().write(VRAM, &data).unwrap();
    let surface = cache.get_surface(&params, ScaleMatch::Exact, true).unwrap();
    cache.invalidate_region(VRAM, params.size, Some(&surface));
    cache.memory_mut().write(VRAM, &vec![0; data.len()]).unwrap();

    cache.flush_region(VRAM + 100, 4, None);

    assert_eq!(read(&mut cache, VRAM, data.len()), data);
    assert_eq!(cache.stats().dirty_bytes, 0);
    assert_eq!(cache.stats().surfaces, 1);
}

#[test]
fn test_gpu_data_in_unconvertible_format_is_not_uploaded() {
    let (mut cache, _) = cache();
    let owner_params = linear(VRAM, 16, 16, PixelFormat::Rgb565);
    let owner = cache.get_surface(&owner_params, ScaleMatch::Exact, false).unwrap();
    cache.invalidate_region(VRAM, owner_params.size, Some(&owner));

    let params = linear(VRAM, 8, 8, PixelFormat::Rgba8);
    let target = cache.get_surface(&params, ScaleMatch::Exact, false).unwrap();
    let before = cache.backend().stats();

    cache.validate_surface(&target, VRAM, params.size);

    assert!(!target.borrow().is_region_valid(params.interval()));
    assert_eq!(cache.backend().stats(), before);
    assert_eq!(cache.dirty_owner(VRAM), Some(owner));
    assert_eq!(cache.stats().dirty_bytes, owner_params.size as u64);
}

#[test]
fn test_sub_rect_recreates_low_scale_surface() {
    let (mut cache, _) = cache();
    let full = linear(VRAM, 16, 16, PixelFormat::Rgba8);
    let low_res = cache.get_surface(&full, ScaleMatch::Exact, false).unwrap();

    let half = scaled(linear(VRAM + 512, 16, 8, PixelFormat::Rgba8), 2);
    let (surface, rect) = cache.get_surface_sub_rect(&half, ScaleMatch::Upscale, false).unwrap();

    assert_ne!(surface, low_res);
    assert_eq!(surface.params().res_scale, 2);
    assert_eq!(surface.params().interval(), full.interval());
    assert_eq!((rect.width(), rect.height()), (32, 16));

    let (again, _) = cache.get_surface_sub_rect(&half, ScaleMatch::Upscale, false).unwrap();
    assert_eq!(again, surface);
}

#[test]
fn test_sub_tile_cube_faces_copy_only_when_changed() {
    let (mut cache, _) = cache();
    let faces: [PAddr; 6] = std::array::from_fn(|i| VRAM + i as u32 * 0x100);
    for addr in faces {
        cache.memory_mut().write(addr, &pattern(256)).unwrap();
    }
    let config = TextureCubeConfig {
        px: faces[0],
        nx: faces[1],
        py: faces[2],
        ny: faces[3],
        pz: faces[4],
        nz: faces[5],
        width: 4,
        levels: 1,
        format: PixelFormat::Rgba8,
    };

    cache.get_texture_cube(&config).unwrap();
    let first = cache.backend().stats();
    let created = cache.stats().surfaces_created;
    assert_eq!(first.copies + first.blits, 12);

    cache.get_texture_cube(&config).unwrap();
    assert_eq!(cache.backend().stats(), first);
    assert_eq!(cache.stats().surfaces_created, created);

    cache.invalidate_region(faces[2], 64, None);
    cache.get_texture_cube(&config).unwrap();
    let stats = cache.backend().stats();
    assert_eq!(stats.copies + stats.blits, first.copies + first.blits + 2);
}
