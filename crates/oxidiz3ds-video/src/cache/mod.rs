//! The surface cache.
//!
//! [`RasterizerCache`] keeps host textures ("surfaces") coherent with the
//! guest memory they shadow. It owns three interval maps over guest physical
//! memory:
//!
//! - the surface cache, mapping each byte to the set of surfaces covering it;
//! - the dirty region map, naming the one surface whose copy of a byte is newer
//!   than guest memory;
//! - the page map, counting registered surfaces per 4 KiB page so the memory
//!   system knows which pages need to go through the cache.
//!
//! Lookups go through the matcher, then the validator makes the requested
//! range correct by copying from other surfaces, reinterpreting them, or
//! uploading from guest memory. Guest writes invalidate, guest reads flush.

mod accelerate;
mod cube;
mod flush;
mod validate;

pub use cube::TextureCubeConfig;
pub(crate) use accelerate::copy_geometry;

use crate::backend::{GraphicsBackend, TextureBlit, TextureCopy, TextureDesc};
use crate::config::{CacheConfig, TextureFilter};
use crate::custom_tex::{CustomTextureManager, Material};
use crate::interval::{IntervalMap, PAddr, SurfaceInterval};
use crate::matcher::{self, MatchFlags, ScaleMatch};
use crate::memory::MemorySystem;
use crate::params::{MAX_LEVELS, Rect, SurfaceParams, align_up};
use crate::pixel_format::PixelFormat;
use crate::surface::{Surface, SurfaceId, SurfaceRef};
use cube::TextureCube;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, instrument, trace};

const PAGE_BITS: u32 = 12;

/// Shared handle to a surface of a cache running on backend `B`.
pub type SurfaceHandle<B> = SurfaceRef<<B as GraphicsBackend>::Texture>;

/// Where a texture lookup found its texels.
enum TextureSource<T> {
    /// A cached surface matching the texture exactly
    Whole(SurfaceRef<T>),
    /// A region of a larger surface, copied out on resolve
    Part {
        source: SurfaceRef<T>,
        rect: Rect,
        params: SurfaceParams,
    },
}

impl<T> TextureSource<T> {
    /// The cached surface holding the texels.
    fn surface(&self) -> &SurfaceRef<T> {
        match self {
            TextureSource::Whole(surface) => surface,
            TextureSource::Part { source, .. } => source,
        }
    }
}

type SurfaceSet<T> = BTreeSet<SurfaceRef<T>>;

/// Texture unit setup of one 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureConfig {
    pub addr: PAddr,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Highest mip level the sampler may access
    pub max_level: u32,
}

/// Mip levels usable by a `width` x `height` texture, capped at `max_level + 1`.
///
/// Levels stop once either dimension reaches 8, the size of one tile.
pub fn mip_levels(width: u32, height: u32, max_level: u32) -> u32 {
    let (mut width, mut height, mut levels) = (width, height, 1);
    while width > 8 && height > 8 {
        levels += 1;
        width >>= 1;
        height >>= 1;
    }
    levels.min(max_level + 1).min(MAX_LEVELS as u32)
}

/// Viewport in framebuffer pixels with a bottom-left origin. May extend past
/// the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Render target setup of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferConfig {
    pub color_addr: PAddr,
    pub depth_addr: PAddr,
    pub width: u32,
    pub height: u32,
    pub color_format: PixelFormat,
    pub depth_format: PixelFormat,
    pub viewport: Viewport,
}

/// Attachments of a draw as resolved by [`RasterizerCache::get_framebuffer_surfaces`].
#[derive(Debug)]
pub struct Framebuffer<T> {
    pub color: Option<SurfaceRef<T>>,
    pub depth: Option<SurfaceRef<T>>,
    /// Guest memory covered by the viewport in each attachment
    pub color_interval: SurfaceInterval,
    pub depth_interval: SurfaceInterval,
    /// Scaled rectangle of the framebuffer inside its surfaces
    pub surfaces_rect: Rect,
    /// Scaled viewport, clamped to `surfaces_rect`
    pub draw_rect: Rect,
    pub res_scale: u16,
}

#[derive(Debug)]
struct RenderTargets<T> {
    color: Option<SurfaceRef<T>>,
    depth: Option<SurfaceRef<T>>,
}

impl<T> Default for RenderTargets<T> {
    fn default() -> Self {
        Self { color: None, depth: None }
    }
}

/// A custom material waiting for its asynchronous decode.
struct PendingUpload<T> {
    surface: SurfaceRef<T>,
    material: Arc<Material>,
    level: u32,
}

/// Snapshot of the cache's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Registered surfaces, fill surfaces included
    pub surfaces: usize,
    pub fill_surfaces: usize,
    pub dirty_bytes: u64,
    pub cached_pages: u64,
    pub texture_cubes: usize,
    pub pending_custom_uploads: usize,
    pub surfaces_created: u64,
}

pub struct RasterizerCache<B: GraphicsBackend> {
    memory: Box<dyn MemorySystem>,
    backend: B,
    custom_textures: Box<dyn CustomTextureManager>,
    config: CacheConfig,
    surface_cache: IntervalMap<SurfaceSet<B::Texture>>,
    dirty_regions: IntervalMap<SurfaceHandle<B>>,
    cached_pages: IntervalMap<i32>,
    /// Surfaces superseded by an expansion, unregistered on the next invalidation
    remove_surfaces: BTreeSet<SurfaceHandle<B>>,
    render_targets: RenderTargets<B::Texture>,
    texture_cubes: HashMap<TextureCubeConfig, TextureCube<B::Texture>>,
    pending_uploads: Vec<PendingUpload<B::Texture>>,
    next_id: u64,
}

impl<B: GraphicsBackend> RasterizerCache<B> {
    pub fn new(
        memory: Box<dyn MemorySystem>,
        backend: B,
        custom_textures: Box<dyn CustomTextureManager>,
        config: CacheConfig,
    ) -> Self {
        debug!("Creating surface cache: {:?}", config);
        Self {
            memory,
            backend,
            custom_textures,
            config,
            surface_cache: IntervalMap::new(),
            dirty_regions: IntervalMap::new(),
            cached_pages: IntervalMap::new(),
            remove_surfaces: BTreeSet::new(),
            render_targets: RenderTargets::default(),
            texture_cubes: HashMap::new(),
            pending_uploads: Vec::new(),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &dyn MemorySystem {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> &mut dyn MemorySystem {
        self.memory.as_mut()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn custom_textures(&self) -> &dyn CustomTextureManager {
        self.custom_textures.as_ref()
    }

    /// Resolution scale applied to render targets.
    fn resolution_scale(&self) -> u16 {
        self.config.resolution_scale.max(1)
    }

    /// Resolution scale applied to sampled textures.
    fn texture_scale(&self) -> u16 {
        if self.config.texture_filter == TextureFilter::None {
            1
        } else {
            self.resolution_scale()
        }
    }

    /// Best registered surface for `params`. See [`matcher::find_match`].
    pub fn find_match(
        &self,
        params: &SurfaceParams,
        flags: MatchFlags,
        scale: ScaleMatch,
        validate_interval: Option<SurfaceInterval>,
    ) -> Option<SurfaceHandle<B>> {
        let candidates = self
            .surface_cache
            .range(params.interval())
            .flat_map(|(_, surfaces)| surfaces.iter());
        matcher::find_match(candidates, params, flags, scale, validate_interval)
    }

    /// Loads a surface exactly matching `params`, creating it if needed.
    ///
    /// `params` must not have gaps between rows.
    #[instrument(level = "trace", skip(self))]
    pub fn get_surface(
        &mut self,
        params: &SurfaceParams,
        scale: ScaleMatch,
        load_if_create: bool,
    ) -> Option<SurfaceHandle<B>> {
        if params.addr == 0 || params.width == 0 || params.height == 0 {
            return None;
        }
        debug_assert_eq!(params.width, params.stride, "surfaces cannot have gaps");
        debug_assert!(!params.is_tiled || (params.width % 8 == 0 && params.height % 8 == 0));

        let surface = match self.find_match(params, MatchFlags::EXACT | MatchFlags::INVALID, scale, None) {
            Some(surface) => surface,
            None => {
                let mut target_scale = params.res_scale;
                if scale != ScaleMatch::Exact {
                    // Inherit the scale of a surface this one is likely a part of. Depth
                    // surfaces read back as RGBA8 keep their scale too.
                    let reinterpreted = (params.pixel_format == PixelFormat::Rgba8).then_some(PixelFormat::D24S8);
                    for format in std::iter::once(params.pixel_format).chain(reinterpreted) {
                        let find_params = SurfaceParams {
                            pixel_format: format,
                            ..*params
                        };
                        if let Some(expandable) =
                            self.find_match(&find_params, MatchFlags::EXPAND | MatchFlags::INVALID, scale, None)
                        {
                            target_scale = target_scale.max(expandable.params().res_scale);
                        }
                    }
                }
                let surface = self.create_surface(SurfaceParams {
                    res_scale: target_scale,
                    ..*params
                });
                self.register_surface(&surface);
                surface
            }
        };

        if load_if_create {
            self.validate_surface(&surface, params.addr, params.size);
        }
        Some(surface)
    }

    /// Finds or creates a surface containing `params` and returns it with the
    /// scaled rectangle `params` occupies in it.
    #[instrument(level = "trace", skip(self))]
    pub fn get_surface_sub_rect(
        &mut self,
        params: &SurfaceParams,
        scale: ScaleMatch,
        load_if_create: bool,
    ) -> Option<(SurfaceHandle<B>, Rect)> {
        if params.addr == 0 || params.width == 0 || params.height == 0 {
            return None;
        }

        let sub_rect_flags = MatchFlags::SUB_RECT | MatchFlags::INVALID;
        let mut surface = self.find_match(params, sub_rect_flags, scale, None);

        // A lower scaled surface contains the rectangle. Recreate it at the requested
        // scale so it stops being picked for this kind of access.
        if surface.is_none() && scale != ScaleMatch::Ignore {
            if let Some(low_res) = self.find_match(params, sub_rect_flags, ScaleMatch::Ignore, None) {
                let new_params = SurfaceParams {
                    res_scale: params.res_scale,
                    ..low_res.params()
                };
                let created = self.create_surface(new_params);
                self.register_surface(&created);
                surface = Some(created);
            }
        }

        let mut aligned_params = *params;
        if params.is_tiled {
            aligned_params.height = align_up(params.height, 8);
            aligned_params.width = align_up(params.width, 8);
            aligned_params.stride = align_up(params.stride, 8);
            aligned_params.update_params();
        }

        if surface.is_none()
            && let Some(expandable) =
                self.find_match(&aligned_params, MatchFlags::EXPAND | MatchFlags::INVALID, scale, None)
        {
            aligned_params.width = aligned_params.stride;
            aligned_params.update_params();
            surface = Some(self.expand_surface(&expandable, &aligned_params));
        }

        let surface = match surface {
            Some(surface) => {
                if load_if_create {
                    self.validate_surface(&surface, aligned_params.addr, aligned_params.size);
                }
                surface
            }
            None => {
                let mut new_params = aligned_params;
                new_params.width = aligned_params.stride;
                new_params.update_params();
                self.get_surface(&new_params, scale, load_if_create)?
            }
        };

        let rect = surface.borrow().host_sub_rect(params);
        Some((surface, rect))
    }

    /// Grows `surface` to also cover `params`, scheduling the old surface for removal.
    fn expand_surface(&mut self, surface: &SurfaceHandle<B>, params: &SurfaceParams) -> SurfaceHandle<B> {
        let old = surface.params();
        let row_bytes = params.bytes_in_pixels(params.stride).max(1);

        let mut new_params = old;
        new_params.addr = params.addr.min(old.addr);
        let end = params.end.max(old.end);
        debug_assert_eq!((end - new_params.addr) % row_bytes, 0);
        new_params.height = (end - new_params.addr) / row_bytes;
        new_params.update_params();

        debug!(
            "Expanding surface {} {:?} to {:?}",
            surface.id(),
            old.interval(),
            new_params.interval()
        );
        let expanded = self.create_surface(new_params);
        self.duplicate_surface(surface, &expanded);
        self.remove_surfaces.insert(surface.clone());
        self.register_surface(&expanded);
        expanded
    }

    /// Surface for a texture copy query whose width and stride are in bytes.
    #[instrument(level = "trace", skip(self))]
    pub fn get_tex_copy_surface(&mut self, params: &SurfaceParams) -> Option<(SurfaceHandle<B>, Rect)> {
        let surface = self.find_match(params, MatchFlags::TEX_COPY | MatchFlags::INVALID, ScaleMatch::Ignore, None)?;
        self.validate_surface(&surface, params.addr, params.size);

        let rect = {
            let matched = surface.borrow();
            let match_subrect = if params.width != params.stride {
                let tiled_size = if matched.params.is_tiled { 8 } else { 1 };
                SurfaceParams {
                    width: matched.params.pixels_in_bytes(params.width) / tiled_size,
                    stride: matched.params.pixels_in_bytes(params.stride) / tiled_size,
                    height: params.height * tiled_size,
                    ..*params
                }
            } else {
                let subrect = matched.params.from_interval(params.interval());
                debug_assert_eq!(subrect.interval(), params.interval());
                subrect
            };
            matched.host_sub_rect(&match_subrect)
        };
        Some((surface, rect))
    }

    /// Surface holding the texture described by `config`.
    pub fn get_texture_surface(&mut self, config: &TextureConfig) -> Option<SurfaceHandle<B>> {
        let levels = mip_levels(config.width, config.height, config.max_level);
        self.texture_surface(config.addr, config.width, config.height, config.format, levels - 1)
    }

    #[instrument(level = "trace", skip(self))]
    fn texture_surface(
        &mut self,
        addr: PAddr,
        width: u32,
        height: u32,
        format: PixelFormat,
        max_level: u32,
    ) -> Option<SurfaceHandle<B>> {
        let source = self.texture_source(addr, width, height, format, max_level)?;
        Some(self.resolve_texture_source(source))
    }

    /// Surface the texture is sampled from. Textures smaller than a tile
    /// only locate the surface holding them here.
    fn texture_source(
        &mut self,
        addr: PAddr,
        width: u32,
        height: u32,
        format: PixelFormat,
        max_level: u32,
    ) -> Option<TextureSource<B::Texture>> {
        if addr == 0 {
            return None;
        }

        let mut params = SurfaceParams {
            addr,
            width,
            height,
            levels: max_level + 1,
            is_tiled: true,
            pixel_format: format,
            res_scale: self.texture_scale(),
            ..Default::default()
        };
        params.update_params();

        let min_width = width >> max_level;
        let min_height = height >> max_level;
        if min_width % 8 == 0 && min_height % 8 == 0 {
            return self
                .get_surface(&params, ScaleMatch::Ignore, true)
                .map(TextureSource::Whole);
        }
        if min_width % 4 != 0 || min_height % 4 != 0 {
            error!("Texture size ({}x{}) is not a multiple of 4", min_width, min_height);
            return None;
        }

        let (source, rect) = self.get_surface_sub_rect(&params, ScaleMatch::Ignore, true)?;
        params.res_scale = source.params().res_scale;
        Some(TextureSource::Part { source, rect, params })
    }

    /// Surface a texture can be bound as. Sub-tile textures are sampled from a
    /// private copy of their region.
    fn resolve_texture_source(&mut self, source: TextureSource<B::Texture>) -> SurfaceHandle<B> {
        let (source, rect, params) = match source {
            TextureSource::Whole(surface) => return surface,
            TextureSource::Part { source, rect, params } => (source, rect, params),
        };
        let temp = self.create_surface(params);
        let blit = TextureBlit {
            src_rect: rect,
            dst_rect: params.scaled_rect(),
            ..Default::default()
        };
        self.blit_surfaces(&source, &temp, &blit);
        temp.borrow_mut().mark_valid(params.interval());
        temp
    }

    /// Color and depth attachments of a draw.
    #[instrument(level = "trace", skip(self))]
    pub fn get_framebuffer_surfaces(
        &mut self,
        config: &FramebufferConfig,
        using_color: bool,
        mut using_depth: bool,
    ) -> Framebuffer<B::Texture> {
        let (fb_width, fb_height) = (config.width as i32, config.height as i32);
        let viewport = Rect::new(
            config.viewport.left.clamp(0, fb_width) as u32,
            config.viewport.top.clamp(0, fb_height) as u32,
            config.viewport.right.clamp(0, fb_width) as u32,
            config.viewport.bottom.clamp(0, fb_height) as u32,
        );

        let base = SurfaceParams {
            width: config.width,
            height: config.height,
            is_tiled: true,
            res_scale: self.resolution_scale(),
            ..Default::default()
        };
        let color_params = SurfaceParams {
            addr: config.color_addr,
            pixel_format: config.color_format,
            ..base
        }
        .updated();
        let depth_params = SurfaceParams {
            addr: config.depth_addr,
            pixel_format: config.depth_format,
            ..base
        }
        .updated();

        let color_interval = color_params.sub_rect_interval(viewport, 0);
        let depth_interval = depth_params.sub_rect_interval(viewport, 0);

        if using_color && using_depth && !color_interval.intersect(&depth_interval).is_empty() {
            error!("Color and depth framebuffer memory regions overlap; depth attachment dropped");
            using_depth = false;
        }

        let mut color = using_color
            .then(|| self.get_surface_sub_rect(&color_params, ScaleMatch::Exact, false))
            .flatten();
        let mut depth = using_depth
            .then(|| self.get_surface_sub_rect(&depth_params, ScaleMatch::Exact, false))
            .flatten();

        let surfaces_rect = match (&color, &depth) {
            (Some((_, color_rect)), Some((_, depth_rect))) if color_rect != depth_rect => {
                // Attachments must share dimensions and offsets; fall back to whole surfaces
                color = self
                    .get_surface(&color_params, ScaleMatch::Exact, false)
                    .map(|surface| (surface, color_params.scaled_rect()));
                depth = self
                    .get_surface(&depth_params, ScaleMatch::Exact, false)
                    .map(|surface| (surface, depth_params.scaled_rect()));
                color_params.scaled_rect()
            }
            (Some((_, rect)), _) | (None, Some((_, rect))) => *rect,
            (None, None) => Rect::default(),
        };

        let color = color.map(|(surface, _)| surface);
        let depth = depth.map(|(surface, _)| surface);
        if let Some(surface) = &color {
            self.validate_surface(surface, color_interval.start, color_interval.len());
        }
        if let Some(surface) = &depth {
            self.validate_surface(surface, depth_interval.start, depth_interval.len());
        }

        let res_scale = color
            .as_ref()
            .or(depth.as_ref())
            .map_or(self.resolution_scale(), |surface| surface.params().res_scale);
        let scale = res_scale as u32;
        let draw_rect = Rect::new(
            (surfaces_rect.left + viewport.left * scale).min(surfaces_rect.right),
            (surfaces_rect.bottom + viewport.top * scale).min(surfaces_rect.top),
            (surfaces_rect.left + viewport.right * scale).min(surfaces_rect.right),
            (surfaces_rect.bottom + viewport.bottom * scale).min(surfaces_rect.top),
        );

        self.render_targets = RenderTargets {
            color: color.clone(),
            depth: depth.clone(),
        };

        Framebuffer {
            color,
            depth,
            color_interval,
            depth_interval,
            surfaces_rect,
            draw_rect,
            res_scale,
        }
    }

    /// Claims the memory drawn to by `framebuffer` for its attachments.
    pub fn invalidate_framebuffer(&mut self, framebuffer: &Framebuffer<B::Texture>) {
        if let Some(color) = &framebuffer.color {
            let interval = framebuffer.color_interval;
            self.invalidate_region(interval.start, interval.len(), Some(color));
        }
        if let Some(depth) = &framebuffer.depth {
            let interval = framebuffer.depth_interval;
            self.invalidate_region(interval.start, interval.len(), Some(depth));
        }
    }

    /// Registered surfaces overlapping `interval`, oldest first.
    pub fn surfaces_in(&self, interval: SurfaceInterval) -> Vec<SurfaceHandle<B>> {
        let unique: SurfaceSet<B::Texture> = self
            .surface_cache
            .range(interval)
            .flat_map(|(_, surfaces)| surfaces.iter().cloned())
            .collect();
        unique.into_iter().collect()
    }

    /// Surface holding the newest copy of the byte at `addr`, if it is dirty.
    pub fn dirty_owner(&self, addr: PAddr) -> Option<SurfaceHandle<B>> {
        self.dirty_regions.get(addr).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let surfaces = self.surfaces_in(SurfaceInterval::new(0, u32::MAX));
        CacheStats {
            fill_surfaces: surfaces.iter().filter(|surface| surface.borrow().is_fill()).count(),
            surfaces: surfaces.len(),
            dirty_bytes: self.dirty_regions.iter().map(|(interval, _)| interval.len() as u64).sum(),
            cached_pages: self
                .cached_pages
                .iter()
                .map(|(interval, _)| interval.len() as u64)
                .sum(),
            texture_cubes: self.texture_cubes.len(),
            pending_custom_uploads: self.pending_uploads.len(),
            surfaces_created: self.next_id,
        }
    }

    /// Drops every surface, optionally writing dirty data back first.
    #[instrument(level = "trace", skip(self))]
    pub fn clear_all(&mut self, flush: bool) {
        if flush {
            self.flush_all();
        }
        debug!("Clearing surface cache");

        for (pages, _) in self.cached_pages.iter() {
            let (addr, size) = page_span(pages);
            self.memory.mark_region_cached(addr, size, false);
        }
        self.cached_pages.clear();

        for surface in self.surfaces_in(SurfaceInterval::new(0, u32::MAX)) {
            surface.borrow_mut().registered = false;
        }
        self.surface_cache.clear();
        self.dirty_regions.clear();
        self.remove_surfaces.clear();
        self.texture_cubes.clear();
        self.render_targets = RenderTargets::default();
        self.pending_uploads.clear();
    }

    /// Per-frame housekeeping: applies finished custom uploads and reacts to
    /// configuration changes.
    pub fn tick_frame(&mut self, config: &CacheConfig) {
        self.apply_pending_uploads();
        self.custom_textures.tick_frame();

        if self.config.requires_reset(config) {
            debug!("Cache configuration changed: {:?}", config);
            self.config = config.clone();
            self.flush_all();
            self.clear_all(false);
        } else {
            self.config = config.clone();
        }
    }

    fn texture_desc(&self, surface: &Surface<B::Texture>) -> TextureDesc {
        let params = &surface.params;
        match &surface.material {
            Some(material) => TextureDesc {
                format: params.pixel_format,
                custom_format: Some(material.format),
                width: material.width,
                height: material.height,
                res_scale: 1,
                levels: params.levels,
                texture_type: params.texture_type,
                converted: true,
            },
            None => TextureDesc {
                format: params.pixel_format,
                custom_format: None,
                width: params.width,
                height: params.height,
                res_scale: params.res_scale,
                levels: params.levels,
                texture_type: params.texture_type,
                converted: self.backend.needs_conversion(params.pixel_format),
            },
        }
    }

    fn next_surface_id(&mut self) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn create_surface(&mut self, params: SurfaceParams) -> SurfaceHandle<B> {
        let id = self.next_surface_id();
        let mut surface = Surface::new(id, params, None);
        let desc = self.texture_desc(&surface);
        surface.texture = Some(self.backend.create_texture(&desc));
        trace!(
            "Created surface {} {:?} {} {}x{} x{}",
            id,
            params.interval(),
            params.pixel_format,
            params.width,
            params.height,
            params.res_scale
        );
        SurfaceRef::new(surface)
    }

    fn register_surface(&mut self, surface: &SurfaceHandle<B>) {
        let interval = {
            let mut inner = surface.borrow_mut();
            if inner.registered {
                return;
            }
            inner.registered = true;
            inner.interval()
        };
        self.surface_cache.update(interval, |existing| {
            let mut surfaces = existing.cloned().unwrap_or_default();
            surfaces.insert(surface.clone());
            Some(surfaces)
        });
        self.update_pages_cached_count(interval, 1);
    }

    fn unregister_surface(&mut self, surface: &SurfaceHandle<B>) {
        let interval = {
            let mut inner = surface.borrow_mut();
            if !inner.registered {
                return;
            }
            inner.registered = false;
            inner.interval()
        };
        trace!("Unregistering surface {}", surface.id());
        self.update_pages_cached_count(interval, -1);
        self.surface_cache.update(interval, |existing| {
            let mut surfaces = existing?.clone();
            surfaces.remove(surface);
            (!surfaces.is_empty()).then_some(surfaces)
        });
    }

    /// Adjusts the surface count of every page touched by `interval`, telling the
    /// memory system about pages entering or leaving the cache.
    fn update_pages_cached_count(&mut self, interval: SurfaceInterval, delta: i32) {
        if interval.is_empty() {
            return;
        }
        let page_start = interval.start >> PAGE_BITS;
        let page_end = ((interval.end - 1) >> PAGE_BITS) + 1;
        let pages = SurfaceInterval::new(page_start, page_end);

        let add = |map: &mut IntervalMap<i32>| {
            map.update(pages, |count| {
                let count = count.copied().unwrap_or(0) + delta;
                debug_assert!(count >= 0);
                (count != 0).then_some(count)
            })
        };

        if delta > 0 {
            add(&mut self.cached_pages);
        }
        let transitions: Vec<SurfaceInterval> = self
            .cached_pages
            .clipped(pages)
            .filter(|(_, count)| **count == delta.abs())
            .map(|(run, _)| run)
            .collect();
        for run in transitions {
            let (addr, size) = page_span(run);
            self.memory.mark_region_cached(addr, size, delta > 0);
        }
        if delta < 0 {
            add(&mut self.cached_pages);
        }
    }

    /// Moves the content and dirty ownership of `src` into `dst`, which contains it.
    fn duplicate_surface(&mut self, src: &SurfaceHandle<B>, dst: &SurfaceHandle<B>) {
        let (src_interval, src_invalid, blit) = {
            let src_surface = src.borrow();
            let dst_surface = dst.borrow();
            debug_assert!(dst_surface.params.addr <= src_surface.params.addr);
            debug_assert!(dst_surface.params.end >= src_surface.params.end);
            let blit = TextureBlit {
                src_rect: src_surface.host_rect(),
                dst_rect: dst_surface.host_sub_rect(&src_surface.params),
                ..Default::default()
            };
            (src_surface.interval(), src_surface.invalid_regions.clone(), blit)
        };
        self.blit_surfaces(src, dst, &blit);

        {
            let mut dst_surface = dst.borrow_mut();
            dst_surface.invalid_regions.erase(src_interval);
            dst_surface.invalid_regions.union_with(&src_invalid);
        }

        let owned: Vec<SurfaceInterval> = self
            .dirty_regions
            .clipped(src_interval)
            .filter(|(_, owner)| *owner == src)
            .map(|(interval, _)| interval)
            .collect();
        for interval in owned {
            self.dirty_regions.set(interval, dst.clone());
        }
    }

    /// Copies texels between two surfaces, converting and scaling as needed.
    ///
    /// Same-size, same-layout transfers become plain copies. A surface blitting
    /// onto itself goes through a temporary texture.
    fn blit_surfaces(&mut self, src: &SurfaceHandle<B>, dst: &SurfaceHandle<B>, blit: &TextureBlit) -> bool {
        if src == dst {
            let desc = self.texture_desc(&dst.borrow());
            let mut surface = dst.borrow_mut();
            let Some(texture) = surface.texture.as_mut() else {
                return false;
            };
            let mut temp = self.backend.create_texture(&desc);
            let extent = desc.scaled_extent();
            let copy = TextureCopy {
                src_level: blit.src_level,
                src_layer: blit.src_layer,
                dst_level: blit.src_level,
                dst_layer: blit.src_layer,
                extent: crate::backend::Extent {
                    width: (extent.width >> blit.src_level).max(1),
                    height: (extent.height >> blit.src_level).max(1),
                },
                ..Default::default()
            };
            return self.backend.copy_textures(texture, &mut temp, &copy)
                && self.backend.blit_textures(&temp, texture, blit);
        }

        let src_surface = src.borrow();
        let mut dst_surface = dst.borrow_mut();
        let same_layout = src_surface.params.pixel_format == dst_surface.params.pixel_format
            && src_surface.material.as_ref().map(|m| m.format) == dst_surface.material.as_ref().map(|m| m.format);
        let (Some(src_texture), Some(dst_texture)) = (src_surface.texture.as_ref(), dst_surface.texture.as_mut()) else {
            return false;
        };

        let (s, d) = (blit.src_rect, blit.dst_rect);
        let unflipped = s.top >= s.bottom && d.top >= d.bottom;
        if same_layout && unflipped && s.width() == d.width() && s.height() == d.height() {
            let copy = TextureCopy {
                src_level: blit.src_level,
                src_layer: blit.src_layer,
                src_offset: (s.left, s.bottom),
                dst_level: blit.dst_level,
                dst_layer: blit.dst_layer,
                dst_offset: (d.left, d.bottom),
                extent: crate::backend::Extent {
                    width: s.width(),
                    height: s.height(),
                },
            };
            if self.backend.copy_textures(src_texture, dst_texture, &copy) {
                return true;
            }
        }
        self.backend.blit_textures(src_texture, dst_texture, blit)
    }
}

/// Byte range covered by a run of page numbers.
fn page_span(pages: SurfaceInterval) -> (PAddr, u32) {
    let addr = pages.start << PAGE_BITS;
    let size = pages.len().saturating_mul(1 << PAGE_BITS);
    (addr, size)
}

#[cfg(test)]
mod tests;
