//! Cache entries and the shared handle through which the cache, the dirty
//! region map, render targets and texture cubes refer to them.

use crate::backend::{ClearValue, Extent};
use crate::codec;
use crate::custom_tex::Material;
use crate::interval::{IntervalSet, PAddr, SurfaceInterval};
use crate::params::{Rect, SurfaceParams, align_down, align_up};
use crate::pixel_format::{PixelFormat, SurfaceType};
use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// Creation order of a surface. Never reused within one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Surface<T> {
    pub id: SurfaceId,
    pub params: SurfaceParams,
    /// Host texture, absent for fill surfaces.
    pub texture: Option<T>,
    pub invalid_regions: IntervalSet,
    pub fill_data: [u8; 4],
    pub fill_size: u32,
    pub registered: bool,
    pub modification_tick: u64,
    pub material: Option<Arc<Material>>,
}

impl<T> Surface<T> {
    /// A new surface with every byte invalid.
    pub fn new(id: SurfaceId, params: SurfaceParams, texture: Option<T>) -> Self {
        Self {
            id,
            params,
            texture,
            invalid_regions: IntervalSet::from_interval(params.interval()),
            fill_data: [0; 4],
            fill_size: 0,
            registered: false,
            modification_tick: 0,
            material: None,
        }
    }

    /// A fully valid surface that repeats `fill_data[..fill_size]` over its range.
    pub fn new_fill(id: SurfaceId, mut params: SurfaceParams, fill_data: [u8; 4], fill_size: u32) -> Self {
        assert!((1..=4).contains(&fill_size), "fill pattern of {fill_size} bytes");
        params.surface_type = SurfaceType::Fill;
        params.res_scale = u16::MAX;
        Self {
            id,
            params,
            texture: None,
            invalid_regions: IntervalSet::new(),
            fill_data,
            fill_size,
            registered: false,
            modification_tick: 0,
            material: None,
        }
    }

    pub fn interval(&self) -> SurfaceInterval {
        self.params.interval()
    }

    pub fn is_fill(&self) -> bool {
        self.params.surface_type == SurfaceType::Fill
    }

    pub fn is_custom(&self) -> bool {
        self.material.is_some()
    }

    pub fn is_region_valid(&self, interval: SurfaceInterval) -> bool {
        !self.invalid_regions.intersects(interval)
    }

    pub fn is_fully_invalid(&self) -> bool {
        self.invalid_regions.covers(self.interval())
    }

    pub fn mark_valid(&mut self, interval: SurfaceInterval) {
        self.invalid_regions.erase(interval);
        self.modification_tick += 1;
    }

    pub fn mark_invalid(&mut self, interval: SurfaceInterval) {
        let clipped = interval.intersect(&self.interval());
        if !clipped.is_empty() {
            self.invalid_regions.insert(clipped);
        }
        self.modification_tick += 1;
    }

    /// Texture extent, taking the custom material size into account.
    pub fn real_extent(&self, scaled: bool) -> Extent {
        match &self.material {
            Some(material) => Extent {
                width: material.width,
                height: material.height,
            },
            None if scaled => Extent {
                width: self.params.scaled_width(),
                height: self.params.scaled_height(),
            },
            None => Extent {
                width: self.params.width,
                height: self.params.height,
            },
        }
    }

    /// Rectangle of `sub` in host texels of this surface's texture.
    ///
    /// Custom surfaces are scaled by the material size instead of `res_scale`.
    pub fn host_sub_rect(&self, sub: &SurfaceParams) -> Rect {
        match &self.material {
            Some(material) => {
                let ratio = (material.width / self.params.width.max(1)).max(1);
                self.params.sub_rect(sub).scaled(ratio)
            }
            None => self.params.scaled_sub_rect(sub),
        }
    }

    pub fn host_rect(&self) -> Rect {
        let extent = self.real_extent(true);
        Rect::new(0, extent.height, extent.width, 0)
    }

    /// Whether this fill surface can produce `dest`'s bytes over `fill_interval`.
    ///
    /// The pattern has to repeat on pixel boundaries of the destination format.
    pub fn can_fill(&self, dest: &SurfaceParams, fill_interval: SurfaceInterval) -> bool {
        if !self.is_fill()
            || !self.is_region_valid(fill_interval)
            || fill_interval.start < self.params.addr
            || fill_interval.end > self.params.end
            || dest.from_interval(fill_interval).interval() != fill_interval
        {
            return false;
        }

        let fill_size = self.fill_size as usize;
        if fill_size * 8 == dest.bpp() as usize {
            return true;
        }

        let dest_bytes = (dest.bpp() as usize / 8).max(1);
        let mut fill_test = vec![0u8; fill_size * dest_bytes];
        for chunk in fill_test.chunks_exact_mut(fill_size) {
            chunk.copy_from_slice(&self.fill_data[..fill_size]);
        }
        let first = &fill_test[..dest_bytes];
        if (0..fill_size).any(|i| &fill_test[dest_bytes * i..dest_bytes * (i + 1)] != first) {
            return false;
        }

        !(dest.bpp() == 4 && (fill_test[0] & 0xF) != (fill_test[0] >> 4))
    }

    /// Whether `copy_interval` of `dest` can be sourced from this surface.
    pub fn can_copy(&self, dest: &SurfaceParams, copy_interval: SurfaceInterval) -> bool {
        let subrect_params = dest.from_interval(copy_interval);
        debug_assert_eq!(subrect_params.interval(), copy_interval);
        self.params.can_sub_rect(&subrect_params) || self.can_fill(dest, copy_interval)
    }

    /// Largest rectangle-shaped valid interval of this surface inside `params`.
    pub fn copyable_interval(&self, params: &SurfaceParams) -> SurfaceInterval {
        let mut result = SurfaceInterval::default();
        let tile_align = params.bytes_in_pixels(if params.is_tiled { 64 } else { 1 }).max(1);
        let stride_bytes = (params.bytes_in_pixels(params.stride) * if params.is_tiled { 8 } else { 1 }).max(1);

        let mut valid_regions = IntervalSet::from_interval(params.interval().intersect(&self.interval()));
        valid_regions.subtract_regions(&self.invalid_regions);

        for valid in valid_regions.intervals() {
            let aligned_start = params.addr + align_up(valid.start - params.addr, tile_align);
            let aligned_end = params.addr + align_down(valid.end - params.addr, tile_align);
            if tile_align > valid.len() || aligned_end <= aligned_start {
                continue;
            }
            let aligned = SurfaceInterval::new(aligned_start, aligned_end);

            let rect_start = params.addr + align_up(aligned.start - params.addr, stride_bytes);
            let rect_end = params.addr + align_down(aligned.end - params.addr, stride_bytes);

            let rect_interval = match rect_start.cmp(&rect_end) {
                // Inside a single row
                Ordering::Greater => aligned,
                // Two partial rows, keep the longer one
                Ordering::Equal => {
                    let row1 = SurfaceInterval::new(aligned.start, rect_start);
                    let row2 = SurfaceInterval::new(rect_start, aligned.end);
                    if row1.len() > row2.len() { row1 } else { row2 }
                }
                Ordering::Less => SurfaceInterval::new(rect_start, rect_end),
            };

            if rect_interval.len() > result.len() {
                result = rect_interval;
            }
        }
        result
    }

    /// Four bytes of the fill pattern starting at `copy_addr`.
    pub fn fill_buffer(&self, copy_addr: PAddr) -> [u8; 4] {
        let fill_size = self.fill_size.max(1);
        let fill_offset = (copy_addr - self.params.addr) % fill_size;
        std::array::from_fn(|i| self.fill_data[((fill_offset + i as u32) % fill_size) as usize])
    }

    /// Clear value reproducing the fill pattern at `copy_addr` in `dst_format`.
    pub fn clear_value(&self, copy_addr: PAddr, dst_format: PixelFormat) -> ClearValue {
        let raw = self.fill_buffer(copy_addr);
        let mut value = ClearValue {
            raw,
            ..Default::default()
        };
        match dst_format.surface_type() {
            SurfaceType::Color | SurfaceType::Texture | SurfaceType::Fill => {
                value.color = codec::decode_pixel(dst_format, &raw);
            }
            SurfaceType::Depth => {
                let depth = u32::from_le_bytes(raw);
                value.depth = match dst_format {
                    PixelFormat::D16 => (depth & 0xFFFF) as f32 / 65535.0,
                    _ => (depth & 0xFF_FFFF) as f32 / 16_777_215.0,
                };
            }
            SurfaceType::DepthStencil => {
                let packed = u32::from_le_bytes(raw);
                value.depth = (packed & 0xFF_FFFF) as f32 / 16_777_215.0;
                value.stencil = (packed >> 24) as u8;
            }
            SurfaceType::Invalid => debug_assert!(false, "clear value for an invalid format"),
        }
        value
    }
}

/// Shared handle to a cache entry. Equality, ordering and hashing use the id.
pub struct SurfaceRef<T> {
    id: SurfaceId,
    inner: Rc<RefCell<Surface<T>>>,
}

impl<T> SurfaceRef<T> {
    pub fn new(surface: Surface<T>) -> Self {
        Self {
            id: surface.id,
            inner: Rc::new(RefCell::new(surface)),
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, Surface<T>> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Surface<T>> {
        self.inner.borrow_mut()
    }

    /// Snapshot of the surface parameters.
    pub fn params(&self) -> SurfaceParams {
        self.inner.borrow().params
    }

    /// Number of live handles, including this one.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<T> Clone for SurfaceRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for SurfaceRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for SurfaceRef<T> {}

impl<T> PartialOrd for SurfaceRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SurfaceRef<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for SurfaceRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for SurfaceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(surface) => write!(
                f,
                "Surface{}({:?} {} {}x{} x{})",
                self.id,
                surface.interval(),
                surface.params.pixel_format,
                surface.params.width,
                surface.params.height,
                surface.params.res_scale
            ),
            Err(_) => write!(f, "Surface{}(borrowed)", self.id),
        }
    }
}
