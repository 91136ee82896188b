//! Surface descriptors and the sub-rectangle arithmetic between guest memory
//! ranges and texture coordinates.
//!
//! Rectangles use a bottom-left origin. Linear surfaces place the lowest
//! address on the bottom row, while tiled surfaces place the first tile row at
//! the top, which matches how the PICA samples them. A "flipped" rectangle has
//! `top < bottom`.

use crate::interval::{PAddr, SurfaceInterval};
use crate::pixel_format::{PixelFormat, SurfaceType};

/// Maximum number of mip levels a PICA texture can have
pub const MAX_LEVELS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    #[default]
    Texture2D,
    CubeMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn width(&self) -> u32 {
        self.right.abs_diff(self.left)
    }

    pub const fn height(&self) -> u32 {
        self.top.abs_diff(self.bottom)
    }

    pub const fn scaled(&self, scale: u32) -> Rect {
        Rect::new(
            self.left * scale,
            self.top * scale,
            self.right * scale,
            self.bottom * scale,
        )
    }

    /// Same rectangle with its vertical direction reversed.
    pub const fn flipped(&self) -> Rect {
        Rect::new(self.left, self.bottom, self.right, self.top)
    }
}

pub(crate) const fn align_down(value: u32, align: u32) -> u32 {
    value / align * align
}

pub(crate) const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Describes a rectangular, possibly mipmapped region of guest memory.
///
/// Callers fill in the base fields and then call [`SurfaceParams::update_params`]
/// (or [`SurfaceParams::updated`]) to derive `size`, `end`, `surface_type` and
/// the mip offsets. `stride` is in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceParams {
    pub addr: PAddr,
    pub end: PAddr,
    pub size: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub levels: u32,
    pub res_scale: u16,
    pub is_tiled: bool,
    pub texture_type: TextureType,
    pub pixel_format: PixelFormat,
    pub surface_type: SurfaceType,
    pub mipmap_offsets: [PAddr; MAX_LEVELS],
}

impl Default for SurfaceParams {
    fn default() -> Self {
        Self {
            addr: 0,
            end: 0,
            size: 0,
            width: 0,
            height: 0,
            stride: 0,
            levels: 1,
            res_scale: 1,
            is_tiled: false,
            texture_type: TextureType::Texture2D,
            pixel_format: PixelFormat::Invalid,
            surface_type: SurfaceType::Invalid,
            mipmap_offsets: [0; MAX_LEVELS],
        }
    }
}

impl SurfaceParams {
    /// Recomputes the derived fields from addr, dimensions, format and levels.
    pub fn update_params(&mut self) {
        if self.stride == 0 {
            self.stride = self.width;
        }
        self.surface_type = self.pixel_format.surface_type();
        self.levels = self.levels.clamp(1, MAX_LEVELS as u32);

        if self.levels != 1 {
            debug_assert_eq!(self.stride, self.width, "mipmapped surfaces cannot have gaps");
            self.calculate_mip_level_offsets();
            self.size = self.calculate_surface_size();
        } else {
            self.mipmap_offsets[0] = self.addr;
            self.size = if self.height == 0 || self.width == 0 {
                0
            } else if !self.is_tiled {
                self.bytes_in_pixels(self.stride * (self.height - 1) + self.width)
            } else {
                self.bytes_in_pixels(
                    self.stride * 8 * (self.height / 8).saturating_sub(1) + self.width * 8,
                )
            };
        }
        self.end = self.addr.saturating_add(self.size);
    }

    /// By-value form of [`SurfaceParams::update_params`].
    pub fn updated(mut self) -> Self {
        self.update_params();
        self
    }

    pub const fn interval(&self) -> SurfaceInterval {
        SurfaceInterval::new(self.addr, self.end)
    }

    pub const fn bpp(&self) -> u32 {
        self.pixel_format.bpp()
    }

    pub const fn bytes_in_pixels(&self, pixels: u32) -> u32 {
        pixels * self.bpp() / 8
    }

    pub const fn pixels_in_bytes(&self, bytes: u32) -> u32 {
        match self.bpp() {
            0 => 0,
            bpp => bytes * 8 / bpp,
        }
    }

    pub const fn scaled_width(&self) -> u32 {
        self.width * self.res_scale as u32
    }

    pub const fn scaled_height(&self) -> u32 {
        self.height * self.res_scale as u32
    }

    pub const fn rect(&self) -> Rect {
        Rect::new(0, self.height, self.width, 0)
    }

    pub const fn scaled_rect(&self) -> Rect {
        Rect::new(0, self.scaled_height(), self.scaled_width(), 0)
    }

    /// Whether `other` describes exactly this region and format.
    ///
    /// Resolution scale is deliberately left to the caller's scale policy.
    pub fn exact_match(&self, other: &SurfaceParams) -> bool {
        (other.addr, other.width, other.height, other.stride, other.pixel_format, other.is_tiled)
            == (self.addr, self.width, self.height, self.stride, self.pixel_format, self.is_tiled)
            && self.pixel_format.is_valid()
            && self.levels >= other.levels
    }

    /// Whether `sub` is a rectangle inside one level of this surface.
    pub fn can_sub_rect(&self, sub: &SurfaceParams) -> bool {
        let level = self.level_of(sub.addr);
        sub.addr >= self.addr
            && sub.end <= self.end
            && sub.pixel_format == self.pixel_format
            && self.pixel_format.is_valid()
            && sub.is_tiled == self.is_tiled
            && (sub.addr - self.mipmap_offsets[level as usize])
                % self.bytes_in_pixels(if self.is_tiled { 64 } else { 1 }).max(1)
                == 0
            && (sub.stride == (self.stride >> level) || sub.height <= if self.is_tiled { 8 } else { 1 })
            && self.sub_rect(sub).right <= self.stride
    }

    /// Whether this surface could be grown to also cover `expanded`.
    pub fn can_expand(&self, expanded: &SurfaceParams) -> bool {
        let row_bytes = self.bytes_in_pixels(self.stride * if self.is_tiled { 8 } else { 1 });
        self.pixel_format.is_valid()
            && self.pixel_format == expanded.pixel_format
            && self.addr <= expanded.end
            && expanded.addr <= self.end
            && self.is_tiled == expanded.is_tiled
            && self.stride == expanded.stride
            && row_bytes != 0
            && (self.addr.max(expanded.addr) - self.addr.min(expanded.addr)) % row_bytes == 0
    }

    /// Whether a raw byte copy described by `texcopy` (width and stride in bytes)
    /// maps onto whole pixels or tiles of this surface.
    pub fn can_tex_copy(&self, texcopy: &SurfaceParams) -> bool {
        let copy_interval = texcopy.interval();
        if !self.pixel_format.is_valid() || self.addr > texcopy.addr || self.end < texcopy.end {
            return false;
        }

        if texcopy.width != texcopy.stride {
            let tile_stride = self.bytes_in_pixels(self.stride * if self.is_tiled { 8 } else { 1 });
            let tile_bytes = self.bytes_in_pixels(if self.is_tiled { 64 } else { 1 }).max(1);
            if tile_stride == 0 {
                return false;
            }
            return (texcopy.addr - self.addr) % tile_bytes == 0
                && texcopy.width % tile_bytes == 0
                && (texcopy.height == 1 || texcopy.stride == tile_stride)
                && ((texcopy.addr - self.addr) % tile_stride) + texcopy.width <= tile_stride;
        }

        let target_level = self.level_of(texcopy.addr);
        if self.level_interval(target_level).intersect(&copy_interval) != copy_interval {
            return false;
        }

        self.from_interval(copy_interval).interval() == copy_interval
    }

    /// Unscaled rectangle of `sub` inside this surface.
    pub fn sub_rect(&self, sub: &SurfaceParams) -> Rect {
        let level = self.level_of(sub.addr);
        let begin_pixel_index =
            self.pixels_in_bytes(sub.addr.saturating_sub(self.mipmap_offsets[level as usize]));
        debug_assert!(self.stride == self.width || level == 0);

        let stride_lod = (self.stride >> level).max(1);
        if self.is_tiled {
            let x0 = (begin_pixel_index % (stride_lod * 8)) / 8;
            let y0 = (begin_pixel_index / (stride_lod * 8)) * 8;
            let height_lod = self.height >> level;
            return Rect::new(
                x0,
                height_lod.saturating_sub(y0),
                x0 + sub.width,
                height_lod.saturating_sub(y0 + sub.height),
            );
        }

        let x0 = begin_pixel_index % stride_lod;
        let y0 = begin_pixel_index / stride_lod;
        Rect::new(x0, y0 + sub.height, x0 + sub.width, y0)
    }

    pub fn scaled_sub_rect(&self, sub: &SurfaceParams) -> Rect {
        self.sub_rect(sub).scaled(self.res_scale as u32)
    }

    /// Smallest single-level rectangle of this surface covering `interval`.
    ///
    /// An interval inside one row (or tile row) becomes a one-row rectangle of
    /// just the touched pixels; anything larger is widened to whole rows.
    pub fn from_interval(&self, interval: SurfaceInterval) -> SurfaceParams {
        let mut params = *self;
        let level = self.level_of(interval.start);
        debug_assert!({
            let end_addr = interval.end;
            level == self.level_of(end_addr)
                || end_addr == self.end
                || self.mipmap_offsets.get(level as usize + 1) == Some(&end_addr)
        });

        params.width >>= level;
        params.stride >>= level;

        let tiled_size = if self.is_tiled { 8 } else { 1 };
        let stride_tiled_bytes = params.bytes_in_pixels(params.stride * tiled_size).max(1);

        let start = self.mipmap_offsets[level as usize];
        let mut aligned_start = start + align_down(interval.start - start, stride_tiled_bytes);
        let mut aligned_end = start + align_up(interval.end - start, stride_tiled_bytes);

        if aligned_end - aligned_start > stride_tiled_bytes {
            params.addr = aligned_start;
            params.height = (aligned_end - aligned_start) / params.bytes_in_pixels(params.stride).max(1);
        } else {
            let tiled_alignment = params.bytes_in_pixels(if self.is_tiled { 64 } else { 1 }).max(1);
            aligned_start = start + align_down(interval.start - start, tiled_alignment);
            aligned_end = start + align_up(interval.end - start, tiled_alignment);

            params.addr = aligned_start;
            params.width = params.pixels_in_bytes(aligned_end - aligned_start) / tiled_size;
            params.stride = params.width;
            params.height = tiled_size;
        }

        params.levels = 1;
        params.update_params();
        params
    }

    /// Memory interval backing an unscaled rectangle of `level`.
    pub fn sub_rect_interval(&self, mut rect: Rect, level: u32) -> SurfaceInterval {
        if rect.height() == 0 || rect.width() == 0 {
            return SurfaceInterval::default();
        }

        if self.is_tiled {
            rect.left = align_down(rect.left, 8) * 8;
            rect.bottom = align_down(rect.bottom, 8) / 8;
            rect.right = align_up(rect.right, 8) * 8;
            rect.top = align_up(rect.top, 8) / 8;
        }

        let stride_tiled = (if self.is_tiled { self.stride * 8 } else { self.stride }) >> level;
        let pixels = (rect.height() - 1) * stride_tiled + rect.width();
        let row = if self.is_tiled {
            (self.height / 8).saturating_sub(rect.top)
        } else {
            rect.bottom
        };
        let pixel_offset = stride_tiled * row + rect.left;

        let start = self.mipmap_offsets[level as usize];
        SurfaceInterval::new(
            start + self.bytes_in_pixels(pixel_offset),
            start + self.bytes_in_pixels(pixel_offset + pixels),
        )
    }

    fn calculate_mip_level_offsets(&mut self) {
        let mut level_width = self.width;
        let mut level_height = self.height;
        let mut offset = self.addr;

        for level in 0..self.levels as usize {
            self.mipmap_offsets[level] = offset;
            offset += self.bytes_in_pixels(level_width * level_height);
            level_width >>= 1;
            level_height >>= 1;
        }
    }

    fn calculate_surface_size(&self) -> u32 {
        (0..self.levels)
            .map(|level| self.bytes_in_pixels((self.width >> level) * (self.height >> level)))
            .sum()
    }

    /// Address range of one mip level.
    pub fn level_interval(&self, level: u32) -> SurfaceInterval {
        debug_assert!(level < self.levels);
        let start = self.mipmap_offsets[level as usize];
        let end = if level + 1 >= self.levels {
            self.end
        } else {
            self.mipmap_offsets[level as usize + 1]
        };
        SurfaceInterval::new(start, end)
    }

    /// Mip level containing `addr`, 0 when outside the surface.
    pub fn level_of(&self, addr: PAddr) -> u32 {
        if addr < self.addr || addr > self.end {
            return 0;
        }
        let mut level = self.levels.saturating_sub(1);
        while level > 0 && self.mipmap_offsets[level as usize] > addr {
            level -= 1;
        }
        level
    }
}
