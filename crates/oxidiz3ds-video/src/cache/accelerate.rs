//! GPU transfer engine operations performed on host textures.
//!
//! Each entry point returns false when the request cannot be done on the host,
//! in which case the caller falls back to a CPU implementation.

use super::{RasterizerCache, SurfaceHandle};
use crate::backend::{GraphicsBackend, TextureBlit};
use crate::interval::SurfaceInterval;
use crate::matcher::ScaleMatch;
use crate::params::{Rect, SurfaceParams, align_down};
use crate::pixel_format::{SurfaceType, check_formats_blittable};
use crate::regs::{DisplayTransferConfig, MemoryFillConfig, ScalingMode, ScanoutConfig};
use crate::surface::{Surface, SurfaceRef};
use tracing::{debug, instrument, trace};

/// Width and gap of one side of a texture copy, in bytes.
pub(crate) fn copy_geometry(copy_size: u32, width: u32, gap: u32) -> Option<(u32, u32)> {
    let (mut width, mut gap) = (width * 16, gap * 16);
    if width == 0 && gap != 0 {
        return None;
    }
    if gap == 0 || width >= copy_size {
        width = copy_size;
        gap = 0;
    }
    (copy_size % width == 0).then_some((width, gap))
}

impl<B: GraphicsBackend> RasterizerCache<B> {
    /// Performs a texture copy (a raw byte copy with optional gaps) between surfaces.
    #[instrument(level = "trace", skip(self))]
    pub fn accelerate_texture_copy(&mut self, config: &DisplayTransferConfig) -> bool {
        let copy = &config.texture_copy;
        let copy_size = align_down(copy.size, 16);
        if copy_size == 0 {
            return false;
        }
        let Some((input_width, input_gap)) = copy_geometry(copy_size, copy.input_width, copy.input_gap) else {
            return false;
        };
        let Some((output_width, output_gap)) = copy_geometry(copy_size, copy.output_width, copy.output_gap) else {
            return false;
        };

        let height = copy_size / input_width;
        let stride = input_width + input_gap;
        let src_size = (height - 1) * stride + input_width;
        let src_params = SurfaceParams {
            addr: config.input_address,
            width: input_width,
            stride,
            height,
            size: src_size,
            end: config.input_address.saturating_add(src_size),
            ..Default::default()
        };

        let Some((src_surface, src_rect)) = self.get_tex_copy_surface(&src_params) else {
            return false;
        };
        let src = src_surface.params();
        if src_surface.borrow().is_custom() {
            return false;
        }

        let tiled_size = if src.is_tiled { 8 } else { 1 };
        let src_width = src_rect.width() / src.res_scale as u32;
        if output_gap != 0
            && (output_width != src.bytes_in_pixels(src_width) * tiled_size
                || output_gap % src.bytes_in_pixels(tiled_size * tiled_size).max(1) != 0)
        {
            return false;
        }

        let mut dst_params = src;
        dst_params.addr = config.output_address;
        dst_params.width = src_width;
        dst_params.stride = src_width + src.pixels_in_bytes(if src.is_tiled { output_gap / 8 } else { output_gap });
        dst_params.height = src_rect.height() / src.res_scale as u32;
        dst_params.levels = 1;
        dst_params.update_params();

        // The gap gets invalidated along with the copy, so it has to be loaded first
        let load_gap = output_gap != 0;
        let Some((dst_surface, dst_rect)) = self.get_surface_sub_rect(&dst_params, ScaleMatch::Upscale, load_gap) else {
            return false;
        };
        let dst = dst_surface.params();
        if dst.surface_type == SurfaceType::Texture || !check_formats_blittable(src.pixel_format, dst.pixel_format) {
            return false;
        }
        debug_assert_eq!(src_rect.width() / src.res_scale as u32, dst_rect.width() / dst.res_scale as u32);

        trace!(
            "Texture copy {:#010X} -> {:#010X} ({} bytes)",
            config.input_address, config.output_address, copy_size
        );
        let blit = TextureBlit {
            src_rect,
            dst_rect,
            ..Default::default()
        };
        self.blit_surfaces(&src_surface, &dst_surface, &blit);
        self.invalidate_region(dst_params.addr, dst_params.size, Some(&dst_surface));
        true
    }

    /// Performs a display transfer: a format converting, optionally downscaling
    /// and flipping blit.
    #[instrument(level = "trace", skip(self))]
    pub fn accelerate_display_transfer(&mut self, config: &DisplayTransferConfig) -> bool {
        let src_params = SurfaceParams {
            addr: config.input_address,
            width: config.output_width,
            stride: config.input_width,
            height: config.output_height,
            is_tiled: !config.input_linear,
            pixel_format: config.input_pixel_format(),
            ..Default::default()
        }
        .updated();

        let mut dst_params = SurfaceParams {
            addr: config.output_address,
            width: match config.scaling {
                ScalingMode::None => config.output_width,
                ScalingMode::X | ScalingMode::XY => config.output_width / 2,
            },
            height: match config.scaling {
                ScalingMode::XY => config.output_height / 2,
                ScalingMode::None | ScalingMode::X => config.output_height,
            },
            is_tiled: config.input_linear != config.dont_swizzle,
            pixel_format: config.output_pixel_format(),
            ..Default::default()
        }
        .updated();

        let Some((src_surface, mut src_rect)) = self.get_surface_sub_rect(&src_params, ScaleMatch::Ignore, true) else {
            return false;
        };

        dst_params.res_scale = src_surface.params().res_scale;
        let Some((dst_surface, dst_rect)) = self.get_surface_sub_rect(&dst_params, ScaleMatch::Upscale, false) else {
            return false;
        };

        let (src, dst) = (src_surface.params(), dst_surface.params());
        if src.is_tiled != dst.is_tiled {
            src_rect = src_rect.flipped();
        }
        if config.flip_vertically {
            src_rect = src_rect.flipped();
        }
        if !check_formats_blittable(src.pixel_format, dst.pixel_format) {
            debug!(
                "Display transfer between {} and {} is not blittable",
                src.pixel_format, dst.pixel_format
            );
            return false;
        }

        let blit = TextureBlit {
            src_rect,
            dst_rect,
            ..Default::default()
        };
        self.blit_surfaces(&src_surface, &dst_surface, &blit);
        self.invalidate_region(dst_params.addr, dst_params.size, Some(&dst_surface));
        true
    }

    /// Records a memory fill as a fill surface that owns the filled range.
    #[instrument(level = "trace", skip(self))]
    pub fn accelerate_fill(&mut self, config: &MemoryFillConfig) -> bool {
        if config.end <= config.start {
            return false;
        }
        let interval = SurfaceInterval::new(config.start, config.end);
        let params = SurfaceParams {
            addr: interval.start,
            end: interval.end,
            size: interval.len(),
            ..Default::default()
        };
        let id = self.next_surface_id();
        let surface = SurfaceRef::new(Surface::new_fill(id, params, config.fill_data(), config.fill_size()));
        trace!("Fill surface {} over {:?} ({} byte pattern)", id, interval, config.fill_size());

        self.register_surface(&surface);
        self.invalidate_region(interval.start, interval.len(), Some(&surface));
        true
    }

    /// Surface holding the framebuffer a screen scans out, with the rectangle of
    /// the framebuffer inside it.
    pub fn accelerate_display(&mut self, config: &ScanoutConfig, right_eye: bool) -> Option<(SurfaceHandle<B>, Rect)> {
        let addr = if right_eye { config.address_right } else { config.address_left };
        if addr == 0 {
            return None;
        }
        let pixel_format = config.pixel_format();
        let pixel_stride = config.stride / pixel_format.bytes_per_pixel().max(1);

        let params = SurfaceParams {
            addr,
            width: config.width.min(pixel_stride),
            height: config.height,
            stride: pixel_stride,
            pixel_format,
            ..Default::default()
        }
        .updated();
        self.get_surface_sub_rect(&params, ScaleMatch::Ignore, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_geometry() {
        assert_eq!(copy_geometry(256, 0, 0), Some((256, 0)));
        assert_eq!(copy_geometry(256, 4, 2), Some((64, 32)));
        assert_eq!(copy_geometry(256, 0, 2), None);
        assert_eq!(copy_geometry(256, 3, 1), None);
        assert_eq!(copy_geometry(256, 32, 1), Some((256, 0)));
    }
}
