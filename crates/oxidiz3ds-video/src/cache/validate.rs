//! Making surface ranges valid: copy from other surfaces, reinterpret surfaces
//! of another format, or upload from guest memory.

use super::{PendingUpload, RasterizerCache, SurfaceHandle};
use crate::backend::{BufferTextureCopy, GraphicsBackend, TextureBlit, TextureClear};
use crate::codec;
use crate::custom_tex::{DecodeState, Material, compute_hash};
use crate::interval::{IntervalSet, PAddr, SurfaceInterval};
use crate::matcher::{MatchFlags, ScaleMatch};
use crate::params::SurfaceParams;
use crate::pixel_format::PixelFormat;
use std::sync::Arc;
use tracing::{debug, error, instrument, trace, warn};

impl<B: GraphicsBackend> RasterizerCache<B> {
    /// Makes `[addr, addr + size)` of `surface` match guest memory.
    #[instrument(level = "trace", skip(self))]
    pub fn validate_surface(&mut self, surface: &SurfaceHandle<B>, addr: PAddr, size: u32) {
        if size == 0 || surface.borrow().is_fill() {
            return;
        }
        let surface_params = surface.params();
        let validate_interval = SurfaceInterval::from_size(addr, size).intersect(&surface_params.interval());
        let mut validate_regions = surface.borrow().invalid_regions.intersection(validate_interval);

        let mut level = surface_params.level_of(validate_interval.start);
        let mut level_interval = surface_params.level_interval(level);

        while let Some(region) = validate_regions.first() {
            let interval = region.intersect(&level_interval);
            if interval.is_empty() {
                level += 1;
                if level >= surface_params.levels {
                    break;
                }
                level_interval = surface_params.level_interval(level);
                continue;
            }

            let params = surface_params.from_interval(interval);

            if let Some(source) = self.find_match(&params, MatchFlags::COPY, ScaleMatch::Ignore, Some(interval)) {
                let copy_interval = source.borrow().copyable_interval(&params);
                self.copy_surface(&source, surface, copy_interval);
                mark_validated(surface, &mut validate_regions, copy_interval);
                continue;
            }

            if let Some(copied) = self.validate_by_reinterpretation(surface, &params, interval) {
                mark_validated(surface, &mut validate_regions, copied);
                continue;
            }

            // Data written by the GPU in a format nothing can convert from.
            if self.no_unimplemented_reinterpretations(surface, &params, interval)
                && self.dirty_regions.covers(interval)
            {
                debug!(
                    "Region {:?} of surface {} was created on the GPU in an unknown format, skipping",
                    interval,
                    surface.id()
                );
                validate_regions.erase(interval);
                continue;
            }

            self.flush_region(params.addr, params.size, None);
            self.upload_surface(surface, interval);
            mark_validated(surface, &mut validate_regions, params.interval());
        }

        // Filtered mipmaps of upscaled surfaces look better rebuilt from the base level
        if surface_params.res_scale != 1 && level != 0 {
            self.generate_mipmaps(surface);
        }
    }

    fn generate_mipmaps(&mut self, surface: &SurfaceHandle<B>) {
        let mut surface = surface.borrow_mut();
        let max_level = surface.params.levels - 1;
        if max_level == 0 {
            return;
        }
        if let Some(texture) = surface.texture.as_mut() {
            self.backend.generate_mipmaps(texture, max_level);
        }
    }

    /// Copies `copy_interval` from `src` into `dst`, clearing when `src` is a fill.
    fn copy_surface(&mut self, src: &SurfaceHandle<B>, dst: &SurfaceHandle<B>, copy_interval: SurfaceInterval) {
        debug_assert!(src != dst);
        let (subrect_params, dst_rect, dst_level, dst_format) = {
            let dst_surface = dst.borrow();
            let subrect_params = dst_surface.params.from_interval(copy_interval);
            debug_assert_eq!(subrect_params.interval(), copy_interval);
            (
                subrect_params,
                dst_surface.host_sub_rect(&subrect_params),
                dst_surface.params.level_of(copy_interval.start),
                dst_surface.params.pixel_format,
            )
        };
        trace!("Copying {:?} from surface {} to {}", copy_interval, src.id(), dst.id());

        if src.borrow().is_fill() {
            let clear = TextureClear {
                level: dst_level,
                rect: dst_rect,
                value: src.borrow().clear_value(copy_interval.start, dst_format),
            };
            if let Some(texture) = dst.borrow_mut().texture.as_mut() {
                self.backend.clear_texture(texture, &clear);
            }
            return;
        }

        let (src_rect, src_level) = {
            let src_surface = src.borrow();
            (
                src_surface.host_sub_rect(&subrect_params),
                src_surface.params.level_of(copy_interval.start),
            )
        };
        let blit = TextureBlit {
            src_level,
            src_rect,
            dst_level,
            dst_rect,
            ..Default::default()
        };
        self.blit_surfaces(src, dst, &blit);
    }

    /// Sources `interval` from a surface of another format with the same bit width.
    /// Returns the interval that was filled in.
    fn validate_by_reinterpretation(
        &mut self,
        surface: &SurfaceHandle<B>,
        params: &SurfaceParams,
        interval: SurfaceInterval,
    ) -> Option<SurfaceInterval> {
        let dst_format = params.pixel_format;
        let sources = self.backend.possible_reinterpretations(dst_format).to_vec();

        for src_format in sources {
            let find_params = SurfaceParams {
                pixel_format: src_format,
                ..*params
            };
            let Some(source) = self.find_match(&find_params, MatchFlags::COPY, ScaleMatch::Ignore, Some(interval))
            else {
                continue;
            };
            if source.borrow().is_fill() || source.borrow().is_custom() {
                continue;
            }

            let copy_interval = source.borrow().copyable_interval(&find_params);
            if copy_interval.intersect(&interval).is_empty() {
                continue;
            }
            let reinterpret_params = surface.borrow().params.from_interval(copy_interval);
            let src_rect = source.borrow().params.scaled_sub_rect(&reinterpret_params);
            let dst_rect = surface.borrow().host_sub_rect(&reinterpret_params);

            debug!(
                "Reinterpreting {:?} of surface {} from {} to {}",
                copy_interval,
                source.id(),
                src_format,
                dst_format
            );
            let src_surface = source.borrow();
            let mut dst_surface = surface.borrow_mut();
            let (Some(src_texture), Some(dst_texture)) = (src_surface.texture.as_ref(), dst_surface.texture.as_mut())
            else {
                continue;
            };
            if self
                .backend
                .reinterpret(src_texture, src_format, src_rect, dst_texture, dst_rect)
            {
                return Some(copy_interval);
            }
        }
        None
    }

    /// Returns false when some surface of another format with the same bit width
    /// could have supplied `interval` if a reinterpreter existed.
    fn no_unimplemented_reinterpretations(
        &self,
        surface: &SurfaceHandle<B>,
        params: &SurfaceParams,
        interval: SurfaceInterval,
    ) -> bool {
        let dst_format = params.pixel_format;
        let mut implemented = true;
        for format in PixelFormat::ALL {
            if format == dst_format || format.bpp() != dst_format.bpp() {
                continue;
            }
            let find_params = SurfaceParams {
                pixel_format: format,
                ..*params
            };
            if self
                .find_match(&find_params, MatchFlags::COPY, ScaleMatch::Ignore, Some(interval))
                .is_some_and(|candidate| candidate != *surface)
            {
                warn!("Missing pixel format reinterpreter: {} -> {}", format, dst_format);
                implemented = false;
            }
        }
        implemented
    }

    /// Loads `interval` of `surface` from guest memory.
    fn upload_surface(&mut self, surface: &SurfaceHandle<B>, interval: SurfaceInterval) {
        let surface_params = surface.params();
        let load_info = surface_params.from_interval(interval);
        debug_assert!(load_info.addr >= surface_params.addr && load_info.end <= surface_params.end);
        let level = surface_params.level_of(load_info.addr);

        let Some(mapped) = self.memory.physical_ref(load_info.addr) else {
            debug!("Skipping upload of unmapped range {:?}", load_info.interval());
            return;
        };
        let len = (load_info.size as usize).min(mapped.len());
        let source = mapped[..len].to_vec();

        let use_custom = self.config.use_custom_textures && surface_params.is_tiled;
        if self.config.dump_textures || use_custom {
            let hash = self.compute_hash(&load_info, &source);
            if self.config.dump_textures && !surface.borrow().is_custom() {
                self.custom_textures.dump_texture(&load_info, level, &source, hash);
            }
            if use_custom && self.upload_custom_surface(surface, &load_info, hash) {
                return;
            }
        }

        let format = surface_params.pixel_format;
        let converted = self.backend.needs_conversion(format);
        let staging_size = (load_info.width * load_info.height * codec::host_bytes_per_pixel(format, converted)) as usize;
        let mut staging = self.backend.find_staging(staging_size, true);
        codec::decode_texture(
            &load_info,
            load_info.addr,
            load_info.end,
            &source,
            &mut staging.data,
            converted,
        );

        let upload = BufferTextureCopy {
            offset: 0,
            size: staging_size,
            rect: surface_params.sub_rect(&load_info),
            level,
        };
        if let Some(texture) = surface.borrow_mut().texture.as_mut() {
            self.backend.upload(texture, &upload, &staging);
        }
    }

    fn compute_hash(&self, load_info: &SurfaceParams, source: &[u8]) -> u64 {
        if self.custom_textures.use_new_hash() {
            return compute_hash(source);
        }
        let format = load_info.pixel_format;
        let size = load_info.width * load_info.height * codec::host_bytes_per_pixel(format, false);
        let mut decoded = vec![0u8; size as usize];
        codec::decode_texture(load_info, load_info.addr, load_info.end, source, &mut decoded, false);
        compute_hash(&decoded)
    }

    /// Replaces the texture of `surface` with a pack material for `hash`.
    /// Returns true when the guest data must not be uploaded.
    fn upload_custom_surface(&mut self, surface: &SurfaceHandle<B>, load_info: &SurfaceParams, hash: u64) -> bool {
        let level = surface.params().level_of(load_info.addr);
        let Some(material) = self.custom_textures.get_material(hash) else {
            if !surface.borrow().is_custom() {
                return false;
            }
            if level != 0 {
                return true;
            }
            // The guest replaced the base level with something the pack doesn't know.
            self.revert_custom_surface(surface);
            return false;
        };
        if level != 0 && self.custom_textures.skip_mipmaps() {
            return true;
        }

        let current = surface.borrow().material.clone();
        if current.as_ref().is_none_or(|current| !Arc::ptr_eq(current, &material)) {
            if level != 0 {
                // Levels are only swapped together with the base level
                return current.is_some();
            }
            if !self.backend.supports_custom_format(material.format) {
                error!(
                    "Custom texture {:016X} uses unsupported format {}, using the original",
                    hash, material.format
                );
                return current.is_some();
            }
            self.swap_material(surface, Arc::clone(&material));
        }

        if self.custom_textures.decode(&material) {
            self.upload_custom_material(surface, level, &material);
        } else {
            trace!("Queueing custom texture {:016X} for surface {}", hash, surface.id());
            self.pending_uploads.push(PendingUpload {
                surface: surface.clone(),
                material,
                level,
            });
        }
        true
    }

    /// Recreates the texture of `surface` at the size and format of `material`.
    fn swap_material(&mut self, surface: &SurfaceHandle<B>, material: Arc<Material>) {
        debug!(
            "Replacing surface {} with custom texture {:016X} ({}x{} {})",
            surface.id(),
            material.hash,
            material.width,
            material.height,
            material.format
        );
        let mut inner = surface.borrow_mut();
        inner.material = Some(material);
        let desc = self.texture_desc(&inner);
        inner.texture = Some(self.backend.create_texture(&desc));
        let whole = inner.interval();
        inner.mark_invalid(whole);
    }

    fn revert_custom_surface(&mut self, surface: &SurfaceHandle<B>) {
        debug!("Surface {} no longer matches its custom texture", surface.id());
        self.pending_uploads.retain(|pending| pending.surface != *surface);
        let mut inner = surface.borrow_mut();
        inner.material = None;
        let desc = self.texture_desc(&inner);
        inner.texture = Some(self.backend.create_texture(&desc));
        let whole = inner.interval();
        inner.mark_invalid(whole);
    }

    fn upload_custom_material(&mut self, surface: &SurfaceHandle<B>, level: u32, material: &Arc<Material>) {
        let skip_mipmaps = self.custom_textures.skip_mipmaps();
        let mut inner = surface.borrow_mut();
        let max_level = inner.params.levels - 1;
        let Some(texture) = inner.texture.as_mut() else {
            return;
        };
        if !self.backend.upload_custom(texture, level, material) {
            warn!("Failed to upload custom texture {:016X}", material.hash);
            return;
        }
        if skip_mipmaps && max_level > 0 {
            self.backend.generate_mipmaps(texture, max_level);
        }
        inner.modification_tick += 1;
    }

    /// Uploads custom materials whose asynchronous decode has finished.
    pub(super) fn apply_pending_uploads(&mut self) {
        if self.pending_uploads.is_empty() {
            return;
        }
        let budget = self.custom_textures.upload_budget();
        let mut applied = 0;
        for pending in std::mem::take(&mut self.pending_uploads) {
            let current = pending.surface.borrow().material.clone();
            if current.is_none_or(|current| !Arc::ptr_eq(&current, &pending.material)) {
                continue;
            }
            match pending.material.state() {
                DecodeState::Decoded if applied < budget => {
                    self.upload_custom_material(&pending.surface, pending.level, &pending.material);
                    applied += 1;
                }
                DecodeState::Failed => {
                    warn!(
                        "Custom texture {:016X} failed to decode, restoring surface {}",
                        pending.material.hash,
                        pending.surface.id()
                    );
                    self.revert_custom_surface(&pending.surface);
                }
                _ => self.pending_uploads.push(pending),
            }
        }
        if applied > 0 {
            trace!("Applied {} custom texture uploads", applied);
        }
    }
}

fn mark_validated<T>(surface: &crate::surface::SurfaceRef<T>, regions: &mut IntervalSet, interval: SurfaceInterval) {
    surface.borrow_mut().mark_valid(interval);
    regions.erase(interval);
}
