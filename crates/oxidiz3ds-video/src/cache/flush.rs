//! Writing dirty surface data back to guest memory, and invalidating surfaces
//! when guest memory or another surface takes over a range.

use super::{RasterizerCache, SurfaceHandle};
use crate::backend::{BufferTextureCopy, GraphicsBackend};
use crate::codec;
use crate::interval::{IntervalSet, PAddr, SurfaceInterval};
use crate::matcher::{self, MatchFlags, ScaleMatch};
use crate::pixel_format::SurfaceType;
use tracing::{debug, instrument, trace};

impl<B: GraphicsBackend> RasterizerCache<B> {
    /// Writes back dirty data overlapping `[addr, addr + size)`.
    ///
    /// With an `owner`, only that surface's runs are written. Accesses of up to
    /// 8 bytes flush the whole dirty run they touch.
    #[instrument(level = "trace", skip(self, owner))]
    pub fn flush_region(&mut self, addr: PAddr, size: u32, owner: Option<&SurfaceHandle<B>>) {
        if size == 0 {
            return;
        }
        let flush_interval = SurfaceInterval::from_size(addr, size);
        let runs: Vec<(SurfaceInterval, SurfaceHandle<B>)> = self
            .dirty_regions
            .range(flush_interval)
            .filter(|(_, surface)| owner.is_none_or(|owner| owner == *surface))
            .map(|(run, surface)| (run, surface.clone()))
            .collect();

        let mut flushed = IntervalSet::new();
        for (run, surface) in runs {
            let interval = if size <= 8 { run } else { run.intersect(&flush_interval) };
            let interval = interval.intersect(&surface.borrow().interval());
            if interval.is_empty() {
                continue;
            }
            debug_assert!(surface.borrow().is_region_valid(interval));

            if surface.borrow().is_fill() {
                self.download_fill_surface(&surface, interval);
            } else {
                self.download_surface(&surface, interval);
            }
            flushed.insert(interval);
        }

        self.dirty_regions.subtract_regions(&flushed);
    }

    /// Writes every dirty byte back to guest memory.
    pub fn flush_all(&mut self) {
        self.flush_region(0, 0xFFFF_FFFF, None);
    }

    fn download_surface(&mut self, surface: &SurfaceHandle<B>, interval: SurfaceInterval) {
        let surface_params = surface.params();
        if surface.borrow().is_custom() {
            debug!("Not flushing custom surface {}", surface.id());
            return;
        }
        let params = surface_params.from_interval(interval);
        let format = surface_params.pixel_format;
        let converted = self.backend.needs_conversion(format);
        let staging_size = (params.width * params.height * codec::host_bytes_per_pixel(format, converted)) as usize;
        let mut staging = self.backend.find_staging(staging_size, false);

        let download = BufferTextureCopy {
            offset: 0,
            size: staging_size,
            rect: surface_params.sub_rect(&params),
            level: surface_params.level_of(interval.start),
        };
        if let Some(texture) = surface.borrow().texture.as_ref() {
            self.backend.download(texture, &download, &mut staging);
        }

        let Some(dest) = self.memory.physical_ref(interval.start) else {
            debug!("Skipping flush of unmapped range {:?}", interval);
            return;
        };
        let len = (interval.len() as usize).min(dest.len());
        trace!("Flushing {:?} of surface {}", interval, surface.id());
        codec::encode_texture(
            &params,
            interval.start,
            interval.start + len as u32,
            &staging.data,
            &mut dest[..len],
            converted,
        );
    }

    /// Writes the fill pattern over `interval`, keeping it in phase with the
    /// start of the fill surface.
    fn download_fill_surface(&mut self, surface: &SurfaceHandle<B>, interval: SurfaceInterval) {
        let surface = surface.borrow();
        let Some(dest) = self.memory.physical_ref(interval.start) else {
            debug!("Skipping fill flush of unmapped range {:?}", interval);
            return;
        };
        let len = (interval.len() as usize).min(dest.len());
        let fill_size = surface.fill_size.max(1) as usize;
        let start_offset = (interval.start - surface.params.addr) as usize;
        for (offset, byte) in dest[..len].iter_mut().enumerate() {
            *byte = surface.fill_data[(start_offset + offset) % fill_size];
        }
    }

    /// Marks `[addr, addr + size)` as changed, either by the guest (`owner` is
    /// `None`) or by rendering into `owner`.
    #[instrument(level = "trace", skip(self, owner))]
    pub fn invalidate_region(&mut self, addr: PAddr, size: u32, owner: Option<&SurfaceHandle<B>>) {
        if size == 0 {
            return;
        }
        let invalid_interval = SurfaceInterval::from_size(addr, size);

        if let Some(owner) = owner {
            let mut owner = owner.borrow_mut();
            debug_assert!(owner.params.surface_type != SurfaceType::Texture);
            debug_assert!(owner.interval().contains(&invalid_interval));
            debug_assert_eq!(owner.params.width, owner.params.stride, "surfaces cannot have gaps");
            owner.mark_valid(invalid_interval);
        }

        for surface in self.surfaces_in(invalid_interval) {
            if owner.is_some_and(|owner| *owner == surface) {
                continue;
            }

            // CPU writes this small usually mean the pages went back to the CPU
            if owner.is_none() && size <= 8 {
                let (surface_addr, surface_size) = {
                    let params = surface.params();
                    (params.addr, params.size)
                };
                self.flush_region(surface_addr, surface_size, Some(&surface));
                self.remove_surfaces.insert(surface);
                continue;
            }

            let fully_invalid = {
                let mut inner = surface.borrow_mut();
                let interval = inner.interval().intersect(&invalid_interval);
                inner.mark_invalid(interval);
                inner.is_fully_invalid()
            };
            if fully_invalid {
                self.remove_surfaces.insert(surface);
            }
        }

        match owner {
            Some(owner) => self.dirty_regions.set(invalid_interval, owner.clone()),
            None => self.dirty_regions.erase(invalid_interval),
        }

        for surface in std::mem::take(&mut self.remove_surfaces) {
            if owner.is_some_and(|owner| *owner == surface) && !self.absorb_superseded_owner(&surface) {
                continue;
            }
            self.unregister_surface(&surface);
        }
    }

    /// Moves a superseded render target into the surface that expanded over it.
    /// Returns false when the owner holds data the expanded surface lacks.
    fn absorb_superseded_owner(&mut self, owner: &SurfaceHandle<B>) -> bool {
        let params = owner.params();
        let candidates: Vec<SurfaceHandle<B>> = self
            .surfaces_in(params.interval())
            .into_iter()
            .filter(|surface| surface != owner)
            .collect();
        let Some(expanded) = matcher::find_match(
            candidates.iter(),
            &params,
            MatchFlags::SUB_RECT | MatchFlags::INVALID,
            ScaleMatch::Ignore,
            None,
        ) else {
            return true;
        };

        let mut unique = owner.borrow().invalid_regions.clone();
        unique.subtract_regions(&expanded.borrow().invalid_regions);
        if !unique.is_empty() {
            return false;
        }
        debug!("Folding surface {} into expanded surface {}", owner.id(), expanded.id());
        self.duplicate_surface(owner, &expanded);
        true
    }
}
