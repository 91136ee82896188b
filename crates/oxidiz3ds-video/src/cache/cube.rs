use super::{RasterizerCache, SurfaceHandle};
use crate::backend::{GraphicsBackend, TextureBlit};
use crate::interval::PAddr;
use crate::params::{Rect, SurfaceParams, TextureType};
use crate::pixel_format::PixelFormat;
use crate::surface::{SurfaceId, SurfaceRef};
use tracing::{debug, trace};

/// Face addresses and layout of a cube map. Zero addresses are unused faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureCubeConfig {
    pub px: PAddr,
    pub nx: PAddr,
    pub py: PAddr,
    pub ny: PAddr,
    pub pz: PAddr,
    pub nz: PAddr,
    pub width: u32,
    pub levels: u32,
    pub format: PixelFormat,
}

impl TextureCubeConfig {
    /// Face addresses in layer order.
    pub fn faces(&self) -> [PAddr; 6] {
        [self.px, self.nx, self.py, self.ny, self.pz, self.nz]
    }
}

pub(super) struct TextureCube<T> {
    pub(super) surface: SurfaceRef<T>,
    /// Surface holding the face texels and its modification tick as of the last copy
    faces: [Option<(SurfaceId, u64)>; 6],
}

impl<B: GraphicsBackend> RasterizerCache<B> {
    /// Cube map assembled from six face textures, refreshed from any face that changed.
    pub fn get_texture_cube(&mut self, config: &TextureCubeConfig) -> Option<SurfaceHandle<B>> {
        if config.width == 0 || config.levels == 0 {
            return None;
        }

        if !self.texture_cubes.contains_key(config) {
            let params = SurfaceParams {
                addr: config.px,
                width: config.width,
                height: config.width,
                stride: config.width,
                levels: config.levels,
                res_scale: self.texture_scale(),
                texture_type: TextureType::CubeMap,
                pixel_format: config.format,
                ..Default::default()
            }
            .updated();
            debug!("Creating texture cube {:?}", config);
            let surface = self.create_surface(params);
            self.texture_cubes.insert(
                *config,
                TextureCube {
                    surface,
                    faces: [None; 6],
                },
            );
        }

        for (layer, addr) in config.faces().into_iter().enumerate() {
            if addr == 0 {
                continue;
            }
            let Some(source) = self.texture_source(addr, config.width, config.width, config.format, config.levels - 1)
            else {
                continue;
            };
            let stamp = {
                let surface = source.surface();
                (surface.id(), surface.borrow().modification_tick)
            };

            let cube_surface = match self.texture_cubes.get(config) {
                Some(cube) if cube.faces[layer] != Some(stamp) => cube.surface.clone(),
                _ => continue,
            };
            let face = self.resolve_texture_source(source);
            trace!("Refreshing cube face {} from surface {}", layer, face.id());

            let levels = face.params().levels.min(config.levels);
            for level in 0..levels {
                let blit = TextureBlit {
                    src_level: level,
                    src_rect: level_rect(face.borrow().host_rect(), level),
                    dst_level: level,
                    dst_layer: layer as u32,
                    dst_rect: level_rect(cube_surface.borrow().host_rect(), level),
                    ..Default::default()
                };
                self.blit_surfaces(&face, &cube_surface, &blit);
            }

            if let Some(cube) = self.texture_cubes.get_mut(config) {
                cube.faces[layer] = Some(stamp);
            }
        }

        self.texture_cubes.get(config).map(|cube| cube.surface.clone())
    }
}

fn level_rect(rect: Rect, level: u32) -> Rect {
    Rect::new(
        0,
        (rect.height() >> level).max(1),
        (rect.width() >> level).max(1),
        0,
    )
}
