//! Runtime settings of the surface cache.

use clap::ValueEnum;
use std::fmt;

/// Filter applied when textures are scaled on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TextureFilter {
    #[default]
    None,
    Bilinear,
    Bicubic,
    Xbrz,
}

impl fmt::Display for TextureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextureFilter::None => "none",
            TextureFilter::Bilinear => "bilinear",
            TextureFilter::Bicubic => "bicubic",
            TextureFilter::Xbrz => "xbrz",
        };
        f.write_str(name)
    }
}

/// Configuration for the surface cache
///
/// Changing `resolution_scale`, `texture_filter` or `use_custom_textures`
/// between frames drops every cached surface.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Internal resolution multiplier for render targets
    pub resolution_scale: u16,
    pub texture_filter: TextureFilter,
    /// Replace guest textures with pack materials
    pub use_custom_textures: bool,
    /// Hand every uploaded texture to the custom texture manager for dumping
    pub dump_textures: bool,
    /// Decode pack materials on a worker thread
    pub async_custom_loading: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resolution_scale: 1,
            texture_filter: TextureFilter::None,
            use_custom_textures: false,
            dump_textures: false,
            async_custom_loading: true,
        }
    }
}

impl CacheConfig {
    /// Whether switching from `self` to `other` invalidates every surface.
    pub fn requires_reset(&self, other: &CacheConfig) -> bool {
        self.resolution_scale != other.resolution_scale
            || self.texture_filter != other.texture_filter
            || self.use_custom_textures != other.use_custom_textures
    }
}
