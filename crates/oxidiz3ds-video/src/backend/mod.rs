//! Host graphics abstraction used by the surface cache.
//!
//! The cache only ever talks to the host through [`GraphicsBackend`]. Textures
//! are laid out with a bottom-left origin, rectangles passed to blits, copies and
//! clears are in scaled texel coordinates, and staging transfers take unscaled
//! rectangles which the backend stretches to the texture's resolution scale.

pub mod software;

use crate::custom_tex::{CustomPixelFormat, Material};
use crate::params::{Rect, TextureType};
use crate::pixel_format::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

/// Everything needed to allocate a host texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub format: PixelFormat,
    /// Set when the texture holds a replacement material instead of guest data
    pub custom_format: Option<CustomPixelFormat>,
    /// Unscaled size of level 0
    pub width: u32,
    pub height: u32,
    pub res_scale: u16,
    pub levels: u32,
    pub texture_type: TextureType,
    /// Whether texels are stored as RGBA8 regardless of `format`
    pub converted: bool,
}

impl TextureDesc {
    pub const fn layers(&self) -> u32 {
        match self.texture_type {
            TextureType::Texture2D => 1,
            TextureType::CubeMap => 6,
        }
    }

    pub const fn scaled_extent(&self) -> Extent {
        Extent {
            width: self.width * self.res_scale as u32,
            height: self.height * self.res_scale as u32,
        }
    }
}

pub trait HostTexture {
    /// Backend specific identifier
    fn handle(&self) -> u64;

    /// Size of level 0 in texels
    fn extent(&self) -> Extent;
}

/// CPU visible memory used to move texels to and from the host.
#[derive(Debug, Clone, Default)]
pub struct StagingBuffer {
    pub data: Vec<u8>,
}

/// Transfer between a staging buffer and one level of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTextureCopy {
    pub offset: usize,
    pub size: usize,
    /// Unscaled rectangle of the level
    pub rect: Rect,
    pub level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureBlit {
    pub src_level: u32,
    pub src_layer: u32,
    pub src_rect: Rect,
    pub dst_level: u32,
    pub dst_layer: u32,
    pub dst_rect: Rect,
}

/// Same-size, same-format texel copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureCopy {
    pub src_level: u32,
    pub src_layer: u32,
    pub src_offset: (u32, u32),
    pub dst_level: u32,
    pub dst_layer: u32,
    pub dst_offset: (u32, u32),
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValue {
    /// RGBA8 color for color and texture formats
    pub color: [u8; 4],
    pub depth: f32,
    pub stencil: u8,
    /// Guest encoded bytes of one texel
    pub raw: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextureClear {
    pub level: u32,
    pub rect: Rect,
    pub value: ClearValue,
}

pub trait GraphicsBackend {
    type Texture: HostTexture;

    fn create_texture(&mut self, desc: &TextureDesc) -> Self::Texture;

    /// Staging memory of at least `size` bytes.
    fn find_staging(&mut self, size: usize, upload: bool) -> StagingBuffer;

    fn upload(&mut self, texture: &mut Self::Texture, copy: &BufferTextureCopy, staging: &StagingBuffer);

    fn download(&mut self, texture: &Self::Texture, copy: &BufferTextureCopy, staging: &mut StagingBuffer);

    /// Scaled, filtered and format converting copy. Returns false when unsupported.
    fn blit_textures(&mut self, src: &Self::Texture, dst: &mut Self::Texture, blit: &TextureBlit) -> bool;

    fn copy_textures(&mut self, src: &Self::Texture, dst: &mut Self::Texture, copy: &TextureCopy) -> bool;

    fn clear_texture(&mut self, texture: &mut Self::Texture, clear: &TextureClear) -> bool;

    /// Rebuilds levels `1..=max_level` from level 0.
    fn generate_mipmaps(&mut self, texture: &mut Self::Texture, max_level: u32);

    /// Whether guest data of `format` has to be converted to RGBA8 before upload.
    fn needs_conversion(&self, format: PixelFormat) -> bool;

    /// Source formats that can be reinterpreted into `dst_format`.
    fn possible_reinterpretations(&self, dst_format: PixelFormat) -> &[PixelFormat];

    /// Reinterprets the texels of `src` as if their guest bytes were `dst`'s format.
    fn reinterpret(
        &mut self,
        src: &Self::Texture,
        src_format: PixelFormat,
        src_rect: Rect,
        dst: &mut Self::Texture,
        dst_rect: Rect,
    ) -> bool;

    fn supports_custom_format(&self, format: CustomPixelFormat) -> bool;

    /// Uploads a decoded material into `level` of `texture`.
    fn upload_custom(&mut self, texture: &mut Self::Texture, level: u32, material: &Material) -> bool;
}
