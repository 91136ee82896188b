//! PICA pixel formats as seen by the surface cache.
//!
//! The numbering follows the texture unit encoding; color buffer formats share
//! the first five values and depth formats are placed after the texture formats.
//!
//! # References
//! - [GPU Internal Registers](https://www.3dbrew.org/wiki/GPU/Internal_Registers)

use oxidiz3ds_hw::mmio::gpu::pixel_format as gpu_format;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u32)]
pub enum PixelFormat {
    // Shared between textures and color buffers
    Rgba8 = 0,
    Rgb8 = 1,
    Rgb5A1 = 2,
    Rgb565 = 3,
    Rgba4 = 4,
    // Texture only
    Ia8 = 5,
    Rg8 = 6,
    I8 = 7,
    A8 = 8,
    Ia4 = 9,
    I4 = 10,
    A4 = 11,
    Etc1 = 12,
    Etc1A4 = 13,
    // Depth buffer only
    D16 = 14,
    D24 = 16,
    D24S8 = 17,
    #[default]
    Invalid = 255,
}

/// What a surface of a given format is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceType {
    Color,
    Texture,
    Depth,
    DepthStencil,
    Fill,
    #[default]
    Invalid,
}

impl PixelFormat {
    /// Every real format, used when searching for reinterpretation candidates.
    pub const ALL: [PixelFormat; 17] = [
        PixelFormat::Rgba8,
        PixelFormat::Rgb8,
        PixelFormat::Rgb5A1,
        PixelFormat::Rgb565,
        PixelFormat::Rgba4,
        PixelFormat::Ia8,
        PixelFormat::Rg8,
        PixelFormat::I8,
        PixelFormat::A8,
        PixelFormat::Ia4,
        PixelFormat::I4,
        PixelFormat::A4,
        PixelFormat::Etc1,
        PixelFormat::Etc1A4,
        PixelFormat::D16,
        PixelFormat::D24,
        PixelFormat::D24S8,
    ];

    /// Bits per pixel in guest memory
    pub const fn bpp(self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::D24S8 => 32,
            PixelFormat::Rgb8 | PixelFormat::D24 => 24,
            PixelFormat::Rgb5A1
            | PixelFormat::Rgb565
            | PixelFormat::Rgba4
            | PixelFormat::Ia8
            | PixelFormat::Rg8
            | PixelFormat::D16 => 16,
            PixelFormat::I8 | PixelFormat::A8 | PixelFormat::Ia4 | PixelFormat::Etc1A4 => 8,
            PixelFormat::I4 | PixelFormat::A4 | PixelFormat::Etc1 => 4,
            PixelFormat::Invalid => 0,
        }
    }

    /// Bytes per pixel in a host staging buffer without conversion (never below one).
    pub const fn bytes_per_pixel(self) -> u32 {
        let bytes = self.bpp() / 8;
        if bytes == 0 { 1 } else { bytes }
    }

    pub const fn surface_type(self) -> SurfaceType {
        match self as u32 {
            0..=4 => SurfaceType::Color,
            5..=13 => SurfaceType::Texture,
            14 | 16 => SurfaceType::Depth,
            17 => SurfaceType::DepthStencil,
            _ => SurfaceType::Invalid,
        }
    }

    pub const fn is_valid(self) -> bool {
        !matches!(self, PixelFormat::Invalid)
    }

    /// Formats stored in blocks that cannot be addressed per pixel.
    pub const fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Etc1 | PixelFormat::Etc1A4)
    }

    /// Formats whose texels are packed two per byte.
    pub const fn is_nibble(self) -> bool {
        matches!(self, PixelFormat::I4 | PixelFormat::A4)
    }

    /// Decodes the texture unit format field.
    pub fn from_texture_format(value: u32) -> Self {
        Self::from_index(value).filter(|_| value < 14).unwrap_or(PixelFormat::Invalid)
    }

    /// Decodes the framebuffer color format field.
    pub fn from_color_format(value: u32) -> Self {
        Self::from_index(value).filter(|_| value < 5).unwrap_or(PixelFormat::Invalid)
    }

    /// Decodes the framebuffer depth format field (D16, reserved, D24, D24S8).
    pub fn from_depth_format(value: u32) -> Self {
        match value {
            0 => PixelFormat::D16,
            2 => PixelFormat::D24,
            3 => PixelFormat::D24S8,
            _ => PixelFormat::Invalid,
        }
    }

    /// Decodes the display controller / transfer engine format field.
    ///
    /// RGB565 and RGB5A1 are swapped relative to the texture unit numbering.
    pub fn from_gpu_format(value: u32) -> Self {
        match value {
            gpu_format::RGBA8 => PixelFormat::Rgba8,
            gpu_format::RGB8 => PixelFormat::Rgb8,
            gpu_format::RGB565 => PixelFormat::Rgb565,
            gpu_format::RGB5A1 => PixelFormat::Rgb5A1,
            gpu_format::RGBA4 => PixelFormat::Rgba4,
            _ => PixelFormat::Invalid,
        }
    }

    fn from_index(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|format| *format as u32 == value)
    }

    pub const fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "RGBA8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Rgb5A1 => "RGB5A1",
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Rgba4 => "RGBA4",
            PixelFormat::Ia8 => "IA8",
            PixelFormat::Rg8 => "RG8",
            PixelFormat::I8 => "I8",
            PixelFormat::A8 => "A8",
            PixelFormat::Ia4 => "IA4",
            PixelFormat::I4 => "I4",
            PixelFormat::A4 => "A4",
            PixelFormat::Etc1 => "ETC1",
            PixelFormat::Etc1A4 => "ETC1A4",
            PixelFormat::D16 => "D16",
            PixelFormat::D24 => "D24",
            PixelFormat::D24S8 => "D24S8",
            PixelFormat::Invalid => "Invalid",
        }
    }

    /// Parses a format name as accepted by [`PixelFormat::name`], ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a blit between the two formats is meaningful.
///
/// Color and texture formats convert freely between each other; depth only
/// blits to depth and depth-stencil only to depth-stencil.
pub fn check_formats_blittable(a: PixelFormat, b: PixelFormat) -> bool {
    use SurfaceType::*;
    match (a.surface_type(), b.surface_type()) {
        (Color | Texture, Color | Texture) => true,
        (Depth, Depth) => true,
        (DepthStencil, DepthStencil) => true,
        _ => false,
    }
}
