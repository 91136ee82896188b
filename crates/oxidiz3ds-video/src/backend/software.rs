//! CPU implementation of [`GraphicsBackend`].
//!
//! Textures are plain byte vectors, one per layer and mip level, with rows
//! stored bottom-up. Scaling is nearest neighbour everywhere, which keeps the
//! results exact and easy to assert on.

use super::{
    BufferTextureCopy, Extent, GraphicsBackend, HostTexture, StagingBuffer, TextureBlit, TextureClear,
    TextureCopy, TextureDesc,
};
use crate::codec;
use crate::custom_tex::{CustomPixelFormat, Material};
use crate::params::Rect;
use crate::pixel_format::{PixelFormat, SurfaceType};
use tracing::{trace, warn};

const RGBA8_SOURCES: [PixelFormat; 1] = [PixelFormat::D24S8];
const RGB5A1_SOURCES: [PixelFormat; 1] = [PixelFormat::Rgba4];

#[derive(Debug, Clone)]
pub struct SoftwareTexture {
    handle: u64,
    desc: TextureDesc,
    texel_size: usize,
    /// Indexed by layer, then level
    data: Vec<Vec<Vec<u8>>>,
}

impl SoftwareTexture {
    fn new(handle: u64, desc: TextureDesc) -> Self {
        let texel_size = match desc.custom_format {
            Some(_) => 4,
            None => codec::host_bytes_per_pixel(desc.format, desc.converted) as usize,
        };
        let base = desc.scaled_extent();
        let data = (0..desc.layers())
            .map(|_| {
                (0..desc.levels.max(1))
                    .map(|level| {
                        let extent = level_extent(base, level);
                        vec![0u8; (extent.width * extent.height) as usize * texel_size]
                    })
                    .collect()
            })
            .collect();

        Self {
            handle,
            desc,
            texel_size,
            data,
        }
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn texel_size(&self) -> usize {
        self.texel_size
    }

    pub fn level_extent(&self, level: u32) -> Extent {
        level_extent(self.desc.scaled_extent(), level)
    }

    /// Raw host bytes of one texel.
    pub fn texel(&self, layer: u32, level: u32, x: u32, y: u32) -> &[u8] {
        let offset = self.offset(level, x, y);
        &self.data[layer as usize][level as usize][offset..offset + self.texel_size]
    }

    fn texel_mut(&mut self, layer: u32, level: u32, x: u32, y: u32) -> &mut [u8] {
        let offset = self.offset(level, x, y);
        let size = self.texel_size;
        &mut self.data[layer as usize][level as usize][offset..offset + size]
    }

    fn offset(&self, level: u32, x: u32, y: u32) -> usize {
        let extent = self.level_extent(level);
        (y * extent.width + x) as usize * self.texel_size
    }

    /// Texel as RGBA8. Depth formats come back as their raw bytes.
    pub fn read_rgba(&self, layer: u32, level: u32, x: u32, y: u32) -> [u8; 4] {
        to_rgba(&self.desc, self.texel(layer, level, x, y))
    }

    fn is_rgba(&self) -> bool {
        self.desc.custom_format.is_some() || codec::host_is_rgba(self.desc.format, self.desc.converted)
    }

    fn has_level(&self, layer: u32, level: u32) -> bool {
        self.data
            .get(layer as usize)
            .is_some_and(|levels| levels.get(level as usize).is_some())
    }
}

impl HostTexture for SoftwareTexture {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn extent(&self) -> Extent {
        self.desc.scaled_extent()
    }
}

fn level_extent(base: Extent, level: u32) -> Extent {
    Extent {
        width: (base.width >> level).max(1),
        height: (base.height >> level).max(1),
    }
}

fn to_rgba(desc: &TextureDesc, texel: &[u8]) -> [u8; 4] {
    match desc.custom_format {
        Some(_) => [texel[0], texel[1], texel[2], texel[3]],
        None => codec::host_to_rgba(desc.format, desc.converted, texel),
    }
}

fn from_rgba(desc: &TextureDesc, rgba: [u8; 4], texel: &mut [u8]) {
    match desc.custom_format {
        Some(_) => texel[..4].copy_from_slice(&rgba),
        None => codec::rgba_to_host(desc.format, desc.converted, rgba, texel),
    }
}

fn is_depth(format: PixelFormat) -> bool {
    matches!(format.surface_type(), SurfaceType::Depth | SurfaceType::DepthStencil)
}

/// 24-bit depth and stencil of a host depth texel.
fn read_depth(format: PixelFormat, texel: &[u8]) -> (u32, u8) {
    match format {
        PixelFormat::D16 => {
            let value = u16::from_le_bytes([texel[0], texel[1]]) as u32;
            ((value << 8) | (value >> 8), 0)
        }
        PixelFormat::D24 => (u32::from_le_bytes([texel[0], texel[1], texel[2], 0]), 0),
        _ => (u32::from_le_bytes([texel[0], texel[1], texel[2], 0]), texel[3]),
    }
}

fn write_depth(format: PixelFormat, depth: u32, stencil: u8, texel: &mut [u8]) {
    match format {
        PixelFormat::D16 => texel[..2].copy_from_slice(&((depth >> 8) as u16).to_le_bytes()),
        PixelFormat::D24 => {
            texel[..3].copy_from_slice(&depth.to_le_bytes()[..3]);
            texel[3] = 0;
        }
        _ => texel[..4].copy_from_slice(&((depth & 0xFF_FFFF) | ((stencil as u32) << 24)).to_le_bytes()),
    }
}

/// Maps texel `dst` of `dst_rect` onto the nearest texel of `src_rect`.
///
/// Both rectangles may be flipped, which mirrors the copy.
fn sample_coord(dst: u32, dst_from: u32, dst_to: u32, src_from: u32, src_to: u32) -> i64 {
    let span = dst_to as f32 - dst_from as f32;
    let t = (dst as f32 + 0.5 - dst_from as f32) / span;
    (src_from as f32 + t * (src_to as f32 - src_from as f32)).floor() as i64
}

fn rect_span(a: u32, b: u32) -> std::ops::Range<u32> {
    a.min(b)..a.max(b)
}

/// Counters of the work submitted to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub textures_created: u64,
    pub uploads: u64,
    pub downloads: u64,
    pub blits: u64,
    pub copies: u64,
    pub clears: u64,
    pub reinterpretations: u64,
}

#[derive(Debug, Default)]
pub struct SoftwareBackend {
    convert: bool,
    next_handle: u64,
    stats: BackendStats,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that stores color formats as RGBA8 instead of their guest encoding.
    pub fn with_conversion(convert: bool) -> Self {
        Self {
            convert,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }
}

impl GraphicsBackend for SoftwareBackend {
    type Texture = SoftwareTexture;

    fn create_texture(&mut self, desc: &TextureDesc) -> SoftwareTexture {
        self.next_handle += 1;
        self.stats.textures_created += 1;
        trace!(
            "Creating texture {} {}x{} x{} format={}",
            self.next_handle, desc.width, desc.height, desc.res_scale, desc.format
        );
        SoftwareTexture::new(self.next_handle, *desc)
    }

    fn find_staging(&mut self, size: usize, _upload: bool) -> StagingBuffer {
        StagingBuffer { data: vec![0; size] }
    }

    fn upload(&mut self, texture: &mut SoftwareTexture, copy: &BufferTextureCopy, staging: &StagingBuffer) {
        self.stats.uploads += 1;
        if !texture.has_level(0, copy.level) {
            warn!("Upload to missing level {} of texture {}", copy.level, texture.handle);
            return;
        }

        let scale = texture.desc.res_scale.max(1) as u32;
        let extent = texture.level_extent(copy.level);
        let size = texture.texel_size;
        let rect = copy.rect;
        let row_texels = rect.width() as usize;
        let Some(source) = staging.data.get(copy.offset..copy.offset + copy.size) else {
            warn!("Staging buffer too small for upload of {:?}", rect);
            return;
        };

        for (row, y) in rect_span(rect.bottom, rect.top).enumerate() {
            for (column, x) in rect_span(rect.left, rect.right).enumerate() {
                let index = (row * row_texels + column) * size;
                let Some(src) = source.get(index..index + size) else {
                    return;
                };
                for sy in y * scale..(y + 1) * scale {
                    for sx in x * scale..(x + 1) * scale {
                        if sx < extent.width && sy < extent.height {
                            texture.texel_mut(0, copy.level, sx, sy).copy_from_slice(src);
                        }
                    }
                }
            }
        }
    }

    fn download(&mut self, texture: &SoftwareTexture, copy: &BufferTextureCopy, staging: &mut StagingBuffer) {
        self.stats.downloads += 1;
        if !texture.has_level(0, copy.level) {
            warn!("Download from missing level {} of texture {}", copy.level, texture.handle);
            return;
        }

        let scale = texture.desc.res_scale.max(1) as u32;
        let extent = texture.level_extent(copy.level);
        let size = texture.texel_size;
        let rect = copy.rect;
        let row_texels = rect.width() as usize;
        let end = (copy.offset + copy.size).min(staging.data.len());
        let Some(dest) = staging.data.get_mut(copy.offset..end) else {
            return;
        };

        for (row, y) in rect_span(rect.bottom, rect.top).enumerate() {
            for (column, x) in rect_span(rect.left, rect.right).enumerate() {
                let (sx, sy) = (x * scale, y * scale);
                if sx >= extent.width || sy >= extent.height {
                    continue;
                }
                let index = (row * row_texels + column) * size;
                if let Some(dst) = dest.get_mut(index..index + size) {
                    dst.copy_from_slice(texture.texel(0, copy.level, sx, sy));
                }
            }
        }
    }

    fn blit_textures(&mut self, src: &SoftwareTexture, dst: &mut SoftwareTexture, blit: &TextureBlit) -> bool {
        let (src_format, dst_format) = (src.desc.format, dst.desc.format);
        if is_depth(src_format) != is_depth(dst_format)
            || !src.has_level(blit.src_layer, blit.src_level)
            || !dst.has_level(blit.dst_layer, blit.dst_level)
        {
            return false;
        }
        self.stats.blits += 1;

        let (s, d) = (blit.src_rect, blit.dst_rect);
        let src_extent = src.level_extent(blit.src_level);
        let dst_extent = dst.level_extent(blit.dst_level);
        let same_layout = src.desc.custom_format == dst.desc.custom_format
            && src_format == dst_format
            && src.desc.converted == dst.desc.converted;
        let mut scratch = [0u8; 4];

        for y in rect_span(d.bottom, d.top).filter(|y| *y < dst_extent.height) {
            let sy = sample_coord(y, d.bottom, d.top, s.bottom, s.top).clamp(0, src_extent.height as i64 - 1) as u32;
            for x in rect_span(d.left, d.right).filter(|x| *x < dst_extent.width) {
                let sx = sample_coord(x, d.left, d.right, s.left, s.right).clamp(0, src_extent.width as i64 - 1) as u32;
                let texel = src.texel(blit.src_layer, blit.src_level, sx, sy);

                let out = &mut scratch[..dst.texel_size];
                if same_layout {
                    out.copy_from_slice(texel);
                } else if is_depth(src_format) {
                    let (depth, stencil) = read_depth(src_format, texel);
                    write_depth(dst_format, depth, stencil, out);
                } else {
                    from_rgba(&dst.desc, to_rgba(&src.desc, texel), out);
                }
                dst.texel_mut(blit.dst_layer, blit.dst_level, x, y).copy_from_slice(out);
            }
        }
        true
    }

    fn copy_textures(&mut self, src: &SoftwareTexture, dst: &mut SoftwareTexture, copy: &TextureCopy) -> bool {
        if src.texel_size != dst.texel_size
            || !src.has_level(copy.src_layer, copy.src_level)
            || !dst.has_level(copy.dst_layer, copy.dst_level)
        {
            return false;
        }
        self.stats.copies += 1;

        let src_extent = src.level_extent(copy.src_level);
        let dst_extent = dst.level_extent(copy.dst_level);
        for row in 0..copy.extent.height {
            for column in 0..copy.extent.width {
                let (sx, sy) = (copy.src_offset.0 + column, copy.src_offset.1 + row);
                let (dx, dy) = (copy.dst_offset.0 + column, copy.dst_offset.1 + row);
                if sx >= src_extent.width || sy >= src_extent.height || dx >= dst_extent.width || dy >= dst_extent.height {
                    continue;
                }
                let texel = src.texel(copy.src_layer, copy.src_level, sx, sy);
                dst.texel_mut(copy.dst_layer, copy.dst_level, dx, dy).copy_from_slice(texel);
            }
        }
        true
    }

    fn clear_texture(&mut self, texture: &mut SoftwareTexture, clear: &TextureClear) -> bool {
        if !texture.has_level(0, clear.level) {
            return false;
        }
        self.stats.clears += 1;

        let mut value = [0u8; 4];
        let format = texture.desc.format;
        if texture.is_rgba() {
            value = clear.value.color;
        } else if is_depth(format) {
            value = clear.value.raw;
            if format == PixelFormat::D24 {
                value[3] = 0;
            }
        } else {
            codec::encode_pixel(format, clear.value.color, &mut value);
        }

        let extent = texture.level_extent(clear.level);
        let size = texture.texel_size;
        for layer in 0..texture.desc.layers() {
            for y in rect_span(clear.rect.bottom, clear.rect.top).filter(|y| *y < extent.height) {
                for x in rect_span(clear.rect.left, clear.rect.right).filter(|x| *x < extent.width) {
                    texture.texel_mut(layer, clear.level, x, y).copy_from_slice(&value[..size]);
                }
            }
        }
        true
    }

    fn generate_mipmaps(&mut self, texture: &mut SoftwareTexture, max_level: u32) {
        let last = max_level.min(texture.desc.levels.saturating_sub(1));
        let rgba = texture.is_rgba();
        for layer in 0..texture.desc.layers() {
            for level in 1..=last {
                let extent = texture.level_extent(level);
                let parent = texture.level_extent(level - 1);
                for y in 0..extent.height {
                    for x in 0..extent.width {
                        let (px, py) = ((x * 2).min(parent.width - 1), (y * 2).min(parent.height - 1));
                        let mut out = [0u8; 4];
                        if rgba {
                            let mut sum = [0u32; 4];
                            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                                let (sx, sy) = ((px + dx).min(parent.width - 1), (py + dy).min(parent.height - 1));
                                let color = to_rgba(&texture.desc, texture.texel(layer, level - 1, sx, sy));
                                for (total, channel) in sum.iter_mut().zip(color) {
                                    *total += channel as u32;
                                }
                            }
                            out = sum.map(|total| (total / 4) as u8);
                        } else {
                            let size = texture.texel_size;
                            out[..size].copy_from_slice(texture.texel(layer, level - 1, px, py));
                        }
                        let size = texture.texel_size;
                        texture.texel_mut(layer, level, x, y).copy_from_slice(&out[..size]);
                    }
                }
            }
        }
    }

    fn needs_conversion(&self, format: PixelFormat) -> bool {
        self.convert && format.surface_type() == SurfaceType::Color
    }

    fn possible_reinterpretations(&self, dst_format: PixelFormat) -> &[PixelFormat] {
        match dst_format {
            PixelFormat::Rgba8 => &RGBA8_SOURCES,
            PixelFormat::Rgb5A1 => &RGB5A1_SOURCES,
            _ => &[],
        }
    }

    fn reinterpret(
        &mut self,
        src: &SoftwareTexture,
        src_format: PixelFormat,
        src_rect: Rect,
        dst: &mut SoftwareTexture,
        dst_rect: Rect,
    ) -> bool {
        let dst_format = dst.desc.format;
        if src_format.bpp() != dst_format.bpp() || !self.possible_reinterpretations(dst_format).contains(&src_format) {
            return false;
        }
        self.stats.reinterpretations += 1;

        let src_extent = src.level_extent(0);
        let dst_extent = dst.level_extent(0);
        let (mut guest, mut out) = ([0u8; 4], [0u8; 4]);
        for y in rect_span(dst_rect.bottom, dst_rect.top).filter(|y| *y < dst_extent.height) {
            let sy = sample_coord(y, dst_rect.bottom, dst_rect.top, src_rect.bottom, src_rect.top)
                .clamp(0, src_extent.height as i64 - 1) as u32;
            for x in rect_span(dst_rect.left, dst_rect.right).filter(|x| *x < dst_extent.width) {
                let sx = sample_coord(x, dst_rect.left, dst_rect.right, src_rect.left, src_rect.right)
                    .clamp(0, src_extent.width as i64 - 1) as u32;
                codec::encode_from_host(src_format, src.desc.converted, src.texel(0, 0, sx, sy), &mut guest);
                codec::decode_to_host(dst_format, dst.desc.converted, &guest, &mut out);
                let size = dst.texel_size;
                dst.texel_mut(0, 0, x, y).copy_from_slice(&out[..size]);
            }
        }
        true
    }

    fn supports_custom_format(&self, format: CustomPixelFormat) -> bool {
        format == CustomPixelFormat::Rgba8
    }

    fn upload_custom(&mut self, texture: &mut SoftwareTexture, level: u32, material: &Material) -> bool {
        if texture.desc.custom_format != Some(material.format)
            || !self.supports_custom_format(material.format)
            || !texture.has_level(0, level)
        {
            return false;
        }
        self.stats.uploads += 1;

        let target = &mut texture.data[0][level as usize];
        material
            .with_data(|data| {
                if data.len() != target.len() {
                    warn!(
                        "Custom texture {:016X} has {} bytes, level {} needs {}",
                        material.hash,
                        data.len(),
                        level,
                        target.len()
                    );
                    return false;
                }
                target.copy_from_slice(data);
                true
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ClearValue;
    use crate::params::TextureType;
    use pretty_assertions::assert_eq;

    fn desc(format: PixelFormat, width: u32, height: u32, res_scale: u16) -> TextureDesc {
        TextureDesc {
            format,
            custom_format: None,
            width,
            height,
            res_scale,
            levels: 1,
            texture_type: TextureType::Texture2D,
            converted: false,
        }
    }

    fn staging_of(texels: &[[u8; 4]]) -> StagingBuffer {
        StagingBuffer {
            data: texels.iter().flatten().copied().collect(),
        }
    }

    #[test]
    fn test_upload_stretches_to_res_scale() {
        let mut backend = SoftwareBackend::new();
        let mut texture = backend.create_texture(&desc(PixelFormat::Rgba8, 2, 2, 2));
        let staging = staging_of(&[[1; 4], [2; 4], [3; 4], [4; 4]]);
        let copy = BufferTextureCopy {
            offset: 0,
            size: staging.data.len(),
            rect: Rect::new(0, 2, 2, 0),
            level: 0,
        };
        backend.upload(&mut texture, &copy, &staging);

        assert_eq!(texture.texel(0, 0, 0, 0), &[1; 4]);
        assert_eq!(texture.texel(0, 0, 1, 1), &[1; 4]);
        assert_eq!(texture.texel(0, 0, 2, 0), &[2; 4]);
        assert_eq!(texture.texel(0, 0, 3, 3), &[4; 4]);

        let mut readback = backend.find_staging(16, false);
        backend.download(&texture, &copy, &mut readback);
        assert_eq!(readback.data, staging.data);
    }

    #[test]
    fn test_upload_clips_rows_wider_than_texture() {
        let mut backend = SoftwareBackend::new();
        let mut texture = backend.create_texture(&desc(PixelFormat::Rgba8, 2, 1, 1));
        let staging = staging_of(&[[1; 4], [2; 4], [3; 4], [4; 4]]);
        let copy = BufferTextureCopy {
            offset: 0,
            size: 16,
            rect: Rect::new(0, 1, 4, 0),
            level: 0,
        };
        backend.upload(&mut texture, &copy, &staging);
        assert_eq!(texture.texel(0, 0, 1, 0), &[2; 4]);
    }

    #[test]
    fn test_flipped_blit_mirrors_rows() {
        let mut backend = SoftwareBackend::new();
        let mut src = backend.create_texture(&desc(PixelFormat::Rgba8, 1, 2, 1));
        let mut dst = backend.create_texture(&desc(PixelFormat::Rgba8, 1, 2, 1));
        let staging = staging_of(&[[1; 4], [2; 4]]);
        let copy = BufferTextureCopy {
            offset: 0,
            size: 8,
            rect: Rect::new(0, 2, 1, 0),
            level: 0,
        };
        backend.upload(&mut src, &copy, &staging);

        let blit = TextureBlit {
            src_rect: Rect::new(0, 0, 1, 2),
            dst_rect: Rect::new(0, 2, 1, 0),
            ..Default::default()
        };
        assert!(backend.blit_textures(&src, &mut dst, &blit));
        assert_eq!(dst.texel(0, 0, 0, 0), &[2; 4]);
        assert_eq!(dst.texel(0, 0, 0, 1), &[1; 4]);
    }

    #[test]
    fn test_blit_converts_between_color_formats() {
        let mut backend = SoftwareBackend::new();
        let mut src = backend.create_texture(&desc(PixelFormat::Rgba8, 1, 1, 1));
        let mut dst = backend.create_texture(&desc(PixelFormat::Rgb565, 1, 1, 1));
        let clear = TextureClear {
            level: 0,
            rect: Rect::new(0, 1, 1, 0),
            value: ClearValue {
                color: [255, 0, 255, 255],
                ..Default::default()
            },
        };
        assert!(backend.clear_texture(&mut src, &clear));

        let blit = TextureBlit {
            src_rect: Rect::new(0, 1, 1, 0),
            dst_rect: Rect::new(0, 1, 1, 0),
            ..Default::default()
        };
        assert!(backend.blit_textures(&src, &mut dst, &blit));
        assert_eq!(dst.read_rgba(0, 0, 0, 0), [255, 0, 255, 255]);
    }

    #[test]
    fn test_depth_blit_keeps_precision_order() {
        let mut backend = SoftwareBackend::new();
        let mut src = backend.create_texture(&desc(PixelFormat::D24S8, 1, 1, 1));
        let mut dst = backend.create_texture(&desc(PixelFormat::D16, 1, 1, 1));
        let clear = TextureClear {
            level: 0,
            rect: Rect::new(0, 1, 1, 0),
            value: ClearValue {
                raw: [0x56, 0x34, 0x12, 0xAB],
                ..Default::default()
            },
        };
        backend.clear_texture(&mut src, &clear);
        let blit = TextureBlit {
            src_rect: Rect::new(0, 1, 1, 0),
            dst_rect: Rect::new(0, 1, 1, 0),
            ..Default::default()
        };
        assert!(backend.blit_textures(&src, &mut dst, &blit));
        assert_eq!(dst.texel(0, 0, 0, 0), &[0x34, 0x12]);

        let mut color = backend.create_texture(&desc(PixelFormat::Rgba8, 1, 1, 1));
        assert!(!backend.blit_textures(&src, &mut color, &blit));
    }

    #[test]
    fn test_mipmaps_average_rgba() {
        let mut backend = SoftwareBackend::new();
        let mut texture = backend.create_texture(&TextureDesc {
            levels: 2,
            ..desc(PixelFormat::Etc1, 2, 2, 1)
        });
        let staging = staging_of(&[[0; 4], [100; 4], [100; 4], [200; 4]]);
        let copy = BufferTextureCopy {
            offset: 0,
            size: 16,
            rect: Rect::new(0, 2, 2, 0),
            level: 0,
        };
        backend.upload(&mut texture, &copy, &staging);
        backend.generate_mipmaps(&mut texture, 1);
        assert_eq!(texture.texel(0, 1, 0, 0), &[100; 4]);
    }

    #[test]
    fn test_reinterpret_rgba4_as_rgb5a1() {
        let mut backend = SoftwareBackend::new();
        let mut src = backend.create_texture(&desc(PixelFormat::Rgba4, 1, 1, 1));
        let mut dst = backend.create_texture(&desc(PixelFormat::Rgb5A1, 1, 1, 1));
        let staging = StagingBuffer { data: vec![0x34, 0x12] };
        let copy = BufferTextureCopy {
            offset: 0,
            size: 2,
            rect: Rect::new(0, 1, 1, 0),
            level: 0,
        };
        backend.upload(&mut src, &copy, &staging);

        let rect = Rect::new(0, 1, 1, 0);
        assert!(backend.reinterpret(&src, PixelFormat::Rgba4, rect, &mut dst, rect));
        assert_eq!(dst.texel(0, 0, 0, 0), &[0x34, 0x12]);
        assert!(!backend.reinterpret(&src, PixelFormat::Rgba4, rect, &mut src.clone(), rect));
    }

    #[test]
    fn test_copy_requires_matching_texel_size() {
        let mut backend = SoftwareBackend::new();
        let src = backend.create_texture(&desc(PixelFormat::Rgba8, 2, 2, 1));
        let mut dst = backend.create_texture(&desc(PixelFormat::Rgb565, 2, 2, 1));
        let copy = TextureCopy {
            extent: Extent { width: 2, height: 2 },
            ..Default::default()
        };
        assert!(!backend.copy_textures(&src, &mut dst, &copy));
        assert_eq!(backend.stats().copies, 0);
    }
}
