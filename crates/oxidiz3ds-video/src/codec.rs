//! Conversion between guest pixel layouts and host staging buffers.
//!
//! Guest textures are stored in 8x8 tiles whose texels follow a Z-order
//! (morton) curve. Host staging buffers are linear and bottom-up: the first row
//! of a staging buffer is the bottom row of the rectangle being transferred.
//!
//! Texture-only formats are always expanded to RGBA8 on the host since no host
//! API samples them natively. Color formats keep their guest encoding unless the
//! backend asks for conversion.
//!
//! # References
//! - [GPU Textures](https://www.3dbrew.org/wiki/GPU/Textures)

use crate::interval::PAddr;
use crate::params::SurfaceParams;
use crate::pixel_format::{PixelFormat, SurfaceType};
use tracing::error;

const ETC1_MODIFIERS: [[i32; 2]; 8] = [
    [2, 8],
    [5, 17],
    [9, 29],
    [13, 42],
    [18, 60],
    [24, 80],
    [33, 106],
    [47, 183],
];

/// Offset of texel `(x, y)` inside an 8x8 tile, in texels.
pub const fn morton_interleave(x: u32, y: u32) -> u32 {
    const XLUT: [u32; 8] = [0x00, 0x01, 0x04, 0x05, 0x10, 0x11, 0x14, 0x15];
    const YLUT: [u32; 8] = [0x00, 0x02, 0x08, 0x0a, 0x20, 0x22, 0x28, 0x2a];
    XLUT[(x % 8) as usize] + YLUT[(y % 8) as usize]
}

const fn convert_4_to_8(value: u32) -> u8 {
    let value = (value & 0xF) as u8;
    (value << 4) | value
}

const fn convert_5_to_8(value: u32) -> u8 {
    let value = (value & 0x1F) as u8;
    (value << 3) | (value >> 2)
}

const fn convert_6_to_8(value: u32) -> u8 {
    let value = (value & 0x3F) as u8;
    (value << 2) | (value >> 4)
}

fn read_u16(bytes: &[u8]) -> u32 {
    u16::from_le_bytes([bytes[0], bytes[1]]) as u32
}

/// Bytes per texel of a host texture holding `format`.
pub const fn host_bytes_per_pixel(format: PixelFormat, converted: bool) -> u32 {
    if converted
        || matches!(format.surface_type(), SurfaceType::Texture)
        || matches!(format, PixelFormat::D24)
    {
        4
    } else {
        format.bytes_per_pixel()
    }
}

/// Whether host texels of `format` are stored as RGBA8.
pub const fn host_is_rgba(format: PixelFormat, converted: bool) -> bool {
    match format.surface_type() {
        SurfaceType::Texture => true,
        SurfaceType::Color => converted,
        _ => false,
    }
}

/// Decodes one guest texel of a byte-addressable format to RGBA8.
///
/// Depth formats are returned as their raw little-endian bytes.
pub fn decode_pixel(format: PixelFormat, src: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8 => [src[3], src[2], src[1], src[0]],
        PixelFormat::Rgb8 => [src[2], src[1], src[0], 255],
        PixelFormat::Rgb5A1 => {
            let pixel = read_u16(src);
            [
                convert_5_to_8(pixel >> 11),
                convert_5_to_8(pixel >> 6),
                convert_5_to_8(pixel >> 1),
                ((pixel & 1) * 255) as u8,
            ]
        }
        PixelFormat::Rgb565 => {
            let pixel = read_u16(src);
            [
                convert_5_to_8(pixel >> 11),
                convert_6_to_8(pixel >> 5),
                convert_5_to_8(pixel),
                255,
            ]
        }
        PixelFormat::Rgba4 => {
            let pixel = read_u16(src);
            [
                convert_4_to_8(pixel >> 12),
                convert_4_to_8(pixel >> 8),
                convert_4_to_8(pixel >> 4),
                convert_4_to_8(pixel),
            ]
        }
        PixelFormat::Ia8 => [src[1], src[1], src[1], src[0]],
        PixelFormat::Rg8 => [src[1], src[0], 0, 255],
        PixelFormat::I8 => [src[0], src[0], src[0], 255],
        PixelFormat::A8 => [0, 0, 0, src[0]],
        PixelFormat::Ia4 => {
            let i = convert_4_to_8((src[0] >> 4) as u32);
            [i, i, i, convert_4_to_8(src[0] as u32)]
        }
        PixelFormat::I4 | PixelFormat::A4 => decode_nibble(format, src[0] as u32),
        PixelFormat::D16 => [src[0], src[1], 0, 0],
        PixelFormat::D24 => [src[0], src[1], src[2], 0],
        PixelFormat::D24S8 => [src[0], src[1], src[2], src[3]],
        PixelFormat::Etc1 | PixelFormat::Etc1A4 | PixelFormat::Invalid => [0; 4],
    }
}

fn decode_nibble(format: PixelFormat, nibble: u32) -> [u8; 4] {
    let value = convert_4_to_8(nibble);
    if format == PixelFormat::I4 {
        [value, value, value, 255]
    } else {
        [0, 0, 0, value]
    }
}

/// Encodes an RGBA8 color into one guest texel of a byte-addressable format.
pub fn encode_pixel(format: PixelFormat, rgba: [u8; 4], dst: &mut [u8]) {
    let [r, g, b, a] = rgba.map(u16::from);
    match format {
        PixelFormat::Rgba8 => dst[..4].copy_from_slice(&[rgba[3], rgba[2], rgba[1], rgba[0]]),
        PixelFormat::Rgb8 => dst[..3].copy_from_slice(&[rgba[2], rgba[1], rgba[0]]),
        PixelFormat::Rgb5A1 => {
            let pixel = ((r >> 3) << 11) | ((g >> 3) << 6) | ((b >> 3) << 1) | (a >> 7);
            dst[..2].copy_from_slice(&pixel.to_le_bytes());
        }
        PixelFormat::Rgb565 => {
            let pixel = ((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3);
            dst[..2].copy_from_slice(&pixel.to_le_bytes());
        }
        PixelFormat::Rgba4 => {
            let pixel = ((r >> 4) << 12) | ((g >> 4) << 8) | ((b >> 4) << 4) | (a >> 4);
            dst[..2].copy_from_slice(&pixel.to_le_bytes());
        }
        PixelFormat::Ia8 => dst[..2].copy_from_slice(&[rgba[3], rgba[0]]),
        PixelFormat::Rg8 => dst[..2].copy_from_slice(&[rgba[1], rgba[0]]),
        PixelFormat::I8 => dst[0] = rgba[0],
        PixelFormat::A8 => dst[0] = rgba[3],
        PixelFormat::Ia4 => dst[0] = (rgba[0] & 0xF0) | (rgba[3] >> 4),
        PixelFormat::I4 | PixelFormat::A4 => dst[0] = encode_nibble(format, rgba),
        PixelFormat::D16 => dst[..2].copy_from_slice(&rgba[..2]),
        PixelFormat::D24 => dst[..3].copy_from_slice(&rgba[..3]),
        PixelFormat::D24S8 => dst[..4].copy_from_slice(&rgba),
        PixelFormat::Etc1 | PixelFormat::Etc1A4 | PixelFormat::Invalid => {}
    }
}

fn encode_nibble(format: PixelFormat, rgba: [u8; 4]) -> u8 {
    let value = if format == PixelFormat::I4 {
        ((rgba[0] as u32 + rgba[1] as u32 + rgba[2] as u32) / 3) as u8
    } else {
        rgba[3]
    };
    value >> 4
}

/// Reads a host texel of `format` as RGBA8.
pub fn host_to_rgba(format: PixelFormat, converted: bool, texel: &[u8]) -> [u8; 4] {
    if host_is_rgba(format, converted) {
        [texel[0], texel[1], texel[2], texel[3]]
    } else {
        decode_pixel(format, texel)
    }
}

/// Writes an RGBA8 color as a host texel of `format`.
pub fn rgba_to_host(format: PixelFormat, converted: bool, rgba: [u8; 4], texel: &mut [u8]) {
    if host_is_rgba(format, converted) {
        texel[..4].copy_from_slice(&rgba);
    } else {
        encode_pixel(format, rgba, texel);
    }
}

/// Decodes one guest texel into its host representation.
pub(crate) fn decode_to_host(format: PixelFormat, converted: bool, src: &[u8], dst: &mut [u8]) {
    if host_is_rgba(format, converted) {
        dst[..4].copy_from_slice(&decode_pixel(format, src));
    } else {
        let bytes = format.bytes_per_pixel() as usize;
        dst[..bytes].copy_from_slice(&src[..bytes]);
    }
}

pub(crate) fn encode_from_host(format: PixelFormat, converted: bool, src: &[u8], dst: &mut [u8]) {
    if host_is_rgba(format, converted) {
        encode_pixel(format, [src[0], src[1], src[2], src[3]], dst);
    } else {
        let bytes = format.bytes_per_pixel() as usize;
        dst[..bytes].copy_from_slice(&src[..bytes]);
    }
}

/// Samples texel `(x, y)` of a 4x4 ETC1 block stored as a little-endian word.
pub fn sample_etc1_subtile(block: u64, x: u32, y: u32) -> [u8; 3] {
    let texel = 4 * x + y;
    let flip = (block >> 32) & 1 != 0;
    let differential = (block >> 33) & 1 != 0;
    let half = if flip { y } else { x };
    let second = half >= 2;

    let field = |shift: u32, bits: u32| ((block >> shift) & ((1 << bits) - 1)) as u32;
    let signed3 = |shift: u32| ((field(shift, 3) << 29) as i32) >> 29;

    let base: [i32; 3] = if differential {
        let (mut r, mut g, mut b) = (field(59, 5) as i32, field(51, 5) as i32, field(43, 5) as i32);
        if second {
            r += signed3(56);
            g += signed3(48);
            b += signed3(40);
        }
        [r, g, b].map(|c| convert_5_to_8(c as u32) as i32)
    } else if !second {
        [field(60, 4), field(52, 4), field(44, 4)].map(|c| convert_4_to_8(c) as i32)
    } else {
        [field(56, 4), field(48, 4), field(40, 4)].map(|c| convert_4_to_8(c) as i32)
    };

    let table = if second { field(34, 3) } else { field(37, 3) } as usize;
    let sub_index = field(texel, 1) as usize;
    let mut modifier = ETC1_MODIFIERS[table][sub_index];
    if field(16 + texel, 1) != 0 {
        modifier = -modifier;
    }

    base.map(|c| (c + modifier).clamp(0, 255) as u8)
}

/// Decodes texel `(x, y)` of an 8x8 ETC1/ETC1A4 tile.
fn decode_etc1_texel(format: PixelFormat, tile: &[u8], x: u32, y: u32) -> [u8; 4] {
    let has_alpha = format == PixelFormat::Etc1A4;
    let subtile_size = if has_alpha { 16 } else { 8 };
    let subtile_index = (x / 4 + 2 * (y / 4)) as usize;
    let (x, y) = (x % 4, y % 4);

    let mut subtile = &tile[subtile_index * subtile_size..][..subtile_size];
    let mut alpha = 255;
    if has_alpha {
        let packed = u64::from_le_bytes(subtile[..8].try_into().unwrap_or([0; 8]));
        alpha = convert_4_to_8((packed >> (4 * (x * 4 + y))) as u32);
        subtile = &subtile[8..];
    }

    let block = u64::from_le_bytes(subtile[..8].try_into().unwrap_or([0; 8]));
    let [r, g, b] = sample_etc1_subtile(block, x, y);
    [r, g, b, alpha]
}

fn decode_tile_texel(format: PixelFormat, converted: bool, tile: &[u8], x: u32, y: u32, dst: &mut [u8]) {
    let morton = morton_interleave(x, y) as usize;
    if format.is_compressed() {
        dst[..4].copy_from_slice(&decode_etc1_texel(format, tile, x, y));
    } else if format.is_nibble() {
        let byte = tile[morton / 2] as u32;
        let nibble = if morton % 2 == 1 { byte >> 4 } else { byte & 0xF };
        dst[..4].copy_from_slice(&decode_nibble(format, nibble));
    } else {
        let bytes = format.bytes_per_pixel() as usize;
        decode_to_host(format, converted, &tile[morton * bytes..][..bytes], dst);
    }
}

fn encode_tile_texel(format: PixelFormat, converted: bool, src: &[u8], x: u32, y: u32, tile: &mut [u8]) {
    let morton = morton_interleave(x, y) as usize;
    if format.is_nibble() {
        let value = encode_nibble(format, [src[0], src[1], src[2], src[3]]);
        let byte = &mut tile[morton / 2];
        *byte = if morton % 2 == 1 {
            (value << 4) | (*byte & 0x0F)
        } else {
            (*byte & 0xF0) | value
        };
    } else {
        let bytes = format.bytes_per_pixel() as usize;
        encode_from_host(format, converted, src, &mut tile[morton * bytes..][..bytes]);
    }
}

/// Location of tile texel `(x, y)` in a bottom-up linear buffer, if inside it.
fn linear_texel_index(info: &SurfaceParams, tile_index: u32, x: u32, y: u32) -> Option<usize> {
    let tiles_per_row = (info.width / 8).max(1);
    let tx = (tile_index % tiles_per_row) * 8 + x;
    let ty = (tile_index / tiles_per_row) * 8 + y;
    if tx >= info.width || ty >= info.height {
        return None;
    }
    let row = info.height - 1 - ty;
    Some((row * info.width + tx) as usize)
}

/// Converts guest bytes `[start_addr, end_addr)` of `info` into a host staging buffer.
///
/// `source` holds exactly the guest bytes of the range and `dest` the
/// `info.width * info.height` host texels of the rectangle.
pub fn decode_texture(
    info: &SurfaceParams,
    start_addr: PAddr,
    end_addr: PAddr,
    source: &[u8],
    dest: &mut [u8],
    converted: bool,
) {
    let format = info.pixel_format;
    let host_bpp = host_bytes_per_pixel(format, converted) as usize;
    let start_offset = start_addr - info.addr;
    let end_offset = end_addr - info.addr;

    if info.is_tiled {
        let tile_size = format.bpp() * 64 / 8;
        debug_assert!(start_offset % tile_size == 0 && end_offset % tile_size == 0);
        for tile_index in start_offset / tile_size..end_offset / tile_size {
            let tile_start = (tile_index * tile_size - start_offset) as usize;
            let Some(tile) = source.get(tile_start..tile_start + tile_size as usize) else {
                break;
            };
            for y in 0..8 {
                for x in 0..8 {
                    let Some(index) = linear_texel_index(info, tile_index, x, y) else {
                        continue;
                    };
                    if let Some(texel) = dest.get_mut(index * host_bpp..(index + 1) * host_bpp) {
                        decode_tile_texel(format, converted, tile, x, y, texel);
                    }
                }
            }
        }
        return;
    }

    match format {
        PixelFormat::Etc1 | PixelFormat::Etc1A4 | PixelFormat::Invalid => {
            error!("No linear decoder for pixel format {}", format);
        }
        PixelFormat::I4 | PixelFormat::A4 => {
            let first = (start_offset * 2) as usize;
            for (i, byte) in source.iter().enumerate() {
                for (half, nibble) in [(0, *byte & 0xF), (1, *byte >> 4)] {
                    let index = first + i * 2 + half;
                    if let Some(texel) = dest.get_mut(index * host_bpp..(index + 1) * host_bpp) {
                        texel.copy_from_slice(&decode_nibble(format, nibble as u32));
                    }
                }
            }
        }
        _ => {
            let bytes = format.bytes_per_pixel() as usize;
            let first = start_offset as usize / bytes;
            for (i, pixel) in source.chunks_exact(bytes).enumerate() {
                let index = first + i;
                if let Some(texel) = dest.get_mut(index * host_bpp..(index + 1) * host_bpp) {
                    decode_to_host(format, converted, pixel, texel);
                }
            }
        }
    }
}

/// Converts a host staging buffer back into guest bytes `[start_addr, end_addr)`.
///
/// The range does not need to be tile aligned; partially covered tiles are
/// swizzled into a scratch tile and only the requested bytes are written.
pub fn encode_texture(
    info: &SurfaceParams,
    start_addr: PAddr,
    end_addr: PAddr,
    source: &[u8],
    dest: &mut [u8],
    converted: bool,
) {
    let format = info.pixel_format;
    let host_bpp = host_bytes_per_pixel(format, converted) as usize;
    let start_offset = start_addr - info.addr;
    let end_offset = end_addr - info.addr;

    if format.is_compressed() || !format.is_valid() {
        error!("No encoder for pixel format {}", format);
        return;
    }

    if info.is_tiled {
        let tile_size = format.bpp() * 64 / 8;
        let mut scratch = [0u8; 256];
        for tile_index in start_offset / tile_size..end_offset.div_ceil(tile_size) {
            let tile = &mut scratch[..tile_size as usize];
            tile.fill(0);
            for y in 0..8 {
                for x in 0..8 {
                    let Some(index) = linear_texel_index(info, tile_index, x, y) else {
                        continue;
                    };
                    if let Some(texel) = source.get(index * host_bpp..(index + 1) * host_bpp) {
                        encode_tile_texel(format, converted, texel, x, y, tile);
                    }
                }
            }
            copy_overlap(tile, tile_index * tile_size, start_offset, end_offset, dest);
        }
        return;
    }

    let mut scratch = [0u8; 4];
    if format.is_nibble() {
        for byte_offset in start_offset..end_offset {
            let index = (byte_offset * 2) as usize;
            let mut byte = 0;
            for half in 0..2 {
                if let Some(texel) = source.get((index + half) * host_bpp..(index + half + 1) * host_bpp) {
                    let value = encode_nibble(format, [texel[0], texel[1], texel[2], texel[3]]);
                    byte |= value << (4 * half);
                }
            }
            dest[(byte_offset - start_offset) as usize] = byte;
        }
        return;
    }

    let bytes = format.bytes_per_pixel();
    for index in start_offset / bytes..end_offset.div_ceil(bytes) {
        let i = index as usize;
        let Some(texel) = source.get(i * host_bpp..(i + 1) * host_bpp) else {
            break;
        };
        let pixel = &mut scratch[..bytes as usize];
        encode_from_host(format, converted, texel, pixel);
        copy_overlap(pixel, index * bytes, start_offset, end_offset, dest);
    }
}

/// Copies the part of `chunk` (located at `chunk_offset`) that falls inside
/// `[start_offset, end_offset)` into `dest`, which begins at `start_offset`.
fn copy_overlap(chunk: &[u8], chunk_offset: u32, start_offset: u32, end_offset: u32, dest: &mut [u8]) {
    let lo = chunk_offset.max(start_offset);
    let hi = (chunk_offset + chunk.len() as u32).min(end_offset);
    if lo >= hi {
        return;
    }
    let src = &chunk[(lo - chunk_offset) as usize..(hi - chunk_offset) as usize];
    if let Some(dst) = dest.get_mut((lo - start_offset) as usize..(hi - start_offset) as usize) {
        dst.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiled_params(format: PixelFormat, width: u32, height: u32) -> SurfaceParams {
        SurfaceParams {
            addr: 0x1000,
            width,
            height,
            is_tiled: true,
            pixel_format: format,
            ..Default::default()
        }
        .updated()
    }

    #[test]
    fn test_morton_interleave() {
        assert_eq!(morton_interleave(0, 0), 0);
        assert_eq!(morton_interleave(1, 0), 1);
        assert_eq!(morton_interleave(0, 1), 2);
        assert_eq!(morton_interleave(7, 7), 63);
    }

    #[test]
    fn test_color_codecs_round_trip_exact_values() {
        for format in [PixelFormat::Rgba8, PixelFormat::Rgb565, PixelFormat::Rgb5A1, PixelFormat::Rgba4] {
            let mut guest = [0u8; 4];
            encode_pixel(format, [0xFF, 0x00, 0xFF, 0xFF], &mut guest);
            assert_eq!(decode_pixel(format, &guest), [0xFF, 0x00, 0xFF, 0xFF], "{format}");
        }
        assert_eq!(decode_pixel(PixelFormat::Rgba8, &[0x44, 0x33, 0x22, 0x11]), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_tiled_round_trip() {
        let info = tiled_params(PixelFormat::Rgb565, 16, 16);
        let guest: Vec<u8> = (0..info.size).map(|i| (i * 7 % 251) as u8).collect();
        let mut staging = vec![0u8; (16 * 16 * 2) as usize];
        decode_texture(&info, info.addr, info.end, &guest, &mut staging, false);

        let mut back = vec![0u8; guest.len()];
        encode_texture(&info, info.addr, info.end, &staging, &mut back, false);
        assert_eq!(back, guest);

        let mut partial = vec![0u8; 10];
        encode_texture(&info, info.addr + 129, info.addr + 139, &staging, &mut partial, false);
        assert_eq!(partial, guest[129..139]);
    }

    #[test]
    fn test_first_tile_lands_on_top_rows() {
        let info = tiled_params(PixelFormat::I8, 8, 16);
        let mut guest = vec![0u8; info.size as usize];
        guest[0] = 0xAA;
        let mut staging = vec![0u8; 8 * 16 * 4];
        decode_texture(&info, info.addr, info.end, &guest, &mut staging, false);

        let top_left = ((16 - 1) * 8) * 4;
        assert_eq!(&staging[top_left..top_left + 4], &[0xAA, 0xAA, 0xAA, 0xFF]);
        assert_eq!(&staging[0..4], &[0, 0, 0, 0xFF]);
    }

    #[test]
    fn test_nibble_tiles() {
        let info = tiled_params(PixelFormat::A4, 8, 8);
        let guest: Vec<u8> = (0..32).map(|i| (i as u8).wrapping_mul(0x11)).collect();
        let mut staging = vec![0u8; 8 * 8 * 4];
        decode_texture(&info, info.addr, info.end, &guest, &mut staging, false);
        let mut back = vec![0u8; 32];
        encode_texture(&info, info.addr, info.end, &staging, &mut back, false);
        assert_eq!(back, guest);
    }

    #[test]
    fn test_etc1_individual_block() {
        let block: u64 = (8 << 60) | (4 << 52) | (2 << 44) | (1 << 37) | 1 | (1 << 16);
        assert_eq!(sample_etc1_subtile(block, 0, 0), [136 - 17, 68 - 17, 34 - 17]);
        assert_eq!(sample_etc1_subtile(block, 0, 1), [141, 73, 39]);
    }

    #[test]
    fn test_etc1_differential_second_half() {
        // base (16, 8, 4) with delta (-1, +1, 0) applied to the right half
        let block: u64 = (16 << 59) | (7 << 56) | (8 << 51) | (1 << 48) | (4 << 43) | (1 << 33);
        let left = sample_etc1_subtile(block, 0, 0);
        let right = sample_etc1_subtile(block, 3, 0);
        assert_eq!(left, [convert_5_to_8(16) + 2, convert_5_to_8(8) + 2, convert_5_to_8(4) + 2]);
        assert_eq!(right, [convert_5_to_8(15) + 2, convert_5_to_8(9) + 2, convert_5_to_8(4) + 2]);
    }
}
