//! Packing and unpacking of 16-bit texels and palette entries.
//!
//! Unpacking expands channels back to 8 bits by bit replication, matching
//! what the hardware samples. YUV422 stores one colour per pixel pair, so
//! the packer buffers even pixels ([TexelPacker]) and the unpacker works on
//! texel pairs ([unpack_yuv_pair]).
use binrw::{BinRead, BinWrite};
use thiserror::Error;

/// Pixel format byte of the PVRT texture type word.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(repr(u8))]
pub enum PixelFormat {
    Argb1555 = 0,
    Rgb565 = 1,
    Argb4444 = 2,
    Yuv422 = 3,
    /// Reserved for bump maps, not readable.
    Bump = 4,
    Rgb555 = 5,
    /// Reserved, not readable.
    Yuv420 = 6,
}

impl PixelFormat {
    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::Argb1555 | PixelFormat::Argb4444)
    }
}

#[derive(Debug, Error)]
#[error("pixel format {0:?} has no single texel packing")]
pub struct UnsupportedPixelFormat(pub PixelFormat);

fn expand4(v: u16) -> u8 {
    ((v << 4) | v) as u8
}

fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

/// Packs 8-bit channels into a single texel.
///
/// YUV422 cannot be packed one texel at a time, use [TexelPacker].
pub fn pack(
    format: PixelFormat,
    a: u8,
    r: u8,
    g: u8,
    b: u8,
) -> Result<u16, UnsupportedPixelFormat> {
    let (a, r, g, b) = (a as u16, r as u16, g as u16, b as u16);
    match format {
        PixelFormat::Argb1555 => {
            Ok(((a >> 7) << 15) | ((r >> 3) << 10) | ((g >> 3) << 5) | (b >> 3))
        }
        PixelFormat::Rgb555 => Ok(((r >> 3) << 10) | ((g >> 3) << 5) | (b >> 3)),
        PixelFormat::Rgb565 => Ok(((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3)),
        PixelFormat::Argb4444 => {
            Ok(((a >> 4) << 12) | ((r >> 4) << 8) | ((g >> 4) << 4) | (b >> 4))
        }
        _ => Err(UnsupportedPixelFormat(format)),
    }
}

/// Unpacks a texel into `(a, r, g, b)`.
///
/// Formats without stored alpha report `opaque_alpha`. ARGB1555 alpha is a
/// single bit and expands to 0x00 or 0xFF.
pub fn unpack(
    format: PixelFormat,
    texel: u16,
    opaque_alpha: u8,
) -> Result<(u8, u8, u8, u8), UnsupportedPixelFormat> {
    match format {
        PixelFormat::Argb1555 => Ok((
            if texel & 0x8000 != 0 { 0xFF } else { 0x00 },
            expand5((texel >> 10) & 0x1F),
            expand5((texel >> 5) & 0x1F),
            expand5(texel & 0x1F),
        )),
        PixelFormat::Rgb555 => Ok((
            opaque_alpha,
            expand5((texel >> 10) & 0x1F),
            expand5((texel >> 5) & 0x1F),
            expand5(texel & 0x1F),
        )),
        PixelFormat::Rgb565 => Ok((
            opaque_alpha,
            expand5(texel >> 11),
            expand6((texel >> 5) & 0x3F),
            expand5(texel & 0x1F),
        )),
        PixelFormat::Argb4444 => Ok((
            expand4(texel >> 12),
            expand4((texel >> 8) & 0xF),
            expand4((texel >> 4) & 0xF),
            expand4(texel & 0xF),
        )),
        _ => Err(UnsupportedPixelFormat(format)),
    }
}

fn clamp255(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Packs a pair of horizontally adjacent pixels into two YUV422 texels.
///
/// Each pixel keeps its own luminance, the chrominance is averaged over the
/// pair: the even texel carries `(Y0 << 8) | U`, the odd `(Y1 << 8) | V`.
pub fn pack_yuv_pair(even: (u8, u8, u8), odd: (u8, u8, u8)) -> (u16, u16) {
    let y0 = (0.299 * even.0 as f64 + 0.587 * even.1 as f64 + 0.114 * even.2 as f64) as u16;
    let y1 = (0.299 * odd.0 as f64 + 0.587 * odd.1 as f64 + 0.114 * odd.2 as f64) as u16;

    let r = (even.0 as i32 + odd.0 as i32) / 2;
    let g = (even.1 as i32 + odd.1 as i32) / 2;
    let b = (even.2 as i32 + odd.2 as i32) / 2;

    let u = (128.0 - 0.14 * r as f64 - 0.29 * g as f64 + 0.43 * b as f64) as i32;
    let v = (128.0 + 0.36 * r as f64 - 0.29 * g as f64 - 0.07 * b as f64) as i32;

    (
        (y0 << 8) | clamp255(u) as u16,
        (y1 << 8) | clamp255(v) as u16,
    )
}

/// Unpacks a pair of YUV422 texels into two `(r, g, b)` pixels.
pub fn unpack_yuv_pair(even: u16, odd: u16) -> ((u8, u8, u8), (u8, u8, u8)) {
    let y0 = (even >> 8) as i32;
    let u = (even & 0xFF) as i32;
    let y1 = (odd >> 8) as i32;
    let v = (odd & 0xFF) as i32;

    let decode = |y: i32| {
        (
            clamp255((y as f64 + 1.375 * (v - 128) as f64) as i32),
            clamp255((y as f64 - 0.6875 * (v - 128) as f64 - 0.34375 * (u - 128) as f64) as i32),
            clamp255((y as f64 + 1.71875 * (u - 128) as f64) as i32),
        )
    };

    (decode(y0), decode(y1))
}

/// Packs a row-major pixel scan into a texel buffer.
///
/// For YUV422 the even pixel of each pair is buffered together with its
/// output slot and both texels are written once the odd pixel arrives, so
/// the caller can hand out twiddled slots freely.
pub struct TexelPacker {
    format: PixelFormat,
    pending: Option<(usize, (u8, u8, u8))>,
}

impl TexelPacker {
    pub fn new(format: PixelFormat) -> Result<Self, UnsupportedPixelFormat> {
        match format {
            PixelFormat::Bump | PixelFormat::Yuv420 => Err(UnsupportedPixelFormat(format)),
            _ => Ok(Self {
                format,
                pending: None,
            }),
        }
    }

    /// Computes the texel for the pixel at scan position `x` and stores it
    /// at `slot`.
    pub fn push(&mut self, buf: &mut [u16], slot: usize, x: u32, a: u8, r: u8, g: u8, b: u8) {
        if self.format == PixelFormat::Yuv422 {
            if x & 1 == 0 {
                self.pending = Some((slot, (r, g, b)));
            } else if let Some((even_slot, even)) = self.pending.take() {
                let (t0, t1) = pack_yuv_pair(even, (r, g, b));
                buf[even_slot] = t0;
                buf[slot] = t1;
            }
        } else {
            // Packing only fails for formats rejected in new().
            buf[slot] = pack(self.format, a, r, g, b).unwrap_or(0);
        }
    }
}

/// Entry format of a PVP palette file (and of the hardware palette RAM).
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(repr(u32))]
pub enum PaletteFormat {
    Argb1555 = 0,
    Rgb565 = 1,
    Argb4444 = 2,
    Argb8888 = 6,
}

impl PaletteFormat {
    pub fn entry_size(&self) -> usize {
        match self {
            PaletteFormat::Argb8888 => 4,
            _ => 2,
        }
    }

    pub fn has_alpha(&self) -> bool {
        !matches!(self, PaletteFormat::Rgb565)
    }

    fn texel_format(&self) -> PixelFormat {
        match self {
            PaletteFormat::Argb1555 => PixelFormat::Argb1555,
            PaletteFormat::Rgb565 => PixelFormat::Rgb565,
            PaletteFormat::Argb4444 => PixelFormat::Argb4444,
            PaletteFormat::Argb8888 => unreachable!(),
        }
    }

    /// Unpacks a raw palette entry into `(a, r, g, b)`.
    pub fn unpack_entry(&self, raw: u32, opaque_alpha: u8) -> (u8, u8, u8, u8) {
        match self {
            PaletteFormat::Argb8888 => (
                (raw >> 24) as u8,
                (raw >> 16) as u8,
                (raw >> 8) as u8,
                raw as u8,
            ),
            _ => unpack(self.texel_format(), raw as u16, opaque_alpha)
                .unwrap_or((opaque_alpha, 0, 0, 0)),
        }
    }

    /// Packs `(a, r, g, b)` into a raw palette entry.
    pub fn pack_entry(&self, a: u8, r: u8, g: u8, b: u8) -> u32 {
        match self {
            PaletteFormat::Argb8888 => {
                ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
            }
            _ => pack(self.texel_format(), a, r, g, b).unwrap_or(0) as u32,
        }
    }
}

/// Quantises an 8-bit value down to `depth` bits and expands it back the way
/// the hardware does. A depth of 0 or 8 passes the value through, a depth of
/// 1 thresholds at 127.
pub fn quantize_channel(depth: u32, value: i32) -> u8 {
    match depth {
        4 => {
            let v = (value as f32 * (15.0 / 255.0) + 0.5) as i32;
            (v | (v << 4)) as u8
        }
        5 => {
            let v = (value as f32 * (31.0 / 255.0) + 0.5) as i32;
            ((v >> 2) | (v << 3)) as u8
        }
        6 => {
            let v = (value as f32 * (63.0 / 255.0) + 0.5) as i32;
            ((v >> 4) | (v << 2)) as u8
        }
        0 | 8 => value as u8,
        _ => {
            if value > 127 {
                255
            } else {
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quantize_argb(format: PixelFormat, a: u8, r: u8, g: u8, b: u8) -> (u8, u8, u8, u8) {
        let trunc = |v: u8, bits: u16, expand: fn(u16) -> u8| expand(v as u16 >> (8 - bits));
        match format {
            PixelFormat::Argb1555 => (
                if a >= 0x80 { 0xFF } else { 0 },
                trunc(r, 5, expand5),
                trunc(g, 5, expand5),
                trunc(b, 5, expand5),
            ),
            PixelFormat::Rgb555 => (
                0xFF,
                trunc(r, 5, expand5),
                trunc(g, 5, expand5),
                trunc(b, 5, expand5),
            ),
            PixelFormat::Rgb565 => (
                0xFF,
                trunc(r, 5, expand5),
                trunc(g, 6, expand6),
                trunc(b, 5, expand5),
            ),
            PixelFormat::Argb4444 => (
                trunc(a, 4, expand4),
                trunc(r, 4, expand4),
                trunc(g, 4, expand4),
                trunc(b, 4, expand4),
            ),
            _ => unreachable!(),
        }
    }

    #[test]
    fn round_trips_match_quantisation() {
        let formats = [
            PixelFormat::Argb1555,
            PixelFormat::Rgb555,
            PixelFormat::Rgb565,
            PixelFormat::Argb4444,
        ];
        for format in formats {
            for v in 0..=255u8 {
                let a = v.wrapping_mul(37);
                let texel = pack(format, a, v, v ^ 0x5A, 255 - v).unwrap();
                let unpacked = unpack(format, texel, 0xFF).unwrap();
                assert_eq!(
                    unpacked,
                    quantize_argb(format, a, v, v ^ 0x5A, 255 - v),
                    "{format:?} v={v}"
                );
            }
        }
    }

    #[test]
    fn unpacked_channels_reach_full_range() {
        assert_eq!(unpack(PixelFormat::Rgb565, 0xFFFF, 0xFF).unwrap(), (0xFF, 0xFF, 0xFF, 0xFF));
        assert_eq!(unpack(PixelFormat::Rgb565, 0, 0xFF).unwrap(), (0xFF, 0, 0, 0));
    }

    #[test]
    fn yuv_pair_round_trip_is_stable() {
        // Grey pairs survive the conversion exactly.
        for v in [0u8, 64, 128, 200, 255] {
            let (t0, t1) = pack_yuv_pair((v, v, v), (v, v, v));
            let (p0, p1) = unpack_yuv_pair(t0, t1);
            for c in [p0.0, p0.1, p0.2, p1.0, p1.1, p1.2] {
                assert!((c as i32 - v as i32).abs() <= 2, "grey {v} came back as {c}");
            }
        }
    }

    #[test]
    fn bit_alpha_thresholds() {
        assert_eq!(pack(PixelFormat::Argb1555, 0x7F, 0, 0, 0).unwrap() >> 15, 0);
        assert_eq!(pack(PixelFormat::Argb1555, 0x80, 0, 0, 0).unwrap() >> 15, 1);
    }

    #[test]
    fn single_texel_yuv_is_rejected() {
        assert!(pack(PixelFormat::Yuv422, 0, 0, 0, 0).is_err());
        assert!(unpack(PixelFormat::Yuv422, 0, 0xFF).is_err());
    }
}
