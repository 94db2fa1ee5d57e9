//! Decoding PVR and VQF containers into [Raster]s.
use log::warn;
use pvr_lib::color::{self, PixelFormat};
use pvr_lib::pvp::Pvp;
use pvr_lib::pvr::{Pvr, TextureType};
use pvr_lib::twiddle;
use pvr_lib::vqf::Vqf;
use thiserror::Error;

use crate::raster::{Palette, Raster};

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Drop the alpha plane even when the format stores one.
    pub discard_alpha: bool,
    /// Palette file for the palettised texture classes. Missing palettes
    /// fall back to a greyscale ramp.
    pub palette: Option<Pvp>,
    /// Alpha value reported by formats without stored alpha. Zero here
    /// means "opaque is zero", not transparent.
    pub opaque_alpha: Option<u8>,
}

impl DecodeOptions {
    fn opaque(&self) -> u8 {
        self.opaque_alpha.unwrap_or(0xFF)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("texture type {0:?} is not readable")]
    UnsupportedTextureType(TextureType),

    #[error("pixel format {0:?} is not readable")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("mipmapped rectangles are only readable when square")]
    NonSquareMipmaps,

    #[error("texture payload ends early")]
    Truncated,
}

/// Forward-only view over the payload.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(DecodeError::Truncated)?;
        self.pos += len;
        Ok(slice)
    }

    /// Reads without consuming: the 4bpp 1x1 level stores no bytes of its
    /// own and reads into the following level.
    fn peek(&self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.data
            .get(self.pos..self.pos + len)
            .ok_or(DecodeError::Truncated)
    }

    fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }
}

fn format_has_alpha(format: PixelFormat) -> Result<bool, DecodeError> {
    match format {
        PixelFormat::Argb1555 | PixelFormat::Argb4444 => Ok(true),
        PixelFormat::Rgb565 | PixelFormat::Rgb555 | PixelFormat::Yuv422 => Ok(false),
        other => Err(DecodeError::UnsupportedPixelFormat(other)),
    }
}

fn greyscale_palette(depth: u32, opaque_alpha: u8) -> Palette {
    let len = 1usize << depth;
    let entries = (0..len)
        .map(|i| {
            let v = ((256.0 / len as f64) * i as f64) as u8;
            [opaque_alpha, v, v, v]
        })
        .collect();
    Palette { depth, entries }
}

struct CodebookEntry {
    /// Texels back in raster order: top-left, top-right, bottom-left,
    /// bottom-right.
    texels: [u16; 4],
}

fn parse_codebook(cursor: &mut Cursor, len: usize) -> Result<Vec<CodebookEntry>, DecodeError> {
    let bytes = cursor.take(len * 8)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let texel = |i: usize| u16::from_le_bytes([chunk[i * 2], chunk[i * 2 + 1]]);
            // Stored twiddled as pixels 0, 2, 1, 3.
            CodebookEntry {
                texels: [texel(0), texel(2), texel(1), texel(3)],
            }
        })
        .collect())
}

struct LevelWriter<'a> {
    raster: &'a mut Raster,
    format: PixelFormat,
    store_alpha: bool,
}

impl LevelWriter<'_> {
    fn put(&mut self, level: usize, x: usize, y: usize, a: u8, r: u8, g: u8, b: u8) {
        let (w, _) = self.raster.level_dims(level);
        let i = y * w + x;
        let rgb = &mut self.raster.rgb[level];
        rgb[i * 3] = r;
        rgb[i * 3 + 1] = g;
        rgb[i * 3 + 2] = b;
        if self.store_alpha {
            if let Some(alpha) = &mut self.raster.alpha {
                alpha[level][i] = a;
            }
        }
    }

    /// Unpacks a raster-ordered 2x2 codebook entry at pixel `(x, y)`.
    fn put_block(
        &mut self,
        level: usize,
        x: usize,
        y: usize,
        entry: &CodebookEntry,
        opaque: u8,
    ) {
        if self.format == PixelFormat::Yuv422 {
            for row in 0..2 {
                let (p0, p1) =
                    color::unpack_yuv_pair(entry.texels[row * 2], entry.texels[row * 2 + 1]);
                self.put(level, x, y + row, opaque, p0.0, p0.1, p0.2);
                self.put(level, x + 1, y + row, opaque, p1.0, p1.1, p1.2);
            }
        } else {
            for (i, texel) in entry.texels.iter().enumerate() {
                let (a, r, g, b) = color::unpack(self.format, *texel, opaque).unwrap_or_default();
                self.put(level, x + (i & 1), y + (i >> 1), a, r, g, b);
            }
        }
    }
}

/// Decodes a PVR texture into a raster image.
///
/// Palettised classes keep their index planes and palette; call
/// [Raster::convert_to_32bit] for plain RGBA.
pub fn decode_pvr(pvr: &Pvr, options: &DecodeOptions) -> Result<Raster, DecodeError> {
    let tt = pvr.texture_type;
    let mut has_alpha = format_has_alpha(pvr.pixel_format)?;
    match tt {
        TextureType::Bmp | TextureType::BmpMipmap | TextureType::StrideMipmap => {
            return Err(DecodeError::UnsupportedTextureType(tt))
        }
        TextureType::RectangleMipmap if pvr.width != pvr.height => {
            return Err(DecodeError::NonSquareMipmaps)
        }
        _ => {}
    }

    let width = pvr.width as usize;
    let height = pvr.height as usize;
    let mipmaps = tt.is_mipmapped();
    let mip_count = if mipmaps {
        (usize::BITS - width.leading_zeros()) as usize
    } else {
        1
    };

    // Palettised classes resolve colours through the palette instead.
    let palette = match tt.palette_depth() {
        Some(depth) => Some(match &options.palette {
            Some(pvp) => {
                has_alpha = pvp.format.has_alpha();
                Palette {
                    depth,
                    entries: pvp.to_rgba(options.opaque()),
                }
            }
            None => {
                warn!("no palette supplied, substituting a greyscale ramp");
                greyscale_palette(depth, options.opaque())
            }
        }),
        None => None,
    };

    let store_alpha = has_alpha && !options.discard_alpha;

    let mut raster = Raster {
        width,
        height,
        rgb: (0..mip_count)
            .map(|l| vec![0; (width >> l).max(1) * (height >> l).max(1) * 3])
            .collect(),
        alpha: store_alpha.then(|| {
            (0..mip_count)
                .map(|l| vec![0; (width >> l).max(1) * (height >> l).max(1)])
                .collect()
        }),
        indices: palette.as_ref().map(|_| {
            (0..mip_count)
                .map(|l| vec![0; (width >> l).max(1) * (height >> l).max(1)])
                .collect()
        }),
        palette,
    };

    let mut cursor = Cursor::new(&pvr.data);

    if let Some(codebook_len) = tt.codebook_len(pvr.width) {
        let codebook = parse_codebook(&mut cursor, codebook_len)?;
        let opaque = options.opaque();
        let mut writer = LevelWriter {
            raster: &mut raster,
            format: pvr.pixel_format,
            store_alpha,
        };

        for level in (0..mip_count).rev() {
            let w = (width >> level).max(1);
            let h = (height >> level).max(1);

            if w == 1 {
                // The 1x1 level is a single index whose entry is a 565
                // texel regardless of the surface format.
                // Small codebooks store indices biased toward the top of
                // the 256 code space; reducing modulo the codebook length
                // undoes the bias (and is a no-op for full codebooks).
                let index = cursor.take(1)?[0] as usize;
                let entry = &codebook[index & (codebook_len - 1)];
                let (a, r, g, b) =
                    color::unpack(PixelFormat::Rgb565, entry.texels[0], opaque).unwrap_or_default();
                writer.put(level, 0, 0, a, r, g, b);
                continue;
            }

            let (bw, bh) = (w / 2, h / 2);
            let (mask, shift) = twiddle::mask_shift(bw as u32, bh as u32);
            let bytes = cursor.take(bw * bh)?;
            for by in 0..bh {
                for bx in 0..bw {
                    let pos = twiddle::untwiddled_pos(bx as u32, by as u32, mask, shift) as usize;
                    let index = bytes[pos] as usize;
                    let entry = &codebook[index & (codebook_len - 1)];
                    writer.put_block(level, bx * 2, by * 2, entry, opaque);
                }
            }
        }
        return Ok(raster);
    }

    if mipmaps {
        // Placeholder bytes before the 1x1 level.
        let placeholder = match tt.palette_depth() {
            Some(8) => 3,
            _ => 2,
        };
        cursor.skip(placeholder)?;
    }

    for level in (0..mip_count).rev() {
        let w = (width >> level).max(1);
        let h = (height >> level).max(1);

        match tt.palette_depth() {
            Some(4) => {
                let len = (w * h) / 2;
                let bytes = cursor.peek(len.max(1))?;
                let (mask, shift) = twiddle::mask_shift(w as u32, h as u32);
                for y in 0..h {
                    for x in 0..w {
                        let pos = twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize;
                        let byte = bytes[pos / 2];
                        let index = if y & 1 != 0 { byte >> 4 } else { byte & 0x0F };
                        if let Some(indices) = &mut raster.indices {
                            indices[level][y * w + x] = index;
                        }
                    }
                }
                cursor.skip(len)?;
            }
            Some(_) => {
                let bytes = cursor.take(w * h)?;
                let (mask, shift) = twiddle::mask_shift(w as u32, h as u32);
                for y in 0..h {
                    for x in 0..w {
                        let pos = twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize;
                        if let Some(indices) = &mut raster.indices {
                            indices[level][y * w + x] = bytes[pos];
                        }
                    }
                }
            }
            None => {
                let bytes = cursor.take(w * h * 2)?;
                let texel_at = |i: usize| u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
                let twiddled = tt.is_twiddled();
                let (mask, shift) = twiddle::mask_shift(w as u32, h as u32);
                let pos = |x: usize, y: usize| {
                    if twiddled {
                        twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize
                    } else {
                        y * w + x
                    }
                };

                let opaque = options.opaque();
                let mut writer = LevelWriter {
                    raster: &mut raster,
                    format: pvr.pixel_format,
                    store_alpha,
                };
                if pvr.pixel_format == PixelFormat::Yuv422 {
                    // Chrominance needs a partner, so a 1 pixel wide level
                    // has nothing decodable and stays black.
                    for y in 0..h {
                        let mut x = 0;
                        while x + 1 < w {
                            let (p0, p1) = color::unpack_yuv_pair(
                                texel_at(pos(x, y)),
                                texel_at(pos(x + 1, y)),
                            );
                            writer.put(level, x, y, opaque, p0.0, p0.1, p0.2);
                            writer.put(level, x + 1, y, opaque, p1.0, p1.1, p1.2);
                            x += 2;
                        }
                    }
                } else {
                    for y in 0..h {
                        for x in 0..w {
                            let (a, r, g, b) =
                                color::unpack(pvr.pixel_format, texel_at(pos(x, y)), opaque)
                                    .unwrap_or_default();
                            writer.put(level, x, y, a, r, g, b);
                        }
                    }
                }
            }
        }
    }

    Ok(raster)
}

/// Decodes a legacy VQF texture. Mipmapped files never store the 1x1 level
/// (its slot is a single placeholder index), so that level decodes as black.
pub fn decode_vqf(vqf: &Vqf, options: &DecodeOptions) -> Result<Raster, DecodeError> {
    let has_alpha = format_has_alpha(vqf.format)?;
    let store_alpha = has_alpha && !options.discard_alpha;
    let width = vqf.width as usize;
    let mip_count = if vqf.mipmapped {
        (usize::BITS - width.leading_zeros()) as usize
    } else {
        1
    };

    let mut raster = Raster {
        width,
        height: width,
        rgb: (0..mip_count)
            .map(|l| vec![0; (width >> l).max(1) * (width >> l).max(1) * 3])
            .collect(),
        alpha: store_alpha.then(|| {
            (0..mip_count)
                .map(|l| vec![0; (width >> l).max(1) * (width >> l).max(1)])
                .collect()
        }),
        indices: None,
        palette: None,
    };

    let mut cursor = Cursor::new(&vqf.data);
    let codebook = parse_codebook(&mut cursor, vqf.codebook_len)?;
    let opaque = options.opaque();

    if vqf.mipmapped {
        cursor.skip(1)?;
    }

    let mut writer = LevelWriter {
        raster: &mut raster,
        format: vqf.format,
        store_alpha,
    };

    let coarsest = if vqf.mipmapped {
        // The 1x1 level was skipped above.
        mip_count - 2
    } else {
        0
    };
    for level in (0..=coarsest).rev() {
        let w = (width >> level).max(2);
        let (bw, bh) = (w / 2, w / 2);
        let (mask, shift) = twiddle::mask_shift(bw as u32, bh as u32);
        let bytes = cursor.take(bw * bh)?;
        for by in 0..bh {
            for bx in 0..bw {
                let pos = twiddle::untwiddled_pos(bx as u32, by as u32, mask, shift) as usize;
                let index = bytes[pos] as usize;
                let entry = &codebook[index & (vqf.codebook_len - 1)];
                writer.put_block(level, bx * 2, by * 2, entry, opaque);
            }
        }
    }

    Ok(raster)
}
