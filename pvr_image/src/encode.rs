//! Encoding [Raster]s into PVR/VQF containers.
use log::warn;
use pvr_lib::color::{PaletteFormat, PixelFormat, TexelPacker};
use pvr_lib::pvp::Pvp;
use pvr_lib::pvr::{vq_texture_type, Pvr, TextureType};
use pvr_lib::twiddle;
use pvr_lib::vq::{self, VqError, VqFormat, VqOptions};
use pvr_lib::vqf::Vqf;
use thiserror::Error;

use crate::raster::Raster;

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub color_format: PixelFormat,
    pub twiddled: bool,
    pub mipmaps: bool,
    /// Round stride payloads up to the next power-of-two allocation.
    pub pad: bool,
    /// 0 for direct colour, 4 or 8 for palettised output.
    pub palette_depth: u32,
    /// Entry format of the palette file written next to palettised
    /// textures.
    pub palette_format: PaletteFormat,
    /// Emit a GBIX chunk with this global index.
    pub global_index: Option<u32>,
    /// Alpha value assumed for pixels without an alpha plane.
    pub opaque_alpha: u8,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            color_format: PixelFormat::Rgb565,
            twiddled: true,
            mipmaps: false,
            pad: false,
            palette_depth: 0,
            palette_format: PaletteFormat::Argb8888,
            global_index: None,
            opaque_alpha: 0xFF,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("image dimensions {0}x{1} cannot be stored")]
    InvalidSize(usize, usize),

    #[error("stride width {0} must be a multiple of 32 between 32 and 992")]
    InvalidStrideWidth(usize),

    #[error("{0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Vq(#[from] VqError),
}

fn is_pow2_dimension(v: usize) -> bool {
    matches!(v, 8 | 16 | 32 | 64 | 128 | 256 | 512 | 1024)
}

/// Encodes a raster into a (non-VQ) PVR texture, plus the palette file for
/// palettised classes.
pub fn encode_pvr(
    raster: &Raster,
    options: &SaveOptions,
) -> Result<(Pvr, Option<Pvp>), EncodeError> {
    let mut raster = raster.clone();
    let mut mipmaps = options.mipmaps;
    let mut twiddled = options.twiddled;

    if options.palette_depth == 0 {
        if raster.palette.is_some() {
            raster.convert_to_32bit();
        }
    } else {
        match &raster.palette {
            None => {
                return Err(EncodeError::Unsupported(
                    "automatic palettisation of direct colour images is not supported",
                ))
            }
            Some(palette) if palette.depth > options.palette_depth => {
                warn!("8bpp palette stored at 4bpp, indices above 15 will wrap");
            }
            _ => {}
        }
    }

    match options.color_format {
        PixelFormat::Bump | PixelFormat::Yuv420 => {
            return Err(EncodeError::Unsupported("reserved pixel format"))
        }
        _ => {}
    }

    let width = raster.width;
    let height = raster.height;
    if width < 8 || height < 8 {
        return Err(EncodeError::InvalidSize(width, height));
    }

    if mipmaps && width != height {
        warn!("mipmapped textures must be square, skipping mipmap generation");
        mipmaps = false;
    }

    let stride = if !is_pow2_dimension(width) {
        if width % 32 != 0 || !(32..=992).contains(&width) {
            return Err(EncodeError::InvalidStrideWidth(width));
        }
        warn!("width is not a power of two, using the stride class");
        true
    } else {
        false
    };
    if !stride && !is_pow2_dimension(height) {
        return Err(EncodeError::InvalidSize(width, height));
    }

    let texture_type = if stride {
        mipmaps = false;
        twiddled = false;
        TextureType::Stride
    } else {
        match options.palette_depth {
            0 => {
                if mipmaps {
                    if twiddled {
                        TextureType::TwiddledMipmap
                    } else {
                        return Err(EncodeError::Unsupported(
                            "mipmapped untwiddled rectangles are reserved by the hardware",
                        ));
                    }
                } else if twiddled {
                    if width == height {
                        TextureType::Twiddled
                    } else {
                        TextureType::TwiddledRectangle
                    }
                } else {
                    TextureType::Rectangle
                }
            }
            4 => {
                twiddled = true;
                if mipmaps {
                    TextureType::Palette4Mipmap
                } else {
                    TextureType::Palette4
                }
            }
            8 => {
                twiddled = true;
                if mipmaps {
                    TextureType::Palette8Mipmap
                } else {
                    TextureType::Palette8
                }
            }
            _ => return Err(EncodeError::Unsupported("palette depth must be 4 or 8")),
        }
    };

    // The format byte: 555 shares the 1555 enumerator, palettised classes
    // leave it at zero.
    let pixel_format = match options.color_format {
        PixelFormat::Rgb555 => PixelFormat::Argb1555,
        _ if options.palette_depth != 0 => PixelFormat::Argb1555,
        other => other,
    };

    if mipmaps {
        if raster.mip_count() <= 1 {
            raster.generate_mipmaps();
        }
        if raster
            .alpha
            .as_ref()
            .is_some_and(|alpha| alpha.len() != raster.mip_count())
        {
            raster.generate_alpha_mipmaps();
        }
    }

    let mut data = Vec::new();
    let levels = if mipmaps { raster.mip_count() } else { 1 };

    if mipmaps {
        // Placeholder bytes before the 1x1 level.
        let placeholder = match options.palette_depth {
            8 => 3,
            _ => 2,
        };
        data.resize(placeholder, 0);
    }

    for level in (0..levels).rev() {
        let (w, h) = raster.level_dims(level);

        if options.palette_depth == 0 {
            let mut texels = vec![0u16; w * h];
            let mut packer = TexelPacker::new(options.color_format)
                .map_err(|_| EncodeError::Unsupported("reserved pixel format"))?;
            let (mask, shift) = twiddle::mask_shift(w as u32, h as u32);

            for y in 0..h {
                for x in 0..w {
                    let i = y * w + x;
                    let rgb = &raster.rgb[level];
                    let a = raster
                        .alpha
                        .as_ref()
                        .map(|alpha| alpha[level][i])
                        .unwrap_or(options.opaque_alpha);
                    let pos = if twiddled {
                        twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize
                    } else {
                        i
                    };
                    packer.push(
                        &mut texels,
                        pos,
                        x as u32,
                        a,
                        rgb[i * 3],
                        rgb[i * 3 + 1],
                        rgb[i * 3 + 2],
                    );
                }
            }
            for texel in texels {
                data.extend_from_slice(&texel.to_le_bytes());
            }
        } else {
            let indices = raster
                .indices
                .as_ref()
                .ok_or(EncodeError::Unsupported("palettised output needs indices"))?;
            let (mask, shift) = twiddle::mask_shift(w as u32, h as u32);
            if options.palette_depth == 4 {
                let len = (w * h) / 2;
                if len == 0 {
                    // The 4bpp 1x1 level stores no bytes of its own.
                    continue;
                }
                let mut packed = vec![0u8; len];
                for y in 0..h {
                    for x in 0..w {
                        let index = indices[level][y * w + x] & 0x0F;
                        let pos =
                            twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize;
                        packed[pos / 2] |= if y & 1 != 0 { index << 4 } else { index };
                    }
                }
                data.extend_from_slice(&packed);
            } else {
                let mut packed = vec![0u8; w * h];
                for y in 0..h {
                    for x in 0..w {
                        let pos =
                            twiddle::untwiddled_pos(x as u32, y as u32, mask, shift) as usize;
                        packed[pos] = indices[level][y * w + x];
                    }
                }
                data.extend_from_slice(&packed);
            }
        }
    }

    if stride && options.pad {
        let padded = width.next_power_of_two() * height.next_power_of_two() * 2;
        data.resize(data.len() + padded - width * height * 2, 0);
    }

    let pvp = if options.palette_depth != 0 {
        let palette = raster.palette.as_ref().expect("palette checked above");
        let len = 1usize << options.palette_depth;
        let entries: Vec<[u8; 4]> = (0..len)
            .map(|i| palette.entries.get(i).copied().unwrap_or([0, 0, 0, 0]))
            .collect();
        Some(Pvp::from_rgba(options.palette_format, &entries))
    } else {
        None
    };

    Ok((
        Pvr {
            global_index: options.global_index,
            pixel_format,
            texture_type,
            width: width as u16,
            height: height as u16,
            data,
        },
        pvp,
    ))
}

fn vq_payload(raster: &Raster, options: &VqOptions) -> Result<(vq::VqOutput, bool), EncodeError> {
    let mut raster = raster.clone();
    if raster.palette.is_some() {
        raster.convert_to_32bit();
    }
    if raster.width != raster.height {
        return Err(EncodeError::InvalidSize(raster.width, raster.height));
    }

    let alpha_used =
        options.alpha && raster.alpha.is_some() && options.format.supports_alpha();
    let output = vq::compress(
        &raster.rgb[0],
        raster.alpha.as_ref().map(|alpha| alpha[0].as_slice()),
        raster.width,
        options,
    )?;
    Ok((output, alpha_used))
}

/// VQ compresses a raster into a PVR texture. Returns the texture and the
/// RMS error per colour channel.
pub fn encode_vq(
    raster: &Raster,
    options: &VqOptions,
    global_index: Option<u32>,
) -> Result<(Pvr, f32), EncodeError> {
    let mut options = options.clone();
    options.include_header = false;
    let width = raster.width;
    let (output, _) = vq_payload(raster, &options)?;

    Ok((
        Pvr {
            global_index,
            pixel_format: options.format.pixel_format(),
            texture_type: vq_texture_type(width as u16, options.mipmap, output.codebook_len),
            width: width as u16,
            height: width as u16,
            data: output.data,
        },
        output.rms_error,
    ))
}

/// VQ compresses a raster into a legacy VQF file.
pub fn encode_vqf(raster: &Raster, options: &VqOptions) -> Result<(Vqf, f32), EncodeError> {
    let mut options = options.clone();
    options.include_header = false;
    let width = raster.width;
    let (output, alpha_used) = vq_payload(raster, &options)?;

    let format = match options.format {
        VqFormat::Argb1555 if !alpha_used => PixelFormat::Rgb555,
        other => other.pixel_format(),
    };

    Ok((
        Vqf {
            format,
            mipmapped: options.mipmap,
            width: width as u32,
            codebook_len: output.codebook_len,
            data: output.data,
        },
        output.rms_error,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_images_are_rejected() {
        let raster = Raster::new(4, 4);
        assert!(matches!(
            encode_pvr(&raster, &SaveOptions::default()),
            Err(EncodeError::InvalidSize(4, 4))
        ));
    }

    #[test]
    fn bad_stride_widths_are_rejected() {
        let raster = Raster::new(100, 16);
        assert!(matches!(
            encode_pvr(&raster, &SaveOptions::default()),
            Err(EncodeError::InvalidStrideWidth(100))
        ));
    }

    #[test]
    fn non_square_mipmaps_downgrade() {
        let raster = Raster::new(16, 8);
        let (pvr, _) = encode_pvr(
            &raster,
            &SaveOptions {
                mipmaps: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(pvr.texture_type, TextureType::TwiddledRectangle);
    }

    #[test]
    fn untwiddled_mipmaps_are_refused() {
        let raster = Raster::new(16, 16);
        assert!(encode_pvr(
            &raster,
            &SaveOptions {
                mipmaps: true,
                twiddled: false,
                ..Default::default()
            },
        )
        .is_err());
    }
}
