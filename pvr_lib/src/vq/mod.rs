//! Vector quantised compression of square textures.
//!
//! A 2x2 pixel block becomes one 16 byte vector; up to 256 representative
//! vectors are chosen by recursive principal axis partitioning, refined with
//! Lloyd passes, and every block is encoded as a single codebook index.
//!
//! [compress] produces the raw VQ payload (optionally with the 12 byte VQF
//! header): the codebook followed by the index stream, coarsest mipmap
//! first, in twiddled order.
use log::debug;
use thiserror::Error;

mod assign;
mod partition;
mod perception;
mod reorder;
mod tree;
mod vector;

pub use perception::{Metric, MetricBase};
pub use tree::SearchStats;

use crate::color::quantize_channel;
use crate::twiddle;
use assign::{map_image_to_indices, SumUsage};
use partition::partition_vectors;
use perception::PerceptionSpace;
use vector::{build_pyramid, PixelVector, VectorMap, WeightOrCode, COMPS, VECLEN};

pub const MAX_CODES: usize = 256;
const MIN_CODES: usize = 8;
const MAX_EXTRA_GLA_PASSES: usize = 6;

/// Output colour format of a VQ codebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VqFormat {
    /// Best for quality translucency.
    Argb4444,
    /// Doubles as the opaque 555 format.
    Argb1555,
    Rgb565,
    Yuv422,
}

impl VqFormat {
    /// Stored bit depth per `[r, g, b, a]` channel.
    fn bit_depths(&self) -> [u32; 4] {
        match self {
            VqFormat::Argb4444 => [4, 4, 4, 4],
            VqFormat::Argb1555 => [5, 5, 5, 1],
            VqFormat::Rgb565 => [5, 6, 5, 0],
            VqFormat::Yuv422 => [8, 8, 0, 0],
        }
    }

    pub fn supports_alpha(&self) -> bool {
        matches!(self, VqFormat::Argb4444 | VqFormat::Argb1555)
    }

    pub fn pixel_format(&self) -> crate::color::PixelFormat {
        match self {
            VqFormat::Argb4444 => crate::color::PixelFormat::Argb4444,
            VqFormat::Argb1555 => crate::color::PixelFormat::Argb1555,
            VqFormat::Rgb565 => crate::color::PixelFormat::Rgb565,
            VqFormat::Yuv422 => crate::color::PixelFormat::Yuv422,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DitherLevel {
    None,
    /// Half strength error diffusion.
    Subtle,
    Full,
}

#[derive(Debug, Clone)]
pub struct VqOptions {
    pub format: VqFormat,
    /// Requested codebook size, rounded up to the next supported power of
    /// two (8..=256).
    pub num_codes: usize,
    pub mipmap: bool,
    /// Use the supplied alpha plane. Ignored for formats without alpha.
    pub alpha: bool,
    /// Input bytes are ordered B, G, R.
    pub bgr_order: bool,
    /// Flip the supplied alpha values (old PVR1 sources).
    pub invert_alpha: bool,
    /// Prepend the 12 byte VQF header to the payload.
    pub include_header: bool,
    pub dither: DitherLevel,
    pub metric: Metric,
    /// Additional Lloyd refinement passes beyond the mandatory one.
    /// The gains fade quickly; 0 is the sensible default.
    pub extra_gla_passes: usize,
    /// Renumber codes for spatial locality. Decoded pixels are identical
    /// either way, only the on-disk index ordering changes.
    pub reorder: bool,
}

impl Default for VqOptions {
    fn default() -> Self {
        Self {
            format: VqFormat::Rgb565,
            num_codes: MAX_CODES,
            mipmap: true,
            alpha: false,
            bgr_order: false,
            invert_alpha: false,
            include_header: false,
            dither: DitherLevel::Subtle,
            metric: Metric::default(),
            extra_gla_passes: 0,
            reorder: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum VqError {
    #[error("texture width {0} must be a power of two between 8 and 1024, and square")]
    InvalidSize(usize),

    #[error("{0}")]
    InvalidParameter(&'static str),
}

pub struct VqOutput {
    /// Optional VQF header, then the codebook, then one index byte per 2x2
    /// block, coarsest mipmap level first.
    pub data: Vec<u8>,
    /// Codes the partitioner actually needed (including the reserved YUV
    /// 1x1 code). Simple images use fewer than requested.
    pub codes_used: usize,
    /// The rounded codebook size written to the payload.
    pub codebook_len: usize,
    /// RMS error per colour channel.
    pub rms_error: f32,
    pub stats: SearchStats,
}

fn validate_width(width: usize) -> Result<(), VqError> {
    match width {
        8 | 16 | 32 | 64 | 128 | 256 | 512 | 1024 => Ok(()),
        _ => Err(VqError::InvalidSize(width)),
    }
}

fn rounded_codebook_len(requested: usize) -> Result<usize, VqError> {
    let mut len = MIN_CODES;
    while len < requested {
        len <<= 1;
    }
    if len > MAX_CODES {
        return Err(VqError::InvalidParameter("codebook size above 256"));
    }
    Ok(len)
}

/// Bytes of output [compress] will produce for these options.
pub fn required_size(width: usize, opts: &VqOptions) -> Result<usize, VqError> {
    validate_width(width)?;
    let codebook_len = rounded_codebook_len(opts.num_codes)?;

    let mut size = if opts.include_header { 12 } else { 0 };
    size += 8 * codebook_len;

    if opts.mipmap {
        // One index for the 1x1 level, then every level below the top.
        size += 1;
        let mut dim = 1;
        while dim < width / 2 {
            size += dim * dim;
            dim *= 2;
        }
    }
    size += (width / 2) * (width / 2);
    Ok(size)
}

/// Averages a sum of assigned vectors into a codeword, quantised to the
/// output bit depth with the rounding error carried across the four pixels
/// of the block.
fn sum_to_rep(sum: &[i32; VECLEN], number: i32, format: VqFormat, rep: &mut PixelVector) {
    let inv = 1.0 / number as f32;
    let depths = format.bit_depths();
    let mut errors = [0i32; COMPS];

    for k in 0..VECLEN {
        let mut val = (sum[k] as f32 * inv + 0.5) as i32;

        // YUV components are stored at 8 bits, nothing to diffuse.
        rep.v[k] = if format == VqFormat::Yuv422 {
            val as u8
        } else {
            let comp = k & (COMPS - 1);
            val = (val + errors[comp]).clamp(0, 255);
            let out = quantize_channel(depths[comp], val);
            errors[comp] = val - out as i32;
            out
        };
    }
}

fn pack_codebook_texel(format: VqFormat, v: &[u8]) -> u16 {
    let depths = format.bit_depths();
    // A depth of 0 shifts the channel away entirely.
    let r = (v[0] as u32) >> (8 - depths[0]);
    let g = (v[1] as u32) >> (8 - depths[1]);
    let b = (v[2] as u32) >> (8 - depths[2]);
    let a = (v[3] as u32) >> (8 - depths[3]);

    (match format {
        VqFormat::Argb4444 => (a << 12) | (r << 8) | (g << 4) | b,
        VqFormat::Rgb565 => (r << 11) | (g << 5) | b,
        VqFormat::Argb1555 => (a << 15) | (r << 10) | (g << 5) | b,
        VqFormat::Yuv422 => (r << 8) | g,
    }) as u16
}

/// Codebook then indices. Codebook texels sit in 2x2 twiddled order
/// (raster pixels 0, 2, 1, 3) so they detwiddle back to raster order.
fn write_payload(
    out: &mut Vec<u8>,
    maps: &[VectorMap],
    reps: &[PixelVector],
    codebook_len: usize,
    format: VqFormat,
    reorder: &[u8],
) {
    let mut entry_format = format;
    for (i, &old) in reorder.iter().enumerate().take(codebook_len) {
        // The reserved YUV 1x1 code is a plain 565 texel.
        if i == codebook_len - 1 && format == VqFormat::Yuv422 && maps.len() > 1 {
            entry_format = VqFormat::Rgb565;
        }
        let vec = &reps[old as usize];
        for pixel in [0usize, 2, 1, 3] {
            let texel = pack_codebook_texel(entry_format, &vec.v[pixel * COMPS..]);
            out.extend_from_slice(&texel.to_le_bytes());
        }
    }

    let mut inverse = [0u8; MAX_CODES];
    for (new, &old) in reorder.iter().enumerate() {
        inverse[old as usize] = new as u8;
    }

    // Indices go out coarsest level first, each level in twiddled order,
    // biased toward the top of the 256 code space when the book is small.
    let bias = (MAX_CODES - codebook_len) as u8;
    for map in maps.iter().rev() {
        for addr in 0..(map.width * map.height) as u32 {
            let (x, y) = twiddle::detwiddle(addr);
            let code = map.vecs[y as usize * map.width + x as usize].code();
            out.push(inverse[code as usize] + bias);
        }
    }
}

fn vqf_header(
    format: VqFormat,
    alpha: bool,
    mipmapped: bool,
    width: usize,
    codebook_len: usize,
) -> Result<[u8; 12], VqError> {
    let mut header = [0u8; 12];
    header[0] = b'P';
    header[1] = b'V';
    let mut map_type = match format {
        VqFormat::Argb4444 => 9,
        VqFormat::Argb1555 => {
            if alpha {
                8
            } else {
                6
            }
        }
        VqFormat::Rgb565 => 7,
        VqFormat::Yuv422 => 10,
    };
    if mipmapped {
        map_type |= 64;
    }
    header[2] = map_type;
    header[3] = crate::vqf::size_code_for_width(width as u32)
        .ok_or(VqError::InvalidParameter("width has no VQF size code"))?;
    header[5] = crate::vqf::code_for_codebook_len(codebook_len)
        .ok_or(VqError::InvalidParameter("codebook size has no VQF code"))?;
    Ok(header)
}

/// Compresses a square, power-of-two raw image into a VQ payload.
///
/// `rgb` is 3 bytes per pixel, row major; `alpha` is an optional separate
/// plane. Missing alpha reads as opaque.
pub fn compress(
    rgb: &[u8],
    alpha: Option<&[u8]>,
    width: usize,
    opts: &VqOptions,
) -> Result<VqOutput, VqError> {
    validate_width(width)?;
    if rgb.len() != width * width * 3 {
        return Err(VqError::InvalidParameter("rgb length does not match width"));
    }
    if let Some(alpha) = alpha {
        if alpha.len() != width * width {
            return Err(VqError::InvalidParameter(
                "alpha length does not match width",
            ));
        }
    }
    if opts.extra_gla_passes > MAX_EXTRA_GLA_PASSES {
        return Err(VqError::InvalidParameter("too many refinement passes"));
    }

    let codebook_len = rounded_codebook_len(opts.num_codes)?;

    // Opaque formats never look at alpha.
    let alpha_on = opts.alpha && alpha.is_some() && opts.format.supports_alpha();
    let alpha = if alpha_on { alpha } else { None };

    let top = VectorMap::from_rgb(
        rgb,
        alpha,
        width,
        opts.bgr_order,
        opts.invert_alpha,
        vector::MIP_WEIGHTS[0],
    );
    let mut maps = build_pyramid(top, opts.mipmap);
    let num_maps = maps.len();

    let mut reps = vec![PixelVector::new(0); codebook_len];
    let mut reserved = 0;
    let mut skip_maps = 0;
    let mut dither_first_only = false;

    let space = if opts.format == VqFormat::Yuv422 {
        maps[0].convert_to_yuv();
        dither_first_only = true;

        if opts.mipmap {
            for map in &mut maps[1..num_maps - 1] {
                map.convert_to_yuv();
            }

            // The 1x1 level stays RGB and takes the last codebook slot.
            reserved = 1;
            skip_maps = 1;
            let mut sum = [0i32; VECLEN];
            for (s, v) in sum.iter_mut().zip(maps[num_maps - 1].vecs[0].v.iter()) {
                *s = *v as i32;
            }
            sum_to_rep(&sum, 1, VqFormat::Rgb565, &mut reps[codebook_len - 1]);
            maps[num_maps - 1].vecs[0].wc = WeightOrCode::Code((codebook_len - 1) as u8);
        }

        PerceptionSpace::yuv(opts.metric)
    } else {
        PerceptionSpace::rgb(opts.metric)
    };

    let dims = if alpha_on {
        VECLEN
    } else if opts.format == VqFormat::Yuv422 {
        8
    } else {
        12
    };

    let outcome = partition_vectors(
        &mut maps,
        num_maps - skip_maps,
        codebook_len - reserved,
        dims,
        &space,
    );
    let mut tree = outcome.tree;
    let codes_used = outcome.partitions.len();
    debug!(
        "partitioned {} vectors into {} codes",
        outcome.vector_count, codes_used
    );

    for (i, part) in outcome.partitions.iter().enumerate() {
        let mut sum = [0i32; VECLEN];
        for r in &outcome.refs[part.start..part.start + part.len] {
            let vec = &maps[r.level as usize].vecs[r.idx as usize];
            for (s, v) in sum.iter_mut().zip(vec.v.iter()) {
                *s += *v as i32;
            }
        }
        sum_to_rep(&sum, part.len as i32, opts.format, &mut reps[i]);
        tree.set_leaf_rep(part.node, i);
    }

    let mut sums = vec![SumUsage::new(); codebook_len];
    let mut stats = SearchStats::default();
    let mut error = 0f64;

    for pass in (0..=opts.extra_gla_passes).rev() {
        // Dithering only runs on the final pass.
        let pass_dither = if pass == 0 {
            opts.dither
        } else {
            DitherLevel::None
        };

        error = map_image_to_indices(
            &mut maps,
            num_maps - skip_maps,
            &mut tree,
            &reps,
            codes_used,
            &mut sums,
            pass_dither,
            dither_first_only,
            &mut stats,
        );

        // Recentre every used codeword on its actual assignees.
        for (rep, entry) in reps.iter_mut().zip(sums.iter()).take(codes_used) {
            if entry.usage > 0 {
                sum_to_rep(&entry.sum, entry.usage, opts.format, rep);
            }
        }
    }

    let error_dims = if alpha_on { VECLEN } else { 12 };
    let rms_error = (error / (outcome.vector_count * error_dims) as f64).sqrt() as f32;

    let reorder = if opts.reorder {
        reorder::optimise_placement(&maps, num_maps, codebook_len)
    } else {
        (0..codebook_len as u16).map(|i| i as u8).collect()
    };

    let mut data = Vec::with_capacity(required_size(width, opts)?);
    if opts.include_header {
        data.extend_from_slice(&vqf_header(
            opts.format,
            alpha_on,
            num_maps > 1,
            width,
            codebook_len,
        )?);
    }
    write_payload(&mut data, &maps, &reps, codebook_len, opts.format, &reorder);

    Ok(VqOutput {
        data,
        codes_used: codes_used + reserved,
        codebook_len,
        rms_error,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codebook_rounding() {
        assert_eq!(rounded_codebook_len(1).unwrap(), 8);
        assert_eq!(rounded_codebook_len(8).unwrap(), 8);
        assert_eq!(rounded_codebook_len(9).unwrap(), 16);
        assert_eq!(rounded_codebook_len(200).unwrap(), 256);
        assert!(rounded_codebook_len(257).is_err());
    }

    #[test]
    fn size_rule_counts_every_level() {
        let opts = VqOptions {
            num_codes: 16,
            include_header: false,
            ..Default::default()
        };
        // 16 codebook entries of 8 bytes, then 1 + 1 + 4 + 16 indices.
        assert_eq!(required_size(8, &opts).unwrap(), 16 * 8 + 22);

        let header = VqOptions {
            include_header: true,
            ..opts
        };
        assert_eq!(required_size(8, &header).unwrap(), 12 + 16 * 8 + 22);
    }

    #[test]
    fn invalid_widths_are_rejected() {
        let opts = VqOptions::default();
        assert!(matches!(
            compress(&[0; 12 * 12 * 3], None, 12, &opts),
            Err(VqError::InvalidSize(12))
        ));
        assert!(required_size(4, &opts).is_err());
    }

    #[test]
    fn solid_image_collapses_to_one_code() {
        let rgb: Vec<u8> = std::iter::repeat([0xFF, 0, 0])
            .take(8 * 8)
            .flatten()
            .collect();
        let opts = VqOptions {
            num_codes: 16,
            mipmap: true,
            dither: DitherLevel::None,
            ..Default::default()
        };
        let out = compress(&rgb, None, 8, &opts).unwrap();

        assert_eq!(out.codes_used, 1);
        assert_eq!(out.codebook_len, 16);
        assert_eq!(out.rms_error, 0.0);
        assert_eq!(out.data.len(), required_size(8, &opts).unwrap());

        // Every index byte names the same (biased) code.
        let indices = &out.data[16 * 8..];
        assert_eq!(indices.len(), 22);
        let first = indices[0];
        assert!(first >= (MAX_CODES - 16) as u8);
        assert!(indices.iter().all(|&i| i == first));
    }

    #[test]
    fn dithered_encode_stays_deterministic() {
        let mut rgb = vec![0u8; 16 * 16 * 3];
        for (i, byte) in rgb.iter_mut().enumerate() {
            *byte = (i * 7 % 251) as u8;
        }
        let opts = VqOptions {
            num_codes: 32,
            dither: DitherLevel::Full,
            mipmap: false,
            ..Default::default()
        };
        let a = compress(&rgb, None, 16, &opts).unwrap();
        let b = compress(&rgb, None, 16, &opts).unwrap();
        assert_eq!(a.data, b.data);
        assert!(a.stats.queries > 0);
    }
}
