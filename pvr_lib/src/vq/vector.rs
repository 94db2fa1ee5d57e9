//! Pixel vectors and the per-level vector maps the quantiser works on.
//!
//! A vector packs a 2x2 block of pixels, 4 bytes each, in the order
//! top-left, top-right, bottom-left, bottom-right. During training it carries
//! a mipmap weight, after assignment the chosen codebook index.

pub const VECLEN: usize = 16;
pub const BLOCK: usize = 2;
pub const COMPS: usize = 4;

pub const MAX_MIP_LEVELS: usize = 11;

/// Per-level clustering weights, finest map first. Coarser maps count as if
/// their pixels appeared this many times, doubling per level past the first
/// two, so low-resolution detail survives quantisation without swamping the
/// top map.
pub const MIP_WEIGHTS: [i32; MAX_MIP_LEVELS] = [1, 1, 2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Training weight before assignment, codebook index after. The two uses
/// never overlap in time.
#[derive(Debug, Clone, Copy)]
pub enum WeightOrCode {
    Weight(i32),
    Code(u8),
}

#[derive(Debug, Clone)]
pub struct PixelVector {
    /// Raw source data: `[r, g, b, a]` per pixel, or `[y, u/v, 0, 0]` once
    /// converted to YUV.
    pub v: [u8; VECLEN],
    /// The perception space projection used as the clustering metric.
    pub pv: [f32; VECLEN],
    pub wc: WeightOrCode,
}

impl PixelVector {
    pub fn new(weight: i32) -> Self {
        Self {
            v: [0; VECLEN],
            pv: [0.0; VECLEN],
            wc: WeightOrCode::Weight(weight),
        }
    }

    pub fn weight(&self) -> i32 {
        match self.wc {
            WeightOrCode::Weight(w) => w,
            WeightOrCode::Code(_) => unreachable!("weight read after assignment"),
        }
    }

    pub fn code(&self) -> u8 {
        match self.wc {
            WeightOrCode::Code(c) => c,
            WeightOrCode::Weight(_) => unreachable!("code read before assignment"),
        }
    }
}

/// One mipmap level viewed as a grid of 2x2 pixel vectors.
///
/// The 1x1 pixel level is stored as a single vector whose four pixels are
/// identical.
pub struct VectorMap {
    /// Grid width in vectors.
    pub width: usize,
    /// Grid height in vectors.
    pub height: usize,
    pub vecs: Vec<PixelVector>,
}

impl VectorMap {
    fn with_pixel_width(pixel_width: usize, weight: i32) -> Self {
        // The 1x1 pixel level still uses a whole 2x2 vector.
        let pixel_width = pixel_width.max(BLOCK);
        let dim = pixel_width / BLOCK;
        Self {
            width: dim,
            height: dim,
            vecs: vec![PixelVector::new(weight); dim * dim],
        }
    }

    pub fn pixel_width(&self) -> usize {
        self.width * BLOCK
    }

    /// Packs a row-major byte image into vectors.
    ///
    /// `rgb` holds 3 bytes per pixel, `alpha` one; a missing alpha plane
    /// reads as fully opaque.
    pub fn from_rgb(
        rgb: &[u8],
        alpha: Option<&[u8]>,
        pixel_width: usize,
        bgr_order: bool,
        invert_alpha: bool,
        weight: i32,
    ) -> Self {
        let mut map = Self::with_pixel_width(pixel_width, weight);
        let alpha_flip = if invert_alpha { 0xFF } else { 0x00 };

        for vy in 0..map.height {
            for vx in 0..map.width {
                let vec = &mut map.vecs[vy * map.width + vx];
                let mut k = 0;
                for py in vy * BLOCK..vy * BLOCK + BLOCK {
                    for px in vx * BLOCK..vx * BLOCK + BLOCK {
                        let src = (py * pixel_width + px) * 3;
                        if bgr_order {
                            vec.v[k] = rgb[src + 2];
                            vec.v[k + 1] = rgb[src + 1];
                            vec.v[k + 2] = rgb[src];
                        } else {
                            vec.v[k] = rgb[src];
                            vec.v[k + 1] = rgb[src + 1];
                            vec.v[k + 2] = rgb[src + 2];
                        }
                        vec.v[k + 3] = match alpha {
                            Some(alpha) => alpha[py * pixel_width + px] ^ alpha_flip,
                            None => 0xFF,
                        };
                        k += COMPS;
                    }
                }
            }
        }
        map
    }

    /// Computes the next coarser level with a 2x2 box filter, rounding to
    /// nearest.
    pub fn downsample(&self, weight: i32) -> Self {
        if self.width == 1 {
            // The 2x2 pixel level collapses to a single pixel replicated
            // over the whole vector.
            let mut lower = Self::with_pixel_width(1, weight);
            let src = &self.vecs[0];
            for k in 0..COMPS {
                let sum: u32 = (0..4).map(|p| src.v[k + p * COMPS] as u32).sum();
                let av = ((sum + 2) >> 2) as u8;
                for p in 0..4 {
                    lower.vecs[0].v[k + p * COMPS] = av;
                }
            }
            return lower;
        }

        let mut lower = Self::with_pixel_width(self.pixel_width() / 2, weight);
        for vy in 0..lower.height {
            for vx in 0..lower.width {
                let dst = vy * lower.width + vx;
                let mut k = 0;
                // Each source vector averages down to one destination pixel.
                for sy in 0..BLOCK {
                    for sx in 0..BLOCK {
                        let src = &self.vecs[(vy * BLOCK + sy) * self.width + vx * BLOCK + sx];
                        for c in 0..COMPS {
                            let sum: u32 = (0..4).map(|p| src.v[c + p * COMPS] as u32).sum();
                            lower.vecs[dst].v[k] = ((sum + 2) >> 2) as u8;
                            k += 1;
                        }
                    }
                }
            }
        }
        lower
    }

    /// Converts the level from RGB to YUV422 in place, one chrominance pair
    /// per two horizontally adjacent pixels. Do not run this on the 1x1
    /// level, which stays RGB.
    pub fn convert_to_yuv(&mut self) {
        const SCALE: f32 = 1.0 / 187.0;
        for vec in &mut self.vecs {
            for row in 0..BLOCK {
                let base = row * 2 * COMPS;
                let p0 = &vec.v[base..base + 3];
                let p1 = &vec.v[base + COMPS..base + COMPS + 3];

                let yuv = |p: &[u8], c0: f32, c1: f32, c2: f32| {
                    (p[0] as f32 * c0 + p[1] as f32 * c1 + p[2] as f32 * c2) * SCALE
                };
                let y0 = yuv(p0, 55.0, 110.0, 22.0);
                let u0 = yuv(p0, -32.0, -64.0, 96.0);
                let v0 = yuv(p0, 96.0, -80.0, -16.0);
                let y1 = yuv(p1, 55.0, 110.0, 22.0);
                let u1 = yuv(p1, -32.0, -64.0, 96.0);
                let v1 = yuv(p1, 96.0, -80.0, -16.0);

                vec.v[base] = (y0 + 0.5) as u8;
                vec.v[base + 1] = (((u0 + u1) * 0.5 + 128.0) as i32).clamp(0, 255) as u8;
                vec.v[base + COMPS] = (y1 + 0.5) as u8;
                vec.v[base + COMPS + 1] = (((v0 + v1) * 0.5 + 128.0) as i32).clamp(0, 255) as u8;
                vec.v[base + 2] = 0;
                vec.v[base + 3] = 0;
                vec.v[base + COMPS + 2] = 0;
                vec.v[base + COMPS + 3] = 0;
            }
        }
    }
}

/// Builds the full pyramid from the top level down to the 1x1 map.
pub fn build_pyramid(top: VectorMap, mipmap: bool) -> Vec<VectorMap> {
    let mut maps = vec![top];
    if mipmap {
        let top_width = maps[0].pixel_width();
        let mut level = 1;
        while top_width >> level > 0 {
            let weight = MIP_WEIGHTS[level.min(MAX_MIP_LEVELS - 1)];
            let next = maps[maps.len() - 1].downsample(weight);
            maps.push(next);
            level += 1;
        }
    }
    maps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_packing_order_is_block_major() {
        // 4x4 image with pixel value = linear index.
        let rgb: Vec<u8> = (0..16u8).flat_map(|i| [i, i, i]).collect();
        let map = VectorMap::from_rgb(&rgb, None, 4, false, false, 1);
        assert_eq!(map.width, 2);
        // Top-left vector covers pixels 0, 1, 4, 5.
        assert_eq!(map.vecs[0].v[0], 0);
        assert_eq!(map.vecs[0].v[4], 1);
        assert_eq!(map.vecs[0].v[8], 4);
        assert_eq!(map.vecs[0].v[12], 5);
        assert_eq!(map.vecs[0].v[3], 0xFF);
    }

    #[test]
    fn pyramid_ends_in_replicated_single_pixel() {
        let rgb = vec![100u8; 8 * 8 * 3];
        let maps = build_pyramid(VectorMap::from_rgb(&rgb, None, 8, false, false, 1), true);
        // 8x8, 4x4, 2x2, 1x1.
        assert_eq!(maps.len(), 4);
        assert_eq!(maps[3].width, 1);
        let one = &maps[3].vecs[0];
        for p in 0..4 {
            assert_eq!(one.v[p * COMPS], 100);
        }
    }

    #[test]
    fn downsample_rounds_to_nearest() {
        let mut rgb = vec![0u8; 4 * 4 * 3];
        // One 2x2 block of 1s averages to (4 + 2) >> 2 = 1.
        for p in [0, 1, 4, 5] {
            rgb[p * 3] = 1;
        }
        let maps = build_pyramid(VectorMap::from_rgb(&rgb, None, 4, false, false, 1), true);
        assert_eq!(maps[1].vecs[0].v[0], 1);
    }
}
