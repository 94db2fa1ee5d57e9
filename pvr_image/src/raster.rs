//! The in-memory image: RGB mipmap levels plus optional alpha and palette
//! index planes.
use image::RgbaImage;

/// An indexed image's palette, up to 256 entries of 8-bit `(a, r, g, b)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    /// Index bits per pixel: 4 or 8.
    pub depth: u32,
    pub entries: Vec<[u8; 4]>,
}

impl Palette {
    pub fn len(&self) -> usize {
        1 << self.depth
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn entry(&self, index: usize) -> [u8; 4] {
        self.entries.get(index).copied().unwrap_or([0xFF, 0, 0, 0])
    }
}

/// A mipmapped raster image.
///
/// Level 0 is the full resolution image; coarser levels halve both
/// dimensions. `rgb` holds 3 bytes per pixel row-major, `alpha` and
/// `indices` one byte per pixel. Indexed images keep their index planes
/// alongside the palette until [convert_to_32bit](Raster::convert_to_32bit).
#[derive(Debug, Clone, Default)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<Vec<u8>>,
    pub alpha: Option<Vec<Vec<u8>>>,
    pub indices: Option<Vec<Vec<u8>>>,
    pub palette: Option<Palette>,
}

impl Raster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            rgb: vec![vec![0; width * height * 3]],
            alpha: None,
            indices: None,
            palette: None,
        }
    }

    pub fn from_rgb(width: usize, height: usize, rgb: Vec<u8>) -> Self {
        Self {
            width,
            height,
            rgb: vec![rgb],
            alpha: None,
            indices: None,
            palette: None,
        }
    }

    pub fn mip_count(&self) -> usize {
        self.rgb.len()
    }

    /// Mip levels a full chain down to 1x1 would have.
    pub fn full_mip_count(&self) -> usize {
        (usize::BITS - self.width.leading_zeros()) as usize
    }

    pub fn level_dims(&self, level: usize) -> (usize, usize) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Replaces this raster's contents with another's.
    pub fn replace_with(&mut self, other: Raster) {
        *self = other;
    }

    /// Appends an alpha channel initialised to zero on every level.
    pub fn add_alpha(&mut self) {
        if self.alpha.is_none() {
            let levels = (0..self.mip_count())
                .map(|level| {
                    let (w, h) = self.level_dims(level);
                    vec![0u8; w * h]
                })
                .collect();
            self.alpha = Some(levels);
        }
    }

    /// Rebuilds the mipmap chain from level 0 with a 2x2 box filter.
    /// Requires a square power-of-two image.
    pub fn generate_mipmaps(&mut self) {
        self.rgb.truncate(1);
        let mut width = self.width;
        let mut height = self.height;
        while width > 1 && height > 1 {
            let src = &self.rgb[self.rgb.len() - 1];
            self.rgb.push(resample_2x2(src, width, height, 3));
            width /= 2;
            height /= 2;
        }
        if let Some(indices) = &mut self.indices {
            indices.truncate(1);
            let mut width = self.width;
            let mut height = self.height;
            while width > 1 && height > 1 {
                let src = &indices[indices.len() - 1];
                // Index planes cannot be averaged, take the top-left texel.
                indices.push(resample_pick(src, width, height));
                width /= 2;
                height /= 2;
            }
        }
        self.generate_alpha_mipmaps();
    }

    /// Extends the alpha chain to match the RGB chain.
    pub fn generate_alpha_mipmaps(&mut self) {
        let target = self.rgb.len();
        if let Some(alpha) = &mut self.alpha {
            alpha.truncate(1);
            let mut width = self.width;
            let mut height = self.height;
            while alpha.len() < target {
                let src = &alpha[alpha.len() - 1];
                alpha.push(resample_2x2(src, width, height, 1));
                width /= 2;
                height /= 2;
            }
        }
    }

    /// Expands an indexed image to plain 32-bit by palette lookup. The
    /// index planes and palette are dropped.
    pub fn convert_to_32bit(&mut self) {
        let (Some(indices), Some(palette)) = (self.indices.take(), self.palette.take()) else {
            self.indices = None;
            return;
        };

        let mut rgb_levels = Vec::with_capacity(indices.len());
        let mut alpha_levels = Vec::with_capacity(indices.len());
        for plane in &indices {
            let mut rgb = Vec::with_capacity(plane.len() * 3);
            let mut alpha = Vec::with_capacity(plane.len());
            for &index in plane {
                let [a, r, g, b] = palette.entry(index as usize);
                rgb.extend_from_slice(&[r, g, b]);
                alpha.push(a);
            }
            rgb_levels.push(rgb);
            alpha_levels.push(alpha);
        }
        self.rgb = rgb_levels;
        self.alpha = Some(alpha_levels);
    }

    /// Mirrors every plane of every level.
    pub fn flip(&mut self, horizontal: bool, vertical: bool) {
        for level in 0..self.mip_count() {
            let (w, h) = self.level_dims(level);
            flip_plane(&mut self.rgb[level], w, h, 3, horizontal, vertical);
            if let Some(alpha) = &mut self.alpha {
                flip_plane(&mut alpha[level], w, h, 1, horizontal, vertical);
            }
            if let Some(indices) = &mut self.indices {
                flip_plane(&mut indices[level], w, h, 1, horizontal, vertical);
            }
        }
    }

    /// Copies one level out as an RGBA image.
    pub fn to_image(&self, level: usize) -> Option<RgbaImage> {
        let rgb = self.rgb.get(level)?;
        let (w, h) = self.level_dims(level);
        let mut out = RgbaImage::new(w as u32, h as u32);
        for (i, pixel) in out.pixels_mut().enumerate() {
            let a = self
                .alpha
                .as_ref()
                .map(|alpha| alpha[level][i])
                .unwrap_or(0xFF);
            pixel.0 = [rgb[i * 3], rgb[i * 3 + 1], rgb[i * 3 + 2], a];
        }
        Some(out)
    }

    /// Builds a single-level raster from an RGBA image. The alpha plane is
    /// kept only when any pixel is not fully opaque.
    pub fn from_image(image: &RgbaImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut rgb = Vec::with_capacity(width * height * 3);
        let mut alpha = Vec::with_capacity(width * height);
        for pixel in image.pixels() {
            rgb.extend_from_slice(&pixel.0[0..3]);
            alpha.push(pixel.0[3]);
        }
        let mut raster = Raster::from_rgb(width, height, rgb);
        if alpha.iter().any(|&a| a != 0xFF) {
            raster.alpha = Some(vec![alpha]);
        }
        raster
    }
}

/// 2x2 box filter halving both dimensions, `stride` bytes per pixel.
fn resample_2x2(src: &[u8], width: usize, height: usize, stride: usize) -> Vec<u8> {
    let (new_w, new_h) = (width / 2, height / 2);
    let mut out = vec![0u8; new_w * new_h * stride];
    for y in 0..new_h {
        for x in 0..new_w {
            for c in 0..stride {
                let at = |px: usize, py: usize| src[(py * width + px) * stride + c] as u32;
                let sum = at(2 * x, 2 * y)
                    + at(2 * x + 1, 2 * y)
                    + at(2 * x, 2 * y + 1)
                    + at(2 * x + 1, 2 * y + 1);
                out[(y * new_w + x) * stride + c] = (sum / 4) as u8;
            }
        }
    }
    out
}

fn resample_pick(src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let (new_w, new_h) = (width / 2, height / 2);
    let mut out = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        for x in 0..new_w {
            out[y * new_w + x] = src[2 * y * width + 2 * x];
        }
    }
    out
}

fn flip_plane(
    plane: &mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    horizontal: bool,
    vertical: bool,
) {
    if horizontal {
        for y in 0..height {
            let row = &mut plane[y * width * stride..(y + 1) * width * stride];
            for x in 0..width / 2 {
                for c in 0..stride {
                    row.swap(x * stride + c, (width - 1 - x) * stride + c);
                }
            }
        }
    }
    if vertical {
        for y in 0..height / 2 {
            let (top, rest) = plane.split_at_mut((height - 1 - y) * width * stride);
            let top_row = &mut top[y * width * stride..(y + 1) * width * stride];
            let bottom_row = &mut rest[..width * stride];
            top_row.swap_with_slice(bottom_row);
        }
    }
}
