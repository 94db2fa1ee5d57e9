//! Projection of raw pixel vectors into the perception space the quantiser
//! measures distances in.
//!
//! The projection transposes the four pixels into component planes
//! (`R0..R3, G0..G3, B0..B3, A0..A3`), optionally weighting channels, and can
//! follow up with a 2x2 Hadamard transform per plane so high frequency
//! detail costs less error.
use super::vector::{COMPS, VECLEN};

/// How colour differences are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricBase {
    /// All components weigh the same.
    Equal,
    /// Channels weighted toward the eye's sensitivity.
    Weighted,
}

/// Public metric selection: a base metric optionally combined with the
/// frequency transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub base: MetricBase,
    /// Tolerate larger errors in high frequency detail.
    pub frequency: bool,
}

impl Default for Metric {
    fn default() -> Self {
        Self {
            base: MetricBase::Equal,
            frequency: false,
        }
    }
}

/// Channel weighting actually applied, after YUV rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Projection {
    Equal,
    WeightedRgb,
    WeightedYuv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrequencyMode {
    Off,
    /// Transform every component plane.
    All,
    /// Transform only the first plane (the Y plane for YUV).
    FirstPlane,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PerceptionSpace {
    pub projection: Projection,
    pub frequency: FrequencyMode,
}

impl PerceptionSpace {
    /// The space used for RGB(A) data.
    pub fn rgb(metric: Metric) -> Self {
        Self {
            projection: match metric.base {
                MetricBase::Equal => Projection::Equal,
                MetricBase::Weighted => Projection::WeightedRgb,
            },
            frequency: if metric.frequency {
                FrequencyMode::All
            } else {
                FrequencyMode::Off
            },
        }
    }

    /// The space used once the maps have been converted to YUV: the weighted
    /// metric becomes a YUV weighting and the frequency transform is
    /// restricted to the luminance plane.
    pub fn yuv(metric: Metric) -> Self {
        Self {
            projection: match metric.base {
                MetricBase::Equal => Projection::Equal,
                MetricBase::Weighted => Projection::WeightedYuv,
            },
            frequency: if metric.frequency {
                FrequencyMode::FirstPlane
            } else {
                FrequencyMode::Off
            },
        }
    }

    pub fn project(&self, v: &[u8; VECLEN], pv: &mut [f32; VECLEN]) {
        match self.projection {
            Projection::Equal => {
                for j in 0..4 {
                    let src = j * COMPS;
                    pv[j] = v[src] as f32;
                    pv[j + 4] = v[src + 1] as f32;
                    pv[j + 8] = v[src + 2] as f32;
                    pv[j + 12] = v[src + 3] as f32;
                }
            }
            Projection::WeightedRgb => {
                for j in 0..4 {
                    let src = j * COMPS;
                    // More opaque pixels matter more.
                    let alpha_weight = 0.25 + v[src + 3] as f32 * (3.0 / (4.0 * 255.0));
                    pv[j] = alpha_weight * 0.75 * v[src] as f32;
                    pv[j + 4] = alpha_weight * v[src + 1] as f32;
                    pv[j + 8] = alpha_weight * 0.5 * v[src + 2] as f32;
                    pv[j + 12] = v[src + 3] as f32;
                }
            }
            Projection::WeightedYuv => {
                for j in 0..4 {
                    let src = j * COMPS;
                    pv[j] = v[src] as f32;
                    pv[j + 4] = 0.75 * v[src + 1] as f32;
                    pv[j + 8] = 0.0;
                    pv[j + 12] = 0.0;
                }
            }
        }

        let planes = match self.frequency {
            FrequencyMode::Off => return,
            FrequencyMode::All => 4,
            FrequencyMode::FirstPlane => 1,
        };

        for plane in 0..planes {
            let j = plane * 4;
            let (a00, a01, a10, a11) = (pv[j], pv[j + 1], pv[j + 2], pv[j + 3]);

            let b00 = (a00 + a01 + a10 + a11) * 0.25;
            let b01 = (a00 - a01 + a10 - a11) * 0.25;
            let b10 = (a00 + a01 - a10 - a11) * 0.25;
            let b11 = (a00 - a01 - a10 + a11) * 0.25;

            pv[j] = b00 + 0.5;
            pv[j + 1] = squash(b01) + 64.0;
            pv[j + 2] = squash(b10) + 64.0;
            pv[j + 3] = squash(b11) + 64.0;
        }
    }
}

/// Monotonic compression of the non-DC frequency components:
/// `sign(x) * |x|^(3/4)`.
fn squash(val: f32) -> f32 {
    let compressed = val.abs().powf(6.0 / 8.0);
    if val < 0.0 {
        -compressed
    } else {
        compressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_projection_transposes_planes() {
        let mut v = [0u8; VECLEN];
        for (i, val) in v.iter_mut().enumerate() {
            *val = i as u8;
        }
        let mut pv = [0.0; VECLEN];
        PerceptionSpace::rgb(Metric::default()).project(&v, &mut pv);
        // Red plane holds the first component of each pixel.
        assert_eq!(&pv[0..4], &[0.0, 4.0, 8.0, 12.0]);
        assert_eq!(&pv[12..16], &[3.0, 7.0, 11.0, 15.0]);
    }

    #[test]
    fn flat_plane_has_no_ac_energy() {
        let v = [128u8; VECLEN];
        let mut pv = [0.0; VECLEN];
        let space = PerceptionSpace::rgb(Metric {
            base: MetricBase::Equal,
            frequency: true,
        });
        space.project(&v, &mut pv);
        for plane in 0..4 {
            assert_eq!(pv[plane * 4], 128.5);
            assert_eq!(pv[plane * 4 + 1], 64.0);
            assert_eq!(pv[plane * 4 + 2], 64.0);
            assert_eq!(pv[plane * 4 + 3], 64.0);
        }
    }

    #[test]
    fn yuv_space_uses_eight_dimensions() {
        let v = [200u8; VECLEN];
        let mut pv = [1.0; VECLEN];
        PerceptionSpace::yuv(Metric {
            base: MetricBase::Weighted,
            frequency: false,
        })
        .project(&v, &mut pv);
        assert_eq!(pv[0], 200.0);
        assert_eq!(pv[4], 150.0);
        assert_eq!(pv[8], 0.0);
        assert_eq!(pv[12], 0.0);
    }
}
