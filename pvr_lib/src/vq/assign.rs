//! Mapping image vectors to codewords, with optional error diffusion.
use super::tree::{find_closest, NeighbourTable, SearchStats, SearchTree};
use super::vector::{PixelVector, VectorMap, WeightOrCode, COMPS, VECLEN};
use super::DitherLevel;

/// Per codeword accumulation for the Lloyd refinement: sum of assigned
/// vectors and how many there were.
#[derive(Debug, Clone)]
pub(crate) struct SumUsage {
    pub sum: [i32; VECLEN],
    pub usage: i32,
}

impl SumUsage {
    pub fn new() -> Self {
        Self {
            sum: [0; VECLEN],
            usage: 0,
        }
    }
}

/// Brute force match on the first pixel only, used for the 1x1 mipmap level.
/// Runs once per encode, so a linear scan is fine.
fn single_pixel_find(vec: &PixelVector, reps: &[PixelVector], num_reps: usize) -> usize {
    let mut best_dist = i32::MAX;
    let mut best = 0;
    for (j, rep) in reps.iter().enumerate().take(num_reps) {
        let mut dist = 0;
        for i in 0..COMPS {
            let delta = vec.v[i] as i32 - rep.v[i] as i32;
            dist += delta * delta;
        }
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

fn three_quarters(x: i32) -> i32 {
    x * 3 / 4
}

fn three_eighths(x: i32) -> i32 {
    x * 3 / 8
}

/// Assigns every vector of every level its nearest codeword and accumulates
/// the per codeword sums. Returns the total squared error.
///
/// With dithering on, the quantisation error of each 2x2 block is spread to
/// the pixels to the right and below through two row buffers, clamped to
/// +/-16 per channel so a bad match cannot snowball.
#[allow(clippy::too_many_arguments)]
pub(crate) fn map_image_to_indices(
    maps: &mut [VectorMap],
    num_maps: usize,
    tree: &mut SearchTree,
    reps: &[PixelVector],
    num_reps: usize,
    sums: &mut [SumUsage],
    dither: DitherLevel,
    first_component_only: bool,
    stats: &mut SearchStats,
) -> f64 {
    for entry in sums.iter_mut() {
        *entry = SumUsage::new();
    }

    // The splitting planes and neighbour lists depend on the current
    // codebook, so they are rebuilt for every assignment pass.
    tree.finalise(reps);
    let neighbours = NeighbourTable::build(reps, num_reps);

    let mut error = 0f64;

    for level in 0..num_maps {
        // The coarsest level, once it is down to a single vector, only
        // matches on its first pixel.
        if level == num_maps - 1 && maps[level].width == 1 {
            let map = &mut maps[level];
            let code = single_pixel_find(&map.vecs[0], reps, num_reps);
            map.vecs[0].wc = WeightOrCode::Code(code as u8);
            sums[code].usage += 1;
            for i in 0..VECLEN {
                sums[code].sum[i] += map.vecs[0].v[i] as i32;
            }
            break;
        }

        let map = &mut maps[level];
        let pixel_width = map.width * 2;

        let mut prev_row = vec![[0i32; COMPS]; pixel_width + 2];
        let mut cur_row = vec![[0i32; COMPS]; pixel_width + 2];

        let diffusion_limit = if first_component_only { 1 } else { COMPS };

        for y in 0..map.height {
            let mut herr = [[0i32; COMPS]; 2];
            cur_row[0] = [0; COMPS];

            for x in 0..map.width {
                let vec = &mut map.vecs[y * map.width + x];
                let p = 2 * x;

                let mut new_vector = [0i32; VECLEN];
                if dither != DitherLevel::None {
                    for i in 0..diffusion_limit {
                        // Top left collects errors from above and the left.
                        new_vector[i] =
                            (vec.v[i] as i32 + herr[0][i] + prev_row[p][i]).clamp(0, 255);
                        // Top right only from above.
                        new_vector[i + COMPS] =
                            (vec.v[i + COMPS] as i32 + prev_row[p + 1][i]).clamp(0, 255);
                        // Bottom left only from the left.
                        new_vector[i + 2 * COMPS] =
                            (vec.v[i + 2 * COMPS] as i32 + herr[1][i]).clamp(0, 255);
                        // Bottom right receives nothing.
                        new_vector[i + 3 * COMPS] = vec.v[i + 3 * COMPS] as i32;
                    }
                    for i in diffusion_limit..COMPS {
                        for pixel in 0..4 {
                            new_vector[i + pixel * COMPS] = vec.v[i + pixel * COMPS] as i32;
                        }
                    }
                } else {
                    for i in 0..VECLEN {
                        new_vector[i] = vec.v[i] as i32;
                    }
                }

                let (code, dist) = find_closest(&new_vector, tree, reps, &neighbours, stats);
                error += dist as f64;

                vec.wc = WeightOrCode::Code(code as u8);
                sums[code].usage += 1;
                for i in 0..VECLEN {
                    sums[code].sum[i] += new_vector[i];
                }

                if dither != DitherLevel::None {
                    for (i, value) in new_vector.iter_mut().enumerate() {
                        let mut e = (*value - reps[code].v[i] as i32).clamp(-16, 16);
                        if dither == DitherLevel::Subtle {
                            e /= 2;
                        }
                        *value = e;
                    }

                    for i in 0..COMPS {
                        // Top right: 3/4 to the right, 1/4 down-right.
                        let e = new_vector[i + COMPS];
                        let three = three_quarters(e);
                        herr[0][i] = three;
                        herr[1][i] = e - three;

                        // Bottom left: 3/4 down, 1/4 down-right.
                        let e = new_vector[i + 2 * COMPS];
                        let three = three_quarters(e);
                        cur_row[p][i] += three;
                        cur_row[p + 1][i] = e - three;

                        // Bottom right: 3/8 right, 3/8 down, 1/4 down-right.
                        let e = new_vector[i + 3 * COMPS];
                        let three = three_eighths(e);
                        herr[1][i] += three;
                        cur_row[p + 1][i] += three;
                        cur_row[p + 2][i] = e - 2 * three;
                    }
                }
            }

            std::mem::swap(&mut prev_row, &mut cur_row);
        }
    }

    error
}
