//! Principal axis partitioning: repeatedly split the worst scoring cluster
//! along the dominant eigenvector of its weighted covariance.
use log::warn;

use super::perception::PerceptionSpace;
use super::tree::{NodeId, SearchTree};
use super::vector::{VectorMap, VECLEN};

/// Reference into the vector pyramid plus the projection of the vector onto
/// the current splitting axis. Partitioning shuffles these references, never
/// the vectors themselves.
pub(crate) struct VecRef {
    pub level: u32,
    pub idx: u32,
    pub d: f32,
}

/// A window into the reference array with its clustering error and the tree
/// node that will become its codeword leaf.
pub(crate) struct Partition {
    pub start: usize,
    pub len: usize,
    pub error: f64,
    pub node: NodeId,
}

pub(crate) struct QuantizeOutcome {
    pub tree: SearchTree,
    pub partitions: Vec<Partition>,
    pub refs: Vec<VecRef>,
    pub vector_count: usize,
}

struct AxisData {
    axis: [f32; VECLEN],
    /// Weighted sums of squares per dimension, saved for the split scan.
    sq_sums: [f64; VECLEN],
    /// Weighted sums per dimension.
    sums: [f64; VECLEN],
    weight_sum: i64,
}

fn vec_at<'a>(maps: &'a [VectorMap], r: &VecRef) -> &'a super::vector::PixelVector {
    &maps[r.level as usize].vecs[r.idx as usize]
}

/// Weighted covariance of the partition followed by a Jacobi eigensolve;
/// the principal axis is the eigenvector of the largest eigenvalue.
fn generate_axis(maps: &[VectorMap], refs: &[VecRef], dims: usize) -> AxisData {
    // The accumulators need around 40 bits of precision, f32 is not enough.
    let mut cov = [[0f64; VECLEN]; VECLEN];
    let mut sums = [0f64; VECLEN];
    let mut weight_sum: i64 = 0;

    for r in refs {
        let vec = vec_at(maps, r);
        let weight = vec.weight();
        weight_sum += weight as i64;
        for i in 0..dims {
            let elem = vec.pv[i] * weight as f32;
            sums[i] += elem as f64;
            for j in i..dims {
                cov[i][j] += (elem * vec.pv[j]) as f64;
            }
        }
    }

    let inv_weight_sum = 1.0 / weight_sum as f64;

    let mut sq_sums = [0f64; VECLEN];
    for i in 0..dims {
        sq_sums[i] = cov[i][i];
    }

    // Only relative covariances matter, so everything stays scaled by the
    // weight sum.
    for i in 0..dims {
        for j in i..dims {
            cov[i][j] -= sums[i] * sums[j] * inv_weight_sum;
        }
    }

    let mut fcov = [[0f32; VECLEN]; VECLEN];
    for i in 0..dims {
        for j in 0..i {
            fcov[i][j] = cov[j][i] as f32;
        }
        for j in i..dims {
            fcov[i][j] = cov[i][j] as f32;
        }
    }

    let mut evals = [0f32; VECLEN];
    let mut evects = [[0f32; VECLEN]; VECLEN];
    jacobi(&mut fcov, dims, &mut evals, &mut evects);

    // Small negative eigenvalues occasionally fall out of the solver and
    // are ignored.
    let mut max_val = 0.0f32;
    let mut max_eigen = 0;
    for (i, eval) in evals.iter().enumerate().take(dims) {
        if max_val < *eval {
            max_val = eval.abs();
            max_eigen = i;
        }
    }

    let mut axis = [0f32; VECLEN];
    for i in 0..dims {
        // Eigenvectors are the columns of the output matrix.
        axis[i] = evects[i][max_eigen];
    }

    AxisData {
        axis,
        sq_sums,
        sums,
        weight_sum,
    }
}

/// Classic cyclic Jacobi diagonalisation of the symmetric matrix `a`
/// (upper triangle is destroyed). Eigenvalues land in `d`, normalised
/// eigenvectors in the columns of `v`. Returns the rotation count.
fn jacobi(
    a: &mut [[f32; VECLEN]; VECLEN],
    n: usize,
    d: &mut [f32; VECLEN],
    v: &mut [[f32; VECLEN]; VECLEN],
) -> usize {
    let mut b = [0f32; VECLEN];
    let mut z = [0f32; VECLEN];

    for ip in 0..n {
        for iq in 0..n {
            v[ip][iq] = 0.0;
        }
        v[ip][ip] = 1.0;
    }
    for ip in 0..n {
        b[ip] = a[ip][ip];
        d[ip] = a[ip][ip];
    }

    let mut nrot = 0;
    for sweep in 1..=50 {
        // Off-diagonal energy; underflow to exactly zero is the
        // convergence signal.
        let mut sm = 0f32;
        for ip in 0..n - 1 {
            for iq in ip + 1..n {
                sm += a[ip][iq].abs();
            }
        }
        if sm == 0.0 {
            return nrot;
        }

        // A larger threshold for the first three sweeps.
        let tresh = if sweep < 4 {
            0.2 * sm / (n * n) as f32
        } else {
            0.0
        };

        for ip in 0..n - 1 {
            for iq in ip + 1..n {
                let g = 100.0 * a[ip][iq].abs();

                // After four sweeps, skip rotations too small to register.
                if sweep > 4 && d[ip].abs() + g == d[ip].abs() && d[iq].abs() + g == d[iq].abs() {
                    a[ip][iq] = 0.0;
                } else if a[ip][iq].abs() > tresh {
                    let mut h = d[iq] - d[ip];
                    let t = if h.abs() + g == h.abs() {
                        a[ip][iq] / h
                    } else {
                        let theta = 0.5 * h / a[ip][iq];
                        let t = 1.0 / (theta.abs() + (1.0 + theta * theta).sqrt());
                        if theta < 0.0 {
                            -t
                        } else {
                            t
                        }
                    };
                    let c = 1.0 / (1.0 + t * t).sqrt();
                    let s = t * c;
                    let tau = s / (1.0 + c);
                    h = t * a[ip][iq];
                    z[ip] -= h;
                    z[iq] += h;
                    d[ip] -= h;
                    d[iq] += h;
                    a[ip][iq] = 0.0;

                    let rotate =
                        |m: &mut [[f32; VECLEN]; VECLEN], i: usize, j: usize, k: usize, l: usize| {
                            let g = m[i][j];
                            let h = m[k][l];
                            m[i][j] = g - s * (h + g * tau);
                            m[k][l] = h + s * (g - h * tau);
                        };
                    for j in 0..ip {
                        rotate(a, j, ip, j, iq);
                    }
                    for j in ip + 1..iq {
                        rotate(a, ip, j, j, iq);
                    }
                    for j in iq + 1..n {
                        rotate(a, ip, j, iq, j);
                    }
                    for j in 0..n {
                        rotate(v, j, ip, j, iq);
                    }
                    nrot += 1;
                }
            }
        }

        for ip in 0..n {
            b[ip] += z[ip];
            d[ip] = b[ip];
            z[ip] = 0.0;
        }
    }

    warn!("eigensolver did not settle within 50 sweeps, keeping the last estimate");
    nrot
}

/// Projects every vector onto the axis and orders the references by the
/// projection. Near-constant partitions are common (flat image regions), so
/// the sort must not degrade the way a naive quicksort would;
/// `sort_unstable` bounds the worst case.
fn sort_along_axis(maps: &[VectorMap], refs: &mut [VecRef], dims: usize, axis: &[f32; VECLEN]) {
    for r in refs.iter_mut() {
        let vec = vec_at_pv(maps, r.level, r.idx);
        let mut val = 0f32;
        for j in 0..dims {
            val += axis[j] * vec[j];
        }
        r.d = val;
    }
    refs.sort_unstable_by(|a, b| a.d.total_cmp(&b.d));
}

fn vec_at_pv(maps: &[VectorMap], level: u32, idx: u32) -> &[f32; VECLEN] {
    &maps[level as usize].vecs[idx as usize].pv
}

/// Sweeps every split point over the sorted references, tracking both sides'
/// weighted sums incrementally, and keeps the split with the least combined
/// error. `orig` shrinks to the lower half, the returned partition is the
/// upper half (its tree node is filled in by the caller).
fn find_partition(
    maps: &[VectorMap],
    refs: &[VecRef],
    orig: &mut Partition,
    dims: usize,
    axis_data: &AxisData,
) -> Partition {
    let mut weight_sum1: i64 = 0;
    let mut sum_squared1 = 0f64;
    let mut sums1 = [0f64; VECLEN];

    let mut weight_sum2 = axis_data.weight_sum;
    let mut sum_squared2 = 0f64;
    let mut sums2 = [0f64; VECLEN];
    for j in 0..dims {
        sum_squared2 += axis_data.sq_sums[j];
        sums2[j] = axis_data.sums[j];
    }

    let mut best_split = 0;
    let mut best_err1 = 0f64;
    let mut best_err2 = 0f64;
    let mut best_err_sum = f64::MAX;

    for (split, r) in refs.iter().enumerate().take(orig.len - 1) {
        // Move this vector from the second half to the first.
        let vec = vec_at(maps, r);
        let weight = vec.weight();

        let mut colour_squared = 0f32;
        for j in 0..dims {
            let val = vec.pv[j];
            colour_squared += val * val;
            let weighted = val * weight as f32;
            sums1[j] += weighted as f64;
            sums2[j] -= weighted as f64;
        }
        sum_squared1 += (colour_squared * weight as f32) as f64;
        sum_squared2 -= (colour_squared * weight as f32) as f64;
        weight_sum1 += weight as i64;
        weight_sum2 -= weight as i64;

        let mut err1 = 0f64;
        let mut err2 = 0f64;
        for j in 0..dims {
            err1 += sums1[j] * sums1[j];
            err2 += sums2[j] * sums2[j];
        }
        err1 = sum_squared1 - err1 / weight_sum1 as f64;
        err2 = sum_squared2 - err2 / weight_sum2 as f64;

        // Strict comparison: ties keep the lowest split index.
        if err1 + err2 < best_err_sum {
            best_err_sum = err1 + err2;
            best_err1 = err1;
            best_err2 = err2;
            best_split = split + 1;
        }
    }

    let new_part = Partition {
        start: orig.start + best_split,
        len: orig.len - best_split,
        error: best_err2,
        node: SearchTree::ROOT,
    };
    orig.len = best_split;
    orig.error = best_err1;
    new_part
}

/// Weighted sum-of-squares error of a whole partition.
fn partition_error(maps: &[VectorMap], refs: &[VecRef], dims: usize) -> f64 {
    let mut sums = [0f64; VECLEN];
    let mut sum_squared = 0f64;
    let mut weight_sum: i64 = 0;

    for r in refs {
        let vec = vec_at(maps, r);
        let weight = vec.weight();
        weight_sum += weight as i64;

        let mut colour_squared = 0f32;
        for j in 0..dims {
            let val = vec.pv[j];
            colour_squared += val * val;
            sums[j] += (val * weight as f32) as f64;
        }
        sum_squared += (colour_squared * weight as f32) as f64;
    }

    let mut err = 0f64;
    for sum in sums.iter().take(dims) {
        err += sum * sum;
    }
    sum_squared - err / weight_sum as f64
}

/// Grows the partition forest until `reps_required` clusters exist (or the
/// image is exactly representable with fewer), projecting the perception
/// space and building the leaf structure of the search tree on the way.
pub(crate) fn partition_vectors(
    maps: &mut [VectorMap],
    num_maps: usize,
    reps_required: usize,
    dims: usize,
    space: &PerceptionSpace,
) -> QuantizeOutcome {
    let mut vector_count = 0;
    for map in maps[..num_maps].iter_mut() {
        for vec in &mut map.vecs {
            let raw = vec.v;
            space.project(&raw, &mut vec.pv);
        }
        vector_count += map.vecs.len();
    }

    let mut refs = Vec::with_capacity(vector_count);
    let mut total_weight: i64 = 0;
    for (level, map) in maps[..num_maps].iter().enumerate() {
        for idx in 0..map.vecs.len() {
            total_weight += map.vecs[idx].weight() as i64;
            refs.push(VecRef {
                level: level as u32,
                idx: idx as u32,
                d: 0.0,
            });
        }
    }
    // The incremental split sums hold weight-scaled values in 31 bits of
    // integer headroom.
    assert!(total_weight < 1 << 31, "mipmap weight sum overflow");

    let mut tree = SearchTree::new();
    let mut partitions = vec![Partition {
        start: 0,
        len: refs.len(),
        // The real clustering error, so an exactly representable image
        // stops before the first split.
        error: partition_error(maps, &refs, dims),
        node: SearchTree::ROOT,
    }];

    while partitions.len() < reps_required {
        let mut worst = 0;
        let mut worst_error = -1.0f64;
        for (i, part) in partitions.iter().enumerate() {
            if worst_error < part.error {
                worst_error = part.error;
                worst = i;
            }
        }

        // Fully representable already; stop with fewer codes.
        if worst_error == 0.0 || partitions[worst].len < 2 {
            break;
        }

        let (less, more) = tree.split(partitions[worst].node);

        let (start, len) = (partitions[worst].start, partitions[worst].len);
        let axis_data = generate_axis(maps, &refs[start..start + len], dims);
        sort_along_axis(maps, &mut refs[start..start + len], dims, &axis_data.axis);

        let mut new_part = find_partition(
            maps,
            &refs[start..start + len],
            &mut partitions[worst],
            dims,
            &axis_data,
        );
        new_part.node = less;
        partitions[worst].node = more;
        partitions.push(new_part);
    }

    QuantizeOutcome {
        tree,
        partitions,
        refs,
        vector_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vq::perception::Metric;
    use crate::vq::vector::VectorMap;

    fn two_tone_map() -> VectorMap {
        // Left half white, right half black.
        let mut rgb = vec![0u8; 16 * 16 * 3];
        for y in 0..16 {
            for x in 0..8 {
                let i = (y * 16 + x) * 3;
                rgb[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        VectorMap::from_rgb(&rgb, None, 16, false, false, 1)
    }

    #[test]
    fn two_tone_image_splits_exactly() {
        let mut maps = vec![two_tone_map()];
        let space = PerceptionSpace::rgb(Metric::default());
        let outcome = partition_vectors(&mut maps, 1, 16, 12, &space);

        // Two colours need two partitions; the loop stops early.
        assert_eq!(outcome.partitions.len(), 2);
        assert_eq!(outcome.vector_count, 64);
        let total: usize = outcome.partitions.iter().map(|p| p.len).sum();
        assert_eq!(total, 64);
    }

    #[test]
    fn near_constant_partition_completes() {
        // 95%+ of the pixels share one colour; the axis sort must stay
        // log-linear on this input.
        let mut rgb = vec![10u8; 64 * 64 * 3];
        for i in 0..200 {
            rgb[i * 20 * 3] = 200;
        }
        let mut maps = vec![VectorMap::from_rgb(&rgb, None, 64, false, false, 1)];
        let space = PerceptionSpace::rgb(Metric::default());
        let outcome = partition_vectors(&mut maps, 1, 64, 12, &space);
        assert!(!outcome.partitions.is_empty());
        let total: usize = outcome.partitions.iter().map(|p| p.len).sum();
        assert_eq!(total, 32 * 32);
    }

    #[test]
    fn jacobi_diagonalises_a_known_matrix() {
        let mut a = [[0f32; VECLEN]; VECLEN];
        // 2x2 block with eigenvalues 3 and 1.
        a[0][0] = 2.0;
        a[0][1] = 1.0;
        a[1][0] = 1.0;
        a[1][1] = 2.0;
        let mut d = [0f32; VECLEN];
        let mut v = [[0f32; VECLEN]; VECLEN];
        jacobi(&mut a, 2, &mut d, &mut v);
        let mut evals = [d[0], d[1]];
        evals.sort_by(f32::total_cmp);
        assert!((evals[0] - 1.0).abs() < 1e-5);
        assert!((evals[1] - 3.0).abs() < 1e-5);
    }
}
