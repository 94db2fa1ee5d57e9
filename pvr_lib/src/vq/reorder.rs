//! Greedy renumbering of codebook indices for spatial locality.
//!
//! Counts how often each pair of codes sits side by side in the index image
//! and renumbers so frequent pairs end up numerically adjacent, which keeps
//! codebook fetches close together in memory.
use super::vector::VectorMap;

/// Returns the permutation `reorder[new] = old` over `num_codes` codes.
/// Requires every vector of every counted map to carry its assigned code.
pub(crate) fn optimise_placement(
    maps: &[VectorMap],
    num_maps: usize,
    num_codes: usize,
) -> Vec<u8> {
    if num_codes == 1 {
        return vec![0];
    }

    let mut counts = vec![0u32; num_codes * num_codes];
    let mut bump = |a: usize, b: usize| {
        if a != b {
            counts[a * num_codes + b] += 1;
            counts[b * num_codes + a] += 1;
        }
    };

    // Edge texels are skipped, which loses little and keeps the scan simple.
    for map in maps.iter().take(num_maps) {
        if map.width < 3 || map.height < 3 {
            continue;
        }
        for y in 1..map.height - 1 {
            for x in 1..map.width - 1 {
                let this = map.vecs[y * map.width + x].code() as usize;
                bump(this, map.vecs[(y - 1) * map.width + x].code() as usize);
                bump(this, map.vecs[(y + 1) * map.width + x].code() as usize);
                bump(this, map.vecs[y * map.width + x - 1].code() as usize);
                bump(this, map.vecs[y * map.width + x + 1].code() as usize);
            }
        }
    }

    let mut placed = vec![false; num_codes];
    let mut reorder = Vec::with_capacity(num_codes);

    // Seed with the most frequent pairing; ties keep the lowest indices so
    // unused codes stay in ascending order at the tail.
    let mut best_count = -1i64;
    let mut best = (0, 1);
    for i in 0..num_codes {
        for j in i + 1..num_codes {
            if counts[i * num_codes + j] as i64 > best_count {
                best_count = counts[i * num_codes + j] as i64;
                best = (i, j);
            }
        }
    }
    placed[best.0] = true;
    placed[best.1] = true;
    reorder.push(best.0 as u8);
    reorder.push(best.1 as u8);

    while reorder.len() != num_codes {
        let mut best_count = -1i64;
        let mut best = 0;
        for i in 0..num_codes {
            if placed[i] {
                continue;
            }
            let mut local: i64 = 0;
            for j in 0..num_codes {
                if placed[j] {
                    local += counts[i * num_codes + j] as i64;
                }
            }
            if local > best_count {
                best_count = local;
                best = i;
            }
        }
        placed[best] = true;
        reorder.push(best as u8);
    }

    reorder
}
