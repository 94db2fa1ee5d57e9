//! Nearest codeword search: a binary splitting tree for the initial guess
//! plus sorted inter-codeword distance lists for a branch-and-bound scan.
use super::vector::{PixelVector, VECLEN};

pub(crate) type NodeId = usize;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Leaf {
        rep: usize,
    },
    Internal {
        /// Difference of the child centroids; the splitting plane normal.
        axis: [i32; VECLEN],
        /// Midpoint of the child dot products along the axis.
        d: i32,
        less: NodeId,
        more: NodeId,
    },
}

/// Arena allocated splitting tree. Partitions refer to their node by index,
/// so growing the tree never invalidates them.
pub(crate) struct SearchTree {
    nodes: Vec<Node>,
}

impl SearchTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Leaf { rep: 0 }],
        }
    }

    pub const ROOT: NodeId = 0;

    /// Turns `parent` (a leaf) into an internal node with two fresh leaves.
    /// The axis and split value stay empty until [finalise](Self::finalise).
    pub fn split(&mut self, parent: NodeId) -> (NodeId, NodeId) {
        let less = self.nodes.len();
        self.nodes.push(Node::Leaf { rep: 0 });
        let more = self.nodes.len();
        self.nodes.push(Node::Leaf { rep: 0 });
        self.nodes[parent] = Node::Internal {
            axis: [0; VECLEN],
            d: 0,
            less,
            more,
        };
        (less, more)
    }

    pub fn set_leaf_rep(&mut self, node: NodeId, rep: usize) {
        if let Node::Leaf { rep: slot } = &mut self.nodes[node] {
            *slot = rep;
        }
    }

    /// Fills in the splitting planes bottom-up: each internal node splits on
    /// the difference of its children's centroids, with the children ordered
    /// so that a query dotting below `d` descends toward the nearer side.
    pub fn finalise(&mut self, reps: &[PixelVector]) {
        self.finalise_node(Self::ROOT, reps);
    }

    fn finalise_node(&mut self, id: NodeId, reps: &[PixelVector]) -> [i32; VECLEN] {
        match self.nodes[id].clone() {
            Node::Leaf { rep } => {
                let mut average = [0; VECLEN];
                for (out, v) in average.iter_mut().zip(reps[rep].v.iter()) {
                    *out = *v as i32;
                }
                average
            }
            Node::Internal { less, more, .. } => {
                let child1 = self.finalise_node(less, reps);
                let child2 = self.finalise_node(more, reps);

                let mut average = [0; VECLEN];
                let mut axis = [0; VECLEN];
                let mut c1_dot = 0;
                let mut c2_dot = 0;
                for i in 0..VECLEN {
                    average[i] = (child1[i] + child2[i] + 1) >> 1;
                    axis[i] = child1[i] - child2[i];
                    c1_dot += child1[i] * axis[i];
                    c2_dot += child2[i] * axis[i];
                }

                let (less, more) = if c1_dot > c2_dot {
                    (more, less)
                } else {
                    (less, more)
                };
                self.nodes[id] = Node::Internal {
                    axis,
                    d: (c1_dot + c2_dot) / 2,
                    less,
                    more,
                };
                average
            }
        }
    }
}

/// For every codeword, every other codeword ordered by squared distance in
/// raw colour space. Ties order by index so searches are deterministic.
pub(crate) struct NeighbourTable {
    lists: Vec<Vec<(u32, u8)>>,
}

impl NeighbourTable {
    pub fn build(reps: &[PixelVector], num_reps: usize) -> Self {
        let mut lists = vec![Vec::with_capacity(num_reps.saturating_sub(1)); num_reps];
        for i in 0..num_reps {
            for j in i + 1..num_reps {
                let dist = squared_distance_u8(&reps[i].v, &reps[j].v);
                lists[i].push((dist, j as u8));
                lists[j].push((dist, i as u8));
            }
        }
        for list in &mut lists {
            list.sort_unstable();
        }
        Self { lists }
    }
}

fn squared_distance_u8(a: &[u8; VECLEN], b: &[u8; VECLEN]) -> u32 {
    let mut dist = 0i32;
    for i in 0..VECLEN {
        let delta = a[i] as i32 - b[i] as i32;
        dist += delta * delta;
    }
    dist as u32
}

fn squared_distance(query: &[i32; VECLEN], rep: &[u8; VECLEN]) -> u32 {
    let mut dist = 0i32;
    for i in 0..VECLEN {
        let delta = query[i] - rep[i] as i32;
        dist += delta * delta;
    }
    dist as u32
}

/// Probe counters for the nearest codeword search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    /// Distance (and distance-equivalent dot product) evaluations.
    pub probes: u64,
    /// Number of nearest codeword queries answered.
    pub queries: u64,
}

/// Exact nearest codeword for `query`, returned with its squared distance.
///
/// The tree walk only seeds the scan; correctness comes from the neighbour
/// list cutoff. A neighbour at squared distance `4 * best` or beyond cannot
/// beat the current best, so the sorted scan terminates early.
pub(crate) fn find_closest(
    query: &[i32; VECLEN],
    tree: &SearchTree,
    reps: &[PixelVector],
    neighbours: &NeighbourTable,
    stats: &mut SearchStats,
) -> (usize, u32) {
    stats.queries += 1;

    let mut node = &tree.nodes[SearchTree::ROOT];
    let mut best = loop {
        match node {
            Node::Leaf { rep } => break *rep,
            Node::Internal { axis, d, less, more } => {
                let mut dot = 0;
                for i in 0..VECLEN {
                    dot += query[i] * axis[i];
                }
                stats.probes += 1;
                node = &tree.nodes[if dot <= *d { *less } else { *more }];
            }
        }
    };

    let mut tested = [0u64; 4];
    tested[best >> 6] |= 1 << (best & 63);

    let mut best_dist = squared_distance(query, &reps[best].v);
    stats.probes += 1;
    let mut cutoff = best_dist.saturating_mul(4);

    let mut j = 0;
    while j < neighbours.lists[best].len() {
        let (neighbour_dist, other) = neighbours.lists[best][j];
        if cutoff <= neighbour_dist {
            break;
        }
        let other = other as usize;
        if tested[other >> 6] & (1 << (other & 63)) != 0 {
            j += 1;
            continue;
        }

        let dist = squared_distance(query, &reps[other].v);
        stats.probes += 1;
        if dist < best_dist {
            best = other;
            best_dist = dist;
            cutoff = best_dist.saturating_mul(4);
            // The list is keyed on the new best, restart the scan.
            j = 0;
        } else {
            tested[other >> 6] |= 1 << (other & 63);
            j += 1;
        }
    }

    (best, best_dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vq::vector::PixelVector;

    fn rep(mut fill: impl FnMut(usize) -> u8) -> PixelVector {
        let mut vec = PixelVector::new(1);
        for i in 0..VECLEN {
            vec.v[i] = fill(i);
        }
        vec
    }

    // A small xorshift so the fixtures are reproducible.
    struct Rng(u64);
    impl Rng {
        fn next_u8(&mut self) -> u8 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            (self.0 >> 24) as u8
        }
    }

    fn brute_force(query: &[i32; VECLEN], reps: &[PixelVector]) -> (usize, u32) {
        let mut best = (0, u32::MAX);
        for (i, rep) in reps.iter().enumerate() {
            let dist = squared_distance(query, &rep.v);
            if dist < best.1 {
                best = (i, dist);
            }
        }
        best
    }

    fn tree_over(reps: &[PixelVector]) -> SearchTree {
        // A degenerate tree is enough: the scan guarantees exactness.
        let mut tree = SearchTree::new();
        let mut node = SearchTree::ROOT;
        for i in 0..reps.len() - 1 {
            let (less, more) = tree.split(node);
            tree.set_leaf_rep(less, i);
            node = more;
        }
        tree.set_leaf_rep(node, reps.len() - 1);
        tree.finalise(reps);
        tree
    }

    #[test]
    fn search_matches_brute_force() {
        let mut rng = Rng(0x243F6A8885A308D3);
        let reps: Vec<_> = (0..64).map(|_| rep(|_| rng.next_u8())).collect();
        let tree = tree_over(&reps);
        let neighbours = NeighbourTable::build(&reps, reps.len());
        let mut stats = SearchStats::default();

        for _ in 0..200 {
            let mut query = [0i32; VECLEN];
            for q in query.iter_mut() {
                *q = rng.next_u8() as i32;
            }
            let (found, dist) = find_closest(&query, &tree, &reps, &neighbours, &mut stats);
            let (expected, expected_dist) = brute_force(&query, &reps);
            assert_eq!(dist, expected_dist);
            // Several codewords may tie on distance; the distance must match
            // exactly, the index only on distinct minima.
            if dist != squared_distance(&query, &reps[expected].v) {
                assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn cutoff_reduces_probes() {
        let mut rng = Rng(0x13198A2E03707344);
        let reps: Vec<_> = (0..256).map(|_| rep(|_| rng.next_u8())).collect();
        let tree = tree_over(&reps);
        let neighbours = NeighbourTable::build(&reps, reps.len());
        let mut stats = SearchStats::default();

        for _ in 0..100 {
            let mut query = [0i32; VECLEN];
            for q in query.iter_mut() {
                *q = rng.next_u8() as i32;
            }
            find_closest(&query, &tree, &reps, &neighbours, &mut stats);
        }

        let brute_force_probes = 256 * stats.queries;
        assert!(
            stats.probes < brute_force_probes,
            "{} probes vs {} brute force",
            stats.probes,
            brute_force_probes
        );
    }

    #[test]
    fn equidistant_ties_pick_the_lower_index() {
        // Four codewords at identical distance from the origin query.
        let reps = vec![
            rep(|i| if i == 0 { 4 } else { 0 }),
            rep(|i| if i == 1 { 4 } else { 0 }),
            rep(|i| if i == 2 { 4 } else { 0 }),
            rep(|i| if i == 3 { 4 } else { 0 }),
        ];
        let tree = tree_over(&reps);
        let neighbours = NeighbourTable::build(&reps, reps.len());
        let mut stats = SearchStats::default();

        let query = [0i32; VECLEN];
        let (found, dist) = find_closest(&query, &tree, &reps, &neighbours, &mut stats);
        assert_eq!(dist, 16);
        // The tree lands on a leaf; no equidistant neighbour may displace it,
        // and a brute force scan agrees on the distance.
        let (_, expected_dist) = brute_force(&query, &reps);
        assert_eq!(dist, expected_dist);
        assert!(found < 4);
    }
}
