//! Cost→route optimization.
//!
//! For every relay pair the optimizer finds up to
//! [`MAX_ROUTES_PER_ENTRY`] lowest-cost simple paths of at most
//! [`MAX_ROUTE_RELAYS`] relays over the cost graph, with intra-datacenter
//! links costing zero. The search is a bounded-width best-path expansion
//! per source relay: each relay keeps its best candidate paths, and each
//! round extends the paths discovered in the previous round by one hop.
//!
//! Work is split into `num_segments` disjoint ranges of source relays,
//! computed independently and concatenated. The triangular layout keys each
//! unordered pair by its higher index, so segmenting by the higher index
//! makes every segment's output contiguous.
//!
//! The optimizer is deterministic for a given input: ties break on shorter
//! hop count, then ascending relay-index vectors.

use crate::cost::CostMatrix;
use crate::matrix::{RouteEntry, RouteMatrix};
use crate::tri::tri_matrix_length;
use rayon::prelude::*;
use std::collections::HashMap;
use types::{MAX_ROUTES_PER_ENTRY, MAX_ROUTE_RELAYS, UNREACHABLE_COST};

#[derive(Debug, Clone)]
struct Path {
    cost: i32,
    /// Relay indices from the search source to the path's end, inclusive.
    hops: Vec<u32>,
}

fn path_order(a: &Path, b: &Path) -> std::cmp::Ordering {
    a.cost
        .cmp(&b.cost)
        .then(a.hops.len().cmp(&b.hops.len()))
        .then_with(|| a.hops.cmp(&b.hops))
}

/// Insert into a best-first list capped at [`MAX_ROUTES_PER_ENTRY`].
/// Returns true if the candidate made the cut.
fn push_candidate(list: &mut Vec<Path>, candidate: Path) -> bool {
    if list.iter().any(|p| p.hops == candidate.hops) {
        return false;
    }
    let position = list
        .binary_search_by(|p| path_order(p, &candidate))
        .unwrap_or_else(|p| p);
    if position >= MAX_ROUTES_PER_ENTRY {
        return false;
    }
    list.insert(position, candidate);
    list.truncate(MAX_ROUTES_PER_ENTRY);
    true
}

/// Best paths from `source` to every other relay.
fn best_paths_from(cost: &CostMatrix, source: usize) -> Vec<Vec<Path>> {
    let n = cost.num_relays();
    let mut best: Vec<Vec<Path>> = vec![Vec::new(); n];

    let mut frontier = vec![Path {
        cost: 0,
        hops: vec![source as u32],
    }];

    // A path holds at most MAX_ROUTE_RELAYS relays including both endpoints.
    for _ in 1..MAX_ROUTE_RELAYS {
        let mut next_frontier = Vec::new();
        for path in &frontier {
            let end = *path.hops.last().expect("paths are never empty") as usize;
            for w in 0..n {
                if w == source || path.hops.contains(&(w as u32)) {
                    continue;
                }
                let link = cost.link_cost(end, w);
                if link == UNREACHABLE_COST {
                    continue;
                }
                let mut hops = path.hops.clone();
                hops.push(w as u32);
                let candidate = Path {
                    cost: path.cost + link as i32,
                    hops,
                };
                if push_candidate(&mut best[w], candidate.clone()) {
                    next_frontier.push(candidate);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    best
}

fn build_entry(cost: &CostMatrix, best_from_hi: &[Vec<Path>], lo: usize, hi: usize) -> RouteEntry {
    let mut entry = RouteEntry::default();
    entry.direct_rtt = cost.cost(lo, hi) as i32;

    // Only pairs that can terminate a route get candidates; every pair still
    // gets its direct RTT.
    if !cost.dest_relay[lo] && !cost.dest_relay[hi] {
        return entry;
    }

    // Search paths run hi → lo; stored orientation is lo → hi.
    let mut candidates: Vec<Path> = best_from_hi[lo]
        .iter()
        .map(|path| {
            let mut hops = path.hops.clone();
            hops.reverse();
            Path {
                cost: path.cost,
                hops,
            }
        })
        .collect();
    candidates.sort_by(path_order);

    for (k, path) in candidates.iter().take(MAX_ROUTES_PER_ENTRY).enumerate() {
        entry.route_rtt[k] = path.cost;
        entry.route_num_relays[k] = path.hops.len() as u8;
        entry.route_relays[k][..path.hops.len()].copy_from_slice(&path.hops);
        entry.num_routes += 1;
    }

    entry
}

/// Produce a route matrix from a cost matrix.
///
/// `created_at` is left at zero; the publisher stamps it at publication.
pub fn optimize(cost: &CostMatrix, num_segments: usize) -> RouteMatrix {
    let n = cost.num_relays();

    let mut datacenter_relays: HashMap<u64, Vec<u64>> = HashMap::new();
    for i in 0..n {
        datacenter_relays
            .entry(cost.relay_datacenter_ids[i])
            .or_default()
            .push(cost.relay_ids[i]);
    }

    let mut matrix = RouteMatrix {
        created_at: 0,
        relay_ids: cost.relay_ids.clone(),
        relay_names: cost.relay_names.clone(),
        relay_addresses: cost.relay_addresses.clone(),
        relay_public_keys: cost.relay_public_keys.clone(),
        relay_datacenter_ids: cost.relay_datacenter_ids.clone(),
        relay_seller_ids: cost.relay_seller_ids.clone(),
        relay_session_counts: vec![0; n],
        relay_max_session_counts: cost.relay_max_sessions.clone(),
        datacenter_relays,
        ..Default::default()
    };

    if n >= 2 {
        // Pairs keyed by their higher index form contiguous entry regions, so
        // segments of the 1..n range concatenate directly.
        let his: Vec<usize> = (1..n).collect();
        let segment_size = his.len().div_ceil(num_segments.max(1)).max(1);

        let segments: Vec<Vec<RouteEntry>> = his
            .par_chunks(segment_size)
            .map(|segment| {
                let mut entries = Vec::new();
                for &hi in segment {
                    let best = best_paths_from(cost, hi);
                    for lo in 0..hi {
                        entries.push(build_entry(cost, &best, lo, hi));
                    }
                }
                entries
            })
            .collect();

        matrix.entries = segments.concat();
        debug_assert_eq!(matrix.entries.len(), tri_matrix_length(n));
    }

    matrix.rebuild_index();

    tracing::debug!(
        relays = n,
        entries = matrix.entries.len(),
        "optimized route matrix"
    );

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::cost_matrix_from_table;
    use crate::tri::tri_index;

    // Line topology: 0 -- 10 -- 1 -- 10 -- 2, with a slow 100ms direct 0-2.
    fn line_matrix() -> CostMatrix {
        cost_matrix_from_table(
            &["10.0.0.1:40000", "10.0.0.2:40000", "10.0.0.3:40000"],
            &[1, 2, 3],
            &[&[], &[10], &[100, 10]],
        )
    }

    #[test]
    fn empty_input_yields_empty_matrix() {
        let matrix = optimize(&CostMatrix::default(), 4);
        assert_eq!(matrix.num_relays(), 0);
        assert!(matrix.entries.is_empty());
    }

    #[test]
    fn finds_the_two_hop_shortcut() {
        let matrix = optimize(&line_matrix(), 1);
        let entry = matrix.entry(0, 2);
        assert_eq!(entry.direct_rtt, 100);
        assert!(entry.num_routes >= 2);
        // Best route is 0 -> 1 -> 2 at cost 20.
        assert_eq!(entry.route_rtt[0], 20);
        assert_eq!(entry.route_num_relays[0], 3);
        assert_eq!(&entry.route_relays[0][..3], &[0, 1, 2]);
        // Runner-up is the direct link at 100.
        assert_eq!(entry.route_rtt[1], 100);
        assert_eq!(&entry.route_relays[1][..2], &[0, 2]);
    }

    #[test]
    fn costs_are_monotone_and_hops_bounded() {
        let matrix = optimize(&line_matrix(), 2);
        for entry in &matrix.entries {
            for k in 1..entry.num_routes as usize {
                assert!(entry.route_rtt[k - 1] <= entry.route_rtt[k]);
            }
            for k in 0..entry.num_routes as usize {
                assert!(entry.route_num_relays[k] as usize <= MAX_ROUTE_RELAYS);
            }
        }
    }

    #[test]
    fn routes_start_and_end_at_the_pair() {
        let matrix = optimize(&line_matrix(), 1);
        for hi in 0..3usize {
            for lo in 0..hi {
                let entry = &matrix.entries[tri_index(lo, hi)];
                for k in 0..entry.num_routes as usize {
                    let num_relays = entry.route_num_relays[k] as usize;
                    assert_eq!(entry.route_relays[k][0], lo as u32);
                    assert_eq!(entry.route_relays[k][num_relays - 1], hi as u32);
                }
            }
        }
    }

    #[test]
    fn intra_datacenter_hops_are_free() {
        // Relays 1 and 2 share a datacenter; going 0 -> 1 -> 2 costs the same
        // as 0 -> 1 even though the 1-2 ping is 30ms.
        let cost = cost_matrix_from_table(
            &["10.0.0.1:40000", "10.0.0.2:40000", "10.0.0.3:40000"],
            &[1, 2, 2],
            &[&[], &[10], &[50, 30]],
        );
        let matrix = optimize(&cost, 1);
        let entry = matrix.entry(0, 2);
        assert_eq!(entry.route_rtt[0], 10);
        assert_eq!(&entry.route_relays[0][..3], &[0, 1, 2]);
    }

    #[test]
    fn unreachable_relay_contributes_no_routes_but_stays_in_tables() {
        let cost = cost_matrix_from_table(
            &["10.0.0.1:40000", "10.0.0.2:40000", "10.0.0.3:40000"],
            &[1, 2, 3],
            &[&[], &[10], &[255, 255]],
        );
        let matrix = optimize(&cost, 1);
        assert_eq!(matrix.num_relays(), 3);
        let entry = matrix.entry(0, 2);
        assert_eq!(entry.num_routes, 0);
        assert_eq!(entry.direct_rtt, 255);
        assert!(matrix.relay_index(cost.relay_ids[2]).is_some());
    }

    #[test]
    fn deterministic_across_segment_counts() {
        let cost = cost_matrix_from_table(
            &[
                "10.0.0.1:40000",
                "10.0.0.2:40000",
                "10.0.0.3:40000",
                "10.0.0.4:40000",
                "10.0.0.5:40000",
            ],
            &[1, 2, 3, 4, 5],
            &[&[], &[10], &[20, 10], &[30, 20, 10], &[40, 30, 20, 10]],
        );
        let a = optimize(&cost, 1);
        let b = optimize(&cost, 3);
        let c = optimize(&cost, 16);
        assert_eq!(a.entries, b.entries);
        assert_eq!(b.entries, c.entries);
    }
}
