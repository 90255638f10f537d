//! Reframing: session-supplied relay ids → current route matrix indices.
//!
//! Sessions carry relay ids across slices, but every optimizer run may
//! publish a matrix with different relay membership and ordering. Each slice
//! re-maps ids into the indices of whatever matrix is live. Unknown ids are
//! dropped (dest relays, source relays) or invalidate the whole chain
//! (a previously chosen route).

use std::collections::HashMap;
use types::{MAX_CLIENT_RELAYS, MAX_RELAY_RTT};

/// Map destination relay ids into current indices, dropping unknowns.
pub fn reframe_dest_relays(relay_index: &HashMap<u64, u32>, dest_relay_ids: &[u64]) -> Vec<u32> {
    dest_relay_ids
        .iter()
        .filter_map(|id| relay_index.get(id).copied())
        .collect()
}

/// Map source relay ids into current indices, preserving each relay's
/// latency and dropping unknowns and saturated (255) pings.
pub fn reframe_source_relays(
    relay_index: &HashMap<u64, u32>,
    source_relay_ids: &[u64],
    source_relay_rtt: &[i32],
) -> (Vec<u32>, Vec<i32>) {
    let mut indices = Vec::with_capacity(source_relay_ids.len());
    let mut rtts = Vec::with_capacity(source_relay_ids.len());
    for (id, &rtt) in source_relay_ids.iter().zip(source_relay_rtt) {
        if rtt >= MAX_RELAY_RTT {
            continue;
        }
        if let Some(&index) = relay_index.get(id) {
            indices.push(index);
            rtts.push(rtt);
        }
    }
    (indices, rtts)
}

/// Map a previously chosen route into current indices. `None` if any hop no
/// longer exists.
pub fn reframe_route(relay_index: &HashMap<u64, u32>, route_relay_ids: &[u64]) -> Option<Vec<u32>> {
    route_relay_ids
        .iter()
        .map(|id| relay_index.get(id).copied())
        .collect()
}

/// Per-session source relay exclusion.
///
/// A source relay that looks worse than the direct path (higher RTT, jitter
/// meaningfully above direct, or packet loss meaningfully above direct) is
/// excluded for the remainder of the session. The exclusion bits live in
/// session data, so the mask only ever grows.
pub fn filter_source_relays(
    direct_rtt: i32,
    direct_jitter: i32,
    direct_packet_loss: f32,
    source_relay_rtt: &[i32],
    source_relay_jitter: &[i32],
    source_relay_packet_loss: &[f32],
    first_update: bool,
    exclude: &mut [bool; MAX_CLIENT_RELAYS],
) {
    const JITTER_THRESHOLD: i32 = 10;
    const PACKET_LOSS_THRESHOLD: f32 = 1.0;

    if first_update {
        exclude.fill(false);
    }

    for i in 0..source_relay_rtt.len().min(MAX_CLIENT_RELAYS) {
        if source_relay_rtt[i] >= MAX_RELAY_RTT {
            exclude[i] = true;
        }
        if direct_rtt > 0 && source_relay_rtt[i] >= direct_rtt {
            exclude[i] = true;
        }
        if source_relay_jitter[i] > direct_jitter + JITTER_THRESHOLD {
            exclude[i] = true;
        }
        if source_relay_packet_loss[i] > direct_packet_loss + PACKET_LOSS_THRESHOLD {
            exclude[i] = true;
        }
    }
}

/// Apply an exclusion mask by saturating the excluded relays' latencies.
pub fn apply_exclusion(
    source_relay_rtt: &[i32],
    exclude: &[bool; MAX_CLIENT_RELAYS],
) -> Vec<i32> {
    source_relay_rtt
        .iter()
        .enumerate()
        .map(|(i, &rtt)| {
            if i < MAX_CLIENT_RELAYS && exclude[i] {
                MAX_RELAY_RTT
            } else {
                rtt
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_map(ids: &[u64]) -> HashMap<u64, u32> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u32))
            .collect()
    }

    #[test]
    fn dest_relays_drop_unknowns() {
        let map = index_map(&[10, 20, 30]);
        assert_eq!(reframe_dest_relays(&map, &[20, 99, 10]), vec![1, 0]);
    }

    #[test]
    fn source_relays_preserve_latency_pairing() {
        let map = index_map(&[10, 20, 30]);
        let (indices, rtts) =
            reframe_source_relays(&map, &[10, 99, 30, 20], &[5, 6, 255, 8]);
        // 99 is unknown, 30 is saturated.
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(rtts, vec![5, 8]);
    }

    #[test]
    fn route_reframe_is_all_or_nothing() {
        let map = index_map(&[10, 20, 30]);
        assert_eq!(reframe_route(&map, &[30, 10]), Some(vec![2, 0]));
        assert_eq!(reframe_route(&map, &[30, 99]), None);
        assert_eq!(reframe_route(&map, &[]), Some(vec![]));
    }

    #[test]
    fn exclusion_is_sticky_after_first_update() {
        let mut exclude = [false; MAX_CLIENT_RELAYS];
        exclude[0] = true;

        // First update reseeds the mask.
        filter_source_relays(50, 5, 0.0, &[10, 10], &[0, 0], &[0.0, 0.0], true, &mut exclude);
        assert!(!exclude[0]);

        // A bad relay gets excluded.
        filter_source_relays(50, 5, 0.0, &[60, 10], &[0, 0], &[0.0, 0.0], false, &mut exclude);
        assert!(exclude[0]);

        // And stays excluded even when it recovers.
        filter_source_relays(50, 5, 0.0, &[10, 10], &[0, 0], &[0.0, 0.0], false, &mut exclude);
        assert!(exclude[0]);
        assert!(!exclude[1]);
    }

    #[test]
    fn exclusion_triggers() {
        let mut exclude = [false; MAX_CLIENT_RELAYS];
        filter_source_relays(
            50,
            5,
            0.5,
            &[10, 10, 10, 255],
            &[0, 30, 0, 0],
            &[0.0, 0.0, 5.0, 0.0],
            true,
            &mut exclude,
        );
        assert!(!exclude[0]);
        assert!(exclude[1], "jitter above direct");
        assert!(exclude[2], "packet loss above direct");
        assert!(exclude[3], "saturated rtt");
    }

    #[test]
    fn apply_exclusion_saturates() {
        let mut exclude = [false; MAX_CLIENT_RELAYS];
        exclude[1] = true;
        assert_eq!(apply_exclusion(&[5, 6, 7], &exclude), vec![5, 255, 7]);
    }
}
