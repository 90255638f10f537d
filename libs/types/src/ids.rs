//! Stable 64-bit identifiers.
//!
//! Relay ids are derived from the relay's public `host:port` string so that
//! every component (backend, gateway, optimizer, relays themselves) computes
//! the same id without coordination. The hash is FNV-1a, which is stable
//! across platforms and versions.

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// FNV-1a over an arbitrary byte string.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Relay id from the relay's public address string, e.g. `"10.0.0.1:40000"`.
pub fn relay_id(address: &str) -> u64 {
    hash_bytes(address.as_bytes())
}

/// Datacenter id from the datacenter's native name.
pub fn datacenter_id(name: &str) -> u64 {
    hash_bytes(name.as_bytes())
}

/// AB-test bucket for a user hash: true means the user is in the selected
/// ("A") half for the given selection percentage.
pub fn ab_test_selected(user_hash: u64, selection_percent: f32) -> bool {
    let bucket = (user_hash % 100) as f32;
    bucket < selection_percent
}
