//! Snapshot row types.

use std::net::SocketAddr;
use types::RouteShader;

#[derive(Debug, Clone, PartialEq)]
pub struct Seller {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datacenter {
    pub id: u64,
    pub name: String,
    pub native_name: String,
    pub latitude: f32,
    pub longitude: f32,
    pub seller_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    /// Stable hash of the public `host:port` string.
    pub id: u64,
    pub name: String,
    pub public_address: SocketAddr,
    /// Relays in the same internal group may address each other here.
    pub internal_address: Option<SocketAddr>,
    pub internal_group: u64,
    pub seller_id: u64,
    pub datacenter_id: u64,
    /// X25519 public key.
    pub public_key: [u8; 32],
    /// Version string the relay should be running.
    pub version: String,
    pub mrc_usd: u32,
    pub port_speed_mbps: u32,
    pub max_sessions: u32,
}

impl Relay {
    pub fn has_internal_address(&self) -> bool {
        self.internal_address.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Buyer {
    pub id: u64,
    pub name: String,
    /// Ed25519 public key the buyer signs session update requests with.
    pub public_key: [u8; 32],
    pub customer_id: u64,
    /// Enables the per-session decision trace.
    pub debug: bool,
    pub route_shader: RouteShader,
}
