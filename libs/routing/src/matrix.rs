//! Route matrix: top-K lowest-cost routes for every relay pair.
//!
//! Entries are stored once per unordered pair under the triangular index,
//! with hop vectors oriented from the lower relay index to the higher.
//! [`RouteMatrix::routes`] re-orients on the fly, so callers always see
//! hops running source → destination.
//!
//! The binary form is versioned; this code reads and writes only the
//! current version and rejects anything else outright; truncating an
//! unknown future format would be far worse than failing the load.

use crate::tri::{tri_index, tri_matrix_length};
use crate::RoutingResult;
use codec::{read_address, write_address, CodecError, ReadStream, WriteStream};
use std::collections::HashMap;
use std::net::SocketAddr;
use types::{MAX_ROUTES_PER_ENTRY, MAX_ROUTE_RELAYS};

/// Current (only) binary version. Earlier versions are retired; readers
/// reject them explicitly.
pub const ROUTE_MATRIX_BINARY_VERSION: u32 = 6;

const MAX_NAME_LENGTH: usize = 256;
const MAX_RELAYS: usize = 65_536;

/// Routes for one unordered relay pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    /// RTT of the direct relay-to-relay link; 255 when unreachable.
    pub direct_rtt: i32,
    pub num_routes: u8,
    /// Cost-ascending.
    pub route_rtt: [i32; MAX_ROUTES_PER_ENTRY],
    pub route_num_relays: [u8; MAX_ROUTES_PER_ENTRY],
    /// Relay indices, oriented lower index → higher index.
    pub route_relays: [[u32; MAX_ROUTE_RELAYS]; MAX_ROUTES_PER_ENTRY],
}

impl Default for RouteEntry {
    fn default() -> Self {
        Self {
            direct_rtt: 255,
            num_routes: 0,
            route_rtt: [0; MAX_ROUTES_PER_ENTRY],
            route_num_relays: [0; MAX_ROUTES_PER_ENTRY],
            route_relays: [[0; MAX_ROUTE_RELAYS]; MAX_ROUTES_PER_ENTRY],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteMatrix {
    /// Unix seconds when the optimizer produced this matrix. The session
    /// pipeline refuses to route off a stale matrix.
    pub created_at: u64,

    pub relay_ids: Vec<u64>,
    pub relay_names: Vec<String>,
    pub relay_addresses: Vec<SocketAddr>,
    pub relay_public_keys: Vec<[u8; 32]>,
    pub relay_datacenter_ids: Vec<u64>,
    pub relay_seller_ids: Vec<u64>,
    pub relay_session_counts: Vec<u32>,
    pub relay_max_session_counts: Vec<u32>,

    pub datacenter_relays: HashMap<u64, Vec<u64>>,

    pub entries: Vec<RouteEntry>,

    pub(crate) relay_index: HashMap<u64, u32>,
}

impl RouteMatrix {
    pub fn num_relays(&self) -> usize {
        self.relay_ids.len()
    }

    /// Rebuild the id → index map after populating the relay tables.
    pub fn rebuild_index(&mut self) {
        self.relay_index = self
            .relay_ids
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index as u32))
            .collect();
    }

    pub fn relay_index(&self, relay_id: u64) -> Option<u32> {
        self.relay_index.get(&relay_id).copied()
    }

    pub fn relay_index_map(&self) -> &HashMap<u64, u32> {
        &self.relay_index
    }

    #[inline]
    pub fn entry(&self, i: usize, j: usize) -> &RouteEntry {
        &self.entries[tri_index(i, j)]
    }

    pub fn direct_rtt(&self, i: usize, j: usize) -> i32 {
        self.entry(i, j).direct_rtt
    }

    /// Routes from `src` to `dst`, cost-ascending, hops oriented src → dst.
    pub fn routes(&self, src: usize, dst: usize) -> Vec<(i32, Vec<u32>)> {
        let entry = self.entry(src, dst);
        let reverse = src > dst;
        (0..entry.num_routes as usize)
            .map(|k| {
                let num_relays = entry.route_num_relays[k] as usize;
                let mut hops: Vec<u32> = entry.route_relays[k][..num_relays].to_vec();
                if reverse {
                    hops.reverse();
                }
                (entry.route_rtt[k], hops)
            })
            .collect()
    }

    pub fn write(&self, stream: &mut WriteStream<'_>) -> RoutingResult<()> {
        stream.write_u32("version number", ROUTE_MATRIX_BINARY_VERSION)?;
        stream.write_u64("created at", self.created_at)?;

        let num_relays = self.num_relays();
        stream.write_u32("number of relays", num_relays as u32)?;
        for i in 0..num_relays {
            stream.write_u64("relay id", self.relay_ids[i])?;
            stream.write_string("relay name", &self.relay_names[i])?;
            write_address(stream, Some(self.relay_addresses[i]))?;
            stream.write_bytes("relay public key", &self.relay_public_keys[i])?;
            stream.write_u64("relay datacenter id", self.relay_datacenter_ids[i])?;
            stream.write_u64("relay seller id", self.relay_seller_ids[i])?;
            stream.write_u32("relay session count", self.relay_session_counts[i])?;
            stream.write_u32("relay max session count", self.relay_max_session_counts[i])?;
        }

        let mut datacenters: Vec<(&u64, &Vec<u64>)> = self.datacenter_relays.iter().collect();
        datacenters.sort_by_key(|(id, _)| **id);
        stream.write_u32("number of datacenters", datacenters.len() as u32)?;
        for (datacenter_id, relays) in datacenters {
            stream.write_u64("datacenter id", *datacenter_id)?;
            stream.write_u32("number of relays in datacenter", relays.len() as u32)?;
            for relay_id in relays {
                stream.write_u64("relay id for datacenter", *relay_id)?;
            }
        }

        stream.write_u32("number of entries", self.entries.len() as u32)?;
        for entry in &self.entries {
            stream.write_i32("direct rtt", entry.direct_rtt)?;
            stream.write_u8("number of routes", entry.num_routes)?;
            for k in 0..entry.num_routes as usize {
                stream.write_i32("route rtt", entry.route_rtt[k])?;
                stream.write_u8("number of relays in route", entry.route_num_relays[k])?;
                for h in 0..entry.route_num_relays[k] as usize {
                    stream.write_u32("relays in route", entry.route_relays[k][h])?;
                }
            }
        }

        Ok(())
    }

    pub fn read(data: &[u8]) -> RoutingResult<Self> {
        let mut stream = ReadStream::new(data);

        let version = stream.read_u32("version number")?;
        if version != ROUTE_MATRIX_BINARY_VERSION {
            return Err(CodecError::UnknownVersion {
                format: "route matrix",
                version,
            }
            .into());
        }

        let mut matrix = RouteMatrix::default();
        matrix.created_at = stream.read_u64("created at")?;

        let num_relays = stream.read_u32("number of relays")? as usize;
        if num_relays > MAX_RELAYS {
            return Err(CodecError::LengthOverflow {
                field: "number of relays",
                got: num_relays,
                limit: MAX_RELAYS,
            }
            .into());
        }
        for _ in 0..num_relays {
            matrix.relay_ids.push(stream.read_u64("relay id")?);
            matrix
                .relay_names
                .push(stream.read_string("relay name", MAX_NAME_LENGTH)?);
            let address = read_address(&mut stream)?.ok_or(CodecError::InvalidValue {
                field: "relay address",
                value: 0,
            })?;
            matrix.relay_addresses.push(address);
            let mut key = [0u8; 32];
            stream.read_bytes("relay public key", &mut key)?;
            matrix.relay_public_keys.push(key);
            matrix
                .relay_datacenter_ids
                .push(stream.read_u64("relay datacenter id")?);
            matrix
                .relay_seller_ids
                .push(stream.read_u64("relay seller id")?);
            matrix
                .relay_session_counts
                .push(stream.read_u32("relay session count")?);
            matrix
                .relay_max_session_counts
                .push(stream.read_u32("relay max session count")?);
        }

        let num_datacenters = stream.read_u32("number of datacenters")? as usize;
        if num_datacenters > MAX_RELAYS {
            return Err(CodecError::LengthOverflow {
                field: "number of datacenters",
                got: num_datacenters,
                limit: MAX_RELAYS,
            }
            .into());
        }
        for _ in 0..num_datacenters {
            let datacenter_id = stream.read_u64("datacenter id")?;
            let count = stream.read_u32("number of relays in datacenter")? as usize;
            if count > MAX_RELAYS {
                return Err(CodecError::LengthOverflow {
                    field: "number of relays in datacenter",
                    got: count,
                    limit: MAX_RELAYS,
                }
                .into());
            }
            let mut relays = Vec::with_capacity(count);
            for _ in 0..count {
                relays.push(stream.read_u64("relay id for datacenter")?);
            }
            matrix.datacenter_relays.insert(datacenter_id, relays);
        }

        let num_entries = stream.read_u32("number of entries")? as usize;
        if num_entries != tri_matrix_length(num_relays) {
            return Err(CodecError::InvalidValue {
                field: "number of entries",
                value: num_entries as u64,
            }
            .into());
        }
        for _ in 0..num_entries {
            let mut entry = RouteEntry::default();
            entry.direct_rtt = stream.read_i32("direct rtt")?;
            entry.num_routes = stream.read_u8("number of routes")?;
            if entry.num_routes as usize > MAX_ROUTES_PER_ENTRY {
                return Err(CodecError::InvalidValue {
                    field: "number of routes",
                    value: entry.num_routes as u64,
                }
                .into());
            }
            for k in 0..entry.num_routes as usize {
                entry.route_rtt[k] = stream.read_i32("route rtt")?;
                entry.route_num_relays[k] = stream.read_u8("number of relays in route")?;
                if entry.route_num_relays[k] as usize > MAX_ROUTE_RELAYS {
                    return Err(CodecError::InvalidValue {
                        field: "number of relays in route",
                        value: entry.route_num_relays[k] as u64,
                    }
                    .into());
                }
                for h in 0..entry.route_num_relays[k] as usize {
                    entry.route_relays[k][h] = stream.read_u32("relays in route")?;
                }
            }
            matrix.entries.push(entry);
        }

        matrix.rebuild_index();

        Ok(matrix)
    }

    pub fn load(path: &std::path::Path) -> RoutingResult<Self> {
        let data = std::fs::read(path)?;
        Self::read(&data)
    }

    pub fn save(&self, path: &std::path::Path) -> RoutingResult<()> {
        let size = 64
            + self.num_relays() * (16 + MAX_NAME_LENGTH + 19 + 32 + 8 + 8 + 4 + 4)
            + self.datacenter_relays.len() * 16
            + self.num_relays() * 8 * self.datacenter_relays.len().max(1)
            + self.entries.len() * (4 + 1 + MAX_ROUTES_PER_ENTRY * (4 + 1 + MAX_ROUTE_RELAYS * 4));
        let mut buffer = vec![0u8; size];
        let mut stream = WriteStream::new(&mut buffer);
        self.write(&mut stream)?;
        let written = stream.bytes_processed();
        std::fs::write(path, &buffer[..written])?;
        Ok(())
    }
}
