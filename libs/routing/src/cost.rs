//! Cost matrix: the optimizer's input.
//!
//! Costs are smoothed RTTs in milliseconds, one `u8` per unordered relay
//! pair, with 255 meaning unreachable. The relay tables ride along so the
//! optimizer can copy them into the route matrix without a database round
//! trip.

use crate::tri::{tri_index, tri_matrix_length};
use crate::RoutingResult;
use codec::{read_address, write_address, CodecError, ReadStream, WriteStream};
use std::net::SocketAddr;
use types::UNREACHABLE_COST;

pub const COST_MATRIX_BINARY_VERSION: u32 = 2;

const MAX_NAME_LENGTH: usize = 256;
const MAX_RELAYS: usize = 65_536;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostMatrix {
    pub relay_ids: Vec<u64>,
    pub relay_names: Vec<String>,
    pub relay_addresses: Vec<SocketAddr>,
    pub relay_public_keys: Vec<[u8; 32]>,
    pub relay_datacenter_ids: Vec<u64>,
    pub relay_seller_ids: Vec<u64>,
    pub relay_max_sessions: Vec<u32>,
    /// Relays that can terminate a route (sit next to game servers).
    pub dest_relay: Vec<bool>,
    /// Upper-triangular costs, `tri_matrix_length(num_relays)` entries.
    pub costs: Vec<u8>,
}

impl CostMatrix {
    pub fn num_relays(&self) -> usize {
        self.relay_ids.len()
    }

    /// Cost between two distinct relays; 255 is unreachable.
    #[inline]
    pub fn cost(&self, i: usize, j: usize) -> u8 {
        self.costs[tri_index(i, j)]
    }

    /// Cost with intra-datacenter links collapsed to zero.
    #[inline]
    pub fn link_cost(&self, i: usize, j: usize) -> u8 {
        if self.relay_datacenter_ids[i] == self.relay_datacenter_ids[j] {
            0
        } else {
            self.cost(i, j)
        }
    }

    pub fn write(&self, stream: &mut WriteStream<'_>) -> RoutingResult<()> {
        stream.write_u32("version number", COST_MATRIX_BINARY_VERSION)?;
        stream.write_u32("number of relays", self.num_relays() as u32)?;
        for i in 0..self.num_relays() {
            stream.write_u64("relay id", self.relay_ids[i])?;
            stream.write_string("relay name", &self.relay_names[i])?;
            write_address(stream, Some(self.relay_addresses[i]))?;
            stream.write_bytes("relay public key", &self.relay_public_keys[i])?;
            stream.write_u64("relay datacenter id", self.relay_datacenter_ids[i])?;
            stream.write_u64("relay seller id", self.relay_seller_ids[i])?;
            stream.write_u32("relay max sessions", self.relay_max_sessions[i])?;
            stream.write_bool("relay dest flag", self.dest_relay[i])?;
        }
        stream.write_bytes("costs", &self.costs)?;
        Ok(())
    }

    pub fn read(data: &[u8]) -> RoutingResult<Self> {
        let mut stream = ReadStream::new(data);

        let version = stream.read_u32("version number")?;
        if version != COST_MATRIX_BINARY_VERSION {
            return Err(CodecError::UnknownVersion {
                format: "cost matrix",
                version,
            }
            .into());
        }

        let num_relays = stream.read_u32("number of relays")? as usize;
        if num_relays > MAX_RELAYS {
            return Err(CodecError::LengthOverflow {
                field: "number of relays",
                got: num_relays,
                limit: MAX_RELAYS,
            }
            .into());
        }

        let mut matrix = CostMatrix::default();
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
                .relay_max_sessions
                .push(stream.read_u32("relay max sessions")?);
            matrix.dest_relay.push(stream.read_bool("relay dest flag")?);
        }

        let mut costs = vec![0u8; tri_matrix_length(num_relays)];
        stream.read_bytes("costs", &mut costs)?;
        matrix.costs = costs;

        Ok(matrix)
    }

    pub fn load(path: &std::path::Path) -> RoutingResult<Self> {
        let data = std::fs::read(path)?;
        Self::read(&data)
    }

    pub fn save(&self, path: &std::path::Path) -> RoutingResult<()> {
        let size = 64
            + self.num_relays() * (8 + MAX_NAME_LENGTH + 32 + 19 + 8 + 8 + 4 + 1 + 8)
            + self.costs.len();
        let mut buffer = vec![0u8; size];
        let mut stream = WriteStream::new(&mut buffer);
        self.write(&mut stream)?;
        let written = stream.bytes_processed();
        std::fs::write(path, &buffer[..written])?;
        Ok(())
    }
}

/// Test/tool helper: a fully connected matrix over `costs[i][j]` values.
pub fn cost_matrix_from_table(
    relay_addresses: &[&str],
    datacenter_ids: &[u64],
    table: &[&[u8]],
) -> CostMatrix {
    let n = relay_addresses.len();
    let mut matrix = CostMatrix {
        relay_ids: relay_addresses.iter().map(|a| types::relay_id(a)).collect(),
        relay_names: (0..n).map(|i| format!("relay.{i}")).collect(),
        relay_addresses: relay_addresses.iter().map(|a| a.parse().unwrap()).collect(),
        relay_public_keys: vec![[0u8; 32]; n],
        relay_datacenter_ids: datacenter_ids.to_vec(),
        relay_seller_ids: vec![1; n],
        relay_max_sessions: vec![3000; n],
        dest_relay: vec![true; n],
        costs: vec![UNREACHABLE_COST; tri_matrix_length(n)],
    };
    for i in 0..n {
        for j in 0..i {
            matrix.costs[tri_index(i, j)] = table[i][j];
        }
    }
    matrix
}
