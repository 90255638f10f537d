//! Snapshot container, versioned binary form, and lookups.

use crate::{Buyer, Datacenter, DatabaseError, DatabaseResult, Relay, Seller};
use codec::{read_address, write_address, CodecError, ReadStream, WriteStream};
use crypto::TokenCipher;
use std::collections::{HashMap, HashSet};
use types::RouteShader;

/// Only this version is readable. Older dumps are regenerated, not migrated.
pub const DATABASE_BINARY_VERSION: u32 = 1;

const MAX_NAME_LENGTH: usize = 256;
const MAX_TABLE_ROWS: usize = 1_000_000;

#[derive(Default, Debug)]
pub struct Database {
    pub creation_timestamp: u64,
    pub sellers: Vec<Seller>,
    pub datacenters: HashMap<u64, Datacenter>,
    pub relays: Vec<Relay>,
    pub buyers: HashMap<u64, Buyer>,

    /// (buyer id, datacenter id) pairs enabled for acceleration.
    pub enabled_datacenters: HashSet<(u64, u64)>,

    // Derived at load.
    relay_index: HashMap<u64, usize>,
    datacenter_relays: HashMap<u64, Vec<u64>>,
    relay_secret_keys: HashMap<u64, TokenCipher>,
}

impl Database {
    /// Rebuild derived indices and validate referential integrity.
    ///
    /// Must be called after the tables are populated, whether from a binary
    /// read or from a test constructor.
    pub fn rebuild(&mut self) -> DatabaseResult<()> {
        let seller_ids: HashSet<u64> = self.sellers.iter().map(|s| s.id).collect();
        if seller_ids.len() != self.sellers.len() {
            return Err(DatabaseError::Integrity("duplicate seller id".into()));
        }

        for datacenter in self.datacenters.values() {
            if !seller_ids.contains(&datacenter.seller_id) {
                return Err(DatabaseError::Integrity(format!(
                    "datacenter {:016x} references unknown seller {:016x}",
                    datacenter.id, datacenter.seller_id
                )));
            }
        }

        self.relay_index.clear();
        self.datacenter_relays.clear();

        for (index, relay) in self.relays.iter().enumerate() {
            if self.relay_index.insert(relay.id, index).is_some() {
                return Err(DatabaseError::Integrity(format!(
                    "duplicate relay id {:016x}",
                    relay.id
                )));
            }
            if !seller_ids.contains(&relay.seller_id) {
                return Err(DatabaseError::Integrity(format!(
                    "relay {} references unknown seller {:016x}",
                    relay.name, relay.seller_id
                )));
            }
            if !self.datacenters.contains_key(&relay.datacenter_id) {
                return Err(DatabaseError::Integrity(format!(
                    "relay {} references unknown datacenter {:016x}",
                    relay.name, relay.datacenter_id
                )));
            }
            self.datacenter_relays
                .entry(relay.datacenter_id)
                .or_default()
                .push(relay.id);
        }

        for &(buyer_id, datacenter_id) in &self.enabled_datacenters {
            if !self.buyers.contains_key(&buyer_id) {
                return Err(DatabaseError::Integrity(format!(
                    "enablement references unknown buyer {buyer_id:016x}"
                )));
            }
            if !self.datacenters.contains_key(&datacenter_id) {
                return Err(DatabaseError::Integrity(format!(
                    "enablement references unknown datacenter {datacenter_id:016x}"
                )));
            }
        }

        Ok(())
    }

    /// Precompute the shared token cipher for every relay.
    pub fn precompute_relay_keys(&mut self, backend_private_key: &[u8]) -> DatabaseResult<()> {
        self.relay_secret_keys.clear();
        for relay in &self.relays {
            let cipher = TokenCipher::new(backend_private_key, &relay.public_key)?;
            self.relay_secret_keys.insert(relay.id, cipher);
        }
        Ok(())
    }

    // --- lookups: never fail, missing keys are None/empty -------------------

    pub fn buyer(&self, id: u64) -> Option<&Buyer> {
        self.buyers.get(&id)
    }

    pub fn datacenter(&self, id: u64) -> Option<&Datacenter> {
        self.datacenters.get(&id)
    }

    pub fn datacenter_exists(&self, id: u64) -> bool {
        self.datacenters.contains_key(&id)
    }

    pub fn datacenter_enabled(&self, buyer_id: u64, datacenter_id: u64) -> bool {
        self.enabled_datacenters.contains(&(buyer_id, datacenter_id))
    }

    pub fn datacenter_relays(&self, id: u64) -> &[u64] {
        self.datacenter_relays.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn relay(&self, id: u64) -> Option<&Relay> {
        self.relay_index.get(&id).map(|&i| &self.relays[i])
    }

    pub fn relay_secret_key(&self, id: u64) -> Option<&TokenCipher> {
        self.relay_secret_keys.get(&id)
    }

    pub fn num_relays(&self) -> usize {
        self.relays.len()
    }

    // --- binary form --------------------------------------------------------

    pub fn write(&self, stream: &mut WriteStream<'_>) -> DatabaseResult<()> {
        stream.write_u32("version number", DATABASE_BINARY_VERSION)?;
        stream.write_u64("creation timestamp", self.creation_timestamp)?;

        stream.write_u32("number of sellers", self.sellers.len() as u32)?;
        for seller in &self.sellers {
            stream.write_u64("seller id", seller.id)?;
            stream.write_string("seller name", &seller.name)?;
        }

        let mut datacenters: Vec<&Datacenter> = self.datacenters.values().collect();
        datacenters.sort_by_key(|d| d.id);
        stream.write_u32("number of datacenters", datacenters.len() as u32)?;
        for datacenter in datacenters {
            stream.write_u64("datacenter id", datacenter.id)?;
            stream.write_string("datacenter name", &datacenter.name)?;
            stream.write_string("datacenter native name", &datacenter.native_name)?;
            stream.write_f32("datacenter latitude", datacenter.latitude)?;
            stream.write_f32("datacenter longitude", datacenter.longitude)?;
            stream.write_u64("datacenter seller id", datacenter.seller_id)?;
        }

        stream.write_u32("number of relays", self.relays.len() as u32)?;
        for relay in &self.relays {
            stream.write_u64("relay id", relay.id)?;
            stream.write_string("relay name", &relay.name)?;
            write_address(stream, Some(relay.public_address))?;
            write_address(stream, relay.internal_address)?;
            stream.write_u64("relay internal group", relay.internal_group)?;
            stream.write_u64("relay seller id", relay.seller_id)?;
            stream.write_u64("relay datacenter id", relay.datacenter_id)?;
            stream.write_bytes("relay public key", &relay.public_key)?;
            stream.write_string("relay version", &relay.version)?;
            stream.write_u32("relay mrc", relay.mrc_usd)?;
            stream.write_u32("relay port speed", relay.port_speed_mbps)?;
            stream.write_u32("relay max sessions", relay.max_sessions)?;
        }

        let mut buyers: Vec<&Buyer> = self.buyers.values().collect();
        buyers.sort_by_key(|b| b.id);
        stream.write_u32("number of buyers", buyers.len() as u32)?;
        for buyer in buyers {
            stream.write_u64("buyer id", buyer.id)?;
            stream.write_string("buyer name", &buyer.name)?;
            stream.write_bytes("buyer public key", &buyer.public_key)?;
            stream.write_u64("buyer customer id", buyer.customer_id)?;
            stream.write_bool("buyer debug", buyer.debug)?;
            write_route_shader(stream, &buyer.route_shader)?;
        }

        let mut enabled: Vec<(u64, u64)> = self.enabled_datacenters.iter().copied().collect();
        enabled.sort();
        stream.write_u32("number of enabled datacenters", enabled.len() as u32)?;
        for (buyer_id, datacenter_id) in enabled {
            stream.write_u64("enabled buyer id", buyer_id)?;
            stream.write_u64("enabled datacenter id", datacenter_id)?;
        }

        Ok(())
    }

    pub fn read(data: &[u8]) -> DatabaseResult<Self> {
        let mut stream = ReadStream::new(data);

        let version = stream.read_u32("version number")?;
        if version != DATABASE_BINARY_VERSION {
            return Err(CodecError::UnknownVersion {
                format: "database",
                version,
            }
            .into());
        }

        let mut database = Database::default();
        database.creation_timestamp = stream.read_u64("creation timestamp")?;

        let num_sellers = read_count(&mut stream, "number of sellers")?;
        for _ in 0..num_sellers {
            database.sellers.push(Seller {
                id: stream.read_u64("seller id")?,
                name: stream.read_string("seller name", MAX_NAME_LENGTH)?,
            });
        }

        let num_datacenters = read_count(&mut stream, "number of datacenters")?;
        for _ in 0..num_datacenters {
            let datacenter = Datacenter {
                id: stream.read_u64("datacenter id")?,
                name: stream.read_string("datacenter name", MAX_NAME_LENGTH)?,
                native_name: stream.read_string("datacenter native name", MAX_NAME_LENGTH)?,
                latitude: stream.read_f32("datacenter latitude")?,
                longitude: stream.read_f32("datacenter longitude")?,
                seller_id: stream.read_u64("datacenter seller id")?,
            };
            database.datacenters.insert(datacenter.id, datacenter);
        }

        let num_relays = read_count(&mut stream, "number of relays")?;
        for _ in 0..num_relays {
            let id = stream.read_u64("relay id")?;
            let name = stream.read_string("relay name", MAX_NAME_LENGTH)?;
            let public_address =
                read_address(&mut stream)?.ok_or_else(|| CodecError::InvalidValue {
                    field: "relay public address",
                    value: 0,
                })?;
            let internal_address = read_address(&mut stream)?;
            let internal_group = stream.read_u64("relay internal group")?;
            let seller_id = stream.read_u64("relay seller id")?;
            let datacenter_id = stream.read_u64("relay datacenter id")?;
            let mut public_key = [0u8; 32];
            stream.read_bytes("relay public key", &mut public_key)?;
            let version = stream.read_string("relay version", MAX_NAME_LENGTH)?;
            let mrc_usd = stream.read_u32("relay mrc")?;
            let port_speed_mbps = stream.read_u32("relay port speed")?;
            let max_sessions = stream.read_u32("relay max sessions")?;
            database.relays.push(Relay {
                id,
                name,
                public_address,
                internal_address,
                internal_group,
                seller_id,
                datacenter_id,
                public_key,
                version,
                mrc_usd,
                port_speed_mbps,
                max_sessions,
            });
        }

        let num_buyers = read_count(&mut stream, "number of buyers")?;
        for _ in 0..num_buyers {
            let id = stream.read_u64("buyer id")?;
            let name = stream.read_string("buyer name", MAX_NAME_LENGTH)?;
            let mut public_key = [0u8; 32];
            stream.read_bytes("buyer public key", &mut public_key)?;
            let customer_id = stream.read_u64("buyer customer id")?;
            let debug = stream.read_bool("buyer debug")?;
            let route_shader = read_route_shader(&mut stream)?;
            database.buyers.insert(
                id,
                Buyer {
                    id,
                    name,
                    public_key,
                    customer_id,
                    debug,
                    route_shader,
                },
            );
        }

        let num_enabled = read_count(&mut stream, "number of enabled datacenters")?;
        for _ in 0..num_enabled {
            let buyer_id = stream.read_u64("enabled buyer id")?;
            let datacenter_id = stream.read_u64("enabled datacenter id")?;
            database.enabled_datacenters.insert((buyer_id, datacenter_id));
        }

        database.rebuild()?;

        Ok(database)
    }

    pub fn load(path: &std::path::Path) -> DatabaseResult<Self> {
        let data = std::fs::read(path)?;
        Self::read(&data)
    }

    pub fn save(&self, path: &std::path::Path) -> DatabaseResult<()> {
        // Generous bound: rows are small and tables are bounded by the admin
        // surface, not by gameplay traffic.
        let mut buffer = vec![0u8; 1024 + self.estimated_size()];
        let mut stream = WriteStream::new(&mut buffer);
        self.write(&mut stream)?;
        let written = stream.bytes_processed();
        std::fs::write(path, &buffer[..written])?;
        Ok(())
    }

    fn estimated_size(&self) -> usize {
        self.sellers.len() * 280
            + self.datacenters.len() * 560
            + self.relays.len() * 700
            + self.buyers.len() * 700
            + self.enabled_datacenters.len() * 16
    }
}

fn read_count(stream: &mut ReadStream<'_>, field: &'static str) -> DatabaseResult<usize> {
    let count = stream.read_u32(field)? as usize;
    if count > MAX_TABLE_ROWS {
        return Err(CodecError::LengthOverflow {
            field,
            got: count,
            limit: MAX_TABLE_ROWS,
        }
        .into());
    }
    Ok(count)
}

fn write_route_shader(stream: &mut WriteStream<'_>, shader: &RouteShader) -> DatabaseResult<()> {
    stream.write_bool("shader ab test", shader.ab_test)?;
    stream.write_f32("shader selection percent", shader.selection_percent)?;
    stream.write_i32("shader acceptable latency", shader.acceptable_latency)?;
    stream.write_f32(
        "shader acceptable packet loss instant",
        shader.acceptable_packet_loss_instant,
    )?;
    stream.write_f32(
        "shader acceptable packet loss sustained",
        shader.acceptable_packet_loss_sustained,
    )?;
    stream.write_i32(
        "shader latency reduction threshold",
        shader.latency_reduction_threshold,
    )?;
    stream.write_i32("shader max latency trade off", shader.max_latency_trade_off)?;
    stream.write_i32("shader max next rtt", shader.max_next_rtt)?;
    stream.write_i32("shader route switch threshold", shader.route_switch_threshold)?;
    stream.write_i32("shader route select threshold", shader.route_select_threshold)?;
    stream.write_i32("shader rtt veto default", shader.rtt_veto_default)?;
    stream.write_i32("shader rtt veto multipath", shader.rtt_veto_multipath)?;
    stream.write_i32("shader rtt veto packetloss", shader.rtt_veto_packetloss)?;
    stream.write_bool("shader reduce latency", shader.reduce_latency)?;
    stream.write_bool("shader reduce packet loss", shader.reduce_packet_loss)?;
    stream.write_bool("shader multipath", shader.multipath)?;
    stream.write_bool("shader force next", shader.force_next)?;
    stream.write_bool("shader analysis only", shader.analysis_only)?;
    stream.write_bool("shader disable network next", shader.disable_network_next)?;
    stream.write_i32(
        "shader bandwidth envelope up",
        shader.bandwidth_envelope_up_kbps,
    )?;
    stream.write_i32(
        "shader bandwidth envelope down",
        shader.bandwidth_envelope_down_kbps,
    )?;
    stream.write_i32("shader route diversity", shader.route_diversity)?;
    Ok(())
}

fn read_route_shader(stream: &mut ReadStream<'_>) -> DatabaseResult<RouteShader> {
    let mut shader = RouteShader::default();
    shader.ab_test = stream.read_bool("shader ab test")?;
    shader.selection_percent = stream.read_f32("shader selection percent")?;
    shader.acceptable_latency = stream.read_i32("shader acceptable latency")?;
    shader.acceptable_packet_loss_instant =
        stream.read_f32("shader acceptable packet loss instant")?;
    shader.acceptable_packet_loss_sustained =
        stream.read_f32("shader acceptable packet loss sustained")?;
    shader.latency_reduction_threshold =
        stream.read_i32("shader latency reduction threshold")?;
    shader.max_latency_trade_off = stream.read_i32("shader max latency trade off")?;
    shader.max_next_rtt = stream.read_i32("shader max next rtt")?;
    shader.route_switch_threshold = stream.read_i32("shader route switch threshold")?;
    shader.route_select_threshold = stream.read_i32("shader route select threshold")?;
    shader.rtt_veto_default = stream.read_i32("shader rtt veto default")?;
    shader.rtt_veto_multipath = stream.read_i32("shader rtt veto multipath")?;
    shader.rtt_veto_packetloss = stream.read_i32("shader rtt veto packetloss")?;
    shader.reduce_latency = stream.read_bool("shader reduce latency")?;
    shader.reduce_packet_loss = stream.read_bool("shader reduce packet loss")?;
    shader.multipath = stream.read_bool("shader multipath")?;
    shader.force_next = stream.read_bool("shader force next")?;
    shader.analysis_only = stream.read_bool("shader analysis only")?;
    shader.disable_network_next = stream.read_bool("shader disable network next")?;
    shader.bandwidth_envelope_up_kbps = stream.read_i32("shader bandwidth envelope up")?;
    shader.bandwidth_envelope_down_kbps = stream.read_i32("shader bandwidth envelope down")?;
    shader.route_diversity = stream.read_i32("shader route diversity")?;
    shader.rtt_veto = None;
    Ok(shader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::relay_id;

    pub(crate) fn test_database() -> Database {
        let mut database = Database::default();
        database.creation_timestamp = 1_700_000_000;
        database.sellers.push(Seller {
            id: 1,
            name: "seller.one".into(),
        });
        database.datacenters.insert(
            100,
            Datacenter {
                id: 100,
                name: "iad".into(),
                native_name: "amazon.virginia.1".into(),
                latitude: 38.9,
                longitude: -77.4,
                seller_id: 1,
            },
        );
        let address = "10.0.0.1:40000";
        database.relays.push(Relay {
            id: relay_id(address),
            name: "iad.1".into(),
            public_address: address.parse().unwrap(),
            internal_address: Some("192.168.0.1:40000".parse().unwrap()),
            internal_group: 7,
            seller_id: 1,
            datacenter_id: 100,
            public_key: [3u8; 32],
            version: "1.0.0".into(),
            mrc_usd: 500,
            port_speed_mbps: 10_000,
            max_sessions: 3000,
        });
        database.buyers.insert(
            9000,
            Buyer {
                id: 9000,
                name: "game.studio".into(),
                public_key: [5u8; 32],
                customer_id: 42,
                debug: false,
                route_shader: RouteShader::default(),
            },
        );
        database.enabled_datacenters.insert((9000, 100));
        database.rebuild().unwrap();
        database
    }

    #[test]
    fn binary_round_trip() {
        let database = test_database();
        let mut buffer = vec![0u8; 16 * 1024];
        let mut stream = WriteStream::new(&mut buffer);
        database.write(&mut stream).unwrap();
        let written = stream.bytes_processed();

        let read_back = Database::read(&buffer[..written]).unwrap();
        assert_eq!(read_back.creation_timestamp, database.creation_timestamp);
        assert_eq!(read_back.sellers, database.sellers);
        assert_eq!(read_back.relays, database.relays);
        assert_eq!(read_back.buyers.len(), 1);
        assert_eq!(
            read_back.buyers[&9000].route_shader,
            database.buyers[&9000].route_shader
        );
        assert!(read_back.datacenter_enabled(9000, 100));
    }

    #[test]
    fn save_load_round_trip() {
        let database = test_database();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.bin");
        database.save(&path).unwrap();
        let loaded = Database::load(&path).unwrap();
        assert_eq!(loaded.relays, database.relays);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut buffer = [0u8; 4];
        let mut stream = WriteStream::new(&mut buffer);
        stream.write_u32("version number", 99).unwrap();
        let err = Database::read(&buffer).unwrap_err();
        assert!(err
            .to_string()
            .contains("unknown database version: 99"));
    }

    #[test]
    fn integrity_unknown_datacenter() {
        let mut database = test_database();
        database.relays[0].datacenter_id = 12345;
        assert!(matches!(
            database.rebuild().unwrap_err(),
            DatabaseError::Integrity(_)
        ));
    }

    #[test]
    fn integrity_unknown_seller() {
        let mut database = test_database();
        database.relays[0].seller_id = 99;
        assert!(database.rebuild().is_err());
    }

    #[test]
    fn lookups_never_fail() {
        let database = test_database();
        assert!(database.buyer(1).is_none());
        assert!(database.relay(1).is_none());
        assert!(!database.datacenter_exists(1));
        assert!(!database.datacenter_enabled(1, 2));
        assert!(database.datacenter_relays(1).is_empty());
        assert_eq!(database.datacenter_relays(100).len(), 1);
    }

    #[test]
    fn relay_secret_keys_precomputed() {
        let mut database = test_database();
        let (relay_public, relay_private) = crypto::generate_box_keypair();
        database.relays[0].public_key = relay_public;
        database.rebuild().unwrap();

        let (backend_public, backend_private) = crypto::generate_box_keypair();
        database.precompute_relay_keys(&backend_private).unwrap();

        let relay_id = database.relays[0].id;
        let cipher = database.relay_secret_key(relay_id).unwrap();
        let nonce = crypto::generate_nonce();
        let sealed = cipher.encrypt(&nonce, b"token").unwrap();

        // The relay opens it with its own private key and the backend public.
        let relay_side = TokenCipher::new(&relay_private, &backend_public).unwrap();
        assert_eq!(relay_side.decrypt(&nonce, &sealed).unwrap(), b"token");
    }
}
