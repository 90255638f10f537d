//! Relay update wire formats.
//!
//! Request (`Content-Type: application/octet-stream`):
//!
//! ```text
//! [ version : u8 ]
//! [ relay public address : tagged ]
//! [ box ciphertext ]            // includes the 16-byte MAC
//! [ nonce : 24 bytes ]          // trailing
//! ```
//!
//! The inner plaintext begins with a u64 unix-seconds timestamp. The
//! response enumerates peer relays, the rolling magic values, the relay's
//! expected identity, and a test token the relay uses to self-verify its
//! crypto wiring.

use codec::{read_address, write_address, CodecResult, ReadStream, WriteStream};
use crypto::{BOX_MAC_BYTES, BOX_NONCE_BYTES};
use std::net::SocketAddr;
use types::{ENCRYPTED_ROUTE_TOKEN_BYTES, MAGIC_BYTES, RELAY_UPDATE_RESPONSE_VERSION};

/// Minimum valid outer length: version + smallest address + MAC + nonce.
pub const MIN_RELAY_UPDATE_BYTES: usize = 1 + 1 + 4 + 2 + BOX_MAC_BYTES + BOX_NONCE_BYTES;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayPeer {
    pub relay_id: u64,
    pub address: Option<SocketAddr>,
    pub internal: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayUpdateResponsePacket {
    pub version: u8,
    pub timestamp: u64,
    /// The version string this relay should be running.
    pub target_version: String,
    pub relays: Vec<RelayPeer>,
    pub upcoming_magic: [u8; MAGIC_BYTES],
    pub current_magic: [u8; MAGIC_BYTES],
    pub previous_magic: [u8; MAGIC_BYTES],
    pub expected_public_address: Option<SocketAddr>,
    pub expected_internal_address: Option<SocketAddr>,
    pub expected_relay_public_key: [u8; 32],
    pub expected_backend_public_key: [u8; 32],
    pub test_token: Vec<u8>,
}

impl RelayUpdateResponsePacket {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", RELAY_UPDATE_RESPONSE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp)?;
        stream.write_string("target version", &self.target_version)?;
        stream.write_u32("num relays", self.relays.len() as u32)?;
        for peer in &self.relays {
            stream.write_u64("relay id", peer.relay_id)?;
            write_address(stream, peer.address)?;
            stream.write_u8("relay internal", peer.internal as u8)?;
        }
        stream.write_bytes("upcoming magic", &self.upcoming_magic)?;
        stream.write_bytes("current magic", &self.current_magic)?;
        stream.write_bytes("previous magic", &self.previous_magic)?;
        write_address(stream, self.expected_public_address)?;
        stream.write_bool("has internal address", self.expected_internal_address.is_some())?;
        write_address(stream, self.expected_internal_address)?;
        stream.write_bytes("expected relay public key", &self.expected_relay_public_key)?;
        stream.write_bytes(
            "expected backend public key",
            &self.expected_backend_public_key,
        )?;
        stream.write_byte_vec("test token", &self.test_token)?;
        Ok(())
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != RELAY_UPDATE_RESPONSE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "relay update response",
                version: version as u32,
            });
        }
        let mut packet = Self {
            version,
            timestamp: stream.read_u64("timestamp")?,
            target_version: stream.read_string("target version", 64)?,
            ..Default::default()
        };
        let num_relays = stream.read_u32("num relays")? as usize;
        if num_relays > 65_536 {
            return Err(codec::CodecError::LengthOverflow {
                field: "num relays",
                got: num_relays,
                limit: 65_536,
            });
        }
        for _ in 0..num_relays {
            packet.relays.push(RelayPeer {
                relay_id: stream.read_u64("relay id")?,
                address: read_address(stream)?,
                internal: stream.read_u8("relay internal")? != 0,
            });
        }
        stream.read_bytes("upcoming magic", &mut packet.upcoming_magic)?;
        stream.read_bytes("current magic", &mut packet.current_magic)?;
        stream.read_bytes("previous magic", &mut packet.previous_magic)?;
        packet.expected_public_address = read_address(stream)?;
        let has_internal = stream.read_bool("has internal address")?;
        packet.expected_internal_address = read_address(stream)?;
        if !has_internal {
            packet.expected_internal_address = None;
        }
        stream.read_bytes(
            "expected relay public key",
            &mut packet.expected_relay_public_key,
        )?;
        stream.read_bytes(
            "expected backend public key",
            &mut packet.expected_backend_public_key,
        )?;
        packet.test_token = stream.read_byte_vec("test token", 2 * ENCRYPTED_ROUTE_TOKEN_BYTES)?;
        Ok(packet)
    }
}
