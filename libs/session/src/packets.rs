//! SDK packets: framing plus the session update request and response.
//!
//! Packet layout:
//!
//! ```text
//! [ packet type : u8 ]
//! [ prefix : 16 bytes ]        // random, not covered by the signature
//! [ header hash : u8[8] ]      // FNV-1a over (type, from, to)
//! [ payload ]
//! [ signature : u8[64] ]       // Ed25519 over [header hash .. payload]
//! ```
//!
//! The header hash pins a packet to its address pair, which stops trivial
//! reflection; the signature is the real authentication. Requests are
//! signed by the buyer, responses by the server backend.

use crate::{SessionData, SessionError, SessionResult};
use codec::{read_address, write_address, ReadStream, WriteStream};
use crypto::SIGN_SIGNATURE_BYTES;
use std::net::SocketAddr;
use types::{
    hash_bytes, MAX_CLIENT_RELAYS, MAX_SERVER_RELAYS, MAX_SESSION_DATA_SIZE, ROUTE_TYPE_DIRECT,
};

pub const PACKET_PREFIX_BYTES: usize = 16;
pub const PACKET_HASH_BYTES: usize = 8;

/// Smallest possible framed packet: type + prefix + hash + signature.
pub const MIN_PACKET_BYTES: usize =
    1 + PACKET_PREFIX_BYTES + PACKET_HASH_BYTES + SIGN_SIGNATURE_BYTES;

fn unspecified_address() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        0,
    )
}

fn header_hash(packet_type: u8, from: &SocketAddr, to: &SocketAddr) -> u64 {
    let material = format!("{packet_type}|{from}|{to}");
    hash_bytes(material.as_bytes())
}

/// Frame, hash, and sign a payload into `output`. Returns the packet length.
pub fn write_packet(
    packet_type: u8,
    payload: &[u8],
    from: &SocketAddr,
    to: &SocketAddr,
    private_key: &[u8],
    output: &mut [u8],
) -> SessionResult<usize> {
    let total = MIN_PACKET_BYTES + payload.len();
    if output.len() < total {
        return Err(codec::CodecError::ShortWrite {
            field: "packet",
            need: total,
            remaining: output.len(),
        }
        .into());
    }

    output[0] = packet_type;
    rand::Rng::fill(&mut rand::thread_rng(), &mut output[1..1 + PACKET_PREFIX_BYTES]);

    let hash_start = 1 + PACKET_PREFIX_BYTES;
    let payload_start = hash_start + PACKET_HASH_BYTES;
    output[hash_start..payload_start]
        .copy_from_slice(&header_hash(packet_type, from, to).to_le_bytes());
    output[payload_start..payload_start + payload.len()].copy_from_slice(payload);

    let signed_region = hash_start..payload_start + payload.len();
    let signature = crypto::sign(&output[signed_region.clone()], private_key)?;
    output[signed_region.end..signed_region.end + SIGN_SIGNATURE_BYTES]
        .copy_from_slice(&signature);

    Ok(total)
}

/// Validate framing and the header hash; returns the packet type and the
/// payload region. Does NOT verify the signature; callers first parse the
/// payload to find out whose key to verify with, then call
/// [`verify_packet_signature`].
pub fn parse_packet<'a>(
    data: &'a [u8],
    from: &SocketAddr,
    to: &SocketAddr,
) -> SessionResult<(u8, &'a [u8])> {
    if data.len() < MIN_PACKET_BYTES {
        return Err(SessionError::PacketTooSmall { got: data.len() });
    }

    let packet_type = data[0];
    let hash_start = 1 + PACKET_PREFIX_BYTES;
    let payload_start = hash_start + PACKET_HASH_BYTES;

    let mut expected = [0u8; PACKET_HASH_BYTES];
    expected.copy_from_slice(&header_hash(packet_type, from, to).to_le_bytes());
    if data[hash_start..payload_start] != expected {
        return Err(SessionError::BadHeaderHash);
    }

    Ok((
        packet_type,
        &data[payload_start..data.len() - SIGN_SIGNATURE_BYTES],
    ))
}

/// Verify the trailing signature against the signed region.
pub fn verify_packet_signature(data: &[u8], public_key: &[u8]) -> bool {
    if data.len() < MIN_PACKET_BYTES {
        return false;
    }
    let hash_start = 1 + PACKET_PREFIX_BYTES;
    let signature_start = data.len() - SIGN_SIGNATURE_BYTES;
    crypto::verify(
        &data[hash_start..signature_start],
        public_key,
        &data[signature_start..],
    )
}

/// One relay ping block in the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayPings {
    pub ids: Vec<u64>,
    pub rtt: Vec<i32>,
    pub jitter: Vec<i32>,
    pub packet_loss: Vec<f32>,
}

impl RelayPings {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn write(&self, stream: &mut WriteStream<'_>, field: &'static str) -> SessionResult<()> {
        stream.write_u8(field, self.ids.len() as u8)?;
        for i in 0..self.ids.len() {
            stream.write_u64("relay id", self.ids[i])?;
            stream.write_i32("relay rtt", self.rtt[i])?;
            stream.write_i32("relay jitter", self.jitter[i])?;
            stream.write_f32("relay packet loss", self.packet_loss[i])?;
        }
        Ok(())
    }

    fn read(
        stream: &mut ReadStream<'_>,
        field: &'static str,
        limit: usize,
    ) -> SessionResult<Self> {
        let count = stream.read_u8(field)? as usize;
        if count > limit {
            return Err(codec::CodecError::LengthOverflow {
                field,
                got: count,
                limit,
            }
            .into());
        }
        let mut pings = Self::default();
        for _ in 0..count {
            pings.ids.push(stream.read_u64("relay id")?);
            pings.rtt.push(stream.read_i32("relay rtt")?);
            pings.jitter.push(stream.read_i32("relay jitter")?);
            pings.packet_loss.push(stream.read_f32("relay packet loss")?);
        }
        Ok(pings)
    }
}

/// Everything the SDK reports for one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdateRequestPacket {
    pub sdk_version_major: u8,
    pub sdk_version_minor: u8,
    pub sdk_version_patch: u8,

    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub session_id: u64,
    pub slice_number: u32,
    pub retry_number: u32,
    pub user_hash: u64,

    pub client_address: SocketAddr,
    pub server_address: SocketAddr,

    pub platform_type: u8,
    pub connection_type: u8,

    pub next: bool,
    pub fallback_to_direct: bool,
    pub client_ping_timed_out: bool,
    pub reported: bool,
    pub client_next_bandwidth_over_limit: bool,
    pub server_next_bandwidth_over_limit: bool,

    pub direct_rtt: f32,
    pub direct_jitter: f32,
    pub direct_packet_loss: f32,
    pub direct_max_packet_loss_seen: f32,
    pub direct_kbps_up: u32,
    pub direct_kbps_down: u32,

    pub next_rtt: f32,
    pub next_jitter: f32,
    pub next_packet_loss: f32,
    pub next_kbps_up: u32,
    pub next_kbps_down: u32,

    pub jitter_client_to_server: f32,
    pub jitter_server_to_client: f32,

    pub packets_sent_client_to_server: u64,
    pub packets_sent_server_to_client: u64,
    pub packets_lost_client_to_server: u64,
    pub packets_lost_server_to_client: u64,
    pub packets_out_of_order_client_to_server: u64,
    pub packets_out_of_order_server_to_client: u64,

    pub session_events: u64,
    pub internal_events: u64,

    pub client_relays: RelayPings,
    pub server_relays: RelayPings,

    pub client_route_public_key: [u8; 32],
    pub server_route_public_key: [u8; 32],

    /// Opaque signed session data from the previous slice.
    pub session_data_bytes: u32,
    pub session_data: [u8; MAX_SESSION_DATA_SIZE],
    pub session_data_signature: [u8; SIGN_SIGNATURE_BYTES],
}

impl Default for SessionUpdateRequestPacket {
    fn default() -> Self {
        Self {
            sdk_version_major: 0,
            sdk_version_minor: 0,
            sdk_version_patch: 0,
            buyer_id: 0,
            datacenter_id: 0,
            session_id: 0,
            slice_number: 0,
            retry_number: 0,
            user_hash: 0,
            client_address: unspecified_address(),
            server_address: unspecified_address(),
            platform_type: 0,
            connection_type: 0,
            next: false,
            fallback_to_direct: false,
            client_ping_timed_out: false,
            reported: false,
            client_next_bandwidth_over_limit: false,
            server_next_bandwidth_over_limit: false,
            direct_rtt: 0.0,
            direct_jitter: 0.0,
            direct_packet_loss: 0.0,
            direct_max_packet_loss_seen: 0.0,
            direct_kbps_up: 0,
            direct_kbps_down: 0,
            next_rtt: 0.0,
            next_jitter: 0.0,
            next_packet_loss: 0.0,
            next_kbps_up: 0,
            next_kbps_down: 0,
            jitter_client_to_server: 0.0,
            jitter_server_to_client: 0.0,
            packets_sent_client_to_server: 0,
            packets_sent_server_to_client: 0,
            packets_lost_client_to_server: 0,
            packets_lost_server_to_client: 0,
            packets_out_of_order_client_to_server: 0,
            packets_out_of_order_server_to_client: 0,
            session_events: 0,
            internal_events: 0,
            client_relays: RelayPings::default(),
            server_relays: RelayPings::default(),
            client_route_public_key: [0; 32],
            server_route_public_key: [0; 32],
            session_data_bytes: 0,
            session_data: [0; MAX_SESSION_DATA_SIZE],
            session_data_signature: [0; SIGN_SIGNATURE_BYTES],
        }
    }
}

impl SessionUpdateRequestPacket {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> SessionResult<()> {
        stream.write_u8("sdk major", self.sdk_version_major)?;
        stream.write_u8("sdk minor", self.sdk_version_minor)?;
        stream.write_u8("sdk patch", self.sdk_version_patch)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("datacenter id", self.datacenter_id)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u32("slice number", self.slice_number)?;
        stream.write_u32("retry number", self.retry_number)?;
        stream.write_u64("user hash", self.user_hash)?;
        write_address(stream, Some(self.client_address))?;
        write_address(stream, Some(self.server_address))?;
        stream.write_u8("platform type", self.platform_type)?;
        stream.write_u8("connection type", self.connection_type)?;

        let mut flags = 0u8;
        let fields = [
            self.next,
            self.fallback_to_direct,
            self.client_ping_timed_out,
            self.reported,
            self.client_next_bandwidth_over_limit,
            self.server_next_bandwidth_over_limit,
        ];
        for (i, field) in fields.iter().enumerate() {
            if *field {
                flags |= 1 << i;
            }
        }
        stream.write_u8("request flags", flags)?;

        stream.write_f32("direct rtt", self.direct_rtt)?;
        stream.write_f32("direct jitter", self.direct_jitter)?;
        stream.write_f32("direct packet loss", self.direct_packet_loss)?;
        stream.write_f32("direct max packet loss seen", self.direct_max_packet_loss_seen)?;
        stream.write_u32("direct kbps up", self.direct_kbps_up)?;
        stream.write_u32("direct kbps down", self.direct_kbps_down)?;
        stream.write_f32("next rtt", self.next_rtt)?;
        stream.write_f32("next jitter", self.next_jitter)?;
        stream.write_f32("next packet loss", self.next_packet_loss)?;
        stream.write_u32("next kbps up", self.next_kbps_up)?;
        stream.write_u32("next kbps down", self.next_kbps_down)?;
        stream.write_f32("jitter c2s", self.jitter_client_to_server)?;
        stream.write_f32("jitter s2c", self.jitter_server_to_client)?;
        stream.write_u64("c2s sent", self.packets_sent_client_to_server)?;
        stream.write_u64("s2c sent", self.packets_sent_server_to_client)?;
        stream.write_u64("c2s lost", self.packets_lost_client_to_server)?;
        stream.write_u64("s2c lost", self.packets_lost_server_to_client)?;
        stream.write_u64("c2s out of order", self.packets_out_of_order_client_to_server)?;
        stream.write_u64("s2c out of order", self.packets_out_of_order_server_to_client)?;
        stream.write_u64("session events", self.session_events)?;
        stream.write_u64("internal events", self.internal_events)?;
        self.client_relays.write(stream, "num client relays")?;
        self.server_relays.write(stream, "num server relays")?;
        stream.write_bytes("client route public key", &self.client_route_public_key)?;
        stream.write_bytes("server route public key", &self.server_route_public_key)?;
        stream.write_u32("session data bytes", self.session_data_bytes)?;
        stream.write_bytes(
            "session data",
            &self.session_data[..self.session_data_bytes as usize],
        )?;
        stream.write_bytes("session data signature", &self.session_data_signature)?;
        Ok(())
    }

    pub fn read(stream: &mut ReadStream<'_>) -> SessionResult<Self> {
        let mut packet = Self {
            sdk_version_major: stream.read_u8("sdk major")?,
            sdk_version_minor: stream.read_u8("sdk minor")?,
            sdk_version_patch: stream.read_u8("sdk patch")?,
            buyer_id: stream.read_u64("buyer id")?,
            datacenter_id: stream.read_u64("datacenter id")?,
            session_id: stream.read_u64("session id")?,
            slice_number: stream.read_u32("slice number")?,
            retry_number: stream.read_u32("retry number")?,
            user_hash: stream.read_u64("user hash")?,
            ..Default::default()
        };
        packet.client_address =
            read_address(stream)?.ok_or(codec::CodecError::InvalidValue {
                field: "client address",
                value: 0,
            })?;
        packet.server_address =
            read_address(stream)?.ok_or(codec::CodecError::InvalidValue {
                field: "server address",
                value: 0,
            })?;
        packet.platform_type = stream.read_u8("platform type")?;
        packet.connection_type = stream.read_u8("connection type")?;

        let flags = stream.read_u8("request flags")?;
        packet.next = flags & (1 << 0) != 0;
        packet.fallback_to_direct = flags & (1 << 1) != 0;
        packet.client_ping_timed_out = flags & (1 << 2) != 0;
        packet.reported = flags & (1 << 3) != 0;
        packet.client_next_bandwidth_over_limit = flags & (1 << 4) != 0;
        packet.server_next_bandwidth_over_limit = flags & (1 << 5) != 0;

        packet.direct_rtt = stream.read_f32("direct rtt")?;
        packet.direct_jitter = stream.read_f32("direct jitter")?;
        packet.direct_packet_loss = stream.read_f32("direct packet loss")?;
        packet.direct_max_packet_loss_seen = stream.read_f32("direct max packet loss seen")?;
        packet.direct_kbps_up = stream.read_u32("direct kbps up")?;
        packet.direct_kbps_down = stream.read_u32("direct kbps down")?;
        packet.next_rtt = stream.read_f32("next rtt")?;
        packet.next_jitter = stream.read_f32("next jitter")?;
        packet.next_packet_loss = stream.read_f32("next packet loss")?;
        packet.next_kbps_up = stream.read_u32("next kbps up")?;
        packet.next_kbps_down = stream.read_u32("next kbps down")?;
        packet.jitter_client_to_server = stream.read_f32("jitter c2s")?;
        packet.jitter_server_to_client = stream.read_f32("jitter s2c")?;
        packet.packets_sent_client_to_server = stream.read_u64("c2s sent")?;
        packet.packets_sent_server_to_client = stream.read_u64("s2c sent")?;
        packet.packets_lost_client_to_server = stream.read_u64("c2s lost")?;
        packet.packets_lost_server_to_client = stream.read_u64("s2c lost")?;
        packet.packets_out_of_order_client_to_server = stream.read_u64("c2s out of order")?;
        packet.packets_out_of_order_server_to_client = stream.read_u64("s2c out of order")?;
        packet.session_events = stream.read_u64("session events")?;
        packet.internal_events = stream.read_u64("internal events")?;
        packet.client_relays = RelayPings::read(stream, "num client relays", MAX_CLIENT_RELAYS)?;
        packet.server_relays = RelayPings::read(stream, "num server relays", MAX_SERVER_RELAYS)?;
        stream.read_bytes("client route public key", &mut packet.client_route_public_key)?;
        stream.read_bytes("server route public key", &mut packet.server_route_public_key)?;
        packet.session_data_bytes = stream.read_u32("session data bytes")?;
        if packet.session_data_bytes as usize > MAX_SESSION_DATA_SIZE {
            return Err(codec::CodecError::LengthOverflow {
                field: "session data bytes",
                got: packet.session_data_bytes as usize,
                limit: MAX_SESSION_DATA_SIZE,
            }
            .into());
        }
        stream.read_bytes(
            "session data",
            &mut packet.session_data[..packet.session_data_bytes as usize],
        )?;
        stream.read_bytes("session data signature", &mut packet.session_data_signature)?;
        Ok(packet)
    }

    /// Attach signed session data from the previous slice's response.
    pub fn set_session_data(
        &mut self,
        data: &SessionData,
        backend_private_key: &[u8],
    ) -> SessionResult<()> {
        let mut buffer = [0u8; MAX_SESSION_DATA_SIZE];
        let written = data.serialize(&mut buffer)?;
        self.session_data[..written].copy_from_slice(&buffer[..written]);
        self.session_data_bytes = written as u32;
        self.session_data_signature = crypto::sign(&buffer[..written], backend_private_key)?;
        Ok(())
    }
}

/// The backend's answer: route type, tokens, and the next slice's state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdateResponsePacket {
    pub session_id: u64,
    pub slice_number: u32,
    pub route_type: u8,
    pub multipath: bool,
    pub num_tokens: u8,
    pub tokens: Vec<u8>,
    pub session_data_bytes: u32,
    pub session_data: [u8; MAX_SESSION_DATA_SIZE],
    pub session_data_signature: [u8; SIGN_SIGNATURE_BYTES],
}

impl Default for SessionUpdateResponsePacket {
    fn default() -> Self {
        Self {
            session_id: 0,
            slice_number: 0,
            route_type: ROUTE_TYPE_DIRECT,
            multipath: false,
            num_tokens: 0,
            tokens: Vec::new(),
            session_data_bytes: 0,
            session_data: [0; MAX_SESSION_DATA_SIZE],
            session_data_signature: [0; SIGN_SIGNATURE_BYTES],
        }
    }
}

impl SessionUpdateResponsePacket {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> SessionResult<()> {
        stream.write_u64("session id", self.session_id)?;
        stream.write_u32("slice number", self.slice_number)?;
        stream.write_u8("route type", self.route_type)?;
        stream.write_bool("multipath", self.multipath)?;
        stream.write_u8("num tokens", self.num_tokens)?;
        stream.write_byte_vec("tokens", &self.tokens)?;
        stream.write_u32("session data bytes", self.session_data_bytes)?;
        stream.write_bytes(
            "session data",
            &self.session_data[..self.session_data_bytes as usize],
        )?;
        stream.write_bytes("session data signature", &self.session_data_signature)?;
        Ok(())
    }

    pub fn read(stream: &mut ReadStream<'_>) -> SessionResult<Self> {
        let mut packet = Self {
            session_id: stream.read_u64("session id")?,
            slice_number: stream.read_u32("slice number")?,
            route_type: stream.read_u8("route type")?,
            multipath: stream.read_bool("multipath")?,
            num_tokens: stream.read_u8("num tokens")?,
            ..Default::default()
        };
        packet.tokens = stream.read_byte_vec("tokens", types::MAX_PACKET_BYTES)?;
        packet.session_data_bytes = stream.read_u32("session data bytes")?;
        if packet.session_data_bytes as usize > MAX_SESSION_DATA_SIZE {
            return Err(codec::CodecError::LengthOverflow {
                field: "session data bytes",
                got: packet.session_data_bytes as usize,
                limit: MAX_SESSION_DATA_SIZE,
            }
            .into());
        }
        stream.read_bytes(
            "session data",
            &mut packet.session_data[..packet.session_data_bytes as usize],
        )?;
        stream.read_bytes("session data signature", &mut packet.session_data_signature)?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{MAX_PACKET_BYTES, SESSION_UPDATE_REQUEST_PACKET};

    #[test]
    fn request_round_trip() {
        let mut request = SessionUpdateRequestPacket {
            sdk_version_major: 1,
            sdk_version_minor: 2,
            sdk_version_patch: 3,
            buyer_id: 9000,
            datacenter_id: 100,
            session_id: 42,
            slice_number: 5,
            user_hash: 777,
            client_address: "100.0.0.1:30000".parse().unwrap(),
            server_address: "200.0.0.1:50000".parse().unwrap(),
            next: true,
            direct_rtt: 40.0,
            next_rtt: 25.0,
            packets_sent_client_to_server: 6000,
            ..Default::default()
        };
        request.client_relays.ids.push(11);
        request.client_relays.rtt.push(5);
        request.client_relays.jitter.push(1);
        request.client_relays.packet_loss.push(0.0);

        let mut buffer = vec![0u8; MAX_PACKET_BYTES];
        let mut stream = WriteStream::new(&mut buffer);
        request.write(&mut stream).unwrap();
        let written = stream.bytes_processed();

        let mut reader = ReadStream::new(&buffer[..written]);
        assert_eq!(
            SessionUpdateRequestPacket::read(&mut reader).unwrap(),
            request
        );
    }

    #[test]
    fn response_round_trip() {
        let response = SessionUpdateResponsePacket {
            session_id: 42,
            slice_number: 6,
            route_type: types::ROUTE_TYPE_NEW,
            multipath: true,
            num_tokens: 4,
            tokens: vec![7u8; 4 * types::ENCRYPTED_ROUTE_TOKEN_BYTES],
            ..Default::default()
        };

        let mut buffer = vec![0u8; MAX_PACKET_BYTES];
        let mut stream = WriteStream::new(&mut buffer);
        response.write(&mut stream).unwrap();
        let written = stream.bytes_processed();

        let mut reader = ReadStream::new(&buffer[..written]);
        assert_eq!(
            SessionUpdateResponsePacket::read(&mut reader).unwrap(),
            response
        );
    }

    #[test]
    fn framed_packet_round_trip() {
        let (public, private) = crypto::generate_sign_keypair();
        let from: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let to: SocketAddr = "5.6.7.8:9000".parse().unwrap();

        let payload = b"session update payload";
        let mut buffer = vec![0u8; MAX_PACKET_BYTES];
        let written = write_packet(
            SESSION_UPDATE_REQUEST_PACKET,
            payload,
            &from,
            &to,
            &private,
            &mut buffer,
        )
        .unwrap();

        let (packet_type, parsed) = parse_packet(&buffer[..written], &from, &to).unwrap();
        assert_eq!(packet_type, SESSION_UPDATE_REQUEST_PACKET);
        assert_eq!(parsed, payload);
        assert!(verify_packet_signature(&buffer[..written], &public));
    }

    #[test]
    fn wrong_address_pair_fails_the_header_hash() {
        let (_, private) = crypto::generate_sign_keypair();
        let from: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let to: SocketAddr = "5.6.7.8:9000".parse().unwrap();
        let other: SocketAddr = "9.9.9.9:9000".parse().unwrap();

        let mut buffer = vec![0u8; MAX_PACKET_BYTES];
        let written =
            write_packet(54, b"payload", &from, &to, &private, &mut buffer).unwrap();

        assert!(matches!(
            parse_packet(&buffer[..written], &other, &to).unwrap_err(),
            SessionError::BadHeaderHash
        ));
    }

    #[test]
    fn tampered_packet_fails_signature() {
        let (public, private) = crypto::generate_sign_keypair();
        let from: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        let to: SocketAddr = "5.6.7.8:9000".parse().unwrap();

        let mut buffer = vec![0u8; MAX_PACKET_BYTES];
        let written =
            write_packet(54, b"payload", &from, &to, &private, &mut buffer).unwrap();

        buffer[1 + PACKET_PREFIX_BYTES + PACKET_HASH_BYTES] ^= 1;
        assert!(!verify_packet_signature(&buffer[..written], &public));
    }

    #[test]
    fn short_packet_rejected() {
        let from: SocketAddr = "1.2.3.4:5000".parse().unwrap();
        assert!(matches!(
            parse_packet(&[0u8; MIN_PACKET_BYTES - 1], &from, &from).unwrap_err(),
            SessionError::PacketTooSmall { .. }
        ));
    }
}
