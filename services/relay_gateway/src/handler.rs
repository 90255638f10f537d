//! The `/relay_update` handler.
//!
//! Validates and decrypts an inbound relay update, synthesizes the
//! per-relay response, and forwards the decrypted payload toward the
//! pub/sub batcher. Every rejection is a 400 with a debug log; relays
//! retry on their own schedule and a misbehaving relay must not be able to
//! make the gateway log at error level.

use crate::magic::MagicValues;
use crate::packets::{RelayPeer, RelayUpdateResponsePacket, MIN_RELAY_UPDATE_BYTES};
use arc_swap::ArcSwap;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use codec::{ReadStream, WriteStream};
use crypto::BOX_NONCE_BYTES;
use database::Database;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokens::RouteToken;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use types::{
    relay_id, ENCRYPTED_ROUTE_TOKEN_BYTES, RELAY_UPDATE_REQUEST_VERSION,
    RELAY_UPDATE_TIMESTAMP_WINDOW,
};

pub struct GatewayState {
    pub database: ArcSwap<Database>,
    pub magic: Arc<ArcSwap<MagicValues>>,
    pub relay_backend_public_key: Vec<u8>,
    pub relay_backend_private_key: Vec<u8>,
    /// Decrypted relay updates bound for the pub/sub batcher.
    pub forward: mpsc::Sender<Vec<u8>>,
}

pub async fn relay_update_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let response = handle_relay_update(&state, &headers, &body).await;

    let elapsed = started.elapsed();
    metrics::gauge!("relay_update_duration_seconds").set(elapsed.as_secs_f64());
    if elapsed.as_millis() > 1000 {
        warn!("long relay update: {elapsed:?}");
    }

    match response {
        Some(payload) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            payload,
        )
            .into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// The handler body; `None` means 400.
async fn handle_relay_update(
    state: &GatewayState,
    headers: &HeaderMap,
    body: &[u8],
) -> Option<Vec<u8>> {
    if headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        != Some("application/octet-stream")
    {
        debug!("unsupported content type");
        return None;
    }

    // Ignore the relay update if it's too small to be valid.
    if body.len() < MIN_RELAY_UPDATE_BYTES {
        debug!("relay update packet is too small to be valid");
        return None;
    }

    let mut stream = ReadStream::new(body);

    let version = stream.read_u8("version").ok()?;
    if version != RELAY_UPDATE_REQUEST_VERSION {
        debug!("invalid relay update packet version: {version}");
        return None;
    }

    let relay_address = codec::read_address(&mut stream).ok()??;
    let header_bytes = stream.bytes_processed();

    // The relay id is derived from the public address string.
    let update_relay_id = relay_id(&relay_address.to_string());

    let database = state.database.load();
    let Some(relay) = database.relay(update_relay_id) else {
        debug!("unknown relay {update_relay_id:016x}");
        return None;
    };

    // Decrypt in place semantics: ciphertext spans from the end of the
    // header to the trailing nonce.
    let nonce = &body[body.len() - BOX_NONCE_BYTES..];
    let ciphertext = &body[header_bytes..body.len() - BOX_NONCE_BYTES];

    let plaintext = match crypto::box_decrypt(
        &relay.public_key,
        &state.relay_backend_private_key,
        nonce,
        ciphertext,
    ) {
        Ok(plaintext) => plaintext,
        Err(_) => {
            debug!("failed to decrypt relay update");
            return None;
        }
    };

    // The inner payload leads with the relay's clock; anything outside the
    // window is replay or skew.
    let mut inner = ReadStream::new(&plaintext);
    let packet_timestamp = inner.read_u64("timestamp").ok()?;
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if packet_timestamp < current_timestamp.saturating_sub(RELAY_UPDATE_TIMESTAMP_WINDOW) {
        debug!("relay update request is too old");
        return None;
    }
    if packet_timestamp > current_timestamp + RELAY_UPDATE_TIMESTAMP_WINDOW {
        debug!("relay update request is in the future");
        return None;
    }

    debug!("received update for {} [{update_relay_id:016x}]", relay.name);

    // Peer list: every relay except this one, swapping in internal
    // addresses when both sides share a seller and an internal group.
    let mut peers = Vec::with_capacity(database.num_relays().saturating_sub(1));
    for peer in &database.relays {
        if peer.id == update_relay_id {
            continue;
        }
        let internal = relay.seller_id == peer.seller_id
            && relay.internal_group == peer.internal_group
            && relay.has_internal_address()
            && peer.has_internal_address();
        peers.push(RelayPeer {
            relay_id: peer.id,
            address: if internal {
                peer.internal_address
            } else {
                Some(peer.public_address)
            },
            internal,
        });
    }

    let magic = **state.magic.load();

    let mut response = RelayUpdateResponsePacket {
        version: types::RELAY_UPDATE_RESPONSE_VERSION,
        timestamp: current_timestamp,
        target_version: relay.version.clone(),
        relays: peers,
        upcoming_magic: magic.upcoming,
        current_magic: magic.current,
        previous_magic: magic.previous,
        expected_public_address: Some(relay.public_address),
        expected_internal_address: relay.internal_address,
        expected_relay_public_key: relay.public_key,
        expected_backend_public_key: state
            .relay_backend_public_key
            .clone()
            .try_into()
            .unwrap_or([0u8; 32]),
        test_token: Vec::new(),
    };

    // A token over a synthetic route lets the relay self-verify its crypto
    // wiring against the live backend key.
    if let Some(cipher) = database.relay_secret_key(update_relay_id) {
        let mut test_token = vec![0u8; ENCRYPTED_ROUTE_TOKEN_BYTES];
        let token = RouteToken {
            expire_timestamp: current_timestamp + 30,
            session_id: 0,
            session_version: 0,
            envelope_up_kbps: 0,
            envelope_down_kbps: 0,
            prev_internal: false,
            next_internal: false,
            next_same_group: false,
            prev_address: Some(relay.public_address),
            next_address: Some(relay.public_address),
        };
        if token.encrypt(cipher, &mut test_token).is_ok() {
            response.test_token = test_token;
        }
    }

    let mut buffer = vec![0u8; 64 * 1024 + database.num_relays() * 32];
    let mut writer = WriteStream::new(&mut buffer);
    if response.write(&mut writer).is_err() {
        warn!("failed to write relay update response");
        return None;
    }
    let written = writer.bytes_processed();
    buffer.truncate(written);

    // Forward the update, sans the outer crypto framing, now decrypted.
    let mut message = Vec::with_capacity(header_bytes + plaintext.len());
    message.extend_from_slice(&body[..header_bytes]);
    message.extend_from_slice(&plaintext);
    if state.forward.send(message).await.is_err() {
        warn!("relay update forward channel closed");
    }

    Some(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::BOX_MAC_BYTES;
    use database::{Buyer, Datacenter, Relay, Seller};
    use types::MAGIC_BYTES;

    struct Harness {
        state: Arc<GatewayState>,
        forwarded: mpsc::Receiver<Vec<u8>>,
        relay_address: std::net::SocketAddr,
        relay_public_key: [u8; 32],
        relay_private_key: [u8; 32],
        backend_public_key: [u8; 32],
    }

    fn harness() -> Harness {
        let (backend_public, backend_private) = crypto::generate_box_keypair();
        let (relay_public, relay_private) = crypto::generate_box_keypair();

        let relay_address: std::net::SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let peer_address: std::net::SocketAddr = "10.0.0.2:40000".parse().unwrap();

        let mut database = Database::default();
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
                latitude: 0.0,
                longitude: 0.0,
                seller_id: 1,
            },
        );
        database.relays.push(Relay {
            id: relay_id(&relay_address.to_string()),
            name: "iad.1".into(),
            public_address: relay_address,
            internal_address: None,
            internal_group: 0,
            seller_id: 1,
            datacenter_id: 100,
            public_key: relay_public,
            version: "1.0.0".into(),
            mrc_usd: 0,
            port_speed_mbps: 0,
            max_sessions: 0,
        });
        database.relays.push(Relay {
            id: relay_id(&peer_address.to_string()),
            name: "iad.2".into(),
            public_address: peer_address,
            internal_address: None,
            internal_group: 0,
            seller_id: 1,
            datacenter_id: 100,
            public_key: [9u8; 32],
            version: "1.0.0".into(),
            mrc_usd: 0,
            port_speed_mbps: 0,
            max_sessions: 0,
        });
        database.buyers.insert(
            9000,
            Buyer {
                id: 9000,
                name: "buyer".into(),
                public_key: [0u8; 32],
                customer_id: 0,
                debug: false,
                route_shader: Default::default(),
            },
        );
        database.rebuild().unwrap();
        database.precompute_relay_keys(&backend_private).unwrap();

        let (forward, forwarded) = mpsc::channel(16);

        let state = Arc::new(GatewayState {
            database: ArcSwap::from_pointee(database),
            magic: Arc::new(ArcSwap::from_pointee(MagicValues::generate())),
            relay_backend_public_key: backend_public.to_vec(),
            relay_backend_private_key: backend_private.to_vec(),
            forward,
        });

        Harness {
            state,
            forwarded,
            relay_address,
            relay_public_key: relay_public,
            relay_private_key: relay_private,
            backend_public_key: backend_public,
        }
    }

    fn octet_stream_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
        headers
    }

    fn build_update(harness: &Harness, timestamp: u64, inner_extra: &[u8]) -> Vec<u8> {
        let mut header = vec![0u8; 64];
        let mut stream = WriteStream::new(&mut header);
        stream.write_u8("version", RELAY_UPDATE_REQUEST_VERSION).unwrap();
        codec::write_address(&mut stream, Some(harness.relay_address)).unwrap();
        let header_bytes = stream.bytes_processed();
        header.truncate(header_bytes);

        let mut plaintext = timestamp.to_le_bytes().to_vec();
        plaintext.extend_from_slice(inner_extra);

        let nonce = crypto::generate_nonce();
        let sealed = crypto::box_encrypt(
            &harness.backend_public_key,
            &harness.relay_private_key,
            &nonce,
            &plaintext,
        )
        .unwrap();

        let mut body = header;
        body.extend_from_slice(&sealed);
        body.extend_from_slice(&nonce);
        body
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    #[tokio::test]
    async fn round_trip() {
        let mut harness = harness();
        let body = build_update(&harness, now(), b"relay samples");

        let response = handle_relay_update(&harness.state, &octet_stream_headers(), &body)
            .await
            .expect("200");

        let mut reader = ReadStream::new(&response);
        let packet = RelayUpdateResponsePacket::read(&mut reader).unwrap();

        // Peer list excludes the sender.
        assert_eq!(packet.relays.len(), 1);
        assert_eq!(packet.relays[0].relay_id, relay_id("10.0.0.2:40000"));
        assert_eq!(packet.target_version, "1.0.0");
        assert_ne!(packet.current_magic, [0u8; MAGIC_BYTES]);
        assert_eq!(packet.expected_relay_public_key, harness.relay_public_key);
        assert_eq!(
            packet.expected_backend_public_key.to_vec(),
            harness.state.relay_backend_public_key
        );

        // The relay can open the test token with its own keys.
        let relay_cipher = crypto::TokenCipher::new(
            &harness.relay_private_key,
            &harness.backend_public_key,
        )
        .unwrap();
        let token = RouteToken::decrypt(&relay_cipher, &packet.test_token).unwrap();
        assert_eq!(token.prev_address, Some(harness.relay_address));

        // The decrypted inner payload reached the forward channel.
        let forwarded = harness.forwarded.recv().await.unwrap();
        let inner_offset = forwarded.len() - b"relay samples".len();
        assert_eq!(&forwarded[inner_offset..], b"relay samples");
    }

    #[tokio::test]
    async fn rejects_wrong_content_type() {
        let harness = harness();
        let body = build_update(&harness, now(), b"");
        assert!(
            handle_relay_update(&harness.state, &HeaderMap::new(), &body)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_short_packet() {
        let harness = harness();
        let body = vec![0u8; MIN_RELAY_UPDATE_BYTES - 1];
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &body)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_unknown_version() {
        let harness = harness();
        let mut body = build_update(&harness, now(), b"");
        body[0] = 99;
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &body)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_unknown_relay() {
        let mut harness = harness();
        harness.relay_address = "10.9.9.9:40000".parse().unwrap();
        let body = build_update(&harness, now(), b"");
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &body)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_stale_and_future_timestamps() {
        let harness = harness();

        let old = build_update(&harness, now() - RELAY_UPDATE_TIMESTAMP_WINDOW - 5, b"");
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &old)
                .await
                .is_none()
        );

        let future = build_update(&harness, now() + RELAY_UPDATE_TIMESTAMP_WINDOW + 5, b"");
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &future)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rejects_garbage_ciphertext() {
        let harness = harness();
        let mut body = build_update(&harness, now(), b"");
        let tamper_at = body.len() - BOX_NONCE_BYTES - BOX_MAC_BYTES - 1;
        body[tamper_at] ^= 1;
        assert!(
            handle_relay_update(&harness.state, &octet_stream_headers(), &body)
                .await
                .is_none()
        );
    }
}
