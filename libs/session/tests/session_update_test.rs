//! End-to-end session lifecycle tests.
//!
//! Each test drives the full pipeline the way a game server would: slice 0
//! opens the session, the response's signed session data is fed back as the
//! next request's input, and the sink channels capture what the portal and
//! analytics warehouse would see.

use database::{Buyer, Database, Datacenter, Relay, Seller};
use routing::{cost_matrix_from_table, optimize, RouteMatrix};
use session::{
    session_update, BackendConfig, SessionData, SessionSinks, SessionUpdateRequestPacket,
    SessionUpdateState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use types::*;

const CLIENT_RELAY_ADDRESS: &str = "10.0.0.1:40000";
const DEST_RELAY_ADDRESS: &str = "10.0.0.2:40000";
const CLIENT_DATACENTER: u64 = 1;
const SERVER_DATACENTER: u64 = 100;
const BUYER_ID: u64 = 9000;
const SESSION_ID: u64 = 0x1234_5678_9ABC_DEF0;

struct Harness {
    config: BackendConfig,
    database: Database,
    route_matrix: RouteMatrix,
    client_relay_id: u64,
    dest_relay_id: u64,
    relay_private_keys: Vec<[u8; 32]>,
}

struct Receivers {
    fallback: mpsc::Receiver<u64>,
    portal_session: mpsc::Receiver<messages::PortalSessionUpdateMessage>,
    portal_client_relays: mpsc::Receiver<messages::PortalClientRelayUpdateMessage>,
    portal_server_relays: mpsc::Receiver<messages::PortalServerRelayUpdateMessage>,
    analytics_session: mpsc::Receiver<messages::AnalyticsSessionUpdateMessage>,
    analytics_summary: mpsc::Receiver<messages::AnalyticsSessionSummaryMessage>,
    analytics_client_pings: mpsc::Receiver<messages::AnalyticsClientRelayPingMessage>,
    analytics_server_pings: mpsc::Receiver<messages::AnalyticsServerRelayPingMessage>,
}

fn sinks() -> (SessionSinks, Receivers) {
    let (fallback_tx, fallback) = mpsc::channel(64);
    let (portal_session_tx, portal_session) = mpsc::channel(64);
    let (portal_client_tx, portal_client_relays) = mpsc::channel(64);
    let (portal_server_tx, portal_server_relays) = mpsc::channel(64);
    let (analytics_session_tx, analytics_session) = mpsc::channel(64);
    let (analytics_summary_tx, analytics_summary) = mpsc::channel(64);
    let (analytics_client_tx, analytics_client_pings) = mpsc::channel(64);
    let (analytics_server_tx, analytics_server_pings) = mpsc::channel(64);
    (
        SessionSinks {
            fallback_to_direct: Some(fallback_tx),
            portal_session_update: Some(portal_session_tx),
            portal_client_relay_update: Some(portal_client_tx),
            portal_server_relay_update: Some(portal_server_tx),
            analytics_session_update: Some(analytics_session_tx),
            analytics_session_summary: Some(analytics_summary_tx),
            analytics_client_relay_ping: Some(analytics_client_tx),
            analytics_server_relay_ping: Some(analytics_server_tx),
        },
        Receivers {
            fallback,
            portal_session,
            portal_client_relays,
            portal_server_relays,
            analytics_session,
            analytics_summary,
            analytics_client_pings,
            analytics_server_pings,
        },
    )
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn harness_with_shader(shader: RouteShader) -> Harness {
    let (relay_backend_public, relay_backend_private) = crypto::generate_box_keypair();
    let (server_backend_public, server_backend_private) = crypto::generate_sign_keypair();

    let (client_relay_public, client_relay_private) = crypto::generate_box_keypair();
    let (dest_relay_public, dest_relay_private) = crypto::generate_box_keypair();

    let client_relay_id = relay_id(CLIENT_RELAY_ADDRESS);
    let dest_relay_id = relay_id(DEST_RELAY_ADDRESS);

    let mut database = Database::default();
    database.sellers.push(Seller {
        id: 1,
        name: "seller.one".into(),
    });
    for (id, name) in [(CLIENT_DATACENTER, "client.side"), (SERVER_DATACENTER, "server.side")] {
        database.datacenters.insert(
            id,
            Datacenter {
                id,
                name: name.into(),
                native_name: name.into(),
                latitude: 0.0,
                longitude: 0.0,
                seller_id: 1,
            },
        );
    }
    database.relays.push(Relay {
        id: client_relay_id,
        name: "client.relay".into(),
        public_address: CLIENT_RELAY_ADDRESS.parse().unwrap(),
        internal_address: None,
        internal_group: 0,
        seller_id: 1,
        datacenter_id: CLIENT_DATACENTER,
        public_key: client_relay_public,
        version: "1.0.0".into(),
        mrc_usd: 0,
        port_speed_mbps: 10_000,
        max_sessions: 3000,
    });
    database.relays.push(Relay {
        id: dest_relay_id,
        name: "dest.relay".into(),
        public_address: DEST_RELAY_ADDRESS.parse().unwrap(),
        internal_address: None,
        internal_group: 0,
        seller_id: 1,
        datacenter_id: SERVER_DATACENTER,
        public_key: dest_relay_public,
        version: "1.0.0".into(),
        mrc_usd: 0,
        port_speed_mbps: 10_000,
        max_sessions: 3000,
    });
    database.buyers.insert(
        BUYER_ID,
        Buyer {
            id: BUYER_ID,
            name: "game.studio".into(),
            public_key: [0u8; 32],
            customer_id: 1,
            debug: false,
            route_shader: shader,
        },
    );
    database.enabled_datacenters.insert((BUYER_ID, SERVER_DATACENTER));
    database.rebuild().unwrap();
    database.precompute_relay_keys(&relay_backend_private).unwrap();

    // Client relay and dest relay are 20ms apart.
    let mut cost = cost_matrix_from_table(
        &[CLIENT_RELAY_ADDRESS, DEST_RELAY_ADDRESS],
        &[CLIENT_DATACENTER, SERVER_DATACENTER],
        &[&[], &[20]],
    );
    cost.relay_public_keys = vec![client_relay_public, dest_relay_public];
    let mut route_matrix = optimize(&cost, 1);
    route_matrix.created_at = now();

    Harness {
        config: BackendConfig {
            relay_backend_public_key: relay_backend_public.to_vec(),
            relay_backend_private_key: relay_backend_private.to_vec(),
            server_backend_public_key: server_backend_public.to_vec(),
            server_backend_private_key: server_backend_private.to_vec(),
            server_backend_address: "127.0.0.1:40000".parse().unwrap(),
            stale_duration: Duration::from_secs(30),
            portal_next_sessions_only: false,
        },
        database,
        route_matrix,
        client_relay_id,
        dest_relay_id,
        relay_private_keys: vec![client_relay_private, dest_relay_private],
    }
}

fn harness() -> Harness {
    harness_with_shader(RouteShader {
        acceptable_latency: 20,
        latency_reduction_threshold: 10,
        route_select_threshold: 5,
        route_switch_threshold: 10,
        max_next_rtt: 100,
        ..Default::default()
    })
}

/// A slice-N request with the client pinging the client relay at 5ms and a
/// 40ms direct path.
fn request(slice_number: u32) -> SessionUpdateRequestPacket {
    let mut request = SessionUpdateRequestPacket {
        sdk_version_major: 1,
        sdk_version_minor: 2,
        sdk_version_patch: 3,
        buyer_id: BUYER_ID,
        datacenter_id: SERVER_DATACENTER,
        session_id: SESSION_ID,
        slice_number,
        user_hash: 7,
        client_address: "100.0.0.1:30000".parse().unwrap(),
        server_address: "200.0.0.1:50000".parse().unwrap(),
        direct_rtt: 40.0,
        direct_jitter: 2.0,
        direct_packet_loss: 0.0,
        direct_max_packet_loss_seen: 0.0,
        ..Default::default()
    };
    if slice_number >= 1 {
        request.client_relays.ids.push(relay_id(CLIENT_RELAY_ADDRESS));
        request.client_relays.rtt.push(5);
        request.client_relays.jitter.push(1);
        request.client_relays.packet_loss.push(0.0);
        request.server_relays.ids.push(relay_id(DEST_RELAY_ADDRESS));
        request.server_relays.rtt.push(1);
        request.server_relays.jitter.push(0);
        request.server_relays.packet_loss.push(0.0);
    }
    request
}

async fn run(
    harness: &Harness,
    sinks: &SessionSinks,
    request: SessionUpdateRequestPacket,
) -> (SessionData, session::SessionUpdateResponsePacket, bool) {
    let buyer = harness.database.buyer(BUYER_ID).unwrap();
    let mut state = SessionUpdateState::new(
        &harness.config,
        &harness.database,
        &harness.route_matrix,
        buyer,
        "200.0.0.1:50000".parse::<SocketAddr>().unwrap(),
        request,
    );
    session_update(&mut state, sinks).await;
    assert!(state.wrote_response_packet, "response packet always written");
    (state.output.clone(), state.response.clone(), state.take_network_next)
}

fn next_request(slice_number: u32, output: &SessionData, harness: &Harness) -> SessionUpdateRequestPacket {
    let mut next = request(slice_number);
    next.set_session_data(output, &harness.config.server_backend_private_key)
        .unwrap();
    next
}

#[tokio::test]
async fn new_session_goes_direct() {
    let harness = harness();
    let (sinks, mut receivers) = sinks();

    let (output, response, _) = run(&harness, &sinks, request(0)).await;

    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert_eq!(response.num_tokens, 0);
    assert!(response.tokens.is_empty());
    assert_eq!(response.session_id, SESSION_ID);
    assert_eq!(response.slice_number, 1);
    assert_eq!(output.slice_number, 1);
    assert_eq!(output.best_score, 999);
    assert_eq!(output.session_id, SESSION_ID);
    assert!(!output.route_state.next);

    // No messages on the first slice.
    assert!(receivers.portal_session.try_recv().is_err());
    assert!(receivers.analytics_summary.try_recv().is_err());
}

#[tokio::test]
async fn promote_to_network_next() {
    let harness = harness();
    let (sinks, mut receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (output, response, took) =
        run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    assert!(took);
    assert_eq!(response.route_type, ROUTE_TYPE_NEW);
    // client + 2 relays + server.
    assert_eq!(response.num_tokens, 4);
    assert_eq!(response.tokens.len(), 4 * ENCRYPTED_ROUTE_TOKEN_BYTES);

    assert!(output.route_state.next);
    assert!(output.route_state.reduce_latency);
    assert_eq!(output.session_version, 1);
    assert_eq!(
        output.route_relay_ids,
        vec![harness.client_relay_id, harness.dest_relay_id]
    );
    // 5ms to the client relay plus the 20ms relay-to-relay link.
    assert_eq!(output.route_cost, 25);

    // Each relay on the route can decrypt its token.
    for (i, private) in harness.relay_private_keys.iter().enumerate() {
        let cipher = crypto::TokenCipher::new(
            private,
            harness.config.relay_backend_public_key.as_slice(),
        )
        .unwrap();
        let record =
            &response.tokens[(i + 1) * ENCRYPTED_ROUTE_TOKEN_BYTES..][..ENCRYPTED_ROUTE_TOKEN_BYTES];
        let token = tokens::RouteToken::decrypt(&cipher, record).unwrap();
        assert_eq!(token.session_id, SESSION_ID);
        assert_eq!(token.session_version, 1);
    }

    // Slice 1 emits the per-relay analytics pings.
    assert!(receivers.analytics_client_pings.try_recv().is_ok());
    assert!(receivers.analytics_server_pings.try_recv().is_ok());
    // And the portal messages.
    let portal = receivers.portal_session.try_recv().unwrap();
    assert_eq!(portal.session_id, SESSION_ID);
    assert_eq!(portal.slice_number, 0);
    assert!(receivers.portal_client_relays.try_recv().is_ok());
    assert!(receivers.portal_server_relays.try_recv().is_ok());
    let analytics = receivers.analytics_session.try_recv().unwrap();
    assert_eq!(analytics.slice_number, 0);
}

#[tokio::test]
async fn continue_on_network_next() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    let mut request2 = next_request(2, &slice1, &harness);
    request2.next = true;
    request2.next_rtt = 25.0;
    let (output, response, _) = run(&harness, &sinks, request2).await;

    assert_eq!(response.route_type, ROUTE_TYPE_CONTINUE);
    assert_eq!(response.num_tokens, 4);
    assert_eq!(response.tokens.len(), 4 * ENCRYPTED_CONTINUE_TOKEN_BYTES);
    assert!(output.route_state.next);
    // Continues do not bump the session version.
    assert_eq!(output.session_version, slice1.session_version);
    assert_eq!(output.route_relay_ids, slice1.route_relay_ids);
}

#[tokio::test]
async fn mispredict_vetoes_the_session() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    let mut request2 = next_request(2, &slice1, &harness);
    request2.next = true;
    request2.next_rtt = 60.0; // predicted 25
    let (output, response, _) = run(&harness, &sinks, request2).await;

    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(!output.route_state.next);
    assert!(output.route_state.veto);
    assert!(output.route_state.mispredict);

    // Veto is terminal: the next slice stays direct even though conditions
    // are perfect for acceleration again.
    let mut request3 = next_request(3, &output, &harness);
    request3.direct_rtt = 200.0;
    let (output3, response3, took) = run(&harness, &sinks, request3).await;
    assert!(!took);
    assert_eq!(response3.route_type, ROUTE_TYPE_DIRECT);
    assert!(output3.route_state.veto);
}

#[tokio::test]
async fn fallback_is_sticky_and_summary_emits_once() {
    let harness = harness();
    let (sinks, mut receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    let mut request2 = next_request(2, &slice1, &harness);
    request2.fallback_to_direct = true;
    let (slice2, response2, _) = run(&harness, &sinks, request2).await;

    assert_eq!(response2.route_type, ROUTE_TYPE_DIRECT);
    assert!(slice2.error & SESSION_ERROR_FALLBACK_TO_DIRECT != 0);
    assert!(slice2.write_summary);
    assert!(!slice2.wrote_summary);
    assert_eq!(receivers.fallback.try_recv().unwrap(), SESSION_ID);

    // The summary goes out exactly once, in the latch-set slice.
    let summary = receivers.analytics_summary.try_recv().unwrap();
    assert_eq!(summary.session_id, SESSION_ID);
    assert!(summary.error & SESSION_ERROR_FALLBACK_TO_DIRECT != 0);

    let mut request3 = next_request(3, &slice2, &harness);
    request3.fallback_to_direct = true;
    let (slice3, _, _) = run(&harness, &sinks, request3).await;

    assert!(slice3.wrote_summary);
    assert!(!slice3.write_summary);
    assert!(slice3.error & SESSION_ERROR_FALLBACK_TO_DIRECT != 0);
    assert!(receivers.analytics_summary.try_recv().is_err());

    // A retried final slice cannot re-arm the latch.
    let mut request4 = next_request(4, &slice3, &harness);
    request4.fallback_to_direct = true;
    let (slice4, _, _) = run(&harness, &sinks, request4).await;
    assert!(slice4.wrote_summary);
    assert!(receivers.analytics_summary.try_recv().is_err());
}

#[tokio::test]
async fn analysis_only_never_accelerates() {
    let harness = harness_with_shader(RouteShader {
        analysis_only: true,
        ..Default::default()
    });
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (_, response, took) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    assert!(!took);
    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
}

#[tokio::test]
async fn stale_route_matrix_goes_direct() {
    let mut harness = harness();
    harness.route_matrix.created_at = now() - 3600;
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (output, response, took) =
        run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    assert!(!took);
    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(output.error & SESSION_ERROR_STALE_ROUTE_MATRIX != 0);
}

#[tokio::test]
async fn unknown_datacenter_and_not_enabled_flags() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    // Unknown datacenter.
    let mut bad_datacenter = request(0);
    bad_datacenter.datacenter_id = 0xDEAD;
    let (output, response, _) = run(&harness, &sinks, bad_datacenter).await;
    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(output.error & SESSION_ERROR_UNKNOWN_DATACENTER != 0);
    assert!(output.error & SESSION_ERROR_DATACENTER_NOT_ENABLED != 0);
    assert!(output.error & SESSION_ERROR_NO_RELAYS_IN_DATACENTER != 0);

    // Known but not enabled for this buyer: still direct, no acceleration,
    // but the session proceeds normally.
    let mut harness2 = self::harness();
    harness2.database.enabled_datacenters.clear();
    harness2.database.rebuild().unwrap();
    let (slice0, _, _) = run(&harness2, &sinks, request(0)).await;
    let (output, _, took) = run(&harness2, &sinks, next_request(1, &slice0, &harness2)).await;
    assert!(!took);
    assert!(output.error & SESSION_ERROR_DATACENTER_NOT_ENABLED != 0);
}

#[tokio::test]
async fn bad_slice_number_rejects_the_slice() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;

    // The SDK claims slice 5 but the stored state says 1.
    let (output, response, _) = run(&harness, &sinks, next_request(5, &slice0, &harness)).await;
    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(output.error & SESSION_ERROR_BAD_SLICE_NUMBER != 0);
}

#[tokio::test]
async fn tampered_session_data_is_rejected() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let mut request1 = next_request(1, &slice0, &harness);
    request1.session_data[4] ^= 1;

    let (output, response, took) = run(&harness, &sinks, request1).await;
    assert!(!took);
    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(output.error & SESSION_ERROR_SIGNATURE_CHECK_FAILED != 0);
}

#[tokio::test]
async fn aborted_session_is_vetoed() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;
    assert!(slice1.route_state.next);

    // SDK reports it is not on next even though the backend put it there.
    let mut request2 = next_request(2, &slice1, &harness);
    request2.next = false;
    let (output, response, _) = run(&harness, &sinks, request2).await;

    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(output.route_state.veto);
    assert!(output.error & SESSION_ERROR_ABORTED != 0);
}

#[tokio::test]
async fn response_session_data_verifies_and_round_trips() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (output, response, _) = run(&harness, &sinks, request(0)).await;

    let data = &response.session_data[..response.session_data_bytes as usize];
    assert!(crypto::verify(
        data,
        &harness.config.server_backend_public_key,
        &response.session_data_signature,
    ));
    assert_eq!(SessionData::deserialize(data).unwrap(), output);
}

#[tokio::test]
async fn client_ping_timeout_is_terminal() {
    let harness = harness();
    let (sinks, mut receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;

    let mut request2 = next_request(2, &slice1, &harness);
    request2.client_ping_timed_out = true;
    let (slice2, response, _) = run(&harness, &sinks, request2).await;

    assert_eq!(response.route_type, ROUTE_TYPE_DIRECT);
    assert!(slice2.write_summary);

    // Portal session updates are suppressed for timed-out slices.
    // Slice 1's portal message is the only one.
    assert!(receivers.portal_session.try_recv().is_ok());
    assert!(receivers.portal_session.try_recv().is_err());
}

#[tokio::test]
async fn duration_on_next_accumulates() {
    let harness = harness();
    let (sinks, _receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;
    let (slice1, _, _) = run(&harness, &sinks, next_request(1, &slice0, &harness)).await;
    assert_eq!(slice1.duration_on_next, 0);

    let mut request2 = next_request(2, &slice1, &harness);
    request2.next = true;
    request2.next_rtt = 25.0;
    let (slice2, _, _) = run(&harness, &sinks, request2).await;
    assert_eq!(slice2.duration_on_next, SLICE_SECONDS as u32);

    let mut request3 = next_request(3, &slice2, &harness);
    request3.next = true;
    request3.next_rtt = 25.0;
    let (slice3, _, _) = run(&harness, &sinks, request3).await;
    assert_eq!(slice3.duration_on_next, 2 * SLICE_SECONDS as u32);
}

#[tokio::test]
async fn real_packet_loss_is_differential() {
    let harness = harness();
    let (sinks, mut receivers) = sinks();

    let (slice0, _, _) = run(&harness, &sinks, request(0)).await;

    let mut request1 = next_request(1, &slice0, &harness);
    request1.packets_sent_client_to_server = 1000;
    request1.packets_lost_client_to_server = 10;
    let (slice1, _, _) = run(&harness, &sinks, request1).await;
    let first = receivers.analytics_session.try_recv().unwrap();
    assert!((first.real_packet_loss - 1.0).abs() < 0.001);

    // Second slice: 1000 more sent, 50 more lost -> 5% for the slice.
    let mut request2 = next_request(2, &slice1, &harness);
    request2.next = true;
    request2.next_rtt = 25.0;
    request2.packets_sent_client_to_server = 2000;
    request2.packets_lost_client_to_server = 60;
    run(&harness, &sinks, request2).await;
    let second = receivers.analytics_session.try_recv().unwrap();
    assert!((second.real_packet_loss - 5.0).abs() < 0.001);
}
