//! The per-request state aggregate.
//!
//! Everything the pipeline stages touch lives in one struct threaded by
//! mutable reference, so stages stay small functions instead of methods
//! juggling a dozen parameters. The state is stack-owned by the request
//! task and dropped when the response is written.

use crate::{SessionData, SessionUpdateRequestPacket, SessionUpdateResponsePacket};
use database::{Buyer, Database};
use messages::{
    AnalyticsClientRelayPingMessage, AnalyticsServerRelayPingMessage,
    AnalyticsSessionSummaryMessage, AnalyticsSessionUpdateMessage,
    PortalClientRelayUpdateMessage, PortalServerRelayUpdateMessage, PortalSessionUpdateMessage,
};
use routing::RouteMatrix;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Keys and knobs that outlive any one request.
#[derive(Clone)]
pub struct BackendConfig {
    /// X25519 keypair relays and SDK endpoints encrypt against.
    pub relay_backend_public_key: Vec<u8>,
    pub relay_backend_private_key: Vec<u8>,
    /// Ed25519 keypair for packet and session-data signatures.
    pub server_backend_public_key: Vec<u8>,
    pub server_backend_private_key: Vec<u8>,
    pub server_backend_address: SocketAddr,
    /// Route matrices older than this are not used for routing.
    pub stale_duration: Duration,
    /// Only sessions that have been on next are sent to the portal.
    pub portal_next_sessions_only: bool,
}

/// Bounded channels into the downstream sinks. A `None` sink discards.
#[derive(Clone, Default)]
pub struct SessionSinks {
    pub fallback_to_direct: Option<mpsc::Sender<u64>>,
    pub portal_session_update: Option<mpsc::Sender<PortalSessionUpdateMessage>>,
    pub portal_client_relay_update: Option<mpsc::Sender<PortalClientRelayUpdateMessage>>,
    pub portal_server_relay_update: Option<mpsc::Sender<PortalServerRelayUpdateMessage>>,
    pub analytics_session_update: Option<mpsc::Sender<AnalyticsSessionUpdateMessage>>,
    pub analytics_session_summary: Option<mpsc::Sender<AnalyticsSessionSummaryMessage>>,
    pub analytics_client_relay_ping: Option<mpsc::Sender<AnalyticsClientRelayPingMessage>>,
    pub analytics_server_relay_ping: Option<mpsc::Sender<AnalyticsServerRelayPingMessage>>,
}

pub struct SessionUpdateState<'a> {
    pub config: &'a BackendConfig,
    pub database: &'a Database,
    pub route_matrix: &'a RouteMatrix,
    pub buyer: &'a Buyer,

    /// Where the request came from: the game server.
    pub from: SocketAddr,
    pub request: SessionUpdateRequestPacket,

    /// Session data sent up from the SDK (previous slice).
    pub input: SessionData,
    /// Session data sent down to the SDK (current slice).
    pub output: SessionData,

    pub response: SessionUpdateResponsePacket,
    /// The full framed response; empty if writing failed.
    pub response_packet: Vec<u8>,

    /// Error bits raised by this update (merged into output in post).
    pub error: u64,

    /// Wall clock for this update, unix seconds / nanoseconds.
    pub current_timestamp: u64,
    pub current_timestamp_nanos: u64,

    pub real_packet_loss: f32,
    pub real_jitter: f32,
    pub real_out_of_order: f32,

    /// Unique source relays with viable routes this slice.
    pub route_diversity: i32,

    // Route planning scratch, all in current-matrix indices.
    pub dest_relay_ids: Vec<u64>,
    pub dest_relays: Vec<u32>,
    pub source_relays: Vec<u32>,
    pub source_relay_rtt: Vec<i32>,

    /// Decision trace, populated when the buyer has debug enabled.
    pub debug: Option<String>,

    // Codepath flags, primarily for tests and metrics.
    pub fallback_to_direct: bool,
    pub client_ping_timed_out: bool,
    pub analysis_only: bool,
    pub first_update: bool,
    pub read_session_data: bool,
    pub route_changed: bool,
    pub route_continued: bool,
    pub take_network_next: bool,
    pub stay_direct: bool,
    pub not_updating_client_relays_analysis_only: bool,
    pub not_updating_client_relays_datacenter_not_enabled: bool,
    pub not_updating_server_relays_analysis_only: bool,
    pub not_updating_server_relays_datacenter_not_enabled: bool,
    pub wrote_response_packet: bool,
    pub long_session_update: bool,

    pub sent_portal_session_update_message: bool,
    pub sent_portal_client_relay_update_message: bool,
    pub sent_portal_server_relay_update_message: bool,
    pub sent_analytics_session_update_message: bool,
    pub sent_analytics_session_summary_message: bool,
    pub sent_analytics_client_relay_ping_message: bool,
    pub sent_analytics_server_relay_ping_message: bool,
}

impl<'a> SessionUpdateState<'a> {
    pub fn new(
        config: &'a BackendConfig,
        database: &'a Database,
        route_matrix: &'a RouteMatrix,
        buyer: &'a Buyer,
        from: SocketAddr,
        request: SessionUpdateRequestPacket,
    ) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            config,
            database,
            route_matrix,
            buyer,
            from,
            request,
            input: SessionData::default(),
            output: SessionData::default(),
            response: SessionUpdateResponsePacket::default(),
            response_packet: Vec::new(),
            error: 0,
            current_timestamp: now.as_secs(),
            current_timestamp_nanos: now.as_nanos() as u64,
            real_packet_loss: 0.0,
            real_jitter: 0.0,
            real_out_of_order: 0.0,
            route_diversity: 0,
            dest_relay_ids: Vec::new(),
            dest_relays: Vec::new(),
            source_relays: Vec::new(),
            source_relay_rtt: Vec::new(),
            debug: None,
            fallback_to_direct: false,
            client_ping_timed_out: false,
            analysis_only: false,
            first_update: false,
            read_session_data: false,
            route_changed: false,
            route_continued: false,
            take_network_next: false,
            stay_direct: false,
            not_updating_client_relays_analysis_only: false,
            not_updating_client_relays_datacenter_not_enabled: false,
            not_updating_server_relays_analysis_only: false,
            not_updating_server_relays_datacenter_not_enabled: false,
            wrote_response_packet: false,
            long_session_update: false,
            sent_portal_session_update_message: false,
            sent_portal_client_relay_update_message: false,
            sent_portal_server_relay_update_message: false,
            sent_analytics_session_update_message: false,
            sent_analytics_session_summary_message: false,
            sent_analytics_client_relay_ping_message: false,
            sent_analytics_server_relay_ping_message: false,
        }
    }
}
