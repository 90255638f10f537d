mod sinks;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use database::Database;
use pubsub::{PubsubConfig, PubsubProducer};
use routing::RouteMatrix;
use session::{
    parse_packet, verify_packet_signature, BackendConfig, SessionUpdateRequestPacket,
    SessionUpdateState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use types::{MAX_PACKET_BYTES, SESSION_UPDATE_REQUEST_PACKET};

struct Shared {
    config: BackendConfig,
    database: ArcSwap<Database>,
    route_matrix: ArcSwap<RouteMatrix>,
    sinks: session::SessionSinks,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let bind_address: SocketAddr = config::get_string("SERVER_BACKEND_ADDRESS", "0.0.0.0:40000")
        .parse()
        .context("bad SERVER_BACKEND_ADDRESS")?;
    let database_path = PathBuf::from(config::get_string("DATABASE_PATH", "database.bin"));
    let route_matrix_path =
        PathBuf::from(config::get_string("ROUTE_MATRIX_PATH", "route_matrix.bin"));
    let reload_interval =
        config::get_duration("RELOAD_INTERVAL", Duration::from_secs(10))?;
    let request_deadline =
        config::get_duration("SESSION_UPDATE_DEADLINE", Duration::from_secs(1))?;
    let stale_duration =
        config::get_duration("ROUTE_MATRIX_STALE_DURATION", Duration::from_secs(30))?;
    let portal_next_sessions_only =
        config::get_int("PORTAL_NEXT_SESSIONS_ONLY", 0)? != 0;

    let relay_backend_public_key = config::require_base64("RELAY_BACKEND_PUBLIC_KEY")
        .context("you must supply RELAY_BACKEND_PUBLIC_KEY")?;
    let relay_backend_private_key = config::require_base64("RELAY_BACKEND_PRIVATE_KEY")
        .context("you must supply RELAY_BACKEND_PRIVATE_KEY")?;
    let server_backend_public_key = config::require_base64("SERVER_BACKEND_PUBLIC_KEY")
        .context("you must supply SERVER_BACKEND_PUBLIC_KEY")?;
    let server_backend_private_key = config::require_base64("SERVER_BACKEND_PRIVATE_KEY")
        .context("you must supply SERVER_BACKEND_PRIVATE_KEY")?;

    let redis_hostname = config::get_string("REDIS_HOSTNAME", "127.0.0.1:6379");
    let pubsub_channel_name =
        config::get_string("REDIS_PUBSUB_CHANNEL_NAME", "session_updates");
    let batch_size = config::get_int("SESSION_UPDATE_BATCH_SIZE", 100)? as usize;
    let batch_duration =
        config::get_duration("SESSION_UPDATE_BATCH_DURATION", Duration::from_secs(1))?;
    let channel_size = config::get_int("SESSION_UPDATE_CHANNEL_SIZE", 10 * 1024)? as usize;

    let mut database = Database::load(&database_path)
        .with_context(|| format!("failed to load database {}", database_path.display()))?;
    database
        .precompute_relay_keys(&relay_backend_private_key)
        .context("failed to precompute relay secret keys")?;
    info!(
        "loaded database: {} relays, {} buyers",
        database.num_relays(),
        database.buyers.len()
    );

    let route_matrix = RouteMatrix::load(&route_matrix_path).with_context(|| {
        format!("failed to load route matrix {}", route_matrix_path.display())
    })?;
    info!(
        "loaded route matrix: {} relays, {} entries",
        route_matrix.num_relays(),
        route_matrix.entries.len()
    );

    let producer = Arc::new(
        PubsubProducer::create(PubsubConfig {
            redis_hostname,
            pubsub_channel_name,
            batch_size,
            batch_duration,
            message_channel_size: channel_size,
        })
        .await
        .context("could not create redis pubsub producer")?,
    );

    let shared = Arc::new(Shared {
        config: BackendConfig {
            relay_backend_public_key,
            relay_backend_private_key: relay_backend_private_key.clone(),
            server_backend_public_key,
            server_backend_private_key,
            server_backend_address: bind_address,
            stale_duration,
            portal_next_sessions_only,
        },
        database: ArcSwap::from_pointee(database),
        route_matrix: ArcSwap::from_pointee(route_matrix),
        sinks: sinks::spawn_sinks(producer, channel_size),
    });

    spawn_reloader(
        shared.clone(),
        database_path,
        route_matrix_path,
        relay_backend_private_key,
        reload_interval,
    );

    let socket = Arc::new(
        UdpSocket::bind(bind_address)
            .await
            .with_context(|| format!("failed to bind {bind_address}"))?,
    );
    info!("server backend listening on {bind_address}");

    let mut buffer = vec![0u8; MAX_PACKET_BYTES];
    loop {
        let (received, from) = socket
            .recv_from(&mut buffer)
            .await
            .context("udp receive failed")?;
        let packet = buffer[..received].to_vec();
        let shared = shared.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            // Side-effect sends completed before the deadline stand; past it
            // the update is abandoned and the SDK retries the slice.
            if tokio::time::timeout(request_deadline, handle_packet(&shared, &socket, from, packet))
                .await
                .is_err()
            {
                warn!("[{from}] session update deadline expired");
                metrics::counter!("session_update_deadline_expired_total").increment(1);
            }
        });
    }
}

/// Reload the published snapshots on a fixed cadence. Readers pick up the
/// new pointers on their next request; in-flight requests keep their
/// handles until they return.
fn spawn_reloader(
    shared: Arc<Shared>,
    database_path: PathBuf,
    route_matrix_path: PathBuf,
    relay_backend_private_key: Vec<u8>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            match Database::load(&database_path) {
                Ok(mut database) => {
                    if let Err(e) = database.precompute_relay_keys(&relay_backend_private_key) {
                        warn!("failed to precompute relay secret keys on reload: {e}");
                    } else {
                        shared.database.store(Arc::new(database));
                    }
                }
                Err(e) => debug!("database reload skipped: {e}"),
            }

            match RouteMatrix::load(&route_matrix_path) {
                Ok(route_matrix) => {
                    metrics::gauge!("route_matrix_created_at")
                        .set(route_matrix.created_at as f64);
                    shared.route_matrix.store(Arc::new(route_matrix));
                }
                Err(e) => debug!("route matrix reload skipped: {e}"),
            }
        }
    });
}

async fn handle_packet(shared: &Shared, socket: &UdpSocket, from: SocketAddr, packet: Vec<u8>) {
    let (packet_type, payload) =
        match parse_packet(&packet, &from, &shared.config.server_backend_address) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("[{from}] dropped packet: {e}");
                return;
            }
        };

    if packet_type != SESSION_UPDATE_REQUEST_PACKET {
        debug!("[{from}] unknown packet type {packet_type}");
        return;
    }

    let mut reader = codec::ReadStream::new(payload);
    let request = match SessionUpdateRequestPacket::read(&mut reader) {
        Ok(request) => request,
        Err(e) => {
            debug!("[{from}] could not read session update request: {e}");
            return;
        }
    };

    let database = shared.database.load_full();
    let route_matrix = shared.route_matrix.load_full();

    let Some(buyer) = database.buyer(request.buyer_id) else {
        debug!("[{from}] unknown buyer {:016x}", request.buyer_id);
        metrics::counter!("session_update_unknown_buyer_total").increment(1);
        return;
    };

    if !verify_packet_signature(&packet, &buyer.public_key) {
        debug!("[{from}] session update signature check failed");
        metrics::counter!("session_update_bad_signature_total").increment(1);
        return;
    }

    let mut state = SessionUpdateState::new(
        &shared.config,
        &database,
        &route_matrix,
        buyer,
        from,
        request,
    );

    session::session_update(&mut state, &shared.sinks).await;

    if state.wrote_response_packet {
        if let Err(e) = socket.send_to(&state.response_packet, from).await {
            warn!("[{from}] failed to send session update response: {e}");
        }
    }
}
