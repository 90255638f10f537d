mod handler;
mod magic;
mod packets;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use axum::routing::post;
use axum::Router;
use database::Database;
use handler::GatewayState;
use magic::MagicValues;
use pubsub::{PubsubConfig, PubsubProducer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let http_port = config::get_int("HTTP_PORT", 30000)?;
    let database_path = PathBuf::from(config::get_string("DATABASE_PATH", "database.bin"));

    let redis_hostname = config::get_string("REDIS_HOSTNAME", "127.0.0.1:6379");
    let pubsub_channel_name =
        config::get_string("REDIS_PUBSUB_CHANNEL_NAME", "relay_updates");
    let batch_size = config::get_int("RELAY_UPDATE_BATCH_SIZE", 100)? as usize;
    let batch_duration =
        config::get_duration("RELAY_UPDATE_BATCH_DURATION", Duration::from_secs(1))?;
    let channel_size = config::get_int("RELAY_UPDATE_CHANNEL_SIZE", 10 * 1024)? as usize;

    info!("redis hostname: {redis_hostname}");
    info!("redis pubsub channel name: {pubsub_channel_name}");
    info!("relay update batch size: {batch_size}");
    info!("relay update batch duration: {batch_duration:?}");
    info!("relay update channel size: {channel_size}");

    // The keypair is mandatory: without it no relay update can be read.
    let relay_backend_public_key = config::require_base64("RELAY_BACKEND_PUBLIC_KEY")
        .context("you must supply RELAY_BACKEND_PUBLIC_KEY")?;
    let relay_backend_private_key = config::require_base64("RELAY_BACKEND_PRIVATE_KEY")
        .context("you must supply RELAY_BACKEND_PRIVATE_KEY")?;

    let mut database = Database::load(&database_path)
        .with_context(|| format!("failed to load database {}", database_path.display()))?;
    database
        .precompute_relay_keys(&relay_backend_private_key)
        .context("failed to precompute relay secret keys")?;
    info!(
        "loaded database: {} relays, {} datacenters",
        database.num_relays(),
        database.datacenters.len()
    );

    let producer = PubsubProducer::create(PubsubConfig {
        redis_hostname,
        pubsub_channel_name,
        batch_size,
        batch_duration,
        message_channel_size: channel_size,
    })
    .await
    .map_err(|e| {
        error!("could not create redis pubsub producer: {e}");
        e
    })?;

    let (forward, mut forward_rx) = mpsc::channel::<Vec<u8>>(channel_size.max(1));

    let magic = Arc::new(ArcSwap::from_pointee(MagicValues::generate()));
    magic::spawn_rotator(magic.clone());

    let state = Arc::new(GatewayState {
        database: ArcSwap::from_pointee(database),
        magic,
        relay_backend_public_key,
        relay_backend_private_key,
        forward,
    });

    // Pump decrypted updates into the batcher; back-pressure flows from the
    // batcher's bounded channel back to the handlers.
    tokio::spawn(async move {
        while let Some(message) = forward_rx.recv().await {
            if producer.submit(message).await.is_err() {
                error!("pubsub producer closed");
                break;
            }
        }
        producer.shutdown().await;
    });

    let app = Router::new()
        .route("/relay_update", post(handler::relay_update_handler))
        .with_state(state);

    let bind_address = format!("0.0.0.0:{http_port}");
    info!("relay gateway listening on {bind_address}");
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    axum::serve(listener, app).await.context("http server failed")?;

    Ok(())
}
