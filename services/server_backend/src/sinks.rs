//! Downstream sink wiring.
//!
//! Each message kind gets its own bounded channel. A forwarder task per
//! sink serializes messages into framed records and submits them to the
//! shared pub/sub producer. Blocking sends end to end: a saturated sink
//! slows session updates rather than dropping data.

use codec::WriteStream;
use messages::analytics::{
    AnalyticsClientRelayPingMessage, AnalyticsServerRelayPingMessage,
    AnalyticsSessionSummaryMessage, AnalyticsSessionUpdateMessage,
};
use messages::portal::{
    PortalClientRelayUpdateMessage, PortalServerRelayUpdateMessage, PortalSessionUpdateMessage,
};
use pubsub::PubsubProducer;
use session::SessionSinks;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// Leading byte of each forwarded record identifying the message kind.
pub const MESSAGE_KIND_FALLBACK_TO_DIRECT: u8 = 1;
pub const MESSAGE_KIND_PORTAL_SESSION_UPDATE: u8 = 2;
pub const MESSAGE_KIND_PORTAL_CLIENT_RELAY_UPDATE: u8 = 3;
pub const MESSAGE_KIND_PORTAL_SERVER_RELAY_UPDATE: u8 = 4;
pub const MESSAGE_KIND_ANALYTICS_SESSION_UPDATE: u8 = 5;
pub const MESSAGE_KIND_ANALYTICS_SESSION_SUMMARY: u8 = 6;
pub const MESSAGE_KIND_ANALYTICS_CLIENT_RELAY_PING: u8 = 7;
pub const MESSAGE_KIND_ANALYTICS_SERVER_RELAY_PING: u8 = 8;

const MESSAGE_BUFFER_BYTES: usize = 8 * 1024;

fn framed<F>(kind: u8, write: F) -> Option<Vec<u8>>
where
    F: FnOnce(&mut WriteStream<'_>) -> Result<(), codec::CodecError>,
{
    let mut buffer = vec![0u8; MESSAGE_BUFFER_BYTES];
    let mut stream = WriteStream::new(&mut buffer);
    stream.write_u8("message kind", kind).ok()?;
    if let Err(e) = write(&mut stream) {
        error!("failed to serialize downstream message: {e}");
        return None;
    }
    let written = stream.bytes_processed();
    buffer.truncate(written);
    Some(buffer)
}

/// Build the sink set and spawn one forwarder task per sink.
pub fn spawn_sinks(producer: Arc<PubsubProducer>, channel_size: usize) -> SessionSinks {
    let channel_size = channel_size.max(1);

    macro_rules! sink {
        ($kind:expr, |$msg:ident, $stream:ident| $write:expr) => {{
            let (sender, mut receiver) = mpsc::channel(channel_size);
            let producer = producer.clone();
            tokio::spawn(async move {
                while let Some($msg) = receiver.recv().await {
                    let Some(record) = framed($kind, |$stream| $write) else {
                        continue;
                    };
                    if producer.submit(record).await.is_err() {
                        error!("pubsub producer closed");
                        return;
                    }
                }
            });
            Some(sender)
        }};
    }

    SessionSinks {
        fallback_to_direct: sink!(MESSAGE_KIND_FALLBACK_TO_DIRECT, |session_id, stream| {
            stream.write_u64("session id", session_id)
        }),
        portal_session_update: sink!(
            MESSAGE_KIND_PORTAL_SESSION_UPDATE,
            |message, stream| {
                let message: PortalSessionUpdateMessage = message;
                message.write(stream)
            }
        ),
        portal_client_relay_update: sink!(
            MESSAGE_KIND_PORTAL_CLIENT_RELAY_UPDATE,
            |message, stream| {
                let message: PortalClientRelayUpdateMessage = message;
                message.write(stream)
            }
        ),
        portal_server_relay_update: sink!(
            MESSAGE_KIND_PORTAL_SERVER_RELAY_UPDATE,
            |message, stream| {
                let message: PortalServerRelayUpdateMessage = message;
                message.write(stream)
            }
        ),
        analytics_session_update: sink!(
            MESSAGE_KIND_ANALYTICS_SESSION_UPDATE,
            |message, stream| {
                let message: AnalyticsSessionUpdateMessage = message;
                message.write(stream)
            }
        ),
        analytics_session_summary: sink!(
            MESSAGE_KIND_ANALYTICS_SESSION_SUMMARY,
            |message, stream| {
                let message: AnalyticsSessionSummaryMessage = message;
                message.write(stream)
            }
        ),
        analytics_client_relay_ping: sink!(
            MESSAGE_KIND_ANALYTICS_CLIENT_RELAY_PING,
            |message, stream| {
                let message: AnalyticsClientRelayPingMessage = message;
                message.write(stream)
            }
        ),
        analytics_server_relay_ping: sink!(
            MESSAGE_KIND_ANALYTICS_SERVER_RELAY_PING,
            |message, stream| {
                let message: AnalyticsServerRelayPingMessage = message;
                message.write(stream)
            }
        ),
    }
}
