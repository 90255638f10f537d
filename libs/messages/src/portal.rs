//! Portal-facing messages. These drive the live session view.

use crate::{read_relay_ids, read_relay_samples, write_relay_ids, write_relay_samples, RelaySample};
use codec::{CodecResult, ReadStream, WriteStream};

pub const PORTAL_SESSION_UPDATE_MESSAGE_VERSION: u8 = 1;
pub const PORTAL_CLIENT_RELAY_UPDATE_MESSAGE_VERSION: u8 = 1;
pub const PORTAL_SERVER_RELAY_UPDATE_MESSAGE_VERSION: u8 = 1;

const MAX_ADDRESS_LENGTH: usize = 64;

/// One slice of a session as the portal sees it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalSessionUpdateMessage {
    pub timestamp: u64,
    pub client_address: String,
    pub server_address: String,
    pub sdk_version_major: u8,
    pub sdk_version_minor: u8,
    pub sdk_version_patch: u8,
    pub session_id: u64,
    pub user_hash: u64,
    pub start_time: u64,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub latitude: f32,
    pub longitude: f32,
    pub slice_number: u32,
    pub session_events: u64,
    pub internal_events: u64,
    pub connection_type: u8,
    pub platform_type: u8,

    pub direct_rtt: f32,
    pub direct_jitter: f32,
    pub direct_packet_loss: f32,
    pub direct_kbps_up: u32,
    pub direct_kbps_down: u32,

    pub next: bool,
    pub next_rtt: f32,
    pub next_jitter: f32,
    pub next_packet_loss: f32,
    pub next_kbps_up: u32,
    pub next_kbps_down: u32,
    pub next_predicted_rtt: u32,
    pub next_route_relays: Vec<u64>,

    pub real_jitter: f32,
    pub real_packet_loss: f32,
    pub real_out_of_order: f32,

    pub client_relays: Vec<RelaySample>,
    pub server_relays: Vec<RelaySample>,

    pub best_score: u32,
    pub best_direct_rtt: u32,
    pub best_next_rtt: u32,

    pub retry: bool,
    pub fallback_to_direct: bool,
    pub send_to_portal: bool,
}

impl PortalSessionUpdateMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", PORTAL_SESSION_UPDATE_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp)?;
        stream.write_string("client address", &self.client_address)?;
        stream.write_string("server address", &self.server_address)?;
        stream.write_u8("sdk major", self.sdk_version_major)?;
        stream.write_u8("sdk minor", self.sdk_version_minor)?;
        stream.write_u8("sdk patch", self.sdk_version_patch)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u64("user hash", self.user_hash)?;
        stream.write_u64("start time", self.start_time)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("datacenter id", self.datacenter_id)?;
        stream.write_f32("latitude", self.latitude)?;
        stream.write_f32("longitude", self.longitude)?;
        stream.write_u32("slice number", self.slice_number)?;
        stream.write_u64("session events", self.session_events)?;
        stream.write_u64("internal events", self.internal_events)?;
        stream.write_u8("connection type", self.connection_type)?;
        stream.write_u8("platform type", self.platform_type)?;
        stream.write_f32("direct rtt", self.direct_rtt)?;
        stream.write_f32("direct jitter", self.direct_jitter)?;
        stream.write_f32("direct packet loss", self.direct_packet_loss)?;
        stream.write_u32("direct kbps up", self.direct_kbps_up)?;
        stream.write_u32("direct kbps down", self.direct_kbps_down)?;
        stream.write_bool("next", self.next)?;
        if self.next {
            stream.write_f32("next rtt", self.next_rtt)?;
            stream.write_f32("next jitter", self.next_jitter)?;
            stream.write_f32("next packet loss", self.next_packet_loss)?;
            stream.write_u32("next kbps up", self.next_kbps_up)?;
            stream.write_u32("next kbps down", self.next_kbps_down)?;
            stream.write_u32("next predicted rtt", self.next_predicted_rtt)?;
            write_relay_ids(stream, &self.next_route_relays)?;
        }
        stream.write_f32("real jitter", self.real_jitter)?;
        stream.write_f32("real packet loss", self.real_packet_loss)?;
        stream.write_f32("real out of order", self.real_out_of_order)?;
        write_relay_samples(stream, &self.client_relays)?;
        write_relay_samples(stream, &self.server_relays)?;
        stream.write_u32("best score", self.best_score)?;
        stream.write_u32("best direct rtt", self.best_direct_rtt)?;
        stream.write_u32("best next rtt", self.best_next_rtt)?;
        stream.write_bool("retry", self.retry)?;
        stream.write_bool("fallback to direct", self.fallback_to_direct)?;
        stream.write_bool("send to portal", self.send_to_portal)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != PORTAL_SESSION_UPDATE_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "portal session update message",
                version: version as u32,
            });
        }
        let mut message = Self {
            timestamp: stream.read_u64("timestamp")?,
            client_address: stream.read_string("client address", MAX_ADDRESS_LENGTH)?,
            server_address: stream.read_string("server address", MAX_ADDRESS_LENGTH)?,
            sdk_version_major: stream.read_u8("sdk major")?,
            sdk_version_minor: stream.read_u8("sdk minor")?,
            sdk_version_patch: stream.read_u8("sdk patch")?,
            session_id: stream.read_u64("session id")?,
            user_hash: stream.read_u64("user hash")?,
            start_time: stream.read_u64("start time")?,
            buyer_id: stream.read_u64("buyer id")?,
            datacenter_id: stream.read_u64("datacenter id")?,
            latitude: stream.read_f32("latitude")?,
            longitude: stream.read_f32("longitude")?,
            slice_number: stream.read_u32("slice number")?,
            session_events: stream.read_u64("session events")?,
            internal_events: stream.read_u64("internal events")?,
            connection_type: stream.read_u8("connection type")?,
            platform_type: stream.read_u8("platform type")?,
            direct_rtt: stream.read_f32("direct rtt")?,
            direct_jitter: stream.read_f32("direct jitter")?,
            direct_packet_loss: stream.read_f32("direct packet loss")?,
            direct_kbps_up: stream.read_u32("direct kbps up")?,
            direct_kbps_down: stream.read_u32("direct kbps down")?,
            next: stream.read_bool("next")?,
            ..Default::default()
        };
        if message.next {
            message.next_rtt = stream.read_f32("next rtt")?;
            message.next_jitter = stream.read_f32("next jitter")?;
            message.next_packet_loss = stream.read_f32("next packet loss")?;
            message.next_kbps_up = stream.read_u32("next kbps up")?;
            message.next_kbps_down = stream.read_u32("next kbps down")?;
            message.next_predicted_rtt = stream.read_u32("next predicted rtt")?;
            message.next_route_relays = read_relay_ids(stream)?;
        }
        message.real_jitter = stream.read_f32("real jitter")?;
        message.real_packet_loss = stream.read_f32("real packet loss")?;
        message.real_out_of_order = stream.read_f32("real out of order")?;
        message.client_relays = read_relay_samples(stream)?;
        message.server_relays = read_relay_samples(stream)?;
        message.best_score = stream.read_u32("best score")?;
        message.best_direct_rtt = stream.read_u32("best direct rtt")?;
        message.best_next_rtt = stream.read_u32("best next rtt")?;
        message.retry = stream.read_bool("retry")?;
        message.fallback_to_direct = stream.read_bool("fallback to direct")?;
        message.send_to_portal = stream.read_bool("send to portal")?;
        Ok(message)
    }
}

/// Client relay pings, sent once per session when the portal latch flips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalClientRelayUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub client_relays: Vec<RelaySample>,
}

impl PortalClientRelayUpdateMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", PORTAL_CLIENT_RELAY_UPDATE_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("session id", self.session_id)?;
        write_relay_samples(stream, &self.client_relays)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != PORTAL_CLIENT_RELAY_UPDATE_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "portal client relay update message",
                version: version as u32,
            });
        }
        Ok(Self {
            timestamp: stream.read_u64("timestamp")?,
            buyer_id: stream.read_u64("buyer id")?,
            session_id: stream.read_u64("session id")?,
            client_relays: read_relay_samples(stream)?,
        })
    }
}

/// Server relay pings, same latch as the client relay message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalServerRelayUpdateMessage {
    pub timestamp: u64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub server_relays: Vec<RelaySample>,
}

impl PortalServerRelayUpdateMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", PORTAL_SERVER_RELAY_UPDATE_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("session id", self.session_id)?;
        write_relay_samples(stream, &self.server_relays)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != PORTAL_SERVER_RELAY_UPDATE_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "portal server relay update message",
                version: version as u32,
            });
        }
        Ok(Self {
            timestamp: stream.read_u64("timestamp")?,
            buyer_id: stream.read_u64("buyer id")?,
            session_id: stream.read_u64("session id")?,
            server_relays: read_relay_samples(stream)?,
        })
    }
}
