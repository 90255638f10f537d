//! Analytics messages. Each maps to one columnar row in the warehouse;
//! `row()` is the schema.

use crate::{read_relay_ids, write_relay_ids};
use codec::{CodecResult, ReadStream, WriteStream};
use serde_json::{json, Map, Value};

pub const ANALYTICS_SESSION_UPDATE_MESSAGE_VERSION: u8 = 1;
pub const ANALYTICS_SESSION_SUMMARY_MESSAGE_VERSION: u8 = 1;
pub const ANALYTICS_CLIENT_RELAY_PING_MESSAGE_VERSION: u8 = 1;
pub const ANALYTICS_SERVER_RELAY_PING_MESSAGE_VERSION: u8 = 1;

const MAX_ADDRESS_LENGTH: usize = 64;

/// Decision-trail flags shared by the update and summary rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionFlags {
    pub fallback_to_direct: bool,
    pub reported: bool,
    pub latency_reduction: bool,
    pub packet_loss_reduction: bool,
    pub force_next: bool,
    pub long_session_update: bool,
    pub client_next_bandwidth_over_limit: bool,
    pub server_next_bandwidth_over_limit: bool,
    pub veto: bool,
    pub disabled: bool,
    pub not_selected: bool,
    pub a: bool,
    pub b: bool,
    pub latency_worse: bool,
    pub mispredict: bool,
    pub lack_of_diversity: bool,
}

impl SessionFlags {
    fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        let fields = [
            self.fallback_to_direct,
            self.reported,
            self.latency_reduction,
            self.packet_loss_reduction,
            self.force_next,
            self.long_session_update,
            self.client_next_bandwidth_over_limit,
            self.server_next_bandwidth_over_limit,
            self.veto,
            self.disabled,
            self.not_selected,
            self.a,
            self.b,
            self.latency_worse,
            self.mispredict,
            self.lack_of_diversity,
        ];
        let mut bits = 0u16;
        for (i, field) in fields.iter().enumerate() {
            if *field {
                bits |= 1 << i;
            }
        }
        stream.write_u16("session flags", bits)
    }

    fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let bits = stream.read_u16("session flags")?;
        let get = |i: u16| bits & (1 << i) != 0;
        Ok(Self {
            fallback_to_direct: get(0),
            reported: get(1),
            latency_reduction: get(2),
            packet_loss_reduction: get(3),
            force_next: get(4),
            long_session_update: get(5),
            client_next_bandwidth_over_limit: get(6),
            server_next_bandwidth_over_limit: get(7),
            veto: get(8),
            disabled: get(9),
            not_selected: get(10),
            a: get(11),
            b: get(12),
            latency_worse: get(13),
            mispredict: get(14),
            lack_of_diversity: get(15),
        })
    }

    fn fill_row(&self, row: &mut Map<String, Value>) {
        row.insert("fallback_to_direct".into(), json!(self.fallback_to_direct));
        row.insert("reported".into(), json!(self.reported));
        row.insert("latency_reduction".into(), json!(self.latency_reduction));
        row.insert(
            "packet_loss_reduction".into(),
            json!(self.packet_loss_reduction),
        );
        row.insert("force_next".into(), json!(self.force_next));
        row.insert("long_session_update".into(), json!(self.long_session_update));
        row.insert("veto".into(), json!(self.veto));
        row.insert("disabled".into(), json!(self.disabled));
        row.insert("not_selected".into(), json!(self.not_selected));
        row.insert("a".into(), json!(self.a));
        row.insert("b".into(), json!(self.b));
        row.insert("latency_worse".into(), json!(self.latency_worse));
        row.insert("mispredict".into(), json!(self.mispredict));
        row.insert("lack_of_diversity".into(), json!(self.lack_of_diversity));
    }
}

/// One row per slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsSessionUpdateMessage {
    /// Microseconds.
    pub timestamp: i64,
    pub session_id: u64,
    pub slice_number: u32,
    pub real_packet_loss: f32,
    pub real_jitter: f32,
    pub real_out_of_order: f32,
    pub session_events: u64,
    pub internal_events: u64,
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
    pub next_predicted_rtt: f32,
    pub next_route_relays: Vec<u64>,
    pub flags: SessionFlags,
}

impl AnalyticsSessionUpdateMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", ANALYTICS_SESSION_UPDATE_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp as u64)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u32("slice number", self.slice_number)?;
        stream.write_f32("real packet loss", self.real_packet_loss)?;
        stream.write_f32("real jitter", self.real_jitter)?;
        stream.write_f32("real out of order", self.real_out_of_order)?;
        stream.write_u64("session events", self.session_events)?;
        stream.write_u64("internal events", self.internal_events)?;
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
            stream.write_f32("next predicted rtt", self.next_predicted_rtt)?;
            write_relay_ids(stream, &self.next_route_relays)?;
        }
        self.flags.write(stream)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != ANALYTICS_SESSION_UPDATE_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "analytics session update message",
                version: version as u32,
            });
        }
        let mut message = Self {
            timestamp: stream.read_u64("timestamp")? as i64,
            session_id: stream.read_u64("session id")?,
            slice_number: stream.read_u32("slice number")?,
            real_packet_loss: stream.read_f32("real packet loss")?,
            real_jitter: stream.read_f32("real jitter")?,
            real_out_of_order: stream.read_f32("real out of order")?,
            session_events: stream.read_u64("session events")?,
            internal_events: stream.read_u64("internal events")?,
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
            message.next_predicted_rtt = stream.read_f32("next predicted rtt")?;
            message.next_route_relays = read_relay_ids(stream)?;
        }
        message.flags = SessionFlags::read(stream)?;
        Ok(message)
    }

    pub fn row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("timestamp".into(), json!(self.timestamp));
        row.insert("session_id".into(), json!(self.session_id as i64));
        row.insert("slice_number".into(), json!(self.slice_number));
        row.insert("real_packet_loss".into(), json!(self.real_packet_loss));
        row.insert("real_jitter".into(), json!(self.real_jitter));
        row.insert("real_out_of_order".into(), json!(self.real_out_of_order));
        row.insert("direct_rtt".into(), json!(self.direct_rtt));
        row.insert("direct_jitter".into(), json!(self.direct_jitter));
        row.insert("direct_packet_loss".into(), json!(self.direct_packet_loss));
        row.insert("next".into(), json!(self.next));
        if self.next {
            row.insert("next_rtt".into(), json!(self.next_rtt));
            row.insert("next_jitter".into(), json!(self.next_jitter));
            row.insert("next_packet_loss".into(), json!(self.next_packet_loss));
            row.insert("next_predicted_rtt".into(), json!(self.next_predicted_rtt));
            row.insert(
                "next_route_relays".into(),
                json!(self
                    .next_route_relays
                    .iter()
                    .map(|&id| id as i64)
                    .collect::<Vec<_>>()),
            );
        }
        self.flags.fill_row(&mut row);
        row
    }
}

/// One row per session, written when the session ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsSessionSummaryMessage {
    /// Microseconds.
    pub timestamp: i64,
    pub session_id: u64,
    pub datacenter_id: u64,
    pub buyer_id: u64,
    pub user_hash: u64,
    pub latitude: f32,
    pub longitude: f32,
    pub client_address: String,
    pub server_address: String,
    pub connection_type: u8,
    pub platform_type: u8,
    pub sdk_version_major: u8,
    pub sdk_version_minor: u8,
    pub sdk_version_patch: u8,
    pub client_to_server_packets_sent: u64,
    pub server_to_client_packets_sent: u64,
    pub client_to_server_packets_lost: u64,
    pub server_to_client_packets_lost: u64,
    pub client_to_server_packets_out_of_order: u64,
    pub server_to_client_packets_out_of_order: u64,
    /// Seconds.
    pub session_duration: u32,
    pub total_next_envelope_bytes_up: u64,
    pub total_next_envelope_bytes_down: u64,
    /// Seconds.
    pub duration_on_next: u32,
    /// Microseconds.
    pub start_timestamp: i64,
    pub error: u64,
    pub flags: SessionFlags,
}

impl AnalyticsSessionSummaryMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", ANALYTICS_SESSION_SUMMARY_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp as u64)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u64("datacenter id", self.datacenter_id)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("user hash", self.user_hash)?;
        stream.write_f32("latitude", self.latitude)?;
        stream.write_f32("longitude", self.longitude)?;
        stream.write_string("client address", &self.client_address)?;
        stream.write_string("server address", &self.server_address)?;
        stream.write_u8("connection type", self.connection_type)?;
        stream.write_u8("platform type", self.platform_type)?;
        stream.write_u8("sdk major", self.sdk_version_major)?;
        stream.write_u8("sdk minor", self.sdk_version_minor)?;
        stream.write_u8("sdk patch", self.sdk_version_patch)?;
        stream.write_u64("c2s packets sent", self.client_to_server_packets_sent)?;
        stream.write_u64("s2c packets sent", self.server_to_client_packets_sent)?;
        stream.write_u64("c2s packets lost", self.client_to_server_packets_lost)?;
        stream.write_u64("s2c packets lost", self.server_to_client_packets_lost)?;
        stream.write_u64(
            "c2s packets out of order",
            self.client_to_server_packets_out_of_order,
        )?;
        stream.write_u64(
            "s2c packets out of order",
            self.server_to_client_packets_out_of_order,
        )?;
        stream.write_u32("session duration", self.session_duration)?;
        stream.write_u64("envelope bytes up", self.total_next_envelope_bytes_up)?;
        stream.write_u64("envelope bytes down", self.total_next_envelope_bytes_down)?;
        stream.write_u32("duration on next", self.duration_on_next)?;
        stream.write_u64("start timestamp", self.start_timestamp as u64)?;
        stream.write_u64("error", self.error)?;
        self.flags.write(stream)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != ANALYTICS_SESSION_SUMMARY_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "analytics session summary message",
                version: version as u32,
            });
        }
        Ok(Self {
            timestamp: stream.read_u64("timestamp")? as i64,
            session_id: stream.read_u64("session id")?,
            datacenter_id: stream.read_u64("datacenter id")?,
            buyer_id: stream.read_u64("buyer id")?,
            user_hash: stream.read_u64("user hash")?,
            latitude: stream.read_f32("latitude")?,
            longitude: stream.read_f32("longitude")?,
            client_address: stream.read_string("client address", MAX_ADDRESS_LENGTH)?,
            server_address: stream.read_string("server address", MAX_ADDRESS_LENGTH)?,
            connection_type: stream.read_u8("connection type")?,
            platform_type: stream.read_u8("platform type")?,
            sdk_version_major: stream.read_u8("sdk major")?,
            sdk_version_minor: stream.read_u8("sdk minor")?,
            sdk_version_patch: stream.read_u8("sdk patch")?,
            client_to_server_packets_sent: stream.read_u64("c2s packets sent")?,
            server_to_client_packets_sent: stream.read_u64("s2c packets sent")?,
            client_to_server_packets_lost: stream.read_u64("c2s packets lost")?,
            server_to_client_packets_lost: stream.read_u64("s2c packets lost")?,
            client_to_server_packets_out_of_order: stream
                .read_u64("c2s packets out of order")?,
            server_to_client_packets_out_of_order: stream
                .read_u64("s2c packets out of order")?,
            session_duration: stream.read_u32("session duration")?,
            total_next_envelope_bytes_up: stream.read_u64("envelope bytes up")?,
            total_next_envelope_bytes_down: stream.read_u64("envelope bytes down")?,
            duration_on_next: stream.read_u32("duration on next")?,
            start_timestamp: stream.read_u64("start timestamp")? as i64,
            error: stream.read_u64("error")?,
            flags: SessionFlags::read(stream)?,
        })
    }

    pub fn row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("timestamp".into(), json!(self.timestamp));
        row.insert("session_id".into(), json!(self.session_id as i64));
        row.insert("datacenter_id".into(), json!(self.datacenter_id as i64));
        row.insert("buyer_id".into(), json!(self.buyer_id as i64));
        row.insert("user_hash".into(), json!(self.user_hash as i64));
        row.insert("client_address".into(), json!(self.client_address));
        row.insert("server_address".into(), json!(self.server_address));
        row.insert("session_duration".into(), json!(self.session_duration));
        row.insert("duration_on_next".into(), json!(self.duration_on_next));
        row.insert("start_timestamp".into(), json!(self.start_timestamp));
        row.insert("error".into(), json!(self.error as i64));
        row.insert(
            "total_next_envelope_bytes_up".into(),
            json!(self.total_next_envelope_bytes_up as i64),
        );
        row.insert(
            "total_next_envelope_bytes_down".into(),
            json!(self.total_next_envelope_bytes_down as i64),
        );
        self.flags.fill_row(&mut row);
        row
    }
}

/// One row per client relay, slice 1 only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsClientRelayPingMessage {
    /// Microseconds.
    pub timestamp: i64,
    pub buyer_id: u64,
    pub session_id: u64,
    pub user_hash: u64,
    pub latitude: f32,
    pub longitude: f32,
    pub client_address: String,
    pub connection_type: u8,
    pub platform_type: u8,
    pub client_relay_id: u64,
    pub client_relay_rtt: i32,
    pub client_relay_jitter: i32,
    pub client_relay_packet_loss: f32,
}

impl AnalyticsClientRelayPingMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", ANALYTICS_CLIENT_RELAY_PING_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp as u64)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u64("user hash", self.user_hash)?;
        stream.write_f32("latitude", self.latitude)?;
        stream.write_f32("longitude", self.longitude)?;
        stream.write_string("client address", &self.client_address)?;
        stream.write_u8("connection type", self.connection_type)?;
        stream.write_u8("platform type", self.platform_type)?;
        stream.write_u64("client relay id", self.client_relay_id)?;
        stream.write_i32("client relay rtt", self.client_relay_rtt)?;
        stream.write_i32("client relay jitter", self.client_relay_jitter)?;
        stream.write_f32("client relay packet loss", self.client_relay_packet_loss)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != ANALYTICS_CLIENT_RELAY_PING_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "analytics client relay ping message",
                version: version as u32,
            });
        }
        Ok(Self {
            timestamp: stream.read_u64("timestamp")? as i64,
            buyer_id: stream.read_u64("buyer id")?,
            session_id: stream.read_u64("session id")?,
            user_hash: stream.read_u64("user hash")?,
            latitude: stream.read_f32("latitude")?,
            longitude: stream.read_f32("longitude")?,
            client_address: stream.read_string("client address", MAX_ADDRESS_LENGTH)?,
            connection_type: stream.read_u8("connection type")?,
            platform_type: stream.read_u8("platform type")?,
            client_relay_id: stream.read_u64("client relay id")?,
            client_relay_rtt: stream.read_i32("client relay rtt")?,
            client_relay_jitter: stream.read_i32("client relay jitter")?,
            client_relay_packet_loss: stream.read_f32("client relay packet loss")?,
        })
    }

    pub fn row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("timestamp".into(), json!(self.timestamp));
        row.insert("buyer_id".into(), json!(self.buyer_id as i64));
        row.insert("session_id".into(), json!(self.session_id as i64));
        row.insert("user_hash".into(), json!(self.user_hash as i64));
        row.insert("client_relay_id".into(), json!(self.client_relay_id as i64));
        row.insert("client_relay_rtt".into(), json!(self.client_relay_rtt));
        row.insert("client_relay_jitter".into(), json!(self.client_relay_jitter));
        row.insert(
            "client_relay_packet_loss".into(),
            json!(self.client_relay_packet_loss),
        );
        row
    }
}

/// One row per server relay, slice 1 only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsServerRelayPingMessage {
    /// Microseconds.
    pub timestamp: i64,
    pub buyer_id: u64,
    pub datacenter_id: u64,
    pub server_relay_id: u64,
    pub server_relay_rtt: i32,
    pub server_relay_jitter: i32,
    pub server_relay_packet_loss: f32,
}

impl AnalyticsServerRelayPingMessage {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> CodecResult<()> {
        stream.write_u8("version", ANALYTICS_SERVER_RELAY_PING_MESSAGE_VERSION)?;
        stream.write_u64("timestamp", self.timestamp as u64)?;
        stream.write_u64("buyer id", self.buyer_id)?;
        stream.write_u64("datacenter id", self.datacenter_id)?;
        stream.write_u64("server relay id", self.server_relay_id)?;
        stream.write_i32("server relay rtt", self.server_relay_rtt)?;
        stream.write_i32("server relay jitter", self.server_relay_jitter)?;
        stream.write_f32("server relay packet loss", self.server_relay_packet_loss)
    }

    pub fn read(stream: &mut ReadStream<'_>) -> CodecResult<Self> {
        let version = stream.read_u8("version")?;
        if version != ANALYTICS_SERVER_RELAY_PING_MESSAGE_VERSION {
            return Err(codec::CodecError::UnknownVersion {
                format: "analytics server relay ping message",
                version: version as u32,
            });
        }
        Ok(Self {
            timestamp: stream.read_u64("timestamp")? as i64,
            buyer_id: stream.read_u64("buyer id")?,
            datacenter_id: stream.read_u64("datacenter id")?,
            server_relay_id: stream.read_u64("server relay id")?,
            server_relay_rtt: stream.read_i32("server relay rtt")?,
            server_relay_jitter: stream.read_i32("server relay jitter")?,
            server_relay_packet_loss: stream.read_f32("server relay packet loss")?,
        })
    }

    pub fn row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("timestamp".into(), json!(self.timestamp));
        row.insert("buyer_id".into(), json!(self.buyer_id as i64));
        row.insert("datacenter_id".into(), json!(self.datacenter_id as i64));
        row.insert("server_relay_id".into(), json!(self.server_relay_id as i64));
        row.insert("server_relay_rtt".into(), json!(self.server_relay_rtt));
        row.insert("server_relay_jitter".into(), json!(self.server_relay_jitter));
        row.insert(
            "server_relay_packet_loss".into(),
            json!(self.server_relay_packet_loss),
        );
        row
    }
}
