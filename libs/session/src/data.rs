//! Session data: the state a session carries across slices.
//!
//! Serialized into the response, signed by the backend, stored by the SDK,
//! and sent back up verbatim with the next request. The backend is
//! stateless between slices; this structure is the session's entire
//! memory, which is why it must fit in [`MAX_SESSION_DATA_SIZE`] and why it
//! never crosses the trust boundary unsigned.

use crate::SessionResult;
use codec::{CodecError, ReadStream, WriteStream};
use types::{
    RouteState, MAX_CLIENT_RELAYS, MAX_ROUTE_RELAYS, MAX_SESSION_DATA_SIZE,
    SESSION_DATA_VERSION_MAX, SESSION_DATA_VERSION_MIN, SESSION_DATA_VERSION_WRITE,
};

const FLAG_SENT_CLIENT_RELAYS: u8 = 1 << 0;
const FLAG_SENT_SERVER_RELAYS: u8 = 1 << 1;
const FLAG_WRITE_SUMMARY: u8 = 1 << 2;
const FLAG_WROTE_SUMMARY: u8 = 1 << 3;
const FLAG_ROUTE_CHANGED: u8 = 1 << 4;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    pub version: u8,
    pub session_id: u64,
    /// Monotone per session; the request's slice number must match.
    pub slice_number: u32,
    pub start_timestamp: u64,
    pub expire_timestamp: u64,
    pub route_state: RouteState,
    /// Accumulated error bits, kept for the session's life.
    pub error: u64,

    pub best_score: u32,
    pub best_direct_rtt: u32,
    pub best_next_rtt: u32,

    /// Predicted RTT of the current route, clamped to `MAX_ROUTE_COST`.
    pub route_cost: i32,
    pub route_changed: bool,
    /// Bumped on every new route; unchanged on continues.
    pub session_version: u8,
    pub route_relay_ids: Vec<u64>,

    pub next_envelope_bytes_up_sum: u64,
    pub next_envelope_bytes_down_sum: u64,
    /// Seconds this session has spent accelerated.
    pub duration_on_next: u32,

    // Previous-slice counters for differential loss computation.
    pub prev_packets_sent_client_to_server: u64,
    pub prev_packets_sent_server_to_client: u64,
    pub prev_packets_lost_client_to_server: u64,
    pub prev_packets_lost_server_to_client: u64,
    pub prev_packets_out_of_order_client_to_server: u64,
    pub prev_packets_out_of_order_server_to_client: u64,

    /// Source relays excluded for the rest of the session.
    pub exclude_client_relay: [bool; MAX_CLIENT_RELAYS],

    pub sent_client_relays_to_portal: bool,
    pub sent_server_relays_to_portal: bool,
    pub write_summary: bool,
    pub wrote_summary: bool,

    pub latitude: f32,
    pub longitude: f32,
}

impl SessionData {
    pub fn write(&self, stream: &mut WriteStream<'_>) -> SessionResult<()> {
        stream.write_u8("session data version", SESSION_DATA_VERSION_WRITE)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u32("slice number", self.slice_number)?;
        stream.write_u64("start timestamp", self.start_timestamp)?;
        stream.write_u64("expire timestamp", self.expire_timestamp)?;
        stream.write_u32("route state", self.route_state.pack())?;
        stream.write_u64("session error", self.error)?;
        stream.write_u32("best score", self.best_score)?;
        stream.write_u32("best direct rtt", self.best_direct_rtt)?;
        stream.write_u32("best next rtt", self.best_next_rtt)?;
        stream.write_i32("route cost", self.route_cost)?;
        stream.write_u8("session version", self.session_version)?;

        debug_assert!(self.route_relay_ids.len() <= MAX_ROUTE_RELAYS);
        stream.write_u8("route num relays", self.route_relay_ids.len() as u8)?;
        for relay_id in &self.route_relay_ids {
            stream.write_u64("route relay id", *relay_id)?;
        }

        stream.write_u64("envelope bytes up sum", self.next_envelope_bytes_up_sum)?;
        stream.write_u64("envelope bytes down sum", self.next_envelope_bytes_down_sum)?;
        stream.write_u32("duration on next", self.duration_on_next)?;

        stream.write_u64("prev c2s sent", self.prev_packets_sent_client_to_server)?;
        stream.write_u64("prev s2c sent", self.prev_packets_sent_server_to_client)?;
        stream.write_u64("prev c2s lost", self.prev_packets_lost_client_to_server)?;
        stream.write_u64("prev s2c lost", self.prev_packets_lost_server_to_client)?;
        stream.write_u64(
            "prev c2s out of order",
            self.prev_packets_out_of_order_client_to_server,
        )?;
        stream.write_u64(
            "prev s2c out of order",
            self.prev_packets_out_of_order_server_to_client,
        )?;

        let mut exclude_bits = 0u16;
        for (i, excluded) in self.exclude_client_relay.iter().enumerate() {
            if *excluded {
                exclude_bits |= 1 << i;
            }
        }
        stream.write_u16("exclude client relay", exclude_bits)?;

        let mut flags = 0u8;
        if self.sent_client_relays_to_portal {
            flags |= FLAG_SENT_CLIENT_RELAYS;
        }
        if self.sent_server_relays_to_portal {
            flags |= FLAG_SENT_SERVER_RELAYS;
        }
        if self.write_summary {
            flags |= FLAG_WRITE_SUMMARY;
        }
        if self.wrote_summary {
            flags |= FLAG_WROTE_SUMMARY;
        }
        if self.route_changed {
            flags |= FLAG_ROUTE_CHANGED;
        }
        stream.write_u8("session flags", flags)?;

        stream.write_f32("latitude", self.latitude)?;
        stream.write_f32("longitude", self.longitude)?;

        debug_assert!(stream.bytes_processed() <= MAX_SESSION_DATA_SIZE);
        Ok(())
    }

    pub fn read(stream: &mut ReadStream<'_>) -> SessionResult<Self> {
        let version = stream.read_u8("session data version")?;
        if !(SESSION_DATA_VERSION_MIN..=SESSION_DATA_VERSION_MAX).contains(&version) {
            return Err(CodecError::UnknownVersion {
                format: "session data",
                version: version as u32,
            }
            .into());
        }

        let mut data = SessionData {
            version,
            session_id: stream.read_u64("session id")?,
            slice_number: stream.read_u32("slice number")?,
            start_timestamp: stream.read_u64("start timestamp")?,
            expire_timestamp: stream.read_u64("expire timestamp")?,
            route_state: RouteState::unpack(stream.read_u32("route state")?),
            error: stream.read_u64("session error")?,
            best_score: stream.read_u32("best score")?,
            best_direct_rtt: stream.read_u32("best direct rtt")?,
            best_next_rtt: stream.read_u32("best next rtt")?,
            route_cost: stream.read_i32("route cost")?,
            session_version: stream.read_u8("session version")?,
            ..Default::default()
        };

        let route_num_relays = stream.read_u8("route num relays")? as usize;
        if route_num_relays > MAX_ROUTE_RELAYS {
            return Err(CodecError::LengthOverflow {
                field: "route num relays",
                got: route_num_relays,
                limit: MAX_ROUTE_RELAYS,
            }
            .into());
        }
        for _ in 0..route_num_relays {
            data.route_relay_ids.push(stream.read_u64("route relay id")?);
        }

        data.next_envelope_bytes_up_sum = stream.read_u64("envelope bytes up sum")?;
        data.next_envelope_bytes_down_sum = stream.read_u64("envelope bytes down sum")?;
        data.duration_on_next = stream.read_u32("duration on next")?;

        data.prev_packets_sent_client_to_server = stream.read_u64("prev c2s sent")?;
        data.prev_packets_sent_server_to_client = stream.read_u64("prev s2c sent")?;
        data.prev_packets_lost_client_to_server = stream.read_u64("prev c2s lost")?;
        data.prev_packets_lost_server_to_client = stream.read_u64("prev s2c lost")?;
        data.prev_packets_out_of_order_client_to_server =
            stream.read_u64("prev c2s out of order")?;
        data.prev_packets_out_of_order_server_to_client =
            stream.read_u64("prev s2c out of order")?;

        let exclude_bits = stream.read_u16("exclude client relay")?;
        for i in 0..MAX_CLIENT_RELAYS {
            data.exclude_client_relay[i] = exclude_bits & (1 << i) != 0;
        }

        let flags = stream.read_u8("session flags")?;
        data.sent_client_relays_to_portal = flags & FLAG_SENT_CLIENT_RELAYS != 0;
        data.sent_server_relays_to_portal = flags & FLAG_SENT_SERVER_RELAYS != 0;
        data.write_summary = flags & FLAG_WRITE_SUMMARY != 0;
        data.wrote_summary = flags & FLAG_WROTE_SUMMARY != 0;
        data.route_changed = flags & FLAG_ROUTE_CHANGED != 0;

        data.latitude = stream.read_f32("latitude")?;
        data.longitude = stream.read_f32("longitude")?;

        Ok(data)
    }

    /// Serialize into a session-data buffer, returning the byte count.
    pub fn serialize(&self, buffer: &mut [u8; MAX_SESSION_DATA_SIZE]) -> SessionResult<usize> {
        let mut stream = WriteStream::new(buffer);
        self.write(&mut stream)?;
        Ok(stream.bytes_processed())
    }

    pub fn deserialize(data: &[u8]) -> SessionResult<Self> {
        let mut stream = ReadStream::new(data);
        Self::read(&mut stream)
    }
}
