//! Protocol constants shared between the backend, the SDK, and relays.
//!
//! These values are load-bearing wire-format quantities. Changing any of them
//! breaks compatibility with deployed relays and game servers.

/// Seconds covered by one session slice. One route decision is made per slice.
pub const SLICE_SECONDS: u64 = 10;

/// Maximum relays in a single accelerated route.
pub const MAX_ROUTE_RELAYS: usize = 5;

/// Maximum nodes in a token chain: client + relays + server.
pub const MAX_ROUTE_NODES: usize = MAX_ROUTE_RELAYS + 2;

/// Candidate routes stored per relay pair in the route matrix.
pub const MAX_ROUTES_PER_ENTRY: usize = 8;

/// Maximum client (source) relays a session can ping.
pub const MAX_CLIENT_RELAYS: usize = 16;

/// Maximum server (destination) relays per datacenter considered for routing.
pub const MAX_SERVER_RELAYS: usize = 8;

/// Serialized session data must fit in this many bytes.
pub const MAX_SESSION_DATA_SIZE: usize = 256;

/// Upper bound on any packet the backend reads or writes.
pub const MAX_PACKET_BYTES: usize = 4096;

/// Length of each rolling magic value.
pub const MAGIC_BYTES: usize = 8;

/// Route costs are clamped here before being stored in session data.
pub const MAX_ROUTE_COST: i32 = 10_000;

/// Cost value meaning "unreachable" in the cost matrix.
pub const UNREACHABLE_COST: u8 = 255;

/// Session data stream versions accepted on read, and the version written.
pub const SESSION_DATA_VERSION_MIN: u8 = 1;
pub const SESSION_DATA_VERSION_MAX: u8 = 1;
pub const SESSION_DATA_VERSION_WRITE: u8 = 1;

/// Route token plaintext and encrypted record sizes.
pub const ROUTE_TOKEN_BYTES: usize = 71;
pub const ENCRYPTED_ROUTE_TOKEN_BYTES: usize = 111;

/// Continue token plaintext and encrypted record sizes.
pub const CONTINUE_TOKEN_BYTES: usize = 17;
pub const ENCRYPTED_CONTINUE_TOKEN_BYTES: usize = 57;

/// Route type returned in the session update response.
pub const ROUTE_TYPE_DIRECT: u8 = 0;
pub const ROUTE_TYPE_NEW: u8 = 1;
pub const ROUTE_TYPE_CONTINUE: u8 = 2;

/// Session update packet types.
pub const SESSION_UPDATE_REQUEST_PACKET: u8 = 54;
pub const SESSION_UPDATE_RESPONSE_PACKET: u8 = 55;

/// Relay update wire versions.
pub const RELAY_UPDATE_REQUEST_VERSION: u8 = 1;
pub const RELAY_UPDATE_RESPONSE_VERSION: u8 = 1;

/// Relay updates older or newer than this many seconds are rejected.
pub const RELAY_UPDATE_TIMESTAMP_WINDOW: u64 = 10;

/// Client relay ping stats are saturated at these values by the SDK.
pub const MAX_RELAY_RTT: i32 = 255;
pub const MAX_RELAY_JITTER: i32 = 255;
pub const MAX_RELAY_PACKET_LOSS: f32 = 100.0;
