//! Session error bitmask.
//!
//! Errors accumulate into a `u64` carried in session data for the life of the
//! session and are surfaced once in the session summary. Request-local
//! failures set a bit and the slice responds direct; they are the common case
//! and are never logged at error level.

pub const SESSION_ERROR_SIGNATURE_CHECK_FAILED: u64 = 1 << 0;
pub const SESSION_ERROR_FAILED_TO_READ_SESSION_DATA: u64 = 1 << 1;
pub const SESSION_ERROR_FALLBACK_TO_DIRECT: u64 = 1 << 2;
pub const SESSION_ERROR_STALE_ROUTE_MATRIX: u64 = 1 << 3;
pub const SESSION_ERROR_UNKNOWN_DATACENTER: u64 = 1 << 4;
pub const SESSION_ERROR_DATACENTER_NOT_ENABLED: u64 = 1 << 5;
pub const SESSION_ERROR_NO_RELAYS_IN_DATACENTER: u64 = 1 << 6;
pub const SESSION_ERROR_BAD_SESSION_ID: u64 = 1 << 7;
pub const SESSION_ERROR_BAD_SLICE_NUMBER: u64 = 1 << 8;
pub const SESSION_ERROR_NO_ROUTE_RELAYS: u64 = 1 << 9;
pub const SESSION_ERROR_ROUTE_RELAY_NO_LONGER_EXISTS: u64 = 1 << 10;
pub const SESSION_ERROR_ROUTE_NO_LONGER_EXISTS: u64 = 1 << 11;
pub const SESSION_ERROR_ABORTED: u64 = 1 << 12;
pub const SESSION_ERROR_FAILED_TO_WRITE_SESSION_DATA: u64 = 1 << 13;
pub const SESSION_ERROR_FAILED_TO_WRITE_RESPONSE_PACKET: u64 = 1 << 14;

/// Stable metric label for each error bit.
pub fn session_error_name(bit: u64) -> &'static str {
    match bit {
        SESSION_ERROR_SIGNATURE_CHECK_FAILED => "session_data_signature_check_failed",
        SESSION_ERROR_FAILED_TO_READ_SESSION_DATA => "failed_to_read_session_data",
        SESSION_ERROR_FALLBACK_TO_DIRECT => "fallback_to_direct",
        SESSION_ERROR_STALE_ROUTE_MATRIX => "stale_route_matrix",
        SESSION_ERROR_UNKNOWN_DATACENTER => "unknown_datacenter",
        SESSION_ERROR_DATACENTER_NOT_ENABLED => "datacenter_not_enabled",
        SESSION_ERROR_NO_RELAYS_IN_DATACENTER => "no_relays_in_datacenter",
        SESSION_ERROR_BAD_SESSION_ID => "bad_session_id",
        SESSION_ERROR_BAD_SLICE_NUMBER => "bad_slice_number",
        SESSION_ERROR_NO_ROUTE_RELAYS => "no_route_relays",
        SESSION_ERROR_ROUTE_RELAY_NO_LONGER_EXISTS => "route_relay_no_longer_exists",
        SESSION_ERROR_ROUTE_NO_LONGER_EXISTS => "route_no_longer_exists",
        SESSION_ERROR_ABORTED => "aborted",
        SESSION_ERROR_FAILED_TO_WRITE_SESSION_DATA => "failed_to_write_session_data",
        SESSION_ERROR_FAILED_TO_WRITE_RESPONSE_PACKET => "failed_to_write_response_packet",
        _ => "unknown",
    }
}

/// Iterate the bits set in an error mask.
pub fn session_error_bits(mask: u64) -> impl Iterator<Item = u64> {
    (0..15u32).map(|i| 1u64 << i).filter(move |bit| mask & bit != 0)
}
