//! # Fastlane Binary Codec
//!
//! ## Purpose
//!
//! Bounds-checked little-endian read/write streams for every wire format in
//! the system: SDK packets, session data, tokens, relay updates, and the
//! persisted cost/route matrix and database snapshot files. All formats are
//! hand-laid-out; field order and width are protocol contracts, so nothing
//! here is derived.
//!
//! ## Design
//!
//! A `WriteStream` wraps a caller-supplied `&mut [u8]` and a `ReadStream`
//! wraps a `&[u8]`; both track an explicit offset and fail with a
//! `CodecError` naming the field that could not be read or written. The
//! error path is the only allocation either stream performs.

pub mod address;
pub mod error;
pub mod stream;

pub use address::*;
pub use error::{CodecError, CodecResult};
pub use stream::{ReadStream, WriteStream};
