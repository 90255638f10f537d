//! # Fastlane Database Snapshot
//!
//! ## Purpose
//!
//! Read-only in-memory view of the control-plane configuration: buyers,
//! sellers, datacenters, relays, route shaders, and buyer↔datacenter
//! enablement. A snapshot is produced from PostgreSQL by the admin surface,
//! persisted as a versioned binary file, and loaded whole at service start
//! or on a reload tick.
//!
//! ## Contract
//!
//! Loads validate referential integrity and fail hard; lookups never fail at
//! request time; a missing key is a typed "not found", not an error. After
//! publication a snapshot is immutable; services hot-swap whole snapshots by
//! atomic pointer swap.

pub mod model;
pub mod snapshot;

pub use model::*;
pub use snapshot::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database codec: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("database integrity: {0}")]
    Integrity(String),

    #[error("database io: {0}")]
    Io(#[from] std::io::Error),

    #[error("database crypto: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
