//! # Fastlane Session Update Pipeline
//!
//! ## Purpose
//!
//! The per-slice decision engine. Every ten seconds each connected player's
//! game server sends a signed `SessionUpdateRequest`; this crate verifies
//! it, reconciles the session state the SDK carried up, decides direct vs.
//! accelerated against the published route matrix, mints tokens for chosen
//! relay chains, and produces the signed response plus the portal/analytics
//! messages that describe what happened.
//!
//! ## Shape
//!
//! * [`data`]: the signed, versioned session state round-tripped through
//!   the SDK (≤ 256 bytes on the wire).
//! * [`packets`]: SDK packet framing and the request/response packets.
//! * [`state`]: the per-request state aggregate threaded through stages.
//! * [`pipeline`]: the stages themselves.
//! * [`emit`]: portal/analytics message emission.
//!
//! A session update owns all its state on the stack; the only shared data
//! it touches are the immutable database snapshot and route matrix handles
//! it was given, and the bounded sink channels it emits into. Channel sends
//! block when a sink is saturated; back-pressure is the contract, dropped
//! messages are not.

pub mod data;
pub mod emit;
pub mod packets;
pub mod pipeline;
pub mod state;

pub use data::SessionData;
pub use packets::*;
pub use pipeline::session_update;
pub use state::{BackendConfig, SessionSinks, SessionUpdateState};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session codec: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("session crypto: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("session token: {0}")]
    Token(#[from] tokens::TokenError),

    #[error("packet too small: {got} bytes")]
    PacketTooSmall { got: usize },

    #[error("bad packet header hash")]
    BadHeaderHash,

    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
}

pub type SessionResult<T> = Result<T, SessionError>;
