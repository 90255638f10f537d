//! # Fastlane Token Mint
//!
//! ## Purpose
//!
//! Route and continue tokens: per-hop encrypted records that authorize each
//! node in a relay chain to forward a session's packets. The backend mints
//! one token per node (client, each relay, server), each sealed under the
//! shared secret between the backend and that node. Relays verify and strip
//! their token; they never see anyone else's.
//!
//! ## Wire shape
//!
//! Every encrypted record is `nonce(24) || box(plaintext)`, where the box
//! adds a 16-byte MAC. A route token's plaintext is exactly
//! [`ROUTE_TOKEN_BYTES`] and a continue token's exactly
//! [`CONTINUE_TOKEN_BYTES`], giving the fixed record sizes the SDK and
//! relays rely on to slice the token region.

pub mod chain;
pub mod continue_token;
pub mod route_token;

pub use chain::*;
pub use continue_token::*;
pub use route_token::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token codec: {0}")]
    Codec(#[from] codec::CodecError),

    #[error("token crypto: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("token buffer too small: need {need} bytes, got {got}")]
    BufferTooSmall { need: usize, got: usize },
}

pub type TokenResult<T> = Result<T, TokenError>;
