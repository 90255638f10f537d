//! # Fastlane Crypto
//!
//! Thin, size-checked wrappers over the two primitives the control plane
//! uses: Ed25519 detached signatures (buyer/backend packet signing, session
//! data signing) and the NaCl box construction (X25519 + XSalsa20-Poly1305)
//! for relay-backend payload encryption and per-hop token encryption.
//!
//! All keys are raw material: base64 in the environment, fixed-width byte
//! arrays everywhere else. There is no certificate machinery.

pub mod keys;
pub mod sealed;
pub mod sign;

pub use keys::*;
pub use sealed::*;
pub use sign::*;

use thiserror::Error;

pub const SIGN_SIGNATURE_BYTES: usize = 64;
pub const SIGN_PUBLIC_KEY_BYTES: usize = 32;
pub const SIGN_PRIVATE_KEY_BYTES: usize = 64;

pub const BOX_PUBLIC_KEY_BYTES: usize = 32;
pub const BOX_PRIVATE_KEY_BYTES: usize = 32;
pub const BOX_MAC_BYTES: usize = 16;
pub const BOX_NONCE_BYTES: usize = 24;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid {which} key: expected {expected} bytes, got {got}")]
    InvalidKey {
        which: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("malformed {which} key")]
    MalformedKey { which: &'static str },

    #[error("box decrypt failed")]
    DecryptFailed,

    #[error("box encrypt failed")]
    EncryptFailed,

    #[error("base64 decode failed for {which}: {source}")]
    Base64 {
        which: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

pub type CryptoResult<T> = Result<T, CryptoError>;
