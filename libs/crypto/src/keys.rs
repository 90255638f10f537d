//! Key material decoding.

use crate::{CryptoError, CryptoResult};
use base64::Engine;

/// Decode a base64 key and enforce its width.
pub fn decode_key(which: &'static str, encoded: &str, expected: usize) -> CryptoResult<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|source| CryptoError::Base64 { which, source })?;
    if bytes.len() != expected {
        return Err(CryptoError::InvalidKey {
            which,
            expected,
            got: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Encode key material for the environment.
pub fn encode_key(key: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_box_keypair, BOX_PUBLIC_KEY_BYTES};

    #[test]
    fn decode_round_trip() {
        let (public, _) = generate_box_keypair();
        let encoded = encode_key(&public);
        let decoded = decode_key("box public", &encoded, BOX_PUBLIC_KEY_BYTES).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn wrong_width_rejected() {
        let encoded = encode_key(&[0u8; 16]);
        assert!(matches!(
            decode_key("box public", &encoded, BOX_PUBLIC_KEY_BYTES).unwrap_err(),
            CryptoError::InvalidKey { got: 16, .. }
        ));
    }
}
