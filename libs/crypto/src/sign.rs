//! Ed25519 detached signatures.

use crate::{CryptoError, CryptoResult, SIGN_PRIVATE_KEY_BYTES, SIGN_PUBLIC_KEY_BYTES, SIGN_SIGNATURE_BYTES};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Sign `data` with a 64-byte private key (seed || public), returning the
/// detached 64-byte signature.
pub fn sign(data: &[u8], private_key: &[u8]) -> CryptoResult<[u8; SIGN_SIGNATURE_BYTES]> {
    let key_bytes: &[u8; SIGN_PRIVATE_KEY_BYTES] =
        private_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey {
                which: "sign private",
                expected: SIGN_PRIVATE_KEY_BYTES,
                got: private_key.len(),
            })?;
    let signing_key = SigningKey::from_keypair_bytes(key_bytes)
        .map_err(|_| CryptoError::MalformedKey { which: "sign private" })?;
    Ok(signing_key.sign(data).to_bytes())
}

/// Verify a detached signature. Any malformed input verifies false.
pub fn verify(data: &[u8], public_key: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <&[u8; SIGN_PUBLIC_KEY_BYTES]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <&[u8; SIGN_SIGNATURE_BYTES]>::try_from(signature) else {
        return false;
    };
    verifying_key
        .verify(data, &Signature::from_bytes(sig_bytes))
        .is_ok()
}

/// Fresh signing keypair as (public, private) raw bytes.
pub fn generate_sign_keypair() -> ([u8; SIGN_PUBLIC_KEY_BYTES], [u8; SIGN_PRIVATE_KEY_BYTES]) {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    (
        signing_key.verifying_key().to_bytes(),
        signing_key.to_keypair_bytes(),
    )
}
