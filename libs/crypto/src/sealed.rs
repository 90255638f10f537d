//! NaCl box encryption.
//!
//! Two call shapes cover every use in the system:
//!
//! * [`box_decrypt`] / [`box_encrypt`]: one-shot, used by the relay gateway
//!   on inbound relay updates (and by tests building them).
//! * [`TokenCipher`]: a precomputed box for one (backend key, node key)
//!   pair, reused across every hop token minted for that node. The
//!   precomputation is what the database snapshot stores per relay.
//!
//! Ciphertext layout is always `plaintext || 16-byte MAC`; the 24-byte nonce
//! travels separately (trailing on the relay update wire, leading inside
//! token records).

use crate::{CryptoError, CryptoResult, BOX_MAC_BYTES, BOX_NONCE_BYTES, BOX_PRIVATE_KEY_BYTES, BOX_PUBLIC_KEY_BYTES};
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};

fn public_key(bytes: &[u8], which: &'static str) -> CryptoResult<PublicKey> {
    let raw: [u8; BOX_PUBLIC_KEY_BYTES] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
        which,
        expected: BOX_PUBLIC_KEY_BYTES,
        got: bytes.len(),
    })?;
    Ok(PublicKey::from(raw))
}

fn secret_key(bytes: &[u8], which: &'static str) -> CryptoResult<SecretKey> {
    let raw: [u8; BOX_PRIVATE_KEY_BYTES] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
        which,
        expected: BOX_PRIVATE_KEY_BYTES,
        got: bytes.len(),
    })?;
    Ok(SecretKey::from(raw))
}

fn nonce(bytes: &[u8]) -> CryptoResult<Nonce> {
    let raw: [u8; BOX_NONCE_BYTES] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
        which: "nonce",
        expected: BOX_NONCE_BYTES,
        got: bytes.len(),
    })?;
    Ok(Nonce::from(raw))
}

/// Decrypt `ciphertext || MAC` produced by the peer for us.
pub fn box_decrypt(
    peer_public: &[u8],
    own_private: &[u8],
    nonce_bytes: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < BOX_MAC_BYTES {
        return Err(CryptoError::DecryptFailed);
    }
    let sealed = SalsaBox::new(
        &public_key(peer_public, "box public")?,
        &secret_key(own_private, "box private")?,
    );
    sealed
        .decrypt(&nonce(nonce_bytes)?, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Encrypt for the peer, returning `ciphertext || MAC`.
pub fn box_encrypt(
    peer_public: &[u8],
    own_private: &[u8],
    nonce_bytes: &[u8],
    plaintext: &[u8],
) -> CryptoResult<Vec<u8>> {
    let sealed = SalsaBox::new(
        &public_key(peer_public, "box public")?,
        &secret_key(own_private, "box private")?,
    );
    sealed
        .encrypt(&nonce(nonce_bytes)?, plaintext)
        .map_err(|_| CryptoError::EncryptFailed)
}

/// Fresh random nonce.
pub fn generate_nonce() -> [u8; BOX_NONCE_BYTES] {
    SalsaBox::generate_nonce(&mut OsRng).into()
}

/// Fresh box keypair as (public, private) raw bytes.
pub fn generate_box_keypair() -> ([u8; BOX_PUBLIC_KEY_BYTES], [u8; BOX_PRIVATE_KEY_BYTES]) {
    let secret = SecretKey::generate(&mut OsRng);
    (secret.public_key().to_bytes(), secret.to_bytes())
}

/// Precomputed box for one node, reused across token mints.
///
/// The box construction is symmetric: the cipher built from
/// (backend private, node public) opens what the node seals with
/// (node private, backend public), and vice versa.
pub struct TokenCipher {
    sealed: SalsaBox,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    pub fn new(own_private: &[u8], peer_public: &[u8]) -> CryptoResult<Self> {
        Ok(Self {
            sealed: SalsaBox::new(
                &public_key(peer_public, "box public")?,
                &secret_key(own_private, "box private")?,
            ),
        })
    }

    pub fn encrypt(&self, nonce_bytes: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.sealed
            .encrypt(&nonce(nonce_bytes)?, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)
    }

    pub fn decrypt(&self, nonce_bytes: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.sealed
            .decrypt(&nonce(nonce_bytes)?, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_round_trip() {
        let (relay_public, relay_private) = generate_box_keypair();
        let (backend_public, backend_private) = generate_box_keypair();
        let nonce = generate_nonce();

        let sealed = box_encrypt(&backend_public, &relay_private, &nonce, b"relay update").unwrap();
        assert_eq!(sealed.len(), b"relay update".len() + BOX_MAC_BYTES);

        let opened = box_decrypt(&relay_public, &backend_private, &nonce, &sealed).unwrap();
        assert_eq!(opened, b"relay update");
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let (_, relay_private) = generate_box_keypair();
        let (backend_public, _) = generate_box_keypair();
        let (other_public, other_private) = generate_box_keypair();
        let nonce = generate_nonce();

        let sealed = box_encrypt(&backend_public, &relay_private, &nonce, b"payload").unwrap();
        assert!(box_decrypt(&other_public, &other_private, &nonce, &sealed).is_err());
    }

    #[test]
    fn token_cipher_is_symmetric() {
        let (node_public, node_private) = generate_box_keypair();
        let (backend_public, backend_private) = generate_box_keypair();
        let nonce = generate_nonce();

        let backend_side = TokenCipher::new(&backend_private, &node_public).unwrap();
        let node_side = TokenCipher::new(&node_private, &backend_public).unwrap();

        let sealed = backend_side.encrypt(&nonce, b"route token").unwrap();
        assert_eq!(node_side.decrypt(&nonce, &sealed).unwrap(), b"route token");
    }
}
