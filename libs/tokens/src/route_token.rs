//! Route tokens: full per-hop records minted when a session takes a new
//! route.

use crate::{TokenError, TokenResult};
use codec::{read_address_fixed, write_address_fixed, ReadStream, WriteStream};
use crypto::{TokenCipher, BOX_NONCE_BYTES};
use std::net::SocketAddr;
use types::{ENCRYPTED_ROUTE_TOKEN_BYTES, ROUTE_TOKEN_BYTES};

const FLAG_PREV_INTERNAL: u8 = 1 << 0;
const FLAG_NEXT_INTERNAL: u8 = 1 << 1;
const FLAG_NEXT_SAME_GROUP: u8 = 1 << 2;

const RESERVED_BYTES: usize = 7;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub envelope_up_kbps: u32,
    pub envelope_down_kbps: u32,
    /// The previous hop reaches this node over internal addressing.
    pub prev_internal: bool,
    /// This node reaches the next hop over internal addressing.
    pub next_internal: bool,
    /// The next hop shares this node's internal group.
    pub next_same_group: bool,
    pub prev_address: Option<SocketAddr>,
    pub next_address: Option<SocketAddr>,
}

impl RouteToken {
    pub fn write(&self, output: &mut [u8; ROUTE_TOKEN_BYTES]) -> TokenResult<()> {
        let mut stream = WriteStream::new(output);
        let mut flags = 0u8;
        if self.prev_internal {
            flags |= FLAG_PREV_INTERNAL;
        }
        if self.next_internal {
            flags |= FLAG_NEXT_INTERNAL;
        }
        if self.next_same_group {
            flags |= FLAG_NEXT_SAME_GROUP;
        }
        stream.write_u8("token flags", flags)?;
        stream.write_u64("expire timestamp", self.expire_timestamp)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u8("session version", self.session_version)?;
        stream.write_u32("envelope up kbps", self.envelope_up_kbps)?;
        stream.write_u32("envelope down kbps", self.envelope_down_kbps)?;
        write_address_fixed(&mut stream, self.prev_address)?;
        write_address_fixed(&mut stream, self.next_address)?;
        stream.write_bytes("reserved", &[0u8; RESERVED_BYTES])?;
        debug_assert_eq!(stream.bytes_processed(), ROUTE_TOKEN_BYTES);
        Ok(())
    }

    pub fn read(data: &[u8]) -> TokenResult<Self> {
        let mut stream = ReadStream::new(data);
        let flags = stream.read_u8("token flags")?;
        let token = Self {
            expire_timestamp: stream.read_u64("expire timestamp")?,
            session_id: stream.read_u64("session id")?,
            session_version: stream.read_u8("session version")?,
            envelope_up_kbps: stream.read_u32("envelope up kbps")?,
            envelope_down_kbps: stream.read_u32("envelope down kbps")?,
            prev_internal: flags & FLAG_PREV_INTERNAL != 0,
            next_internal: flags & FLAG_NEXT_INTERNAL != 0,
            next_same_group: flags & FLAG_NEXT_SAME_GROUP != 0,
            prev_address: read_address_fixed(&mut stream)?,
            next_address: read_address_fixed(&mut stream)?,
        };
        let mut reserved = [0u8; RESERVED_BYTES];
        stream.read_bytes("reserved", &mut reserved)?;
        Ok(token)
    }

    /// Seal into `nonce || box(plaintext)`, exactly
    /// [`ENCRYPTED_ROUTE_TOKEN_BYTES`] bytes.
    pub fn encrypt(&self, cipher: &TokenCipher, output: &mut [u8]) -> TokenResult<()> {
        if output.len() < ENCRYPTED_ROUTE_TOKEN_BYTES {
            return Err(TokenError::BufferTooSmall {
                need: ENCRYPTED_ROUTE_TOKEN_BYTES,
                got: output.len(),
            });
        }
        let mut plaintext = [0u8; ROUTE_TOKEN_BYTES];
        self.write(&mut plaintext)?;
        let nonce = crypto::generate_nonce();
        let sealed = cipher.encrypt(&nonce, &plaintext)?;
        output[..BOX_NONCE_BYTES].copy_from_slice(&nonce);
        output[BOX_NONCE_BYTES..ENCRYPTED_ROUTE_TOKEN_BYTES].copy_from_slice(&sealed);
        Ok(())
    }

    pub fn decrypt(cipher: &TokenCipher, data: &[u8]) -> TokenResult<Self> {
        if data.len() < ENCRYPTED_ROUTE_TOKEN_BYTES {
            return Err(TokenError::BufferTooSmall {
                need: ENCRYPTED_ROUTE_TOKEN_BYTES,
                got: data.len(),
            });
        }
        let nonce = &data[..BOX_NONCE_BYTES];
        let sealed = &data[BOX_NONCE_BYTES..ENCRYPTED_ROUTE_TOKEN_BYTES];
        let plaintext = cipher.decrypt(nonce, sealed)?;
        Self::read(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> RouteToken {
        RouteToken {
            expire_timestamp: 1_700_000_021,
            session_id: 0xABCDEF0123456789,
            session_version: 3,
            envelope_up_kbps: 1024,
            envelope_down_kbps: 2048,
            prev_internal: false,
            next_internal: true,
            next_same_group: true,
            prev_address: Some("10.0.0.1:0".parse().unwrap()),
            next_address: Some("192.168.1.2:40000".parse().unwrap()),
        }
    }

    #[test]
    fn plaintext_is_exactly_sized() {
        let mut output = [0u8; ROUTE_TOKEN_BYTES];
        sample_token().write(&mut output).unwrap();
        assert_eq!(RouteToken::read(&output).unwrap(), sample_token());
    }

    #[test]
    fn encrypted_record_is_exactly_sized() {
        let (_, backend_private) = crypto::generate_box_keypair();
        let (relay_public, _) = crypto::generate_box_keypair();
        let cipher = TokenCipher::new(&backend_private, &relay_public).unwrap();

        let mut record = [0u8; ENCRYPTED_ROUTE_TOKEN_BYTES];
        sample_token().encrypt(&cipher, &mut record).unwrap();
        assert_eq!(RouteToken::decrypt(&cipher, &record).unwrap(), sample_token());
    }

    #[test]
    fn decrypt_rejects_wrong_cipher() {
        let (_, backend_private) = crypto::generate_box_keypair();
        let (relay_public, _) = crypto::generate_box_keypair();
        let cipher = TokenCipher::new(&backend_private, &relay_public).unwrap();

        let mut record = [0u8; ENCRYPTED_ROUTE_TOKEN_BYTES];
        sample_token().encrypt(&cipher, &mut record).unwrap();

        let (other_public, _) = crypto::generate_box_keypair();
        let wrong = TokenCipher::new(&backend_private, &other_public).unwrap();
        assert!(RouteToken::decrypt(&wrong, &record).is_err());
    }
}
