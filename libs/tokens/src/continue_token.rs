//! Continue tokens: minimal records that extend the current route for one
//! more slice without re-announcing hops.

use crate::{TokenError, TokenResult};
use codec::{ReadStream, WriteStream};
use crypto::{TokenCipher, BOX_NONCE_BYTES};
use types::{CONTINUE_TOKEN_BYTES, ENCRYPTED_CONTINUE_TOKEN_BYTES};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinueToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

impl ContinueToken {
    pub fn write(&self, output: &mut [u8; CONTINUE_TOKEN_BYTES]) -> TokenResult<()> {
        let mut stream = WriteStream::new(output);
        stream.write_u64("expire timestamp", self.expire_timestamp)?;
        stream.write_u64("session id", self.session_id)?;
        stream.write_u8("session version", self.session_version)?;
        debug_assert_eq!(stream.bytes_processed(), CONTINUE_TOKEN_BYTES);
        Ok(())
    }

    pub fn read(data: &[u8]) -> TokenResult<Self> {
        let mut stream = ReadStream::new(data);
        Ok(Self {
            expire_timestamp: stream.read_u64("expire timestamp")?,
            session_id: stream.read_u64("session id")?,
            session_version: stream.read_u8("session version")?,
        })
    }

    pub fn encrypt(&self, cipher: &TokenCipher, output: &mut [u8]) -> TokenResult<()> {
        if output.len() < ENCRYPTED_CONTINUE_TOKEN_BYTES {
            return Err(TokenError::BufferTooSmall {
                need: ENCRYPTED_CONTINUE_TOKEN_BYTES,
                got: output.len(),
            });
        }
        let mut plaintext = [0u8; CONTINUE_TOKEN_BYTES];
        self.write(&mut plaintext)?;
        let nonce = crypto::generate_nonce();
        let sealed = cipher.encrypt(&nonce, &plaintext)?;
        output[..BOX_NONCE_BYTES].copy_from_slice(&nonce);
        output[BOX_NONCE_BYTES..ENCRYPTED_CONTINUE_TOKEN_BYTES].copy_from_slice(&sealed);
        Ok(())
    }

    pub fn decrypt(cipher: &TokenCipher, data: &[u8]) -> TokenResult<Self> {
        if data.len() < ENCRYPTED_CONTINUE_TOKEN_BYTES {
            return Err(TokenError::BufferTooSmall {
                need: ENCRYPTED_CONTINUE_TOKEN_BYTES,
                got: data.len(),
            });
        }
        let nonce = &data[..BOX_NONCE_BYTES];
        let sealed = &data[BOX_NONCE_BYTES..ENCRYPTED_CONTINUE_TOKEN_BYTES];
        let plaintext = cipher.decrypt(nonce, sealed)?;
        Self::read(&plaintext)
    }
}
