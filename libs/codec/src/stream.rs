//! Offset-tracking read/write streams over caller buffers.

use crate::error::{CodecError, CodecResult};

/// Little-endian writer over a caller-supplied buffer.
pub struct WriteStream<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> WriteStream<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes written so far.
    pub fn bytes_processed(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn reserve(&mut self, field: &'static str, need: usize) -> CodecResult<&mut [u8]> {
        let remaining = self.remaining();
        if remaining < need {
            return Err(CodecError::ShortWrite {
                field,
                need,
                remaining,
            });
        }
        let start = self.offset;
        self.offset += need;
        Ok(&mut self.buf[start..start + need])
    }

    pub fn write_u8(&mut self, field: &'static str, value: u8) -> CodecResult<()> {
        self.reserve(field, 1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, field: &'static str, value: u16) -> CodecResult<()> {
        self.reserve(field, 2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, field: &'static str, value: u32) -> CodecResult<()> {
        self.reserve(field, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_u64(&mut self, field: &'static str, value: u64) -> CodecResult<()> {
        self.reserve(field, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, field: &'static str, value: i32) -> CodecResult<()> {
        self.reserve(field, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_f32(&mut self, field: &'static str, value: f32) -> CodecResult<()> {
        self.reserve(field, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_bool(&mut self, field: &'static str, value: bool) -> CodecResult<()> {
        self.write_u8(field, value as u8)
    }

    pub fn write_bytes(&mut self, field: &'static str, value: &[u8]) -> CodecResult<()> {
        self.reserve(field, value.len())?.copy_from_slice(value);
        Ok(())
    }

    /// u32 length prefix followed by the raw bytes.
    pub fn write_byte_vec(&mut self, field: &'static str, value: &[u8]) -> CodecResult<()> {
        self.write_u32(field, value.len() as u32)?;
        self.write_bytes(field, value)
    }

    /// u32 length prefix followed by UTF-8 bytes.
    pub fn write_string(&mut self, field: &'static str, value: &str) -> CodecResult<()> {
        self.write_byte_vec(field, value.as_bytes())
    }
}

/// Little-endian reader over a byte slice.
pub struct ReadStream<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ReadStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn bytes_processed(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, field: &'static str, need: usize) -> CodecResult<&'a [u8]> {
        let remaining = self.remaining();
        if remaining < need {
            return Err(CodecError::ShortRead {
                field,
                need,
                remaining,
            });
        }
        let start = self.offset;
        self.offset += need;
        Ok(&self.buf[start..start + need])
    }

    pub fn read_u8(&mut self, field: &'static str) -> CodecResult<u8> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> CodecResult<u16> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self, field: &'static str) -> CodecResult<u32> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self, field: &'static str) -> CodecResult<u64> {
        let bytes = self.take(field, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_i32(&mut self, field: &'static str) -> CodecResult<i32> {
        let bytes = self.take(field, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f32(&mut self, field: &'static str) -> CodecResult<f32> {
        let bytes = self.take(field, 4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bool(&mut self, field: &'static str) -> CodecResult<bool> {
        Ok(self.read_u8(field)? != 0)
    }

    pub fn read_bytes(&mut self, field: &'static str, dest: &mut [u8]) -> CodecResult<()> {
        let bytes = self.take(field, dest.len())?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    /// u32 length prefix followed by the raw bytes, bounded by `limit`.
    pub fn read_byte_vec(&mut self, field: &'static str, limit: usize) -> CodecResult<Vec<u8>> {
        let len = self.read_u32(field)? as usize;
        if len > limit {
            return Err(CodecError::LengthOverflow {
                field,
                got: len,
                limit,
            });
        }
        Ok(self.take(field, len)?.to_vec())
    }

    /// u32 length prefix followed by UTF-8 bytes, bounded by `limit`.
    pub fn read_string(&mut self, field: &'static str, limit: usize) -> CodecResult<String> {
        let bytes = self.read_byte_vec(field, limit)?;
        String::from_utf8(bytes).map_err(|e| CodecError::InvalidValue {
            field,
            value: e.utf8_error().valid_up_to() as u64,
        })
    }
}
