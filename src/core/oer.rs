//! OER (Octet Encoding Rules) primitives shared by the BTP frame and ILP packet codecs.
//!
//! Only the subset used by BTP 2.0 and ILPv4 is implemented:
//! fixed-width big-endian integers, length determinants, variable-length
//! octet strings and variable-length unsigned integers.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{constants, PluginError, Result};

/// Largest length prefix accepted when decoding (bytes of the length itself).
const MAX_LENGTH_OF_LENGTH: usize = 8;

/// Write an OER length determinant.
pub fn write_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let be = (len as u64).to_be_bytes();
    let skip = be.iter().take_while(|b| **b == 0).count();
    buf.put_u8(0x80 | (be.len() - skip) as u8);
    buf.put_slice(&be[skip..]);
}

/// Write a length-prefixed octet string.
pub fn write_var_octet_string(buf: &mut BytesMut, data: &[u8]) {
    write_length(buf, data.len());
    buf.put_slice(data);
}

/// Write a variable-length unsigned integer (minimal big-endian, length-prefixed).
pub fn write_var_uint(buf: &mut BytesMut, value: u64) {
    let be = value.to_be_bytes();
    let skip = be.iter().take_while(|b| **b == 0).count().min(be.len() - 1);
    write_var_octet_string(buf, &be[skip..]);
}

/// Cursor over an encoded buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(PluginError::DeserializeError(
                constants::ERR_UNEXPECTED_EOF.into(),
            ));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    /// Read exactly `n` bytes.
    pub fn read_fixed(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_length(&mut self) -> Result<usize> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let len_of_len = (first & 0x7F) as usize;
        if len_of_len == 0 {
            return Err(PluginError::DeserializeError(
                constants::ERR_INVALID_LENGTH_PREFIX.into(),
            ));
        }
        if len_of_len > MAX_LENGTH_OF_LENGTH {
            return Err(PluginError::DeserializeError(
                constants::ERR_LENGTH_OVERFLOW.into(),
            ));
        }

        let mut len: u64 = 0;
        for b in self.read_fixed(len_of_len)? {
            len = (len << 8) | u64::from(*b);
        }
        usize::try_from(len)
            .map_err(|_| PluginError::DeserializeError(constants::ERR_LENGTH_OVERFLOW.into()))
    }

    pub fn read_var_octet_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_length()?;
        self.read_fixed(len)
    }

    pub fn read_var_string(&mut self) -> Result<String> {
        let raw = self.read_var_octet_string()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| PluginError::DeserializeError(constants::ERR_INVALID_UTF8.into()))
    }

    pub fn read_var_uint(&mut self) -> Result<u64> {
        let raw = self.read_var_octet_string()?;
        if raw.is_empty() || raw.len() > 8 {
            return Err(PluginError::DeserializeError(
                constants::ERR_INVALID_VAR_UINT.into(),
            ));
        }
        Ok(raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Fail if any input is left over.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(PluginError::DeserializeError(
                constants::ERR_TRAILING_BYTES.into(),
            ));
        }
        Ok(())
    }
}
