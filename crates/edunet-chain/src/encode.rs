//! Wire codec helpers: little-endian integers and varint-prefixed bytes.
//!
//! The variable-length integer encoding:
//! - values below 0xFD: one byte
//! - 0xFD: followed by a u16 (little-endian)
//! - 0xFE: followed by a u32
//! - 0xFF: followed by a u64

use crate::{ChainError, ChainResult};
use edunet_crypto::Hash256;

/// Append a varint to `buf`.
pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xFD {
        buf.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        buf.push(0xFD);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= u64::from(u32::MAX) {
        buf.push(0xFE);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xFF);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Append a varint length prefix followed by the raw bytes.
pub fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Serialized length of a varint.
pub fn varint_len(n: u64) -> usize {
    if n < 0xFD {
        1
    } else if n <= u64::from(u16::MAX) {
        3
    } else if n <= u64::from(u32::MAX) {
        5
    } else {
        9
    }
}

/// A bounds-checked cursor over wire bytes. Every read fails with
/// `ChainError::Truncated` instead of panicking, so arbitrary input is safe
/// to feed through the parsers.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Wrap a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> ChainResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ChainError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> ChainResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian u16.
    pub fn read_u16_le(&mut self) -> ChainResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> ChainResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> ChainResult<u64> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    /// Read a varint.
    pub fn read_varint(&mut self) -> ChainResult<u64> {
        let tag = self.read_u8()?;
        match tag {
            0xFD => Ok(u64::from(self.read_u16_le()?)),
            0xFE => Ok(u64::from(self.read_u32_le()?)),
            0xFF => self.read_u64_le(),
            n => Ok(u64::from(n)),
        }
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> ChainResult<&'a [u8]> {
        self.take(n)
    }

    /// Read a varint length prefix and that many bytes. The declared length
    /// is checked against the remaining input before any allocation, so a
    /// hostile prefix cannot force a huge allocation.
    pub fn read_var_bytes(&mut self) -> ChainResult<Vec<u8>> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(ChainError::LengthOutOfRange(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Read a 32-byte hash.
    pub fn read_hash256(&mut self) -> ChainResult<Hash256> {
        let bytes = self.take(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Hash256::new(arr))
    }

    /// Fail with `TrailingBytes` unless the input is fully consumed.
    pub fn expect_end(&self) -> ChainResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ChainError::TrailingBytes(self.remaining()))
        }
    }
}
