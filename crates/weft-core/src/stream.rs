//! Byte buffers for the wire codec
//!
//! [`MessageStream`] is the write side: a growable buffer that appends
//! little-endian fixed-width values, length varints and UTF-8 strings.
//! [`StreamReader`] is the read side over a borrowed byte slice; every read
//! checks the remaining length first and fails with [`Error::EndOfStream`].
//!
//! Length varint:
//! ```text
//! 300 = 0b1_0010_1100 -> [0xAC, 0x02]
//!        low 7 bits first, high bit set on every group but the last,
//!        at most five groups (35 payload bits, must fit a u32)
//! ```

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Initial capacity of a fresh stream
pub const DEFAULT_CAPACITY: usize = 32;

/// Maximum number of 7-bit groups in a length prefix
pub const MAX_LENGTH_GROUPS: usize = 5;

macro_rules! write_fixed {
    ($($name:ident, $ty:ty, $put:ident;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self, value: $ty) {
                self.reserve(std::mem::size_of::<$ty>());
                self.buf.$put(value);
            }
        )*
    };
}

macro_rules! read_fixed {
    ($($name:ident, $ty:ty, $get:ident;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self) -> Result<$ty> {
                self.need(std::mem::size_of::<$ty>())?;
                Ok(self.buf.$get())
            }
        )*
    };
}

/// Growable output buffer
#[derive(Debug, Clone, Default)]
pub struct MessageStream {
    buf: BytesMut,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Reader over the written bytes
    pub fn reader(&self) -> StreamReader<'_> {
        StreamReader::new(&self.buf)
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Make room for `additional` bytes, at least doubling the capacity
    /// whenever the buffer has to grow.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.buf.len().saturating_add(additional);
        let capacity = self.buf.capacity();
        if needed > capacity {
            let target = capacity.saturating_mul(2).max(needed);
            self.buf.reserve(target - self.buf.len());
        }
    }

    write_fixed! {
        write_u8, u8, put_u8;
        write_i8, i8, put_i8;
        write_u16, u16, put_u16_le;
        write_i16, i16, put_i16_le;
        write_u32, u32, put_u32_le;
        write_i32, i32, put_i32_le;
        write_u64, u64, put_u64_le;
        write_i64, i64, put_i64_le;
        write_f32, f32, put_f32_le;
        write_f64, f64, put_f64_le;
    }

    /// One byte, 0 or 1
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.reserve(data.len());
        self.buf.extend_from_slice(data);
    }

    /// Append a length varint
    pub fn write_length(&mut self, mut value: u32) {
        self.reserve(MAX_LENGTH_GROUPS);
        loop {
            let mut group = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                group |= 0x80;
            }
            self.buf.put_u8(group);
            if value == 0 {
                break;
            }
        }
    }

    /// Append a container or string length
    pub fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::LengthOverflow(len as u64))?;
        self.write_length(len);
        Ok(())
    }

    /// Length-prefixed UTF-8
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_len(value.len())?;
        self.write_bytes(value.as_bytes());
        Ok(())
    }
}

impl AsRef<[u8]> for MessageStream {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor over encoded bytes
#[derive(Debug, Clone)]
pub struct StreamReader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.total - self.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.buf.is_empty()
    }

    /// Fail unless at least `needed` bytes remain
    #[inline]
    pub fn need(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            return Err(Error::EndOfStream {
                needed,
                have: self.buf.len(),
            });
        }
        Ok(())
    }

    read_fixed! {
        read_u8, u8, get_u8;
        read_i8, i8, get_i8;
        read_u16, u16, get_u16_le;
        read_i16, i16, get_i16_le;
        read_u32, u32, get_u32_le;
        read_i32, i32, get_i32_le;
        read_u64, u64, get_u64_le;
        read_i64, i64, get_i64_le;
        read_f32, f32, get_f32_le;
        read_f64, f64, get_f64_le;
    }

    /// Any non-zero byte reads as true
    #[inline]
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a length varint
    pub fn read_length(&mut self) -> Result<u32> {
        let mut value: u64 = 0;
        for index in 0..MAX_LENGTH_GROUPS {
            let group = self.read_u8()?;
            value |= u64::from(group & 0x7f) << (7 * index);
            if group & 0x80 == 0 {
                return u32::try_from(value).map_err(|_| Error::LengthOverflow(value));
            }
        }
        Err(Error::UnterminatedLength)
    }

    /// Read a length varint as a size
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_length()?;
        usize::try_from(len).map_err(|_| Error::LengthOverflow(u64::from(len)))
    }

    /// Length-prefixed UTF-8
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8)
    }
}
