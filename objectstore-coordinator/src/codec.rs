//! Bounds-checked byte cursors shared by every message and operation codec.
//!
//! All integers are little-endian. Variable-length fields are a `u32` length
//! followed by the raw bytes. A read or write that would overrun fails with a
//! [`CodecError`] and leaves the cursor where it was.

use thiserror::Error;

/// Encoding or decoding failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("buffer overflow: writing {needed} bytes with {remaining} of {limit} remaining")]
    Overflow {
        needed: usize,
        remaining: usize,
        limit: usize,
    },

    #[error("{field} is {len} bytes, limit is {limit}")]
    TooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("bad magic byte {0:#04x}")]
    BadMagic(u8),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("unknown operation type {0}")]
    UnknownOperationType(u8),

    #[error("unknown data type {0}")]
    UnknownDataType(u8),

    #[error("declared size {declared} does not match actual size {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("invalid {0}")]
    InvalidField(&'static str),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Encoded size of a length-prefixed field.
pub const fn prefixed_len(len: usize) -> usize {
    4 + len
}

/// Reading cursor over a borrowed buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Takes the next `len` bytes.
    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads a length-prefixed byte field of at most `limit` bytes.
    pub fn read_bytes(&mut self, field: &'static str, limit: usize) -> Result<Vec<u8>, CodecError> {
        let start = self.pos;
        let result = self.read_u32().and_then(|len| {
            let len = len as usize;
            if len > limit {
                return Err(CodecError::TooLong { field, len, limit });
            }
            self.read_exact(len).map(<[u8]>::to_vec)
        });
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Reads a length-prefixed UTF-8 string of at most `limit` bytes.
    pub fn read_string(&mut self, field: &'static str, limit: usize) -> Result<String, CodecError> {
        let start = self.pos;
        let bytes = self.read_bytes(field, limit)?;
        String::from_utf8(bytes).map_err(|_| {
            self.pos = start;
            CodecError::InvalidField(field)
        })
    }

    /// Fails if any input is left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// Writing cursor with a fixed capacity.
#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl ByteWriter {
    /// Creates a writer that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    fn reserve(&self, needed: usize) -> Result<(), CodecError> {
        if needed > self.remaining() {
            return Err(CodecError::Overflow {
                needed,
                remaining: self.remaining(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_raw(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_raw(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Writes a length-prefixed byte field of at most `limit` bytes.
    pub fn write_bytes(
        &mut self,
        field: &'static str,
        bytes: &[u8],
        limit: usize,
    ) -> Result<(), CodecError> {
        if bytes.len() > limit || u32::try_from(bytes.len()).is_err() {
            return Err(CodecError::TooLong {
                field,
                len: bytes.len(),
                limit,
            });
        }
        self.reserve(prefixed_len(bytes.len()))?;
        self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
