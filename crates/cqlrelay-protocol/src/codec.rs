// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Primitive wire encoders and decoders.
//!
//! Everything on the wire is big-endian. Strings ("P16" strings) carry a
//! 2-byte length prefix followed by UTF-8 bytes; binary blobs carry a
//! 4-byte length prefix followed by raw bytes.
//!
//! [`Reader`] borrows the source buffer for the duration of a decode and
//! copies variable-length data into owned values before returning, so no
//! reference into the input survives the call.

use bytes::BufMut;
use thiserror::Error;

/// Maximum length of a P16 string (2-byte length prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated payload: {field} needs {needed} more byte(s)")]
    Truncated { field: &'static str, needed: usize },

    #[error("string too long: {0} bytes (max: {MAX_STRING_LEN})")]
    StringTooLong(usize),

    #[error("too many {what}: {count} (max: 65535)")]
    TooMany { what: &'static str, count: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("invalid order kind: {0}")]
    InvalidKind(u16),

    #[error("invalid consistency level: {0}")]
    InvalidConsistency(i8),

    #[error("{0} trailing byte(s) after payload")]
    TrailingBytes(usize),
}

/// Bounds-checked cursor over a borrowed payload.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated {
                field,
                needed: n - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn get_i8(&mut self, field: &'static str) -> Result<i8, CodecError> {
        Ok(self.take(1, field)?[0] as i8)
    }

    pub fn get_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_i32(&mut self, field: &'static str) -> Result<i32, CodecError> {
        Ok(self.get_u32(field)? as i32)
    }

    pub fn get_i64(&mut self, field: &'static str) -> Result<i64, CodecError> {
        let b = self.take(8, field)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    /// Read a P16 string: 2-byte length + UTF-8 bytes.
    pub fn get_p16_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.get_u16(field)? as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
    }

    /// Read a blob: 4-byte length + raw bytes, copied into an owned vector.
    pub fn get_blob(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.get_u32(field)? as usize;
        Ok(self.take(len, field)?.to_vec())
    }

    /// Fail if any input is left unconsumed.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.buf.len()))
        }
    }
}

/// Write a P16 string into `buf`. The caller has already validated the
/// length against [`MAX_STRING_LEN`].
pub fn put_p16_string<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Write a length-prefixed blob into `buf`.
pub fn put_blob<B: BufMut>(buf: &mut B, blob: &[u8]) {
    buf.put_u32(blob.len() as u32);
    buf.put_slice(blob);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_reader_integers() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xab);
        buf.put_i8(-5);
        buf.put_u16(0x1234);
        buf.put_u32(0xdead_beef);
        buf.put_i64(-42);

        let mut r = Reader::new(&buf);
        assert_eq!(r.get_u8("a").unwrap(), 0xab);
        assert_eq!(r.get_i8("b").unwrap(), -5);
        assert_eq!(r.get_u16("c").unwrap(), 0x1234);
        assert_eq!(r.get_u32("d").unwrap(), 0xdead_beef);
        assert_eq!(r.get_i64("e").unwrap(), -42);
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_truncated() {
        let mut r = Reader::new(&[0x00]);
        let err = r.get_u32("len").unwrap_err();
        match err {
            CodecError::Truncated { field, needed } => {
                assert_eq!(field, "len");
                assert_eq!(needed, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_p16_string_round_trip() {
        let mut buf = BytesMut::new();
        put_p16_string(&mut buf, "SELECT * FROM t");
        let mut r = Reader::new(&buf);
        assert_eq!(r.get_p16_string("cql").unwrap(), "SELECT * FROM t");
        r.finish().unwrap();
    }

    #[test]
    fn test_p16_string_empty() {
        let mut buf = BytesMut::new();
        put_p16_string(&mut buf, "");
        let mut r = Reader::new(&buf);
        assert_eq!(r.get_p16_string("cql").unwrap(), "");
    }

    #[test]
    fn test_p16_string_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u16(2);
        buf.put_slice(&[0xff, 0xfe]);
        let mut r = Reader::new(&buf);
        assert!(matches!(
            r.get_p16_string("cql").unwrap_err(),
            CodecError::InvalidUtf8("cql")
        ));
    }

    #[test]
    fn test_blob_round_trip() {
        let mut buf = BytesMut::new();
        put_blob(&mut buf, &[1, 2, 3]);
        put_blob(&mut buf, &[]);
        let mut r = Reader::new(&buf);
        assert_eq!(r.get_blob("p0").unwrap(), vec![1, 2, 3]);
        assert_eq!(r.get_blob("p1").unwrap(), Vec::<u8>::new());
        r.finish().unwrap();
    }

    #[test]
    fn test_blob_truncated_body() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(&[1, 2, 3]);
        let mut r = Reader::new(&buf);
        assert!(matches!(
            r.get_blob("p").unwrap_err(),
            CodecError::Truncated { needed: 7, .. }
        ));
    }

    #[test]
    fn test_finish_rejects_trailing_bytes() {
        let r = Reader::new(&[0, 1, 2]);
        assert!(matches!(
            r.finish().unwrap_err(),
            CodecError::TrailingBytes(3)
        ));
    }
}
