// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `OrderResult` response envelope and its payload codec.
//!
//! A result payload is a 2-byte blob count followed by that many
//! length-prefixed blobs. The success/failure bit travels in the frame
//! tag, not in the payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{CodecError, Reader, put_blob};

/// One proxy response.
///
/// Blob semantics depend on the originating order: a handle-assigning
/// order (`Declare`/`BatchDeclare`) puts the new 4-byte handle first;
/// row-returning orders append rows flattened in column order, always a
/// whole number of rows worth of blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderResult {
    pub succeeded: bool,
    pub blobs: Vec<Vec<u8>>,
}

impl OrderResult {
    /// Successful result with no data.
    pub fn ok() -> Self {
        Self {
            succeeded: true,
            blobs: Vec::new(),
        }
    }

    /// Failed result carrying an error-code blob.
    pub fn error(code: &str) -> Self {
        Self {
            succeeded: false,
            blobs: vec![code.as_bytes().to_vec()],
        }
    }

    pub fn with_blobs(blobs: Vec<Vec<u8>>) -> Self {
        Self {
            succeeded: true,
            blobs,
        }
    }

    /// Append a 4-byte big-endian handle blob.
    pub fn push_handle(&mut self, handle: u32) {
        self.blobs.push(handle.to_be_bytes().to_vec());
    }

    /// Read blob `index` back as a 4-byte big-endian handle.
    pub fn handle_at(&self, index: usize) -> Option<u32> {
        let blob = self.blobs.get(index)?;
        let raw: [u8; 4] = blob.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// Exact encoded payload size in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.blobs.iter().map(|b| 4 + b.len()).sum::<usize>()
    }

    /// Encode the payload, allocating once.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        if self.blobs.len() > u16::MAX as usize {
            return Err(CodecError::TooMany {
                what: "result blobs",
                count: self.blobs.len(),
            });
        }
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16(self.blobs.len() as u16);
        for blob in &self.blobs {
            put_blob(&mut buf, blob);
        }
        debug_assert_eq!(buf.len(), self.encoded_len());
        Ok(buf.freeze())
    }

    /// Decode a result payload. `succeeded` comes from the frame tag.
    pub fn decode(succeeded: bool, payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);
        let count = r.get_u16("result_count")? as usize;
        let mut blobs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            blobs.push(r.get_blob("result")?);
        }
        r.finish()?;
        Ok(Self { succeeded, blobs })
    }
}
