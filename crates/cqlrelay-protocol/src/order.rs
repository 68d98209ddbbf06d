// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `Order` request envelope and its payload codec.
//!
//! An order payload is laid out as:
//!
//! ```text
//! 2      u16 flags bitmap (bit0-3: kind; bit4: blocking; bit5: timestamp;
//!                          bit6: timeout; bit7: column_count != 1;
//!                          bit8: paging_size; bit9: cursor_index;
//!                          bit10: clear_cluster_description; bit11: batch_index)
//! 1      i8 consistency_level
//! 2+N    P16 string: cql text
//! 8      i64 timestamp            [bit5]
//! 4      i32 timeout_ms           [bit6]
//! 1      u8 column_count          [bit7]
//! 4      i32 paging_size          [bit8]
//! 2      u16 cursor_index         [bit9]
//! 2      u16 batch_index          [bit11]
//! 2      u16 parameter_count
//! {4+M}* parameters, one blob each
//! ```
//!
//! Optional fields are physically omitted when unset; the flags bitmap is
//! the single source of truth for which fields are present. Encoding and
//! decoding agree bit-for-bit on this mapping.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{CodecError, MAX_STRING_LEN, Reader, put_blob, put_p16_string};

const KIND_MASK: u16 = 0x000f;
const FLAG_BLOCKING: u16 = 1 << 4;
const FLAG_TIMESTAMP: u16 = 1 << 5;
const FLAG_TIMEOUT: u16 = 1 << 6;
const FLAG_COLUMN_COUNT: u16 = 1 << 7;
const FLAG_PAGING_SIZE: u16 = 1 << 8;
const FLAG_CURSOR_INDEX: u16 = 1 << 9;
const FLAG_CLEAR_CLUSTER_DESCRIPTION: u16 = 1 << 10;
const FLAG_BATCH_INDEX: u16 = 1 << 11;

/// What the proxy should do with an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrderKind {
    /// Execute one statement, discard any rows.
    Success = 0,
    /// Execute one statement, return the resulting rows.
    Rows = 1,
    /// Open a server-side cursor over a paged query.
    Declare = 2,
    /// Advance an existing cursor by one page.
    Fetch = 3,
    /// Free a cursor slot.
    Close = 4,
    /// Return the cluster schema description.
    Describe = 5,
    /// Open a server-side batch.
    BatchDeclare = 6,
    /// Append a statement to an open batch.
    BatchAdd = 7,
    /// Execute and free an open batch.
    BatchCommit = 8,
    /// Discard and free an open batch.
    BatchRollback = 9,
}

impl TryFrom<u16> for OrderKind {
    type Error = CodecError;

    fn try_from(value: u16) -> Result<Self, CodecError> {
        match value {
            0 => Ok(OrderKind::Success),
            1 => Ok(OrderKind::Rows),
            2 => Ok(OrderKind::Declare),
            3 => Ok(OrderKind::Fetch),
            4 => Ok(OrderKind::Close),
            5 => Ok(OrderKind::Describe),
            6 => Ok(OrderKind::BatchDeclare),
            7 => Ok(OrderKind::BatchAdd),
            8 => Ok(OrderKind::BatchCommit),
            9 => Ok(OrderKind::BatchRollback),
            other => Err(CodecError::InvalidKind(other)),
        }
    }
}

/// Statement consistency level, one signed byte on the wire.
///
/// `Default` (-1) defers to the driver's configured level; the remaining
/// values use the CQL native protocol numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum Consistency {
    #[default]
    Default = -1,
    Any = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Quorum = 4,
    All = 5,
    LocalQuorum = 6,
    EachQuorum = 7,
}

impl TryFrom<i8> for Consistency {
    type Error = CodecError;

    fn try_from(value: i8) -> Result<Self, CodecError> {
        match value {
            -1 => Ok(Consistency::Default),
            0 => Ok(Consistency::Any),
            1 => Ok(Consistency::One),
            2 => Ok(Consistency::Two),
            3 => Ok(Consistency::Three),
            4 => Ok(Consistency::Quorum),
            5 => Ok(Consistency::All),
            6 => Ok(Consistency::LocalQuorum),
            7 => Ok(Consistency::EachQuorum),
            other => Err(CodecError::InvalidConsistency(other)),
        }
    }
}

/// One client request.
///
/// Optional attributes are `None` when unset; the wire sentinels
/// (`timestamp == 0`, `timeout_ms == 0`, `paging_size == 0`) normalize to
/// `None` during encoding, so a zero value and an absent field are the
/// same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub kind: OrderKind,
    /// Opaque query text. The proxy never inspects it.
    pub cql: String,
    pub consistency: Consistency,
    /// Client-supplied write timestamp in microseconds.
    pub timestamp: Option<i64>,
    /// Per-statement timeout. When set and positive the order runs on a
    /// dedicated session created with this timeout.
    pub timeout_ms: Option<i32>,
    /// Columns per row in the result set.
    pub column_count: u8,
    pub paging_size: Option<i32>,
    pub cursor_index: Option<u16>,
    pub batch_index: Option<u16>,
    /// True when this order may have mutated the cluster schema.
    pub clear_cluster_description: bool,
    /// False for fire-and-forget orders that expect no result frame.
    pub blocking: bool,
    /// Bound query parameters; position is the bind index.
    pub parameters: Vec<Vec<u8>>,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            kind: OrderKind::Success,
            cql: String::new(),
            consistency: Consistency::Default,
            timestamp: None,
            timeout_ms: None,
            column_count: 1,
            paging_size: None,
            cursor_index: None,
            batch_index: None,
            clear_cluster_description: false,
            blocking: true,
            parameters: Vec::new(),
        }
    }
}

impl Order {
    /// Convenience constructor for the common case.
    pub fn new(kind: OrderKind, cql: impl Into<String>) -> Self {
        Self {
            kind,
            cql: cql.into(),
            ..Self::default()
        }
    }

    /// Timestamp after sentinel normalization: zero means unset.
    fn wire_timestamp(&self) -> Option<i64> {
        self.timestamp.filter(|ts| *ts != 0)
    }

    fn wire_timeout(&self) -> Option<i32> {
        self.timeout_ms.filter(|ms| *ms != 0)
    }

    fn wire_paging(&self) -> Option<i32> {
        self.paging_size.filter(|n| *n != 0)
    }

    fn flags(&self) -> u16 {
        let mut flags = self.kind as u16;
        if self.blocking {
            flags |= FLAG_BLOCKING;
        }
        if self.wire_timestamp().is_some() {
            flags |= FLAG_TIMESTAMP;
        }
        if self.wire_timeout().is_some() {
            flags |= FLAG_TIMEOUT;
        }
        if self.column_count != 1 {
            flags |= FLAG_COLUMN_COUNT;
        }
        if self.wire_paging().is_some() {
            flags |= FLAG_PAGING_SIZE;
        }
        if self.cursor_index.is_some() {
            flags |= FLAG_CURSOR_INDEX;
        }
        if self.clear_cluster_description {
            flags |= FLAG_CLEAR_CLUSTER_DESCRIPTION;
        }
        if self.batch_index.is_some() {
            flags |= FLAG_BATCH_INDEX;
        }
        flags
    }

    /// Exact encoded payload size in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut len = 2 + 1 + 2 + self.cql.len();
        if self.wire_timestamp().is_some() {
            len += 8;
        }
        if self.wire_timeout().is_some() {
            len += 4;
        }
        if self.column_count != 1 {
            len += 1;
        }
        if self.wire_paging().is_some() {
            len += 4;
        }
        if self.cursor_index.is_some() {
            len += 2;
        }
        if self.batch_index.is_some() {
            len += 2;
        }
        len += 2;
        for p in &self.parameters {
            len += 4 + p.len();
        }
        len
    }

    /// Encode the payload (flags through parameters), allocating once.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        if self.cql.len() > MAX_STRING_LEN {
            return Err(CodecError::StringTooLong(self.cql.len()));
        }
        if self.parameters.len() > u16::MAX as usize {
            return Err(CodecError::TooMany {
                what: "parameters",
                count: self.parameters.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16(self.flags());
        buf.put_i8(self.consistency as i8);
        put_p16_string(&mut buf, &self.cql);
        if let Some(ts) = self.wire_timestamp() {
            buf.put_i64(ts);
        }
        if let Some(ms) = self.wire_timeout() {
            buf.put_i32(ms);
        }
        if self.column_count != 1 {
            buf.put_u8(self.column_count);
        }
        if let Some(n) = self.wire_paging() {
            buf.put_i32(n);
        }
        if let Some(idx) = self.cursor_index {
            buf.put_u16(idx);
        }
        if let Some(idx) = self.batch_index {
            buf.put_u16(idx);
        }
        buf.put_u16(self.parameters.len() as u16);
        for p in &self.parameters {
            put_blob(&mut buf, p);
        }

        debug_assert_eq!(buf.len(), self.encoded_len());
        Ok(buf.freeze())
    }

    /// Decode an order payload.
    ///
    /// The input is borrowed only for the duration of the call; parameter
    /// blobs are copied into owned vectors. Any structural problem is an
    /// error — a truncated or inconsistent payload never yields a partial
    /// order.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(payload);

        let flags = r.get_u16("flags")?;
        let kind = OrderKind::try_from(flags & KIND_MASK)?;
        let consistency = Consistency::try_from(r.get_i8("consistency")?)?;
        let cql = r.get_p16_string("cql")?;

        let timestamp = if flags & FLAG_TIMESTAMP != 0 {
            Some(r.get_i64("timestamp")?)
        } else {
            None
        };
        let timeout_ms = if flags & FLAG_TIMEOUT != 0 {
            Some(r.get_i32("timeout_ms")?)
        } else {
            None
        };
        let column_count = if flags & FLAG_COLUMN_COUNT != 0 {
            r.get_u8("column_count")?
        } else {
            1
        };
        let paging_size = if flags & FLAG_PAGING_SIZE != 0 {
            Some(r.get_i32("paging_size")?)
        } else {
            None
        };
        let cursor_index = if flags & FLAG_CURSOR_INDEX != 0 {
            Some(r.get_u16("cursor_index")?)
        } else {
            None
        };
        let batch_index = if flags & FLAG_BATCH_INDEX != 0 {
            Some(r.get_u16("batch_index")?)
        } else {
            None
        };

        let parameter_count = r.get_u16("parameter_count")? as usize;
        let mut parameters = Vec::with_capacity(parameter_count.min(1024));
        for _ in 0..parameter_count {
            parameters.push(r.get_blob("parameter")?);
        }
        r.finish()?;

        Ok(Self {
            kind,
            cql,
            consistency,
            timestamp,
            timeout_ms,
            column_count,
            paging_size,
            cursor_index,
            batch_index,
            clear_cluster_description: flags & FLAG_CLEAR_CLUSTER_DESCRIPTION != 0,
            blocking: flags & FLAG_BLOCKING != 0,
            parameters,
        })
    }
}
