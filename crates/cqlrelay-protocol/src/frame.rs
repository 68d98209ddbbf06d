// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for stream framing.
//!
//! Each frame is a 4-byte tag, a 4-byte big-endian payload length and the
//! payload itself:
//!
//! - `"CQLP"` — an order (client to proxy)
//! - `"SUCS"` — a successful result (proxy to client)
//! - `"ERRO"` — a failed result (proxy to client)
//!
//! The declared length always equals the total frame length minus 8.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecError;
use crate::order::Order;
use crate::result::OrderResult;

/// Order frame tag.
pub const ORDER_TAG: [u8; 4] = *b"CQLP";
/// Successful result frame tag.
pub const RESULT_OK_TAG: [u8; 4] = *b"SUCS";
/// Failed result frame tag.
pub const RESULT_ERR_TAG: [u8; 4] = *b"ERRO";

/// Maximum payload size (64 MB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Frame header size (4-byte tag + 4-byte length).
pub const HEADER_SIZE: usize = 8;

/// Errors that can occur during frame transfer.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid frame tag: {0:02x?}")]
    InvalidTag([u8; 4]),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode a full order frame (header + payload) into one buffer.
pub fn encode_order_frame(order: &Order) -> Result<Bytes, FrameError> {
    let payload = order.encode()?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&ORDER_TAG);
    buf.put_u32(payload.len() as u32);
    buf.put(payload);
    Ok(buf.freeze())
}

/// Encode a full result frame; the tag carries the success bit.
pub fn encode_result_frame(result: &OrderResult) -> Result<Bytes, FrameError> {
    let payload = result.encode()?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(payload.len()));
    }
    let tag = if result.succeeded {
        RESULT_OK_TAG
    } else {
        RESULT_ERR_TAG
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&tag);
    buf.put_u32(payload.len() as u32);
    buf.put(payload);
    Ok(buf.freeze())
}

/// Read one frame header and payload.
///
/// `read_exact` transfers the requested byte count in full, looping over
/// short reads internally; a clean EOF before the first header byte maps
/// to [`FrameError::ConnectionClosed`], while EOF inside a frame is a
/// protocol error.
async fn read_raw_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<([u8; 4], Vec<u8>), FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let tag = [header[0], header[1], header[2], header[3]];
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok((tag, payload))
}

/// Write an order frame to an async writer.
pub async fn write_order<W: AsyncWrite + Unpin>(
    writer: &mut W,
    order: &Order,
) -> Result<(), FrameError> {
    let encoded = encode_order_frame(order)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read an order frame from an async reader.
pub async fn read_order<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Order, FrameError> {
    let (tag, payload) = read_raw_frame(reader).await?;
    if tag != ORDER_TAG {
        return Err(FrameError::InvalidTag(tag));
    }
    Ok(Order::decode(&payload)?)
}

/// Write a result frame to an async writer.
pub async fn write_result<W: AsyncWrite + Unpin>(
    writer: &mut W,
    result: &OrderResult,
) -> Result<(), FrameError> {
    let encoded = encode_result_frame(result)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a result frame from an async reader.
pub async fn read_result<R: AsyncRead + Unpin>(reader: &mut R) -> Result<OrderResult, FrameError> {
    let (tag, payload) = read_raw_frame(reader).await?;
    let succeeded = match tag {
        RESULT_OK_TAG => true,
        RESULT_ERR_TAG => false,
        other => return Err(FrameError::InvalidTag(other)),
    };
    Ok(OrderResult::decode(succeeded, &payload)?)
}

/// Framed codec for exchanging orders and results on a stream.
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    /// Read the next order from the stream.
    pub async fn read_order(&mut self) -> Result<Order, FrameError> {
        read_order(&mut self.stream).await
    }

    /// Read the next result from the stream.
    pub async fn read_result(&mut self) -> Result<OrderResult, FrameError> {
        read_result(&mut self.stream).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    /// Write an order to the stream.
    pub async fn write_order(&mut self, order: &Order) -> Result<(), FrameError> {
        write_order(&mut self.stream, order).await
    }

    /// Write a result to the stream.
    pub async fn write_result(&mut self, result: &OrderResult) -> Result<(), FrameError> {
        write_result(&mut self.stream, result).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send an order and, for blocking orders, wait for the result.
    ///
    /// Non-blocking orders return a successful empty result as soon as the
    /// frame is written; the proxy sends no frame back for them.
    pub async fn send_order(&mut self, order: &Order) -> Result<OrderResult, FrameError> {
        self.write_order(order).await?;
        if order.blocking {
            self.read_result().await
        } else {
            Ok(OrderResult::ok())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderKind;
    use tokio::io::duplex;

    #[test]
    fn test_order_frame_layout() {
        let order = Order::new(OrderKind::Rows, "SELECT 1");
        let encoded = encode_order_frame(&order).unwrap();
        assert_eq!(&encoded[..4], b"CQLP");
        let declared = u32::from_be_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(declared as usize, encoded.len() - HEADER_SIZE);
    }

    #[test]
    fn test_result_frame_tag_tracks_success() {
        let ok = encode_result_frame(&OrderResult::ok()).unwrap();
        assert_eq!(&ok[..4], b"SUCS");
        let err = encode_result_frame(&OrderResult::error("X")).unwrap();
        assert_eq!(&err[..4], b"ERRO");
    }

    #[tokio::test]
    async fn test_order_write_read() {
        let (mut a, mut b) = duplex(4096);
        let order = Order {
            kind: OrderKind::Success,
            cql: "INSERT INTO t (k, v) VALUES (?, ?)".to_string(),
            parameters: vec![b"k".to_vec(), b"v".to_vec()],
            ..Order::default()
        };
        write_order(&mut a, &order).await.unwrap();
        let read = read_order(&mut b).await.unwrap();
        assert_eq!(read, order);
    }

    #[tokio::test]
    async fn test_result_write_read() {
        let (mut a, mut b) = duplex(4096);
        let result = OrderResult::with_blobs(vec![b"blob".to_vec()]);
        write_result(&mut a, &result).await.unwrap();
        let read = read_result(&mut b).await.unwrap();
        assert_eq!(read, result);
    }

    #[tokio::test]
    async fn test_read_order_connection_closed() {
        let (a, mut b) = duplex(64);
        drop(a);
        assert!(matches!(
            read_order(&mut b).await.unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_protocol_error() {
        let (mut a, mut b) = duplex(64);
        // Header promises 100 payload bytes, then hang up.
        let mut partial = Vec::new();
        partial.extend_from_slice(&ORDER_TAG);
        partial.extend_from_slice(&100u32.to_be_bytes());
        partial.extend_from_slice(&[0u8; 10]);
        a.write_all(&partial).await.unwrap();
        drop(a);
        assert!(matches!(
            read_order(&mut b).await.unwrap_err(),
            FrameError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"BOGUS---").await.unwrap();
        assert!(matches!(
            read_order(&mut b).await.unwrap_err(),
            FrameError::InvalidTag(_)
        ));
    }

    #[tokio::test]
    async fn test_result_tag_not_accepted_as_order() {
        let (mut a, mut b) = duplex(64);
        write_result(&mut a, &OrderResult::ok()).await.unwrap();
        assert!(matches!(
            read_order(&mut b).await.unwrap_err(),
            FrameError::InvalidTag(tag) if tag == RESULT_OK_TAG
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = duplex(64);
        let mut header = Vec::new();
        header.extend_from_slice(&ORDER_TAG);
        header.extend_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        a.write_all(&header).await.unwrap();
        assert!(matches!(
            read_order(&mut b).await.unwrap_err(),
            FrameError::FrameTooLarge(_)
        ));
    }

    #[tokio::test]
    async fn test_framed_stream_send_order_blocking() {
        let (client, server) = duplex(4096);
        let mut client = FramedStream::new(client);
        let mut server = FramedStream::new(server);

        let exchange = tokio::spawn(async move {
            let order = server.read_order().await.unwrap();
            assert!(order.blocking);
            server
                .write_result(&OrderResult::with_blobs(vec![b"r".to_vec()]))
                .await
                .unwrap();
        });

        let result = client
            .send_order(&Order::new(OrderKind::Rows, "SELECT 1"))
            .await
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.blobs, vec![b"r".to_vec()]);
        exchange.await.unwrap();
    }

    #[tokio::test]
    async fn test_framed_stream_non_blocking_skips_read() {
        let (client, server) = duplex(4096);
        let mut client = FramedStream::new(client);
        let mut server = FramedStream::new(server);

        let order = Order {
            blocking: false,
            ..Order::new(OrderKind::Success, "INSERT")
        };
        // Completes without any result frame on the wire.
        let result = client.send_order(&order).await.unwrap();
        assert!(result.succeeded);
        assert!(result.blobs.is_empty());

        let read = server.read_order().await.unwrap();
        assert!(!read.blocking);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut a, mut b) = duplex(8192);
        for i in 0..5u8 {
            let order = Order {
                parameters: vec![vec![i]],
                ..Order::new(OrderKind::Success, "x")
            };
            write_order(&mut a, &order).await.unwrap();
        }
        for i in 0..5u8 {
            let order = read_order(&mut b).await.unwrap();
            assert_eq!(order.parameters, vec![vec![i]]);
        }
    }
}
