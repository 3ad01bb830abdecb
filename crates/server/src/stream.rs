//! Incremental JSON array streaming.
//!
//! Rows are serialized one at a time and flushed to the transport in
//! batches, so the full result set is never materialized. Whatever ends
//! the loop (end of cursor, mapping error, deadline, client disconnect),
//! the emitted bytes are always a syntactically valid JSON array; an early
//! termination yields a valid prefix of the full result.
use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use sluice_common::error::GatewayError;
use sluice_common::value::JsonMap;

/// The client went away; nothing further can be delivered.
#[derive(Debug, Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Buffered response output. `write` only stages bytes; `flush` pushes the
/// staged bytes to the transport. Both fail once the client is gone.
#[async_trait]
pub trait RowSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ClientGone>;
    async fn flush(&mut self) -> Result<(), ClientGone>;
}

/// Production sink: staged bytes become body chunks on an mpsc channel
/// feeding the hyper response body. A dropped receiver is the disconnect
/// signal.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    buf: BytesMut,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(capacity);
        let body = Body::from_stream(ReceiverStream::new(rx));
        (
            Self {
                tx,
                buf: BytesMut::new(),
            },
            body,
        )
    }
}

#[async_trait]
impl RowSink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ClientGone> {
        if self.tx.is_closed() {
            return Err(ClientGone);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ClientGone> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx.send(Ok(chunk)).await.map_err(|_| ClientGone)
    }
}

/// Incremental JSON array encoder. Owns the open/separator/close
/// bookkeeping so the framing invariant lives in exactly one place.
pub struct JsonArrayEncoder<S> {
    sink: S,
    rows: u64,
}

impl<S: RowSink> JsonArrayEncoder<S> {
    /// Write the array-open delimiter immediately, before any row is
    /// available, so clients observe the response start promptly.
    pub fn begin(mut sink: S) -> Result<Self, ClientGone> {
        sink.write(b"[")?;
        Ok(Self { sink, rows: 0 })
    }

    pub fn element(&mut self, serialized: &[u8]) -> Result<(), ClientGone> {
        if self.rows > 0 {
            self.sink.write(b",")?;
        }
        self.sink.write(serialized)?;
        self.rows += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), ClientGone> {
        self.sink.flush().await
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Close the array and flush, best effort: on a gone client these
    /// writes are no-ops, on every other path they complete the framing.
    pub async fn finish(mut self) -> u64 {
        let _ = self.sink.write(b"]");
        let _ = self.sink.flush().await;
        self.rows
    }
}

/// Drain a record stream into the sink, flushing after every `flush_batch`
/// rows. Returns the number of rows written.
pub async fn stream_rows<R, S>(mut records: R, sink: S, flush_batch: usize) -> u64
where
    R: Stream<Item = Result<JsonMap, GatewayError>> + Unpin,
    S: RowSink,
{
    let flush_batch = flush_batch.max(1) as u64;

    let mut encoder = match JsonArrayEncoder::begin(sink) {
        Ok(encoder) => encoder,
        Err(_) => {
            tracing::warn!("client disconnected before the stream started");
            return 0;
        }
    };

    while let Some(next) = records.next().await {
        let record = match next {
            Ok(record) => record,
            Err(e @ GatewayError::RowMapping { .. }) => {
                tracing::error!("unable to map row: {e}");
                break;
            }
            Err(e) => {
                tracing::error!("unable to load row: {e}");
                break;
            }
        };

        let serialized = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("unable to serialize row: {e}");
                break;
            }
        };

        if encoder.element(&serialized).is_err() {
            tracing::warn!("connection reset by client, terminating");
            break;
        }

        if encoder.rows() % flush_batch == 0 && encoder.flush().await.is_err() {
            tracing::warn!("connection reset by client, terminating");
            break;
        }
    }

    encoder.finish().await
}
