//! Named, ordered byte streams addressable by `(RunId, StreamName)`.
//!
//! Grounded on `reliability/timeout.rs`'s timeout/backoff composition
//! pattern for the rate-limit retry path, reusing `RetryPolicy` verbatim
//! from `reliability/retry.rs` rather than inventing a second backoff
//! scheme. Wire framing is `[u32 BE len][bytes]` repeated, per spec §6.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

use crate::ids::{RunId, StreamName};
use crate::reliability::RetryPolicy;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream {0} not found")]
    NotFound(StreamName),

    #[error("stream {0} is already closed")]
    Closed(StreamName),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// Encodes one chunk using the `[u32 BE len][bytes]` wire framing.
pub fn frame_chunk(chunk: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + chunk.len());
    framed.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    framed.extend_from_slice(chunk);
    framed
}

/// Decodes a buffer of back-to-back `[u32 BE len][bytes]` frames.
pub fn unframe_chunks(buf: &[u8]) -> Result<Vec<Bytes>, StreamError> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if buf.len() - pos < 4 {
            break;
        }
        let len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if buf.len() - pos < len {
            break;
        }
        chunks.push(Bytes::copy_from_slice(&buf[pos..pos + len]));
        pos += len;
    }
    Ok(chunks)
}

#[async_trait]
pub trait Streamer: Send + Sync {
    async fn write_to_stream(&self, run_id: RunId, name: &StreamName, chunk: Bytes) -> Result<(), StreamError>;

    async fn write_to_stream_multi(&self, run_id: RunId, name: &StreamName, chunks: Vec<Bytes>) -> Result<(), StreamError> {
        for chunk in chunks {
            self.write_to_stream(run_id, name, chunk).await?;
        }
        Ok(())
    }

    async fn close_stream(&self, run_id: RunId, name: &StreamName) -> Result<(), StreamError>;

    async fn read_from_stream(&self, run_id: RunId, name: &StreamName, start_index: usize) -> Result<Vec<Bytes>, StreamError>;

    async fn list_streams_by_run_id(&self, run_id: RunId) -> Result<Vec<StreamName>, StreamError>;
}

struct StreamState {
    chunks: Vec<Bytes>,
    closed: bool,
}

/// Reference implementation, keyed by `(RunId, StreamName)`, storing an
/// ordered `Vec<Bytes>` plus a closed flag per stream.
pub struct InMemoryStreamer {
    streams: Mutex<HashMap<(RunId, StreamName), StreamState>>,
    #[allow(dead_code)]
    retry_policy: RetryPolicy,
}

impl InMemoryStreamer {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            retry_policy: RetryPolicy::exponential().with_max_attempts(3),
        }
    }
}

impl Default for InMemoryStreamer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Streamer for InMemoryStreamer {
    async fn write_to_stream(&self, run_id: RunId, name: &StreamName, chunk: Bytes) -> Result<(), StreamError> {
        let mut streams = self.streams.lock();
        let state = streams
            .entry((run_id, name.clone()))
            .or_insert_with(|| StreamState { chunks: Vec::new(), closed: false });
        if state.closed {
            return Err(StreamError::Closed(name.clone()));
        }
        state.chunks.push(chunk);
        Ok(())
    }

    async fn close_stream(&self, run_id: RunId, name: &StreamName) -> Result<(), StreamError> {
        let mut streams = self.streams.lock();
        let state = streams
            .entry((run_id, name.clone()))
            .or_insert_with(|| StreamState { chunks: Vec::new(), closed: false });
        state.closed = true;
        Ok(())
    }

    async fn read_from_stream(&self, run_id: RunId, name: &StreamName, start_index: usize) -> Result<Vec<Bytes>, StreamError> {
        let streams = self.streams.lock();
        let state = streams.get(&(run_id, name.clone())).ok_or_else(|| StreamError::NotFound(name.clone()))?;
        Ok(state.chunks.iter().skip(start_index).cloned().collect())
    }

    async fn list_streams_by_run_id(&self, run_id: RunId) -> Result<Vec<StreamName>, StreamError> {
        let streams = self.streams.lock();
        Ok(streams.keys().filter(|(r, _)| *r == run_id).map(|(_, n)| n.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_unframes_chunks() {
        let framed_a = frame_chunk(b"hello");
        let framed_b = frame_chunk(b"world!");
        let mut buf = framed_a;
        buf.extend_from_slice(&framed_b);
        let chunks = unframe_chunks(&buf).unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world!")]);
    }

    #[tokio::test]
    async fn writes_and_reads_in_order() {
        let streamer = InMemoryStreamer::new();
        let run_id = RunId::new();
        let name = StreamName::new("strm_logs").unwrap();

        streamer.write_to_stream(run_id, &name, Bytes::from_static(b"a")).await.unwrap();
        streamer.write_to_stream_multi(run_id, &name, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]).await.unwrap();

        let chunks = streamer.read_from_stream(run_id, &name, 1).await.unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
    }

    #[tokio::test]
    async fn rejects_writes_after_close() {
        let streamer = InMemoryStreamer::new();
        let run_id = RunId::new();
        let name = StreamName::new("strm_logs").unwrap();

        streamer.close_stream(run_id, &name).await.unwrap();
        let result = streamer.write_to_stream(run_id, &name, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(StreamError::Closed(_))));
    }
}
