//! Server-sent-event decoding shared by every adapter.
//!
//! A producer task reads the HTTP body, splits it into lines and forwards
//! decoded chunks through a bounded channel. The consumer side is a
//! [`ChunkStream`]; dropping it aborts the producer, which in turn drops the
//! body and releases the connection.

use super::types::StreamingChunk;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Raw response body as handed to `parse_stream`
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Adapter-specific mapping from one decoded `data:` payload to chunks.
/// A returned chunk with `finish = true` ends the sequence.
pub type ChunkExtractor = fn(&serde_json::Value) -> Vec<StreamingChunk>;

pub const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Splits a byte stream into lines, tolerating multi-byte characters that
/// straddle network chunk boundaries.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw));
        }
        lines
    }

    /// Trailing bytes without a final newline
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    Ignored,
}

/// Classify one line of an event stream. Only `data:` lines matter; `event:`,
/// `id:`, comments and blank keep-alive lines are ignored.
pub fn classify_line(line: &str) -> SseLine<'_> {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    match payload.trim_start() {
        "[DONE]" => SseLine::Done,
        "" => SseLine::Ignored,
        data => SseLine::Data(data),
    }
}

/// Lazy, single-use sequence of [`StreamingChunk`]s
pub struct ChunkStream {
    receiver: mpsc::Receiver<StreamingChunk>,
    producer: JoinHandle<()>,
}

impl ChunkStream {
    /// Spawn the producer task. Must be called inside a tokio runtime.
    pub fn spawn(body: ByteStream, extract: ChunkExtractor) -> Self {
        let (sender, receiver) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let producer = tokio::spawn(produce(body, extract, sender));
        Self { receiver, producer }
    }
}

impl Stream for ChunkStream {
    type Item = StreamingChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(mut body: ByteStream, extract: ChunkExtractor, sender: mpsc::Sender<StreamingChunk>) {
    let mut decoder = LineDecoder::default();

    while let Some(next) = body.next().await {
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("Stream body failed mid-read: {}", err);
                let _ = sender
                    .send(StreamingChunk::failed(format!("stream read error: {err}")))
                    .await;
                return;
            }
        };

        for line in decoder.push(&bytes) {
            if !forward_line(&line, extract, &sender).await {
                return;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        forward_line(&line, extract, &sender).await;
    }
    trace!("Stream body exhausted without terminal marker");
}

/// Returns false once the sequence has terminated or the consumer went away.
async fn forward_line(
    line: &str,
    extract: ChunkExtractor,
    sender: &mpsc::Sender<StreamingChunk>,
) -> bool {
    match classify_line(line) {
        SseLine::Ignored => true,
        SseLine::Done => {
            let _ = sender.send(StreamingChunk::finished()).await;
            false
        }
        SseLine::Data(payload) => {
            let chunks = match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(value) => extract(&value),
                Err(err) => vec![StreamingChunk::failed(format!(
                    "malformed stream payload: {err}"
                ))],
            };

            for chunk in chunks {
                let terminal = chunk.finish;
                if sender.send(chunk).await.is_err() || terminal {
                    return false;
                }
            }
            true
        }
    }
}
