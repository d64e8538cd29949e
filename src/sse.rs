//! SSE framing helpers
//!
//! Upstream bytes are parsed with `eventsource-stream`; client frames are
//! emitted as `data: {json}\n\n` payloads terminated by the literal
//! `data: [DONE]\n\n` marker. A `data:` payload that is not parseable JSON is
//! forwarded verbatim rather than dropped.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures_util::Stream;

use crate::error::{BridgeError, Result};
use crate::protocol::ChatChunk;

/// End-of-stream marker shared with the upstream backend.
pub const DONE_MARKER: &str = "[DONE]";

/// Serialize a chunk as one SSE data frame.
pub fn data_frame(chunk: &ChatChunk) -> Result<Bytes> {
    let json = serde_json::to_vec(chunk)
        .map_err(|e| BridgeError::ParseError(format!("Failed to serialize chunk: {e}")))?;
    let mut out = Vec::with_capacity(json.len() + 8);
    out.extend_from_slice(b"data: ");
    out.extend_from_slice(&json);
    out.extend_from_slice(b"\n\n");
    Ok(Bytes::from(out))
}

/// Forward an upstream data payload unchanged.
pub fn raw_frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

/// The terminal frame.
pub fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Parse a byte stream into SSE events.
pub fn sse_events<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<eventsource_stream::Event>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    use futures_util::StreamExt;
    byte_stream.eventsource().map(|item| {
        item.map_err(|e| BridgeError::StreamError(format!("SSE stream error: {e}")))
    })
}
