//! Request entry point
//!
//! Validates the inbound chat request, forwards it upstream, and drives the
//! per-request transcoder over whatever the backend returns: an SSE stream,
//! or a plain JSON completion body that gets the buffered fallback.

use std::pin::Pin;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::collaborators::{
    AudioTokenDecoder, HttpAudioDecoder, HttpMediaFetcher, HttpUpstreamBackend, HttpVisionDecoder,
    UpstreamBackend, UpstreamResponse,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::media::MediaResolver;
use crate::sse::{data_frame, done_frame, raw_frame, sse_events};
use crate::transcoder::{OutFrame, StreamTranscoder};

/// Reject a request whose embedded data URIs are not decodable, before any
/// upstream call is made. Walks the whole body; media may appear in message
/// content parts or in tool results.
pub fn validate_chat_request(body: &serde_json::Value) -> Result<()> {
    fn walk(value: &serde_json::Value) -> Result<()> {
        match value {
            serde_json::Value::String(s) => {
                if let Some(rest) = s.strip_prefix("data:")
                    && let Some((_mime, payload)) = rest.split_once(";base64,")
                    && BASE64.decode(payload).is_err()
                {
                    return Err(BridgeError::InvalidRequest(
                        "embedded media payload is not valid base64".to_string(),
                    ));
                }
                Ok(())
            }
            serde_json::Value::Array(items) => items.iter().try_for_each(walk),
            serde_json::Value::Object(map) => map.values().try_for_each(walk),
            _ => Ok(()),
        }
    }
    walk(body)
}

/// The fully wired service: one instance per process, one transcoder per
/// request.
pub struct BridgeService {
    config: BridgeConfig,
    upstream: Arc<dyn UpstreamBackend>,
    audio_decoder: Arc<dyn AudioTokenDecoder>,
    media: MediaResolver,
}

impl BridgeService {
    pub fn new(
        config: BridgeConfig,
        upstream: Arc<dyn UpstreamBackend>,
        audio_decoder: Arc<dyn AudioTokenDecoder>,
        media: MediaResolver,
    ) -> Self {
        Self {
            config,
            upstream,
            audio_decoder,
            media,
        }
    }

    /// Wire the reqwest-backed collaborators from configuration.
    pub fn from_config(config: BridgeConfig) -> Self {
        let client = reqwest::Client::new();
        let upstream = Arc::new(HttpUpstreamBackend::new(
            client.clone(),
            config.upstream_base_url.clone(),
        ));
        let audio_decoder = Arc::new(HttpAudioDecoder::new(
            client.clone(),
            config.audio_decoder_url.clone(),
        ));
        let media = MediaResolver::new(
            Arc::new(HttpMediaFetcher::new(
                client.clone(),
                config.object_store_endpoint.clone(),
            )),
            Arc::new(HttpVisionDecoder::new(
                client,
                config.vision_decoder_url.clone(),
            )),
        );
        Self::new(config, upstream, audio_decoder, media)
    }

    /// Handle one chat request end to end, returning the client-facing SSE
    /// byte stream. A validation or whole-request upstream failure is
    /// returned as an error; the caller maps it to an error body with
    /// [`BridgeError::to_error_body`].
    pub async fn chat_stream(
        &self,
        request: serde_json::Value,
    ) -> Result<Pin<Box<dyn Stream<Item = Bytes> + Send>>> {
        validate_chat_request(&request)?;

        let mut transcoder = StreamTranscoder::new(
            &self.config,
            Arc::clone(&self.audio_decoder),
            self.media.clone(),
        );

        match self.upstream.chat_completion(request).await? {
            UpstreamResponse::Sse(bytes) => {
                let stream = async_stream::stream! {
                    let mut events = Box::pin(sse_events(bytes));
                    while let Some(event) = events.next().await {
                        let frames = match event {
                            Ok(event) => transcoder.on_event_data(&event.data).await,
                            Err(e) => {
                                // The textual prefix already sent stands;
                                // close the stream cleanly.
                                warn!(error = %e, "upstream stream failed mid-response");
                                transcoder.finalize().await
                            }
                        };
                        for frame in &frames {
                            if let Some(bytes) = serialize_frame(frame) {
                                yield bytes;
                            }
                        }
                        if frames.iter().any(|f| matches!(f, OutFrame::Done)) {
                            return;
                        }
                    }
                    // Upstream closed without a terminal marker.
                    debug!("upstream ended without [DONE], finalizing");
                    for frame in transcoder.finalize().await {
                        if let Some(bytes) = serialize_frame(&frame) {
                            yield bytes;
                        }
                    }
                };
                Ok(Box::pin(stream))
            }
            UpstreamResponse::Buffered(body) => {
                let frames = transcoder.transcode_buffered(&body).await;
                let bytes: Vec<Bytes> = frames.iter().filter_map(serialize_frame).collect();
                Ok(Box::pin(futures_util::stream::iter(bytes)))
            }
        }
    }
}

fn serialize_frame(frame: &OutFrame) -> Option<Bytes> {
    match frame {
        OutFrame::Chunk(chunk) => match data_frame(chunk) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "dropping unserializable chunk");
                None
            }
        },
        OutFrame::Raw(data) => Some(raw_frame(data)),
        OutFrame::Done => Some(done_frame()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_requests_pass() {
        let body = serde_json::json!({
            "model": "omni-7b",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}}
            ]}]
        });
        assert!(validate_chat_request(&body).is_ok());
    }

    #[test]
    fn plain_text_requests_pass() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "hello"}]
        });
        assert!(validate_chat_request(&body).is_ok());
    }

    #[test]
    fn corrupt_data_uri_is_rejected() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,@@not-base64@@"}}
            ]}]
        });
        let err = validate_chat_request(&body).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn non_data_uris_are_not_validated() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
            ]}]
        });
        assert!(validate_chat_request(&body).is_ok());
    }
}
