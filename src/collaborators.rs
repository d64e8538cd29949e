//! Collaborator interfaces
//!
//! Seams for the external services the transcoder drives: the audio token
//! decoder, the vision token decoder, and the media fetch/object-store
//! service. Production implementations are thin reqwest clients; tests swap
//! in hand-rolled mocks.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};

use crate::error::{BridgeError, Result};

/// Encoding of the bytes a decode call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBytesFormat {
    /// Raw little-endian PCM16 mono samples.
    Pcm16,
    /// A fully-framed WAV container.
    Wav,
}

/// Raw audio returned by the decode collaborator.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub bytes: Bytes,
    pub format: AudioBytesFormat,
}

/// Decodes an ordered list of audio tokens into audio bytes.
#[async_trait]
pub trait AudioTokenDecoder: Send + Sync {
    async fn decode(&self, tokens: &[u32], speaker: &str, sample_rate: u32)
    -> Result<DecodedAudio>;
}

/// Turns an opaque vision token string into a retrievable URI.
#[async_trait]
pub trait VisionTokenDecoder: Send + Sync {
    async fn decode(&self, token: &str) -> Result<String>;
}

/// Fetched media bytes plus the content type the source reported.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Fetches bytes for http(s) URLs and object-store URIs.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<FetchedMedia>;
}

/// What the inference backend returned for one chat request.
pub enum UpstreamResponse {
    /// A live SSE byte stream.
    Sse(Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>),
    /// A complete non-streaming body; the caller runs the buffered fallback.
    Buffered(String),
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse(_) => f.debug_tuple("Sse").finish_non_exhaustive(),
            Self::Buffered(body) => f.debug_tuple("Buffered").field(body).finish(),
        }
    }
}

/// The inference backend the bridge fronts.
#[async_trait]
pub trait UpstreamBackend: Send + Sync {
    async fn chat_completion(&self, request: serde_json::Value) -> Result<UpstreamResponse>;
}

/// HTTP audio decode client. Posts the token chunk and speaker identity,
/// accepts either raw PCM16 or framed WAV in the response body.
pub struct HttpAudioDecoder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAudioDecoder {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AudioTokenDecoder for HttpAudioDecoder {
    async fn decode(
        &self,
        tokens: &[u32],
        speaker: &str,
        sample_rate: u32,
    ) -> Result<DecodedAudio> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "tokens": tokens,
                "speaker": speaker,
                "sample_rate": sample_rate,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::AudioDecodeError(format!(
                "decoder returned {status}: {body}"
            )));
        }

        let format = match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if ct.contains("wav") => AudioBytesFormat::Wav,
            _ => AudioBytesFormat::Pcm16,
        };
        let bytes = response.bytes().await?;
        Ok(DecodedAudio { bytes, format })
    }
}

/// HTTP vision decode client. Posts the opaque token, expects a JSON body
/// carrying the retrievable URI.
pub struct HttpVisionDecoder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpVisionDecoder {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl VisionTokenDecoder for HttpVisionDecoder {
    async fn decode(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::MediaError(format!(
                "vision decoder returned {status}"
            )));
        }

        let body: serde_json::Value = response.json().await?;
        body.get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BridgeError::MediaError("vision decoder response carried no url".to_string())
            })
    }
}

/// Fetches http(s) URLs directly and maps `s3://bucket/key` URIs onto the
/// configured object-store gateway.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    object_store_endpoint: String,
}

impl HttpMediaFetcher {
    pub fn new(client: reqwest::Client, object_store_endpoint: impl Into<String>) -> Self {
        Self {
            client,
            object_store_endpoint: object_store_endpoint.into(),
        }
    }

    fn resolve_url(&self, uri: &str) -> Result<String> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(uri.to_string());
        }
        if let Some(path) = uri.strip_prefix("s3://") {
            return Ok(format!(
                "{}/{}",
                self.object_store_endpoint.trim_end_matches('/'),
                path
            ));
        }
        Err(BridgeError::MediaError(format!(
            "unsupported media scheme: {uri}"
        )))
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, uri: &str) -> Result<FetchedMedia> {
        let url = self.resolve_url(uri)?;
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::MediaError(format!(
                "fetch of {uri} returned {status}"
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok(FetchedMedia {
            bytes,
            content_type,
        })
    }
}

/// Forwards chat requests to the inference backend's OpenAI-compatible
/// endpoint. Whether the response is streamed is decided by the backend's
/// content type, not by the request.
pub struct HttpUpstreamBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstreamBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl UpstreamBackend for HttpUpstreamBackend {
    async fn chat_completion(&self, request: serde_json::Value) -> Result<UpstreamResponse> {
        let response = self
            .client
            .post(self.completions_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::HttpError(format!(
                "upstream returned {status}: {body}"
            )));
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_sse {
            let stream = response.bytes_stream().map_err(BridgeError::from).boxed();
            Ok(UpstreamResponse::Sse(stream))
        } else {
            Ok(UpstreamResponse::Buffered(response.text().await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpMediaFetcher {
        HttpMediaFetcher::new(reqwest::Client::new(), "http://minio:9000/")
    }

    #[test]
    fn object_store_uris_map_onto_gateway() {
        let url = fetcher().resolve_url("s3://renders/cat.png").unwrap();
        assert_eq!(url, "http://minio:9000/renders/cat.png");
    }

    #[test]
    fn http_urls_pass_through() {
        let url = fetcher().resolve_url("https://cdn.example.com/a.jpg").unwrap();
        assert_eq!(url, "https://cdn.example.com/a.jpg");
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(fetcher().resolve_url("ftp://host/file").is_err());
    }
}
