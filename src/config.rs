//! Bridge configuration
//!
//! Tunables for the streaming transcoder and the collaborator endpoints.
//! Values only; loading them from the environment is the host's concern.

use serde::Deserialize;

/// Configuration for one bridge instance.
///
/// All per-request state lives in the transcoder; this struct is cheap to
/// clone and shared read-only across requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the upstream inference backend
    pub upstream_base_url: String,
    /// Endpoint of the audio token decode service
    pub audio_decoder_url: String,
    /// Endpoint of the vision token decode service
    pub vision_decoder_url: String,
    /// Gateway endpoint for `s3://` object-store fetches
    pub object_store_endpoint: String,

    /// Audio tokens per progressive decode call
    pub audio_chunk_tokens: usize,
    /// Hard ceiling on lifetime audio tokens per request
    pub max_audio_tokens: usize,
    /// Fewer accumulated tokens than this are not decodable
    pub min_decode_tokens: usize,
    /// Emit an audio progress chunk every this many received tokens
    pub progress_interval: u64,
    /// Suppress inline emission of encoded fragments larger than this
    pub max_inline_audio_chars: usize,
    /// Speaker identity used when none is found in the stream
    pub default_speaker: String,
    /// Output sample rate in Hz (mono, 16-bit)
    pub sample_rate: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "http://127.0.0.1:8000".to_string(),
            audio_decoder_url: "http://127.0.0.1:8001/decode".to_string(),
            vision_decoder_url: "http://127.0.0.1:8002/decode".to_string(),
            object_store_endpoint: "http://127.0.0.1:9000".to_string(),
            audio_chunk_tokens: 150,
            max_audio_tokens: 2000,
            min_decode_tokens: 3,
            progress_interval: 10,
            max_inline_audio_chars: 400_000,
            default_speaker: "default".to_string(),
            sample_rate: 24_000,
        }
    }
}

impl BridgeConfig {
    pub fn new(upstream_base_url: impl Into<String>) -> Self {
        Self {
            upstream_base_url: upstream_base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_audio_decoder_url(mut self, url: impl Into<String>) -> Self {
        self.audio_decoder_url = url.into();
        self
    }

    pub fn with_vision_decoder_url(mut self, url: impl Into<String>) -> Self {
        self.vision_decoder_url = url.into();
        self
    }

    pub fn with_object_store_endpoint(mut self, url: impl Into<String>) -> Self {
        self.object_store_endpoint = url.into();
        self
    }

    pub fn with_audio_chunk_tokens(mut self, tokens: usize) -> Self {
        self.audio_chunk_tokens = tokens;
        self
    }

    pub fn with_max_audio_tokens(mut self, tokens: usize) -> Self {
        self.max_audio_tokens = tokens;
        self
    }

    pub fn with_progress_interval(mut self, tokens: u64) -> Self {
        self.progress_interval = tokens;
        self
    }

    pub fn with_max_inline_audio_chars(mut self, chars: usize) -> Self {
        self.max_inline_audio_chars = chars;
        self
    }

    pub fn with_default_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.default_speaker = speaker.into();
        self
    }

    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = hz;
        self
    }
}
