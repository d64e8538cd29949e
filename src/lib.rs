//! # Omni Bridge - A Streaming Multimodal Transcoder
//!
//! Omni Bridge sits between an OpenAI-compatible chat client and a
//! multimodal inference backend. The backend emits chat-completion chunks
//! whose text interleaves visible content, `<think>` reasoning markup,
//! tool-call deltas, and inline audio token sentinels; the bridge transcodes
//! that stream, chunk by chunk, into clean client-facing SSE frames.
//!
#![deny(unsafe_code)]

//! ## What the bridge does
//!
//! - **Tag segmentation**: `<think>`/`</think>` markup is split out of content
//!   deltas into `reasoning_content`, safely across chunk boundaries.
//! - **Audio mode**: the first `<audio>` marker switches a request into audio
//!   mode for good; from then on `<|audio_N|>` sentinels are collected and
//!   decoded progressively through a serialized decode queue, with WAV
//!   fragments and progress counters emitted along the way.
//! - **Tool calls**: partial tool-call deltas are merged and flushed once at
//!   end of stream; image-generation arguments are resolved into
//!   self-contained data URIs first.
//! - **Media resolution**: http(s) URLs, object-store URIs, and vision
//!   tokens become inline base64 payloads with magic-byte MIME correction.
//!   Resolution failures degrade to the original reference, never abort the
//!   textual response.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use omni_bridge::{BridgeConfig, BridgeService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new("http://inference:8000")
//!         .with_audio_decoder_url("http://audio-decoder:9100/decode");
//!     let service = BridgeService::from_config(config);
//!
//!     let request = serde_json::json!({
//!         "model": "omni-7b",
//!         "stream": true,
//!         "messages": [{"role": "user", "content": "Say hi out loud"}],
//!     });
//!     let mut stream = service.chat_stream(request).await?;
//!
//!     use futures_util::StreamExt;
//!     while let Some(frame) = stream.next().await {
//!         print!("{}", String::from_utf8_lossy(&frame));
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod request;
pub mod segmenter;
pub mod sse;
pub mod toolcall;
pub mod transcoder;

pub use collaborators::{
    AudioBytesFormat, AudioTokenDecoder, DecodedAudio, FetchedMedia, MediaFetcher,
    UpstreamBackend, UpstreamResponse, VisionTokenDecoder,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use media::MediaResolver;
pub use protocol::{ChatChunk, ChunkDelta, StreamIdentity};
pub use request::{BridgeService, validate_chat_request};
pub use transcoder::{OutFrame, StreamTranscoder};
