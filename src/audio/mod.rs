//! Audio token handling
//!
//! Sentinel extraction plus the progressive decode pipeline.

mod pipeline;
mod tokens;

pub use pipeline::{AudioPipeline, PipelineEvent};
pub use tokens::{AUDIO_MODE_MARKER, MODE_LOOKBACK_CHARS, TokenScanner, extract_speaker};
