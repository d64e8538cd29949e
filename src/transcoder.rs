//! Stream transcoder
//!
//! Per-request state machine that consumes raw upstream chunks and re-emits
//! the client-facing stream. Owns one instance of the segmenter, the audio
//! pipeline, and the tool-call list; nothing is shared across requests.
//!
//! In text mode, content deltas run through the tag segmenter behind a
//! rolling lookback buffer so the audio-mode marker cannot be split across
//! emitted boundaries. The first sighting of the marker switches the request
//! into audio mode for good; from then on content deltas are parsed only for
//! audio tokens. Tool-call deltas are merged in either mode and flushed once at
//! end of stream, after image-generation arguments have been resolved into
//! self-contained payloads.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

use crate::audio::{AUDIO_MODE_MARKER, AudioPipeline, MODE_LOOKBACK_CHARS, PipelineEvent};
use crate::collaborators::AudioTokenDecoder;
use crate::config::BridgeConfig;
use crate::media::{MediaReference, MediaResolver, Resolution};
use crate::protocol::{
    AudioDelta, AudioProgress, ChatChunk, ChunkDelta, ImageProgress, StreamIdentity, ToolCallDelta,
};
use crate::segmenter::{Segment, SegmentKind, TagSegmenter};
use crate::sse::DONE_MARKER;
use crate::toolcall::{ToolCallBuilder, merge_deltas};

/// One unit of client-facing output.
#[derive(Debug, Clone)]
pub enum OutFrame {
    /// A transcoded or synthesized chunk.
    Chunk(ChatChunk),
    /// An upstream data payload forwarded verbatim (unparseable chunk).
    Raw(String),
    /// The terminal marker.
    Done,
}

pub struct StreamTranscoder {
    progress_interval: u64,
    identity: StreamIdentity,
    segmenter: TagSegmenter,
    audio: AudioPipeline,
    media: MediaResolver,

    /// Withheld tail of the last content delta; never longer than the
    /// audio-mode marker minus one character.
    lookback: String,
    /// Monotonic: once true, never reverts for the life of the request.
    audio_mode: bool,
    tool_calls: Vec<ToolCallBuilder>,
    image_fragments: u64,
    image_last_progress: u64,
    upstream_audio_sent: bool,
    finished: bool,
}

impl StreamTranscoder {
    /// Must be called inside a tokio runtime; spawns the decode worker.
    pub fn new(
        config: &BridgeConfig,
        decoder: Arc<dyn AudioTokenDecoder>,
        media: MediaResolver,
    ) -> Self {
        Self {
            progress_interval: config.progress_interval,
            identity: StreamIdentity::default(),
            segmenter: TagSegmenter::new(),
            audio: AudioPipeline::new(config, decoder),
            media,
            lookback: String::new(),
            audio_mode: false,
            tool_calls: Vec::new(),
            image_fragments: 0,
            image_last_progress: 0,
            upstream_audio_sent: false,
            finished: false,
        }
    }

    /// True once the request has switched into audio mode.
    pub fn audio_mode(&self) -> bool {
        self.audio_mode
    }

    /// Process one upstream SSE `data` payload.
    pub async fn on_event_data(&mut self, data: &str) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == DONE_MARKER {
            return self.finish().await;
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                // Preserve compatibility with an unexpected upstream shape.
                debug!(error = %e, "unparseable upstream chunk, forwarding verbatim");
                return vec![OutFrame::Raw(data.to_string())];
            }
        };

        let mut frames = Vec::new();
        self.process_chunk(&chunk, &mut frames).await;
        frames
    }

    /// Upstream closed without a terminal marker; finish the stream anyway.
    pub async fn finalize(&mut self) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finish().await
    }

    /// Buffered fallback: run the whole-response transformation over a
    /// single JSON completion body and synthesize a streaming response.
    pub async fn transcode_buffered(&mut self, body: &str) -> Vec<OutFrame> {
        if self.finished {
            return Vec::new();
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            let mut frames = vec![OutFrame::Raw(body.to_string())];
            frames.push(OutFrame::Done);
            self.finished = true;
            return frames;
        };

        let chunk = chunk_from_completion(&value);
        let mut frames = Vec::new();
        self.process_chunk(&chunk, &mut frames).await;
        frames.extend(self.finish().await);
        frames
    }

    async fn process_chunk(&mut self, chunk: &ChatChunk, frames: &mut Vec<OutFrame>) {
        self.identity.absorb(chunk);

        // Fragments decoded since the last upstream event.
        if self.audio_mode {
            let events = self.audio.poll();
            self.emit_pipeline_events(events, frames);
        }

        for choice in &chunk.choices {
            let delta = &choice.delta;
            if let Some(reasoning) = &delta.reasoning_content {
                frames.push(self.delta_frame(ChunkDelta {
                    reasoning_content: Some(reasoning.clone()),
                    ..Default::default()
                }));
            }
            if let Some(content) = &delta.content {
                self.on_content(content, frames);
            }
            if let Some(tool_calls) = &delta.tool_calls {
                self.on_tool_calls(tool_calls, frames);
            }
            if let Some(audio) = &delta.audio {
                self.on_upstream_audio(audio, frames).await;
            }
            if let Some(reason) = &choice.finish_reason {
                self.identity.ensure();
                let mut finish = self.identity.chunk_with_delta(ChunkDelta::default());
                finish.choices[0].finish_reason = Some(reason.clone());
                frames.push(OutFrame::Chunk(finish));
            }
        }
    }

    fn on_content(&mut self, content: &str, frames: &mut Vec<OutFrame>) {
        if self.audio_mode {
            let events = self.audio.feed_text(content);
            self.emit_pipeline_events(events, frames);
            return;
        }

        let mut combined = std::mem::take(&mut self.lookback);
        combined.push_str(content);

        if let Some(pos) = combined.find(AUDIO_MODE_MARKER) {
            // Irreversible switch. Emit everything before the marker through
            // the segmenter, then hand the remainder to the audio pipeline.
            debug!("audio-mode marker detected, switching modes");
            let mut segments = self.segmenter.feed(&combined[..pos]);
            segments.extend(self.segmenter.flush());
            self.emit_segments(segments, frames);

            self.audio_mode = true;
            let rest = &combined[pos + AUDIO_MODE_MARKER.len()..];
            let events = self.audio.feed_text(rest);
            self.emit_pipeline_events(events, frames);
            return;
        }

        let (head, tail) = split_lookback(&combined, MODE_LOOKBACK_CHARS);
        let segments = self.segmenter.feed(head);
        self.emit_segments(segments, frames);
        self.lookback = tail.to_string();
    }

    fn on_tool_calls(&mut self, deltas: &[ToolCallDelta], frames: &mut Vec<OutFrame>) {
        merge_deltas(&mut self.tool_calls, deltas);

        for delta in deltas {
            let has_args = delta
                .function
                .as_ref()
                .is_some_and(|f| f.arguments.is_some());
            let is_image = self
                .tool_calls
                .iter()
                .find(|c| c.index == delta.index)
                .is_some_and(ToolCallBuilder::is_image_generation);
            if has_args && is_image {
                self.image_fragments += 1;
            }
        }

        if self.image_fragments - self.image_last_progress >= self.progress_interval {
            self.image_last_progress = self.image_fragments;
            self.identity.ensure();
            frames.push(OutFrame::Chunk(self.identity.progress_chunk(
                None,
                Some(ImageProgress {
                    received: self.image_fragments,
                }),
            )));
        }
    }

    async fn on_upstream_audio(&mut self, audio: &AudioDelta, frames: &mut Vec<OutFrame>) {
        let mut normalized = audio.clone();
        if normalized.data.is_none()
            && let Some(url) = normalized.url.clone()
        {
            match self.media.resolve(&url, normalized.format.as_deref()).await {
                Resolution::Inline(payload) => {
                    normalized.data = Some(payload.data);
                    normalized.format = Some(
                        payload
                            .mime
                            .rsplit('/')
                            .next()
                            .unwrap_or("wav")
                            .to_string(),
                    );
                    normalized.url = None;
                }
                Resolution::Unresolved(_) => {
                    warn!(%url, "upstream audio reference left unresolved");
                }
            }
        }
        // Mark as already sent so the end-of-stream flush does not duplicate
        // the payload.
        self.upstream_audio_sent = true;
        frames.push(self.delta_frame(ChunkDelta {
            audio: Some(normalized),
            ..Default::default()
        }));
    }

    async fn finish(&mut self) -> Vec<OutFrame> {
        let mut frames = Vec::new();

        let mut final_audio = None;
        if self.audio_mode {
            // Defer the terminal marker until the decode queue drains.
            let (events, audio) = self.audio.finalize().await;
            self.emit_pipeline_events(events, &mut frames);
            final_audio = audio;
        } else {
            let withheld = std::mem::take(&mut self.lookback);
            let mut segments = self.segmenter.feed(&withheld);
            segments.extend(self.segmenter.flush());
            self.emit_segments(segments, &mut frames);
        }

        let mut trailing = ChunkDelta::default();
        if !self.tool_calls.is_empty() {
            self.resolve_image_arguments().await;
            trailing.tool_calls = Some(self.tool_calls.iter().map(ToolCallBuilder::to_delta).collect());
        }
        if let Some(wav) = final_audio
            && !self.upstream_audio_sent
        {
            trailing.audio = Some(AudioDelta {
                id: None,
                data: Some(BASE64.encode(&wav)),
                format: Some("wav".to_string()),
                transcript: None,
                url: None,
            });
        }
        if !trailing.is_empty() {
            frames.push(self.delta_frame(trailing));
        }

        frames.push(OutFrame::Done);
        self.finished = true;
        frames
    }

    /// Run each image-generation tool call's argument references through the
    /// media resolver so the client receives self-contained JSON.
    async fn resolve_image_arguments(&mut self) {
        for call in &mut self.tool_calls {
            if !call.is_image_generation() {
                continue;
            }
            let Ok(mut args) = serde_json::from_str::<serde_json::Value>(&call.arguments) else {
                warn!(index = call.index, "image tool arguments are not valid JSON, leaving as-is");
                continue;
            };
            let Some(object) = args.as_object_mut() else {
                continue;
            };
            for (_key, value) in object.iter_mut() {
                let Some(raw) = value.as_str() else { continue };
                if !MediaReference::classify(raw).needs_resolution() {
                    continue;
                }
                let resolved = self.media.resolve(raw, None).await;
                *value = serde_json::Value::String(resolved.into_string());
            }
            match serde_json::to_string(&args) {
                Ok(serialized) => call.arguments = serialized,
                Err(e) => warn!(error = %e, "failed to re-serialize image tool arguments"),
            }
        }
    }

    fn emit_segments(&mut self, segments: Vec<Segment>, frames: &mut Vec<OutFrame>) {
        for segment in segments {
            let delta = match segment.kind {
                SegmentKind::Content => ChunkDelta {
                    content: Some(segment.text),
                    ..Default::default()
                },
                SegmentKind::Reasoning => ChunkDelta {
                    reasoning_content: Some(segment.text),
                    ..Default::default()
                },
            };
            frames.push(self.delta_frame(delta));
        }
    }

    fn emit_pipeline_events(&mut self, events: Vec<PipelineEvent>, frames: &mut Vec<OutFrame>) {
        for event in events {
            match event {
                PipelineEvent::Progress { received, decoded } => {
                    self.identity.ensure();
                    frames.push(OutFrame::Chunk(self.identity.progress_chunk(
                        Some(AudioProgress { received, decoded }),
                        None,
                    )));
                }
                PipelineEvent::Fragment { wav_base64 } => {
                    frames.push(self.delta_frame(ChunkDelta {
                        audio: Some(AudioDelta {
                            id: None,
                            data: Some(wav_base64),
                            format: Some("wav".to_string()),
                            transcript: None,
                            url: None,
                        }),
                        ..Default::default()
                    }));
                }
            }
        }
    }

    fn delta_frame(&mut self, delta: ChunkDelta) -> OutFrame {
        self.identity.ensure();
        OutFrame::Chunk(self.identity.chunk_with_delta(delta))
    }
}

/// Split so that the last `keep` characters stay in the tail.
fn split_lookback(text: &str, keep: usize) -> (&str, &str) {
    let chars = text.chars().count();
    if chars <= keep {
        return ("", text);
    }
    let cut = text
        .char_indices()
        .nth(chars - keep)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text.split_at(cut)
}

/// Map a single non-streaming completion body onto the chunk shape so the
/// same state machine can transform it.
fn chunk_from_completion(value: &serde_json::Value) -> ChatChunk {
    let mut chunk = ChatChunk {
        id: value.get("id").and_then(|v| v.as_str()).map(str::to_string),
        object: None,
        created: value.get("created").and_then(|v| v.as_u64()),
        model: value
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        choices: Vec::new(),
        audio_progress: None,
        image_progress: None,
    };

    let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
        return chunk;
    };
    let message = choice.get("message").unwrap_or(&serde_json::Value::Null);

    let delta = ChunkDelta {
        role: message
            .get("role")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        reasoning_content: message
            .get("reasoning_content")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        tool_calls: message
            .get("tool_calls")
            .and_then(|v| serde_json::from_value::<Vec<ToolCallDelta>>(v.clone()).ok())
            .map(|mut calls| {
                for (i, call) in calls.iter_mut().enumerate() {
                    call.index = i as u32;
                }
                calls
            }),
        audio: message
            .get("audio")
            .and_then(|v| serde_json::from_value::<AudioDelta>(v.clone()).ok()),
    };

    chunk.choices.push(crate::protocol::ChunkChoice {
        index: 0,
        delta,
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    });
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lookback_is_char_safe() {
        assert_eq!(split_lookback("abcdefgh", 6), ("ab", "cdefgh"));
        assert_eq!(split_lookback("abc", 6), ("", "abc"));
        let (head, tail) = split_lookback("日本語テスト中です", 6);
        assert_eq!(head, "日本");
        assert_eq!(tail, "語テスト中です");
    }

    #[test]
    fn completion_body_maps_to_one_chunk() {
        let body = serde_json::json!({
            "id": "chatcmpl-9",
            "created": 7,
            "model": "omni-7b",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "hello",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{}"}
                    }]
                },
                "finish_reason": "stop"
            }]
        });
        let chunk = chunk_from_completion(&body);
        assert_eq!(chunk.id.as_deref(), Some("chatcmpl-9"));
        let delta = &chunk.choices[0].delta;
        assert_eq!(delta.content.as_deref(), Some("hello"));
        assert_eq!(delta.tool_calls.as_ref().unwrap()[0].index, 0);
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
