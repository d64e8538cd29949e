//! OpenAI-compatible chunk wire types
//!
//! The upstream backend and the client both speak the chat-completion-chunk
//! shape; the bridge extends it with optional `audio_progress` and
//! `image_progress` fields on progress-only chunks. Unknown upstream fields
//! are tolerated on the way in and never invented on the way out.

use serde::{Deserialize, Serialize};

/// One unit of the wire protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_progress: Option<AudioProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_progress: Option<ImageProgress>,
}

/// A single choice within a chunk. The bridge only synthesizes index 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Optional-field delta record. Each field is handled independently by the
/// transcoder; a chunk may carry any combination of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioDelta>,
}

impl ChunkDelta {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.reasoning_content.is_none()
            && self.tool_calls.is_none()
            && self.audio.is_none()
    }
}

/// Partial tool call carried by a delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Audio payload on a delta: either inline base64 WAV data or a reference
/// the bridge normalizes before forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Audio pipeline progress, token counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProgress {
    pub received: u64,
    pub decoded: u64,
}

/// Image-generation argument progress, fragment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProgress {
    pub received: u64,
}

/// Identity fields carried from the first upstream chunk that defines them
/// and reused for every synthesized chunk in the same response.
#[derive(Debug, Clone, Default)]
pub struct StreamIdentity {
    pub id: Option<String>,
    pub created: Option<u64>,
    pub model: Option<String>,
}

impl StreamIdentity {
    /// Absorb identity fields from an upstream chunk, first writer wins.
    pub fn absorb(&mut self, chunk: &ChatChunk) {
        if self.id.is_none() {
            self.id = chunk.id.clone();
        }
        if self.created.is_none() {
            self.created = chunk.created;
        }
        if self.model.is_none() {
            self.model = chunk.model.clone();
        }
    }

    /// Fill in synthesized identity when the upstream never provided one.
    pub fn ensure(&mut self) {
        if self.id.is_none() {
            self.id = Some(format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));
        }
        if self.created.is_none() {
            self.created = Some(chrono::Utc::now().timestamp().max(0) as u64);
        }
    }

    /// A chunk stamped with this identity and one choice-0 delta.
    pub fn chunk_with_delta(&self, delta: ChunkDelta) -> ChatChunk {
        ChatChunk {
            id: self.id.clone(),
            object: Some("chat.completion.chunk".to_string()),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            audio_progress: None,
            image_progress: None,
        }
    }

    /// A progress-only chunk: empty delta, counters attached at the top level.
    pub fn progress_chunk(
        &self,
        audio: Option<AudioProgress>,
        image: Option<ImageProgress>,
    ) -> ChatChunk {
        let mut chunk = self.chunk_with_delta(ChunkDelta::default());
        chunk.audio_progress = audio;
        chunk.image_progress = image;
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upstream_chunk_with_reasoning_and_tool_calls() {
        let data = r#"{
            "id":"chatcmpl-1","object":"chat.completion.chunk","created":1718345013,
            "model":"omni-7b",
            "choices":[{"index":0,"delta":{
                "reasoning_content":"thinking...",
                "tool_calls":[{"index":0,"id":"call_1","type":"function",
                    "function":{"name":"generate_image","arguments":"{\"pr"}}]
            },"finish_reason":null}]
        }"#;
        let chunk: ChatChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.id.as_deref(), Some("chatcmpl-1"));
        let delta = &chunk.choices[0].delta;
        assert_eq!(delta.reasoning_content.as_deref(), Some("thinking..."));
        let tc = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.function.as_ref().unwrap().name.as_deref(), Some("generate_image"));
    }

    #[test]
    fn empty_optional_fields_are_omitted_from_output() {
        let mut identity = StreamIdentity::default();
        identity.ensure();
        let chunk = identity.chunk_with_delta(ChunkDelta {
            content: Some("hi".to_string()),
            ..Default::default()
        });
        let json = serde_json::to_value(&chunk).unwrap();
        let delta = &json["choices"][0]["delta"];
        assert_eq!(delta["content"], "hi");
        assert!(delta.get("reasoning_content").is_none());
        assert!(delta.get("audio").is_none());
        assert!(json.get("audio_progress").is_none());
    }

    #[test]
    fn identity_is_absorbed_once() {
        let mut identity = StreamIdentity::default();
        let first: ChatChunk =
            serde_json::from_str(r#"{"id":"a","created":1,"model":"m","choices":[]}"#).unwrap();
        let second: ChatChunk =
            serde_json::from_str(r#"{"id":"b","created":2,"model":"n","choices":[]}"#).unwrap();
        identity.absorb(&first);
        identity.absorb(&second);
        assert_eq!(identity.id.as_deref(), Some("a"));
        assert_eq!(identity.created, Some(1));
        assert_eq!(identity.model.as_deref(), Some("m"));
    }

    #[test]
    fn progress_chunk_has_empty_delta() {
        let mut identity = StreamIdentity::default();
        identity.ensure();
        let chunk = identity.progress_chunk(
            Some(AudioProgress {
                received: 20,
                decoded: 0,
            }),
            None,
        );
        assert!(chunk.choices[0].delta.is_empty());
        assert_eq!(chunk.audio_progress.unwrap().received, 20);
    }
}
