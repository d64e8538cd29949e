//! Media reference resolution
//!
//! Turns any embedded media reference (inline data URI, remote URL,
//! object-store URI, or opaque vision-token string) into a self-contained
//! embeddable payload. Resolution is idempotent: an already-inline payload is
//! a no-op apart from magic-byte MIME correction, and every failure degrades
//! to the original reference instead of an error.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::warn;

use crate::collaborators::{MediaFetcher, VisionTokenDecoder};

/// Bracket-delimited sentinels that mark an opaque vision token.
pub const VISION_TOKEN_PREFIXES: [&str; 2] = ["<|vision_", "<|image_"];

/// A media reference as observed in a delta or tool-call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaReference {
    /// `data:<mime>;base64,<payload>`
    Inline { mime: String, data: String },
    /// http(s) URL
    Url(String),
    /// `s3://bucket/key`
    ObjectStore(String),
    /// Opaque token requiring a vision-decode call
    VisionToken(String),
    /// Anything else; never resolvable
    Opaque(String),
}

impl MediaReference {
    pub fn classify(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("data:")
            && let Some((mime, data)) = rest.split_once(";base64,")
        {
            return Self::Inline {
                mime: mime.to_string(),
                data: data.to_string(),
            };
        }
        if is_vision_token(raw) {
            return Self::VisionToken(raw.to_string());
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Self::Url(raw.to_string());
        }
        if raw.starts_with("s3://") {
            return Self::ObjectStore(raw.to_string());
        }
        Self::Opaque(raw.to_string())
    }

    /// True for references that still need work before they are embeddable.
    pub fn needs_resolution(&self) -> bool {
        !matches!(self, Self::Inline { .. } | Self::Opaque(_))
    }
}

pub fn is_vision_token(raw: &str) -> bool {
    raw.ends_with("|>") && VISION_TOKEN_PREFIXES.iter().any(|p| raw.starts_with(p))
}

/// A self-contained embeddable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    pub mime: String,
    /// Base64-encoded bytes.
    pub data: String,
}

impl InlinePayload {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Outcome of a resolve call. `Unresolved` carries the original reference;
/// the caller must treat it as a non-fatal omission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Inline(InlinePayload),
    Unresolved(String),
}

impl Resolution {
    /// The string to put back in place of the reference.
    pub fn into_string(self) -> String {
        match self {
            Self::Inline(payload) => payload.to_data_uri(),
            Self::Unresolved(original) => original,
        }
    }
}

/// Resolves media references by delegating to the fetch and vision-decode
/// collaborators. Re-entrant; holds no per-request state.
#[derive(Clone)]
pub struct MediaResolver {
    fetcher: Arc<dyn MediaFetcher>,
    vision: Arc<dyn VisionTokenDecoder>,
}

impl MediaResolver {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, vision: Arc<dyn VisionTokenDecoder>) -> Self {
        Self { fetcher, vision }
    }

    /// Resolve a raw reference string. `hint` is a format hint (extension or
    /// MIME) used when neither magic bytes nor response headers identify the
    /// payload.
    pub async fn resolve(&self, raw: &str, hint: Option<&str>) -> Resolution {
        match MediaReference::classify(raw) {
            MediaReference::Inline { mime, data } => {
                Resolution::Inline(correct_inline_mime(mime, data))
            }
            MediaReference::Url(uri) | MediaReference::ObjectStore(uri) => {
                self.fetch_inline(&uri, hint).await
            }
            MediaReference::VisionToken(token) => match self.vision.decode(&token).await {
                // The decoded reference is retrievable but not yet
                // self-contained; run it through the fetch path.
                Ok(uri) => match MediaReference::classify(&uri) {
                    MediaReference::Inline { mime, data } => {
                        Resolution::Inline(correct_inline_mime(mime, data))
                    }
                    MediaReference::Url(u) | MediaReference::ObjectStore(u) => {
                        match self.fetch_inline(&u, hint).await {
                            Resolution::Inline(p) => Resolution::Inline(p),
                            // Leave the original token in place, not the
                            // intermediate URI.
                            Resolution::Unresolved(_) => Resolution::Unresolved(raw.to_string()),
                        }
                    }
                    _ => Resolution::Unresolved(raw.to_string()),
                },
                Err(e) => {
                    warn!(error = %e, "vision token decode failed, leaving reference in place");
                    Resolution::Unresolved(raw.to_string())
                }
            },
            MediaReference::Opaque(original) => Resolution::Unresolved(original),
        }
    }

    async fn fetch_inline(&self, uri: &str, hint: Option<&str>) -> Resolution {
        match self.fetcher.fetch(uri).await {
            Ok(media) => {
                let mime = detect_mime(&media.bytes, media.content_type.as_deref(), uri, hint);
                Resolution::Inline(InlinePayload {
                    mime,
                    data: BASE64.encode(&media.bytes),
                })
            }
            Err(e) => {
                warn!(uri, error = %e, "media fetch failed, leaving reference in place");
                Resolution::Unresolved(uri.to_string())
            }
        }
    }
}

/// Correct a declared MIME against the payload's magic bytes. A payload whose
/// base64 does not decode is passed through unchanged.
fn correct_inline_mime(declared: String, data: String) -> InlinePayload {
    let mime = match BASE64.decode(&data) {
        Ok(bytes) => match sniff_image_mime(&bytes) {
            Some(sniffed) if sniffed != declared => sniffed,
            _ => declared,
        },
        Err(_) => declared,
    };
    InlinePayload { mime, data }
}

/// Magic-byte sniffing restricted to the signatures the backend emits.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<String> {
    let kind = infer::get(bytes)?;
    match kind.mime_type() {
        mime @ ("image/png" | "image/jpeg" | "image/webp") => Some(mime.to_string()),
        _ => None,
    }
}

/// MIME for fetched bytes: response headers first, then magic bytes, then the
/// URI extension, then the caller's hint.
fn detect_mime(bytes: &[u8], content_type: Option<&str>, uri: &str, hint: Option<&str>) -> String {
    if let Some(ct) = content_type {
        let ct = ct.split(';').next().unwrap_or(ct).trim();
        if !ct.is_empty() && ct != "application/octet-stream" {
            return ct.to_string();
        }
    }
    if let Some(mime) = infer::get(bytes).map(|k| k.mime_type().to_string()) {
        return mime;
    }
    if let Some(mime) = guess_mime_from_path_or_url(uri) {
        return mime;
    }
    if let Some(hint) = hint {
        if hint.contains('/') {
            return hint.to_string();
        }
        if let Some(mime) = guess_mime_from_path_or_url(&format!("x.{hint}")) {
            return mime;
        }
    }
    "application/octet-stream".to_string()
}

/// Guess MIME by extension. Common media types are mapped explicitly; the
/// long tail goes through `mime_guess`.
pub fn guess_mime_from_path_or_url(path_or_url: &str) -> Option<String> {
    let extension = path_or_url
        .rsplit('.')
        .next()?
        .split('?')
        .next()?
        .to_lowercase();

    let mime = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => {
            return mime_guess::from_ext(&extension)
                .first()
                .map(|m| m.essence_str().to_string());
        }
    };
    Some(mime.to_string())
}
