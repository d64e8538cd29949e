//! Audio token extraction
//!
//! Audio tokens arrive embedded in text as `<|audio_N|>` sentinels, with N a
//! non-negative decimal. A token may be split across deltas, so the scanner
//! carries any suffix that could still complete a token into the next feed.
//! Non-token text is discarded except for a bounded tail kept for the
//! best-effort speaker heuristic.

/// Marker whose appearance switches the stream into audio mode.
pub const AUDIO_MODE_MARKER: &str = "<audio>";
/// Characters withheld from emission so the marker cannot be split across
/// emitted chunk boundaries.
pub const MODE_LOOKBACK_CHARS: usize = AUDIO_MODE_MARKER.len() - 1;

const TOKEN_PREFIX: &str = "<|audio_";
const TOKEN_SUFFIX: &str = "|>";

/// Chunk-boundary-safe `<|audio_N|>` scanner.
#[derive(Debug, Default)]
pub struct TokenScanner {
    carry: String,
}

impl TokenScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract every complete token from the carried suffix plus `text`.
    pub fn feed(&mut self, text: &str) -> Vec<u32> {
        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(text);

        let mut out = Vec::new();
        let mut pos = 0;
        while let Some(rel) = buf[pos..].find(TOKEN_PREFIX) {
            let digits_start = pos + rel + TOKEN_PREFIX.len();
            let digits_len = buf[digits_start..]
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(buf.len() - digits_start);
            let digits_end = digits_start + digits_len;

            if digits_end == buf.len() {
                // Token still streaming; everything from the sentinel start
                // waits for the next feed.
                self.carry = buf.split_off(pos + rel);
                return out;
            }
            if buf[digits_end..].starts_with(TOKEN_SUFFIX) && digits_len > 0 {
                if let Ok(token) = buf[digits_start..digits_end].parse::<u32>() {
                    out.push(token);
                }
                pos = digits_end + TOKEN_SUFFIX.len();
            } else if buf[digits_end..] == *"|" {
                // "|" may still grow into the closing "|>".
                self.carry = buf.split_off(pos + rel);
                return out;
            } else {
                // Malformed sentinel; skip past the prefix and rescan.
                pos = digits_start;
            }
        }

        // Keep any tail that is a proper prefix of the sentinel.
        let tail_start = partial_prefix_start(&buf[pos..]);
        self.carry = buf.split_off(pos + tail_start);
        out
    }

    /// End of stream: any incomplete sentinel in the carry is dropped.
    pub fn flush(&mut self) -> Vec<u32> {
        self.carry.clear();
        Vec::new()
    }
}

/// Offset of the longest suffix of `s` that is a non-empty proper prefix of
/// the token sentinel, or `s.len()` when there is none.
fn partial_prefix_start(s: &str) -> usize {
    let max = TOKEN_PREFIX.len().min(s.len());
    for take in (1..=max).rev() {
        let Some(start) = s.len().checked_sub(take) else {
            continue;
        };
        if !s.is_char_boundary(start) {
            continue;
        }
        if TOKEN_PREFIX.starts_with(&s[start..]) {
            return start;
        }
    }
    s.len()
}

/// Best-effort speaker identity: scan trailing content for an embedded JSON
/// blob carrying a `"speaker"` string. A hint, not a contract.
pub fn extract_speaker(text: &str) -> Option<String> {
    let close = text.rfind('}')?;
    let mut open = text[..close].rfind('{')?;
    loop {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[open..=close])
            && let Some(speaker) = value.get("speaker").and_then(|v| v.as_str())
        {
            return Some(speaker.to_string());
        }
        // Widen to the previous opening brace; the blob may nest.
        open = text[..open].rfind('{')?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&str]) -> Vec<u32> {
        let mut scanner = TokenScanner::new();
        let mut out = Vec::new();
        for c in chunks {
            out.extend(scanner.feed(c));
        }
        out.extend(scanner.flush());
        out
    }

    #[test]
    fn extracts_tokens_in_order() {
        assert_eq!(
            feed_all(&["<|audio_1|><|audio_22|><|audio_333|>"]),
            vec![1, 22, 333]
        );
    }

    #[test]
    fn token_split_across_feeds_is_reassembled() {
        assert_eq!(feed_all(&["<|aud", "io_12", "3|>"]), vec![123]);
        assert_eq!(feed_all(&["<|audio_45", "|>"]), vec![45]);
        assert_eq!(feed_all(&["<|audio_45|", ">"]), vec![45]);
    }

    #[test]
    fn interleaved_text_is_ignored() {
        assert_eq!(
            feed_all(&["noise <|audio_7|> more ", "noise <|audio_8|>"]),
            vec![7, 8]
        );
    }

    #[test]
    fn malformed_sentinels_are_skipped() {
        assert_eq!(feed_all(&["<|audio_|> <|audio_x|> <|audio_9|>"]), vec![9]);
    }

    #[test]
    fn incomplete_sentinel_at_end_of_stream_is_dropped() {
        assert_eq!(feed_all(&["<|audio_12"]), Vec::<u32>::new());
    }

    #[test]
    fn every_split_point_yields_the_same_tokens() {
        let text = "x<|audio_10|>y<|audio_20|><|audio_30|>z";
        for split in 0..=text.len() {
            assert_eq!(
                feed_all(&[&text[..split], &text[split..]]),
                vec![10, 20, 30],
                "failed at split {split}"
            );
        }
    }

    #[test]
    fn speaker_blob_is_found_in_trailing_text() {
        assert_eq!(
            extract_speaker(r#"tokens... {"speaker":"ava","rate":1.0}"#).as_deref(),
            Some("ava")
        );
    }

    #[test]
    fn speaker_blob_may_nest() {
        assert_eq!(
            extract_speaker(r#"{"meta":{"x":1},"speaker":"kai"}"#).as_deref(),
            Some("kai")
        );
    }

    #[test]
    fn missing_or_malformed_blob_yields_none() {
        assert_eq!(extract_speaker("no json here"), None);
        assert_eq!(extract_speaker(r#"{"voice":"ava"}"#), None);
        assert_eq!(extract_speaker("{broken"), None);
    }
}
