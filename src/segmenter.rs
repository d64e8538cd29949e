//! Tag-boundary segmenter
//!
//! Splits a running text stream into content and reasoning segments around
//! the `<think>`/`</think>` pair. The pair may be split across separate input
//! chunks, so the tail of every feed that could still turn into a tag is
//! carried into the next call instead of being emitted.

/// Opening reasoning tag.
pub const THINK_START: &str = "<think>";
/// Closing reasoning tag.
pub const THINK_END: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Content,
    Reasoning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Two-state scanner: OUTSIDE emits content and looks for the start tag,
/// INSIDE emits reasoning and looks for the end tag.
#[derive(Debug, Default)]
pub struct TagSegmenter {
    carry: String,
    inside: bool,
}

impl TagSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while scanning inside a reasoning block.
    pub fn is_inside(&self) -> bool {
        self.inside
    }

    fn current_kind(&self) -> SegmentKind {
        if self.inside {
            SegmentKind::Reasoning
        } else {
            SegmentKind::Content
        }
    }

    /// Feed the next text chunk, returning completed segments in order.
    ///
    /// A single call may flip state multiple times when it contains several
    /// complete tag pairs.
    pub fn feed(&mut self, text: &str) -> Vec<Segment> {
        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(text);

        let mut out = Vec::new();
        loop {
            let tag = if self.inside { THINK_END } else { THINK_START };
            match buf.find(tag) {
                Some(pos) => {
                    if pos > 0 {
                        push_segment(&mut out, self.current_kind(), &buf[..pos]);
                    }
                    buf.drain(..pos + tag.len());
                    self.inside = !self.inside;
                }
                None => {
                    // A prefix of the tag might still be waiting for the rest
                    // in the next call; hold back the last tag-length-minus-one
                    // characters and emit everything before them.
                    let withhold = tag.len() - 1;
                    let cut = cut_index(&buf, withhold);
                    if cut > 0 {
                        push_segment(&mut out, self.current_kind(), &buf[..cut]);
                    }
                    self.carry = buf.split_off(cut);
                    return out;
                }
            }
        }
    }

    /// End of stream: emit whatever is carried, tagged with the current
    /// state's kind. An unterminated start tag degrades to reasoning text.
    pub fn flush(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let carried = std::mem::take(&mut self.carry);
        push_segment(&mut out, self.current_kind(), &carried);
        out
    }
}

fn push_segment(out: &mut Vec<Segment>, kind: SegmentKind, text: &str) {
    if text.is_empty() {
        return;
    }
    // Coalesce with the previous segment when the kind did not change.
    if let Some(last) = out.last_mut()
        && last.kind == kind
    {
        last.text.push_str(text);
        return;
    }
    out.push(Segment {
        kind,
        text: text.to_string(),
    });
}

/// Byte index that keeps the last `withhold` characters in the buffer.
fn cut_index(buf: &str, withhold: usize) -> usize {
    let chars = buf.chars().count();
    if chars <= withhold {
        return 0;
    }
    buf.char_indices()
        .nth(chars - withhold)
        .map(|(i, _)| i)
        .unwrap_or(0)
}
