//! Tool-call delta merger
//!
//! Folds an unbounded sequence of partial tool-call deltas into a coherent
//! ordered set of complete tool calls. The backend may stream the arguments
//! string incrementally or resend the whole JSON value; a fragment that
//! begins with an object-opening token replaces the accumulator instead of
//! appending to it.

use crate::protocol::{FunctionDelta, ToolCallDelta};

/// One tool call under construction, keyed by its stable index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallBuilder {
    pub index: u32,
    pub id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallBuilder {
    /// True when this call targets the image-generation tool.
    pub fn is_image_generation(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.to_ascii_lowercase().contains("image"))
    }

    /// Render the completed call as a wire delta for the trailing chunk.
    pub fn to_delta(&self) -> ToolCallDelta {
        ToolCallDelta {
            index: self.index,
            id: self.id.clone(),
            kind: self.kind.clone().or_else(|| Some("function".to_string())),
            function: Some(FunctionDelta {
                name: self.name.clone(),
                arguments: Some(self.arguments.clone()),
            }),
        }
    }
}

/// Merge a batch of deltas into the ordered call list. `existing[index]` is
/// created on first sight; non-function fields are shallow-merged.
pub fn merge_deltas(existing: &mut Vec<ToolCallBuilder>, deltas: &[ToolCallDelta]) {
    for delta in deltas {
        let pos = match existing.iter().position(|c| c.index == delta.index) {
            Some(pos) => pos,
            None => {
                let insert_at = existing
                    .iter()
                    .position(|c| c.index > delta.index)
                    .unwrap_or(existing.len());
                existing.insert(
                    insert_at,
                    ToolCallBuilder {
                        index: delta.index,
                        ..Default::default()
                    },
                );
                insert_at
            }
        };
        let call = &mut existing[pos];

        if let Some(id) = &delta.id {
            call.id = Some(id.clone());
        }
        if let Some(kind) = &delta.kind {
            call.kind = Some(kind.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.name = Some(name.clone());
            }
            if let Some(fragment) = &function.arguments {
                if fragment.trim_start().starts_with('{') {
                    // Full resend of the arguments value.
                    call.arguments = fragment.clone();
                } else {
                    call.arguments.push_str(fragment);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: None,
            kind: None,
            function: Some(FunctionDelta {
                name: name.map(str::to_string),
                arguments: args.map(str::to_string),
            }),
        }
    }

    #[test]
    fn incremental_fragments_append_in_arrival_order() {
        let mut calls = Vec::new();
        merge_deltas(&mut calls, &[delta(0, Some("lookup"), Some("ab"))]);
        merge_deltas(&mut calls, &[delta(0, None, Some("cd"))]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, "abcd");
        assert_eq!(calls[0].name.as_deref(), Some("lookup"));
    }

    #[test]
    fn full_value_replaces_and_is_idempotent_under_replay() {
        let mut calls = Vec::new();
        let full = delta(0, Some("generate_image"), Some(r#"{"prompt":"cat"}"#));
        merge_deltas(&mut calls, &[full.clone()]);
        merge_deltas(&mut calls, &[full]);
        assert_eq!(calls[0].arguments, r#"{"prompt":"cat"}"#);
    }

    #[test]
    fn full_value_replaces_earlier_fragments() {
        let mut calls = Vec::new();
        merge_deltas(&mut calls, &[delta(0, None, Some(r#"{"pro"#))]);
        merge_deltas(&mut calls, &[delta(0, None, Some(r#"{"prompt":"dog"}"#))]);
        assert_eq!(calls[0].arguments, r#"{"prompt":"dog"}"#);
    }

    #[test]
    fn leading_whitespace_still_counts_as_full_resend() {
        let mut calls = Vec::new();
        merge_deltas(&mut calls, &[delta(0, None, Some("partial"))]);
        merge_deltas(&mut calls, &[delta(0, None, Some("  {\"a\":1}"))]);
        assert_eq!(calls[0].arguments, "  {\"a\":1}");
    }

    #[test]
    fn calls_are_kept_ordered_by_index() {
        let mut calls = Vec::new();
        merge_deltas(&mut calls, &[delta(2, Some("b"), None)]);
        merge_deltas(&mut calls, &[delta(0, Some("a"), None)]);
        merge_deltas(&mut calls, &[delta(1, Some("c"), None)]);
        let indexes: Vec<u32> = calls.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn identity_fields_are_shallow_merged() {
        let mut calls = Vec::new();
        merge_deltas(
            &mut calls,
            &[ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                kind: Some("function".to_string()),
                function: None,
            }],
        );
        merge_deltas(&mut calls, &[delta(0, Some("lookup"), Some("{}"))]);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].kind.as_deref(), Some("function"));
    }

    #[test]
    fn image_generation_detection_is_name_based() {
        let mut call = ToolCallBuilder {
            name: Some("generate_image".to_string()),
            ..Default::default()
        };
        assert!(call.is_image_generation());
        call.name = Some("lookup_weather".to_string());
        assert!(!call.is_image_generation());
        call.name = None;
        assert!(!call.is_image_generation());
    }

    #[test]
    fn to_delta_defaults_type_to_function() {
        let call = ToolCallBuilder {
            index: 3,
            name: Some("lookup".to_string()),
            arguments: "{}".to_string(),
            ..Default::default()
        };
        let wire = call.to_delta();
        assert_eq!(wire.kind.as_deref(), Some("function"));
        assert_eq!(wire.function.unwrap().arguments.as_deref(), Some("{}"));
    }
}
