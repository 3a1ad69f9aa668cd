/// Field-level snapshot comparison for reviewers
///
/// Pure and deterministic: fields come out in lexicographic order and only
/// fields whose values differ are reported. Nothing here gates approval.
use super::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// One differing field between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Character-level segments when both sides are strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<Vec<TextSegment>>,
}

/// A run of text in an inline comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum TextSegment {
    Equal(String),
    Insert(String),
    Delete(String),
}

/// Compare two optional snapshots
pub fn diff(old: Option<&Snapshot>, new: Option<&Snapshot>) -> Vec<FieldChange> {
    let fields: BTreeSet<&String> = old
        .into_iter()
        .flat_map(|m| m.keys())
        .chain(new.into_iter().flat_map(|m| m.keys()))
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let old_value = old.and_then(|m| m.get(field)).cloned().unwrap_or(Value::Null);
            let new_value = new.and_then(|m| m.get(field)).cloned().unwrap_or(Value::Null);

            if old_value == new_value {
                return None;
            }

            let inline = match (&old_value, &new_value) {
                (Value::String(a), Value::String(b)) => Some(inline_diff(a, b)),
                _ => None,
            };

            Some(FieldChange {
                field: field.clone(),
                old_value,
                new_value,
                inline,
            })
        })
        .collect()
}

fn inline_diff(old: &str, new: &str) -> Vec<TextSegment> {
    dissimilar::diff(old, new)
        .into_iter()
        .map(|chunk| match chunk {
            dissimilar::Chunk::Equal(text) => TextSegment::Equal(text.to_string()),
            dissimilar::Chunk::Insert(text) => TextSegment::Insert(text.to_string()),
            dissimilar::Chunk::Delete(text) => TextSegment::Delete(text.to_string()),
        })
        .collect()
}
