//! Five-way diff of the stored tool catalog against the upstream list

use std::collections::BTreeMap;

use crate::model::McpToolUpsert;

/// Result of diffing the stored catalog E against the upstream list L,
/// keyed by gateway tool name. The five sets partition
/// `names(L) union names(E)`.
#[derive(Debug, Default)]
pub struct ToolDiff {
    /// In L, not in E
    pub to_create: Vec<McpToolUpsert>,
    /// In E, not in L
    pub to_delete: Vec<McpToolUpsert>,
    /// In both, with a change to an embedding field (canonical name or
    /// normalized hashes)
    pub to_update_with_reembedding: Vec<McpToolUpsert>,
    /// In both, embedding fields unchanged but some other stored field
    /// differs (raw schema reordering, tags)
    pub to_update_without_reembedding: Vec<McpToolUpsert>,
    /// In both, identical
    pub unchanged: Vec<McpToolUpsert>,
}

/// Diff stored tools against the freshly fetched upstream list.
///
/// Tools are keyed by gateway name; a rename is a delete plus a create even
/// when description and schema are identical. Embedding-relevant change
/// detection uses the precomputed normalized hashes.
pub fn diff_tools(existing: &[McpToolUpsert], latest: &[McpToolUpsert]) -> ToolDiff {
    let existing_by_name: BTreeMap<&str, &McpToolUpsert> =
        existing.iter().map(|tool| (tool.name.as_str(), tool)).collect();
    let latest_by_name: BTreeMap<&str, &McpToolUpsert> =
        latest.iter().map(|tool| (tool.name.as_str(), tool)).collect();

    let mut diff = ToolDiff::default();

    for (name, new_tool) in &latest_by_name {
        match existing_by_name.get(name) {
            None => diff.to_create.push((*new_tool).clone()),
            Some(old_tool) => {
                let (fields_changed, embedding_fields_changed) =
                    compare_tool_fields(old_tool, new_tool);
                if embedding_fields_changed {
                    diff.to_update_with_reembedding.push((*new_tool).clone());
                } else if fields_changed {
                    diff.to_update_without_reembedding.push((*new_tool).clone());
                } else {
                    diff.unchanged.push((*new_tool).clone());
                }
            }
        }
    }

    for (name, old_tool) in &existing_by_name {
        if !latest_by_name.contains_key(name) {
            diff.to_delete.push((*old_tool).clone());
        }
    }

    diff
}

/// Returns (any field changed, embedding-relevant field changed)
fn compare_tool_fields(old: &McpToolUpsert, new: &McpToolUpsert) -> (bool, bool) {
    let embedding_fields_changed = old.tool_metadata.canonical_tool_name
        != new.tool_metadata.canonical_tool_name
        || old.tool_metadata.canonical_tool_description_hash
            != new.tool_metadata.canonical_tool_description_hash
        || old.tool_metadata.canonical_tool_input_schema_hash
            != new.tool_metadata.canonical_tool_input_schema_hash;

    // Non-embedding drift: tags, or raw text/schema that normalizes to the
    // same hash but should still be restored verbatim
    let other_fields_changed = old.tags != new.tags
        || old.description != new.description
        || old.input_schema != new.input_schema;

    (
        other_fields_changed || embedding_fields_changed,
        embedding_fields_changed,
    )
}
