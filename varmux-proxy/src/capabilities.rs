//! Capability union across variants.
//!
//! The front server advertises whatever any variant can do: a boolean
//! sub-flag is set iff at least one variant sets it, marker capabilities
//! use the first non-empty occurrence, and experimental extensions merge
//! key-wise with the first writer winning.

use std::collections::HashMap;

use varmux_mcp::messages::{
    PromptsCapability, ResourcesCapability, ServerCapabilities, ToolsCapability,
};

/// Union the capability sets of all variants into the set the front server
/// advertises.
pub fn union(capability_sets: &[ServerCapabilities]) -> ServerCapabilities {
    ServerCapabilities {
        tools: union_tools(capability_sets),
        resources: union_resources(capability_sets),
        prompts: union_prompts(capability_sets),
        completions: first_marker(capability_sets, |c| c.completions.as_ref().map(|m| (m, !m.extra.is_empty()))),
        logging: first_marker(capability_sets, |c| c.logging.as_ref().map(|m| (m, !m.extra.is_empty()))),
        experimental: union_experimental(capability_sets),
    }
}

fn union_tools(sets: &[ServerCapabilities]) -> Option<ToolsCapability> {
    let present: Vec<&ToolsCapability> = sets.iter().filter_map(|c| c.tools.as_ref()).collect();
    if present.is_empty() {
        return None;
    }
    Some(ToolsCapability {
        list_changed: or_flag(present.iter().map(|c| c.list_changed)),
    })
}

fn union_resources(sets: &[ServerCapabilities]) -> Option<ResourcesCapability> {
    let present: Vec<&ResourcesCapability> =
        sets.iter().filter_map(|c| c.resources.as_ref()).collect();
    if present.is_empty() {
        return None;
    }
    Some(ResourcesCapability {
        subscribe: or_flag(present.iter().map(|c| c.subscribe)),
        list_changed: or_flag(present.iter().map(|c| c.list_changed)),
    })
}

fn union_prompts(sets: &[ServerCapabilities]) -> Option<PromptsCapability> {
    let present: Vec<&PromptsCapability> = sets.iter().filter_map(|c| c.prompts.as_ref()).collect();
    if present.is_empty() {
        return None;
    }
    Some(PromptsCapability {
        list_changed: or_flag(present.iter().map(|c| c.list_changed)),
    })
}

// OR across variants; the flag stays absent only when no variant mentions
// it.
fn or_flag(flags: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut seen = false;
    let mut value = false;
    for flag in flags.flatten() {
        seen = true;
        value |= flag;
    }
    seen.then_some(value)
}

// Marker capabilities (completions, logging): first non-empty occurrence
// wins, falling back to the first occurrence of any kind.
fn first_marker<'a, T: Clone + 'a>(
    sets: &'a [ServerCapabilities],
    extract: impl Fn(&'a ServerCapabilities) -> Option<(&'a T, bool)>,
) -> Option<T> {
    let occurrences: Vec<(&T, bool)> = sets.iter().filter_map(&extract).collect();
    occurrences
        .iter()
        .find(|(_, non_empty)| *non_empty)
        .or_else(|| occurrences.first())
        .map(|(marker, _)| (*marker).clone())
}

// Key-wise union; on key collision the first registered variant wins.
fn union_experimental(sets: &[ServerCapabilities]) -> Option<HashMap<String, serde_json::Value>> {
    let mut merged: HashMap<String, serde_json::Value> = HashMap::new();
    for set in sets {
        if let Some(experimental) = &set.experimental {
            for (key, value) in experimental {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    (!merged.is_empty()).then_some(merged)
}
