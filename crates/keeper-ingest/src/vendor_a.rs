//! C3 (vendor-A half) — tree traversal, ordering policies, and per-conversation
//! model discovery for the `mapping`-shaped export.

use std::collections::{HashMap, HashSet};

use keeper_core::types::{CleanedMessage, Role, VendorAOrdering};

struct MappingNode {
    parent: Option<String>,
    message: Option<serde_json::Value>,
}

/// Parses the raw `mapping` object into a lookup keyed by node id.
fn parse_mapping(mapping: &serde_json::Map<String, serde_json::Value>) -> HashMap<String, MappingNode> {
    mapping
        .iter()
        .map(|(id, node)| {
            let parent = node
                .get("parent")
                .and_then(|p| p.as_str())
                .map(|s| s.to_string());
            let message = node.get("message").filter(|m| !m.is_null()).cloned();
            (id.clone(), MappingNode { parent, message })
        })
        .collect()
}

fn message_role(message: &serde_json::Value) -> Option<Role> {
    match message
        .get("author")
        .and_then(|a| a.get("role"))
        .and_then(|r| r.as_str())?
    {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

fn to_cleaned_message(message: &serde_json::Value, role: Role) -> CleanedMessage {
    let content_type = message
        .get("content")
        .and_then(|c| c.get("content_type"))
        .and_then(|t| t.as_str())
        .unwrap_or("text")
        .to_string();
    let parts: Vec<String> = message
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let create_time = message
        .get("create_time")
        .and_then(|t| t.as_f64())
        .map(|t| t as i64);
    let model = model_for_message(message);

    CleanedMessage {
        id: message.get("id").and_then(|v| v.as_str()).map(String::from),
        role,
        name: message
            .get("author")
            .and_then(|a| a.get("name"))
            .and_then(|n| n.as_str())
            .map(String::from),
        create_time,
        content_type,
        parts,
        text: None,
        model,
    }
}

const MODEL_KEYS: [&str; 3] = ["model_slug", "default_model_slug", "model"];

/// Searches `metadata` for the first non-empty value under the model key
/// priority order. Applies only meaningfully to assistant messages, but is
/// safe to call on any message shape.
fn model_for_message(message: &serde_json::Value) -> Option<String> {
    let metadata = message.get("metadata")?;
    for key in MODEL_KEYS {
        if let Some(v) = metadata.get(key).and_then(|v| v.as_str()) {
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

/// Walks the mapping per the requested ordering policy and returns the
/// filtered, normalized messages plus per-model occurrence tallies used by
/// `select_primary_model`.
pub fn walk_conversation(
    mapping: &serde_json::Map<String, serde_json::Value>,
    current_node: Option<&str>,
    roles: &[Role],
    ordering: VendorAOrdering,
) -> (Vec<CleanedMessage>, HashMap<String, usize>) {
    let nodes = parse_mapping(mapping);
    let role_set: HashSet<Role> = roles.iter().copied().collect();

    let mut model_message_counts: HashMap<String, usize> = HashMap::new();
    for node in nodes.values() {
        if let Some(message) = &node.message {
            if message_role(message) == Some(Role::Assistant) {
                if let Some(model) = model_for_message(message) {
                    *model_message_counts.entry(model).or_insert(0) += 1;
                }
            }
        }
    }

    let messages = match ordering {
        VendorAOrdering::Time => walk_by_time(mapping, &role_set),
        VendorAOrdering::CurrentPath => walk_current_path(&nodes, current_node, &role_set),
    };

    (messages, model_message_counts)
}

/// Iterates `mapping` in its own (JSON source) order rather than through the
/// `HashMap` lookup table, so that a stable sort keyed on `(hasCreateTime,
/// createTime)` keeps equal-timestamp messages in their original insertion
/// order, per the ordering contract.
fn walk_by_time(
    mapping: &serde_json::Map<String, serde_json::Value>,
    role_set: &HashSet<Role>,
) -> Vec<CleanedMessage> {
    let mut candidates: Vec<(bool, i64, CleanedMessage)> = Vec::new();
    for node in mapping.values() {
        let Some(message) = node.get("message").filter(|m| !m.is_null()) else {
            continue;
        };
        let Some(role) = message_role(message) else { continue };
        if !role_set.contains(&role) {
            continue;
        }
        let cleaned = to_cleaned_message(message, role);
        let has_create_time = cleaned.create_time.is_some();
        let time_key = cleaned.create_time.unwrap_or(i64::MIN);
        candidates.push((has_create_time, time_key, cleaned));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    candidates.into_iter().map(|(_, _, m)| m).collect()
}

fn walk_current_path(
    nodes: &HashMap<String, MappingNode>,
    current_node: Option<&str>,
    role_set: &HashSet<Role>,
) -> Vec<CleanedMessage> {
    let mut collected = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = current_node.map(|s| s.to_string());

    while let Some(id) = cursor {
        if !visited.insert(id.clone()) {
            break;
        }
        let Some(node) = nodes.get(&id) else { break };
        if let Some(message) = &node.message {
            if let Some(role) = message_role(message) {
                if role_set.contains(&role) {
                    collected.push(to_cleaned_message(message, role));
                }
            }
        }
        cursor = node.parent.clone();
    }

    collected.reverse();
    collected
}

/// Selects the primary model for a conversation: highest message count,
/// ties broken by the lexicographically greater model string.
pub fn select_primary_model(model_message_counts: &HashMap<String, usize>) -> Option<String> {
    model_message_counts
        .iter()
        .max_by(|(name_a, count_a), (name_b, count_b)| {
            count_a.cmp(count_b).then(name_a.cmp(name_b))
        })
        .map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(role: &str, text: &str, create_time: Option<f64>, model: Option<&str>) -> serde_json::Value {
        let mut metadata = json!({});
        if let Some(m) = model {
            metadata["model_slug"] = json!(m);
        }
        json!({
            "author": {"role": role},
            "content": {"content_type": "text", "parts": [text]},
            "create_time": create_time,
            "metadata": metadata,
        })
    }

    #[test]
    fn time_ordering_puts_missing_timestamps_first_then_sorts_ascending() {
        let mapping = json!({
            "a": {"parent": null, "message": msg("user", "no time", None, None)},
            "b": {"parent": "a", "message": msg("assistant", "early", Some(100.0), Some("gpt"))},
            "c": {"parent": "b", "message": msg("assistant", "late", Some(200.0), Some("gpt"))},
        });
        let mapping_obj = mapping.as_object().unwrap();
        let (messages, _) = walk_conversation(
            mapping_obj,
            None,
            &[Role::User, Role::Assistant],
            VendorAOrdering::Time,
        );
        let texts: Vec<String> = messages.iter().map(|m| m.resolved_text()).collect();
        assert_eq!(texts, vec!["no time", "early", "late"]);
    }

    #[test]
    fn current_path_walks_parents_and_reverses() {
        let mapping = json!({
            "root": {"parent": null, "message": null},
            "a": {"parent": "root", "message": msg("user", "hi", Some(1.0), None)},
            "b": {"parent": "a", "message": msg("assistant", "hello", Some(2.0), Some("gpt"))},
        });
        let mapping_obj = mapping.as_object().unwrap();
        let (messages, _) = walk_conversation(
            mapping_obj,
            Some("b"),
            &[Role::User, Role::Assistant],
            VendorAOrdering::CurrentPath,
        );
        let texts: Vec<String> = messages.iter().map(|m| m.resolved_text()).collect();
        assert_eq!(texts, vec!["hi", "hello"]);
    }

    #[test]
    fn current_path_breaks_cycles_via_visited_set() {
        let mapping = json!({
            "a": {"parent": "b", "message": msg("user", "a", Some(1.0), None)},
            "b": {"parent": "a", "message": msg("user", "b", Some(2.0), None)},
        });
        let mapping_obj = mapping.as_object().unwrap();
        let (messages, _) = walk_conversation(
            mapping_obj,
            Some("a"),
            &[Role::User],
            VendorAOrdering::CurrentPath,
        );
        // a cycle of length 2 visits each node once before breaking
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn primary_model_tie_break_picks_lexicographically_greater() {
        let mut counts = HashMap::new();
        counts.insert("gpt-4".to_string(), 3);
        counts.insert("gpt-5".to_string(), 3);
        assert_eq!(select_primary_model(&counts), Some("gpt-5".to_string()));
    }

    #[test]
    fn primary_model_picks_highest_count() {
        let mut counts = HashMap::new();
        counts.insert("gpt-4".to_string(), 1);
        counts.insert("gpt-5".to_string(), 9);
        assert_eq!(select_primary_model(&counts), Some("gpt-5".to_string()));
    }
}
