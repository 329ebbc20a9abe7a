//! Memory candidate / lorebook-entry dedup and compaction.
//!
//! Adapted from the teacher's `MemoryManager::learn`: that method resolved
//! a conflicting row by confidence (newer wins only if `>=` the existing
//! row) and kept a single value. Here two candidates that collide on
//! dedup signature get merged rather than one replacing the other — keys
//! union, priority takes the max, and content keeps the longer string —
//! since a compacted memory should accumulate detail across a run rather
//! than pick a winner and discard the rest.

use std::collections::HashMap;

use keeper_core::types::{dedup_signature, LorebookEntry, MemoryCandidate};

/// Compacts a candidate list: candidates sharing a dedup signature are
/// merged into one, in order of first appearance. Merging two candidates
/// unions their keys (case-insensitively, stably), takes the higher
/// priority, and keeps the longer content string; `source_conversation`/
/// `source_date` fill in only if the surviving entry didn't already have
/// one. Idempotent: compacting an already-compacted list is a no-op,
/// since every surviving signature is already unique.
pub fn compact_candidates(candidates: Vec<MemoryCandidate>) -> Vec<MemoryCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut by_signature: HashMap<String, MemoryCandidate> = HashMap::new();

    for candidate in candidates {
        let signature = dedup_signature(&candidate.content, &candidate.keys);
        match by_signature.get_mut(&signature) {
            Some(existing) => merge_candidate(existing, candidate),
            None => {
                order.push(signature.clone());
                by_signature.insert(signature, candidate);
            }
        }
    }

    order
        .into_iter()
        .map(|signature| by_signature.remove(&signature).expect("signature was just inserted"))
        .collect()
}

fn merge_candidate(existing: &mut MemoryCandidate, incoming: MemoryCandidate) {
    union_keys(&mut existing.keys, &incoming.keys);
    existing.priority = existing.priority.max(incoming.priority);
    if incoming.content.len() > existing.content.len() {
        existing.content = incoming.content;
    }
    if existing.source_conversation.is_none() {
        existing.source_conversation = incoming.source_conversation;
    }
    if existing.source_date.is_none() {
        existing.source_date = incoming.source_date;
    }
}

/// Unions `incoming` into `keys`, case-insensitively and stably: a key
/// already present (by any casing) is skipped, a new one is appended in
/// the order it was first seen.
fn union_keys(keys: &mut Vec<String>, incoming: &[String]) {
    let mut seen: std::collections::HashSet<String> =
        keys.iter().map(|k| k.to_lowercase()).collect();
    for key in incoming {
        let lowered = key.to_lowercase();
        if seen.insert(lowered) {
            keys.push(key.clone());
        }
    }
}

/// Caps a compacted candidate list at `max_memories`, preferring higher
/// priority, then converts survivors into lorebook entries. Callers pass
/// an already-`compact_candidates`-deduplicated list (the final lorebook
/// is also re-compacted after persona/memory synthesis per the two-pass
/// rule, so cap after the second compaction, not the first).
pub fn shape_lorebook(mut candidates: Vec<MemoryCandidate>, max_memories: usize) -> Vec<LorebookEntry> {
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    candidates
        .into_iter()
        .take(max_memories)
        .map(|c| LorebookEntry {
            name: c.name,
            keys: c.keys,
            content: c.content,
            category: c.category,
            priority: c.priority,
            source_conversation: c.source_conversation,
            source_date: c.source_date,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::types::MemoryCategory;

    fn candidate(name: &str, keys: &[&str], content: &str, priority: i64) -> MemoryCandidate {
        MemoryCandidate {
            name: name.to_string(),
            keys: keys.iter().map(|s| s.to_string()).collect(),
            content: content.to_string(),
            category: MemoryCategory::SharedMemory,
            priority,
            source_conversation: None,
            source_date: None,
        }
    }

    #[test]
    fn merges_duplicate_signature_union_keys_max_priority_longer_content() {
        let a = candidate("likes", &["coffee"], "enjoys black coffee", 2);
        let b = candidate("likes", &["Coffee", "mornings"], "enjoys black coffee in the morning", 5);
        let compacted = compact_candidates(vec![a, b]);
        assert_eq!(compacted.len(), 1);
        let merged = &compacted[0];
        assert_eq!(merged.priority, 5);
        assert_eq!(merged.content, "enjoys black coffee in the morning");
        assert_eq!(merged.keys, vec!["coffee".to_string(), "mornings".to_string()]);
    }

    #[test]
    fn case_and_whitespace_variants_collapse_to_one_signature() {
        let a = candidate("a", &["Foo", "Bar"], "Hello   World", 1);
        let b = candidate("a", &["bar", "foo"], "hello world", 1);
        assert_eq!(compact_candidates(vec![a, b]).len(), 1);
    }

    #[test]
    fn distinct_signatures_are_kept_separate() {
        let a = candidate("a", &["x"], "first thing", 1);
        let b = candidate("b", &["y"], "second thing", 1);
        assert_eq!(compact_candidates(vec![a, b]).len(), 2);
    }

    #[test]
    fn compaction_is_idempotent() {
        let a = candidate("a", &["x"], "likes tea", 1);
        let b = candidate("a", &["x", "tea"], "likes tea very much", 3);
        let c = candidate("c", &["z"], "unrelated", 0);
        let once = compact_candidates(vec![a, b, c]);
        let twice = compact_candidates(once.clone());
        let sig = |xs: &[MemoryCandidate]| -> Vec<String> {
            xs.iter().map(|x| dedup_signature(&x.content, &x.keys)).collect()
        };
        assert_eq!(sig(&once), sig(&twice));
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn fills_in_source_fields_only_when_previously_empty() {
        let mut a = candidate("a", &["x"], "same signature content", 1);
        a.source_conversation = Some("conv-1".to_string());
        let mut b = candidate("a", &["x"], "same signature content", 2);
        b.source_conversation = Some("conv-2".to_string());
        b.source_date = Some("2026-01-01".to_string());
        let compacted = compact_candidates(vec![a, b]);
        assert_eq!(compacted[0].source_conversation, Some("conv-1".to_string()));
        assert_eq!(compacted[0].source_date, Some("2026-01-01".to_string()));
    }

    #[test]
    fn shape_lorebook_caps_and_orders_by_priority() {
        let xs = vec![
            candidate("a", &["x"], "low", 1),
            candidate("b", &["y"], "high", 9),
            candidate("c", &["z"], "mid", 4),
        ];
        let entries = shape_lorebook(xs, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "high");
        assert_eq!(entries[1].content, "mid");
    }
}
