//! Seed derivation (spec §4.5) — reproducible "no seed" runs across
//! restarts given identical inputs.

use keeper_core::fingerprint::stable_hash_u32;
use keeper_core::types::SamplingPolicy;

/// Fields hashed when the caller supplies no explicit seed, in the fixed
/// order the spec requires for reproducibility.
pub struct SeedInputs<'a> {
    pub resolved_model_dir: &'a str,
    pub primary_model: &'a str,
    pub companion_name: &'a str,
    pub sample_size: usize,
    pub sampling_mode: SamplingPolicy,
    pub messages_per_conversation: usize,
    pub chars_per_conversation: usize,
    pub total_chars_budget: usize,
    pub prompt_override_digest: &'a str,
}

pub fn resolve_seed(explicit_seed: Option<u64>, inputs: &SeedInputs) -> u64 {
    if let Some(seed) = explicit_seed {
        return seed;
    }
    let sampling_mode = match inputs.sampling_mode {
        SamplingPolicy::Top => "top",
        SamplingPolicy::RandomUniform => "random-uniform",
        SamplingPolicy::WeightedRandom => "weighted-random",
    };
    let sample_size = inputs.sample_size.to_string();
    let messages_per_conversation = inputs.messages_per_conversation.to_string();
    let chars_per_conversation = inputs.chars_per_conversation.to_string();
    let total_chars_budget = inputs.total_chars_budget.to_string();

    stable_hash_u32(&[
        inputs.resolved_model_dir,
        inputs.primary_model,
        inputs.companion_name,
        &sample_size,
        sampling_mode,
        &messages_per_conversation,
        &chars_per_conversation,
        &total_chars_budget,
        inputs.prompt_override_digest,
    ]) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> SeedInputs<'static> {
        SeedInputs {
            resolved_model_dir: "/cache/fp/m-a",
            primary_model: "m-a",
            companion_name: "Nova",
            sample_size: 12,
            sampling_mode: SamplingPolicy::WeightedRandom,
            messages_per_conversation: 40,
            chars_per_conversation: 4000,
            total_chars_budget: 40000,
            prompt_override_digest: "none",
        }
    }

    #[test]
    fn explicit_seed_is_used_verbatim() {
        assert_eq!(resolve_seed(Some(42), &inputs()), 42);
    }

    #[test]
    fn derived_seed_is_deterministic() {
        let a = resolve_seed(None, &inputs());
        let b = resolve_seed(None, &inputs());
        assert_eq!(a, b);
    }

    #[test]
    fn derived_seed_changes_with_any_input() {
        let base = resolve_seed(None, &inputs());
        let mut changed = inputs();
        changed.companion_name = "Luma";
        assert_ne!(base, resolve_seed(None, &changed));
    }
}
