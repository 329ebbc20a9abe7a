//! Selection policies (spec §4.5): `top`, `random-uniform`, `weighted-random`.

use keeper_core::types::{ConversationScore, SamplingPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn select(
    policy: SamplingPolicy,
    scores: Vec<ConversationScore>,
    sample_size: usize,
    seed: u64,
) -> Vec<ConversationScore> {
    match policy {
        SamplingPolicy::Top => select_top(scores, sample_size),
        SamplingPolicy::RandomUniform => select_random_uniform(scores, sample_size, seed),
        SamplingPolicy::WeightedRandom => select_weighted_random(scores, sample_size, seed),
    }
}

fn select_top(mut scores: Vec<ConversationScore>, sample_size: usize) -> Vec<ConversationScore> {
    scores.sort_by(|a, b| {
        b.assistant_chars
            .cmp(&a.assistant_chars)
            .then(b.assistant_turns.cmp(&a.assistant_turns))
            .then(b.turns.cmp(&a.turns))
            .then(a.file_name.cmp(&b.file_name))
    });
    scores.truncate(sample_size);
    scores
}

fn select_random_uniform(
    mut scores: Vec<ConversationScore>,
    sample_size: usize,
    seed: u64,
) -> Vec<ConversationScore> {
    // Sort by file name first so the shuffle itself is the only source of
    // nondeterminism — iteration order off disk is not guaranteed stable.
    scores.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    let mut rng = StdRng::seed_from_u64(seed);
    shuffle(&mut scores, &mut rng);
    scores.truncate(sample_size);
    scores
}

fn select_weighted_random(
    mut scores: Vec<ConversationScore>,
    sample_size: usize,
    seed: u64,
) -> Vec<ConversationScore> {
    scores.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    let mut rng = StdRng::seed_from_u64(seed);

    // Efraimidis–Spirakis weighted reservoir sampling without replacement:
    // each candidate gets key = u^(1/w) for u ~ Uniform(0,1); the N
    // largest keys are the sample.
    let mut keyed: Vec<(f64, ConversationScore)> = scores
        .into_iter()
        .map(|score| {
            let weight = score.weight();
            let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let key = u.powf(1.0 / weight);
            (key, score)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed.truncate(sample_size);
    keyed.into_iter().map(|(_, score)| score).collect()
}

fn shuffle<T>(items: &mut [T], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(name: &str, assistant_chars: usize, assistant_turns: usize, turns: usize) -> ConversationScore {
        ConversationScore {
            file_name: name.to_string(),
            file_path: name.to_string(),
            assistant_chars,
            assistant_turns,
            turns,
        }
    }

    #[test]
    fn top_sorts_by_chars_then_turns_then_name() {
        let scores = vec![
            score("b.jsonl", 100, 2, 3),
            score("a.jsonl", 100, 2, 3),
            score("c.jsonl", 200, 1, 1),
        ];
        let selected = select(SamplingPolicy::Top, scores, 2, 0);
        assert_eq!(selected[0].file_name, "c.jsonl");
        assert_eq!(selected[1].file_name, "a.jsonl");
    }

    #[test]
    fn random_uniform_is_deterministic_for_fixed_seed() {
        let scores: Vec<_> = (0..10).map(|i| score(&format!("f{i}.jsonl"), 10, 1, 1)).collect();
        let a = select(SamplingPolicy::RandomUniform, scores.clone(), 4, 42);
        let b = select(SamplingPolicy::RandomUniform, scores, 4, 42);
        let names_a: Vec<_> = a.iter().map(|s| s.file_name.clone()).collect();
        let names_b: Vec<_> = b.iter().map(|s| s.file_name.clone()).collect();
        assert_eq!(names_a, names_b);
        assert_eq!(names_a.len(), 4);
    }

    #[test]
    fn weighted_random_is_deterministic_for_fixed_seed() {
        let scores = vec![
            score("a.jsonl", 10000, 10, 10),
            score("b.jsonl", 1, 1, 1),
            score("c.jsonl", 500, 3, 3),
            score("d.jsonl", 2000, 5, 5),
        ];
        let a = select(SamplingPolicy::WeightedRandom, scores.clone(), 2, 7);
        let b = select(SamplingPolicy::WeightedRandom, scores, 2, 7);
        let names_a: Vec<_> = a.iter().map(|s| s.file_name.clone()).collect();
        let names_b: Vec<_> = b.iter().map(|s| s.file_name.clone()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn weighted_random_never_exceeds_sample_size() {
        let scores: Vec<_> = (0..3).map(|i| score(&format!("f{i}.jsonl"), 10, 1, 1)).collect();
        let selected = select(SamplingPolicy::WeightedRandom, scores, 10, 1);
        assert_eq!(selected.len(), 3);
    }
}
