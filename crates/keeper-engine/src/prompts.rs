//! Prompt template set and placeholder substitution (spec §4.6.4).
//!
//! Single-brace placeholders (`{companion_name}`, `{transcript}`, …) are
//! substituted by exact-name replacement. None of the substitutable names
//! collide with the literal double-brace tokens `{{user}}`/`{{char}}`
//! card authors expect to survive verbatim in the output, so a plain
//! `str::replace` per placeholder is safe without a templating crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverrides {
    pub persona_observation_system: Option<String>,
    pub persona_observation_user: Option<String>,
    pub persona_synthesis_system: Option<String>,
    pub persona_synthesis_user: Option<String>,
    pub memory_system: Option<String>,
    pub memory_user: Option<String>,
    pub memory_synthesis_system: Option<String>,
    pub memory_synthesis_user: Option<String>,
}

const ANTI_CONTAMINATION: &str = "Respond with JSON only, no prose before or after. Never include \
platform refusals, safety disclaimers, rate-limit mentions, or \"as an AI\" framing in extracted \
fields — report only what the transcript evidences.";

pub fn persona_observation_system(overrides: &PromptOverrides) -> String {
    overrides.persona_observation_system.clone().unwrap_or_else(|| format!(
        "You study a single chat transcript between a user and their AI companion named \
        {{companion_name}} and report observable personality evidence as JSON. {ANTI_CONTAMINATION}"
    ))
}

pub fn persona_observation_user(overrides: &PromptOverrides) -> String {
    overrides.persona_observation_user.clone().unwrap_or_else(|| {
        "Conversation {conversation_id} with {companion_name}:\n\n{transcript}\n\n\
        Return a JSON object describing tone, recurring phrases, relationship dynamic, and \
        anything {{char}} says about {{user}} that reveals the companion's personality."
            .to_string()
    })
}

pub fn persona_synthesis_system(overrides: &PromptOverrides) -> String {
    overrides.persona_synthesis_system.clone().unwrap_or_else(|| format!(
        "You synthesize a character card for {{companion_name}} from a set of per-conversation \
        observations. Use {{{{user}}}} and {{{{char}}}} as literal placeholder tokens in every \
        field you write — do not resolve them. {ANTI_CONTAMINATION}"
    ))
}

pub fn persona_synthesis_user(overrides: &PromptOverrides) -> String {
    overrides.persona_synthesis_user.clone().unwrap_or_else(|| {
        "Observations for {companion_name}:\n\n{observation_packets}\n\n\
        Return a JSON object with name, description, personality, scenario, first_mes, \
        mes_example, creator_notes, tags, system_prompt, post_history_instructions, \
        alternate_greetings — using {{user}} and {{char}} as literal tokens throughout."
            .to_string()
    })
}

pub fn memory_system(overrides: &PromptOverrides) -> String {
    overrides.memory_system.clone().unwrap_or_else(|| format!(
        "You extract durable memories about {{companion_name}}'s user from one chat transcript, \
        as a JSON array of candidate memories. {ANTI_CONTAMINATION}"
    ))
}

pub fn memory_user(overrides: &PromptOverrides) -> String {
    overrides.memory_user.clone().unwrap_or_else(|| {
        "Conversation {conversation_id} with {companion_name}:\n\n{transcript}\n\n\
        Return a JSON array of {{ name, keys, content, category, priority }} memory candidates \
        worth remembering across future conversations."
            .to_string()
    })
}

pub fn memory_synthesis_system(overrides: &PromptOverrides) -> String {
    overrides.memory_synthesis_system.clone().unwrap_or_else(|| format!(
        "You merge and prioritize candidate memories for {{companion_name}}'s user into a final \
        lorebook, keeping at most {{max_memories}} entries. {ANTI_CONTAMINATION}"
    ))
}

pub fn memory_synthesis_user(overrides: &PromptOverrides) -> String {
    overrides.memory_synthesis_user.clone().unwrap_or_else(|| {
        "Candidate memories:\n\n{candidate_memories}\n\n\
        Return a JSON array of at most {max_memories} merged memories, each \
        { name, keys, content, category, priority, source_conversation, source_date }."
            .to_string()
    })
}

/// Fills single-brace `{name}` placeholders with their values, leaving
/// any unmatched `{name}` untouched. Double-brace tokens never match a
/// single-brace pattern unless a caller names a placeholder `user` or
/// `char`, which the built-in template set never does.
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_named_placeholders() {
        let filled = fill_template("hello {name}, you are {age}", &[("name", "ava"), ("age", "3")]);
        assert_eq!(filled, "hello ava, you are 3");
    }

    #[test]
    fn preserves_double_brace_tokens() {
        let template = "{{user}} talks to {{char}} about {topic}";
        let filled = fill_template(template, &[("topic", "the weather")]);
        assert_eq!(filled, "{{user}} talks to {{char}} about the weather");
    }

    #[test]
    fn default_templates_preserve_double_brace_tokens_after_fill() {
        let overrides = PromptOverrides::default();
        let template = persona_synthesis_user(&overrides);
        let filled = fill_template(
            &template,
            &[("companion_name", "Nova"), ("observation_packets", "[]")],
        );
        assert!(filled.contains("{{user}}"));
        assert!(filled.contains("{{char}}"));
    }
}
