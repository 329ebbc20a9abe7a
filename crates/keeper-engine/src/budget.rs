//! Context-window-derived token/char budgets for per-call prompts (spec
//! §4.6.8). Grounded on `keeper-sampler::packet`'s identical
//! `div_ceil(4)` token-estimate heuristic and clamp-with-floor shape,
//! generalized from the packet-construction budget to the engine's
//! per-chat and synthesis budgets.

const CHARS_PER_TOKEN: usize = 4;

/// `max(2048, contextWindow - 2500)`.
pub fn usable_context_tokens(context_window: u32) -> u32 {
    (context_window as i64 - 2500).max(2048) as u32
}

/// `max(900, floor(usableContext * 0.9))`.
pub fn per_chat_budget_tokens(context_window: u32) -> u32 {
    let usable = usable_context_tokens(context_window) as f64;
    ((usable * 0.9).floor() as u32).max(900)
}

/// `max(1200, floor(usableContext * 0.9))`.
pub fn synthesis_budget_tokens(context_window: u32) -> u32 {
    let usable = usable_context_tokens(context_window) as f64;
    ((usable * 0.9).floor() as u32).max(1200)
}

/// `budget * 4` characters — the truncation ceiling for a budget
/// expressed in tokens.
pub fn budget_chars(tokens: u32) -> usize {
    tokens as usize * CHARS_PER_TOKEN
}

/// `ceil(len/4)`, floored at 1.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Truncates `text` to at most `max_chars` bytes on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut end = max_chars;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
