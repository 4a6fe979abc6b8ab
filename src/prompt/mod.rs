// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Prompt optimization and conversation flow-state injection.
//!
//! Agent prompts mix a persona, a scripted conversation flow, and rules, in
//! no particular order. Naive size-limiting can cut away the script, which is
//! the part the model must not lose. The optimizer locates sections by
//! case-insensitive marker scan and reorders the prompt so the script comes
//! first, each section under its own size budget. Prompts with no script are
//! passed through, size-capped.
//!
//! The flow-state block tells the model where the conversation stands (turn
//! number, the customer's last words, do-not-repeat-the-greeting) so a
//! scripted agent advances instead of starting over.

/// Markers that open the scripted-flow section of a prompt.
const SCRIPT_MARKERS: &[&str] = &["FLUJO", "SCRIPT", "PASO 1", "CONVERSACIÓN", "GUIÓN"];

/// Markers that open the rules/restrictions section of a prompt.
const RULE_MARKERS: &[&str] = &["IMPORTANTE", "RESTRICCIONES", "REGLAS", "NUNCA", "PROHIBIDO"];

/// Per-section byte budgets after reordering.
const SCRIPT_BUDGET: usize = 16 * 1024;
const PERSONA_BUDGET: usize = 4 * 1024;
const RULES_BUDGET: usize = 6 * 1024;
/// Size cap for prompts with no recognizable script section.
const PLAIN_LIMIT: usize = 32 * 1024;

/// Chat-model size threshold: optimized prompts longer than this (in chars)
/// route to the higher-capability model.
const LARGE_MODEL_THRESHOLD_CHARS: usize = 10_000;

/// Fixed voice-style reminder appended to every system message.
pub const VOICE_REMINDER: &str = "Recuerda: respuestas breves y naturales, aptas para \
     una llamada de voz; nada de listas ni formato.";

// ---------------------------------------------------------------------------
// Marker scanning
// ---------------------------------------------------------------------------

/// Case-insensitive check that `haystack` starts with `needle` (needle is
/// already uppercase). Accent-bearing characters compare via their single
/// uppercase mapping, so "conversación" matches "CONVERSACIÓN".
fn starts_with_ignore_case(haystack: &str, needle_upper: &str) -> bool {
    let mut hay = haystack.chars();
    for expected in needle_upper.chars() {
        match hay.next() {
            Some(c) => {
                let mut upper = c.to_uppercase();
                if !(upper.next() == Some(expected) && upper.next().is_none()) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// Byte offset of the first occurrence of any marker at or after `from`.
fn find_marker_from(text: &str, markers: &[&str], from: usize) -> Option<usize> {
    for (idx, _) in text[from..].char_indices() {
        let pos = from + idx;
        if markers
            .iter()
            .any(|m| starts_with_ignore_case(&text[pos..], m))
        {
            return Some(pos);
        }
    }
    None
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Rewrite an agent prompt so the script precedes the rules.
///
/// With a script section present the output is
/// `[SCRIPT] ... [PERSONA] ... [RULES] ...` (sections capped at 16/4/6 KB;
/// empty sections omitted). Without one, the prompt passes through, capped at
/// 32 KB with a trailing ellipsis.
pub fn optimize(prompt: &str) -> String {
    let script_start = find_marker_from(prompt, SCRIPT_MARKERS, 0);
    let first_rule = find_marker_from(prompt, RULE_MARKERS, 0);

    let script_start = match script_start {
        Some(s) => s,
        None => {
            if prompt.len() > PLAIN_LIMIT {
                tracing::debug!(
                    bytes = prompt.len(),
                    "no script section; truncating oversized prompt"
                );
                return format!("{}…", truncate_bytes(prompt, PLAIN_LIMIT));
            }
            return prompt.to_string();
        }
    };

    // Rules may appear before the script, after it, or both.
    let past_script_marker = script_start
        + prompt[script_start..]
            .chars()
            .next()
            .map_or(1, |c| c.len_utf8());
    let rule_after_script = find_marker_from(prompt, RULE_MARKERS, past_script_marker);
    let script_end = rule_after_script.unwrap_or(prompt.len());
    let script = &prompt[script_start..script_end];

    let persona_end = match first_rule {
        Some(r) if r < script_start => r,
        _ => script_start,
    };
    let persona = &prompt[..persona_end];

    let mut rules = String::new();
    if let Some(r) = first_rule {
        if r < script_start {
            rules.push_str(&prompt[r..script_start]);
        }
    }
    if let Some(r) = rule_after_script {
        rules.push_str(&prompt[r..]);
    }

    let mut out = String::with_capacity(prompt.len() + 32);
    out.push_str("[SCRIPT]\n");
    out.push_str(truncate_bytes(script.trim(), SCRIPT_BUDGET));
    if !persona.trim().is_empty() {
        out.push_str("\n\n[PERSONA]\n");
        out.push_str(truncate_bytes(persona.trim(), PERSONA_BUDGET));
    }
    if !rules.trim().is_empty() {
        out.push_str("\n\n[RULES]\n");
        out.push_str(truncate_bytes(rules.trim(), RULES_BUDGET));
    }
    out
}

/// Pick the chat model by optimized-prompt size.
pub fn select_model<'a>(optimized_prompt: &str, small: &'a str, large: &'a str) -> &'a str {
    if optimized_prompt.chars().count() > LARGE_MODEL_THRESHOLD_CHARS {
        large
    } else {
        small
    }
}

// ---------------------------------------------------------------------------
// Flow state
// ---------------------------------------------------------------------------

/// Build the flow-state instruction block for the current user turn.
///
/// `user_turns` counts user messages including the one being answered.
/// Turn 0 (no user message yet) emits nothing: the greeting covers it.
pub fn flow_state(user_turns: usize, last_user_message: &str) -> String {
    match user_turns {
        0 => String::new(),
        1 => format!(
            "[ESTADO DE LA CONVERSACIÓN]\nEste es el turno 1. El cliente acaba de decir: \
             «{last_user_message}». Ya diste el saludo inicial; no lo repitas. Continúa con \
             el primer paso del guión."
        ),
        2 => format!(
            "[ESTADO DE LA CONVERSACIÓN]\nEste es el turno 2. El cliente dijo: \
             «{last_user_message}». Avanza al siguiente paso del guión sin repetir \
             información que ya diste."
        ),
        n => format!(
            "[ESTADO DE LA CONVERSACIÓN]\nEste es el turno {n}. El cliente dijo: \
             «{last_user_message}». Continúa el guión desde el paso en que quedaste; no \
             reinicies la conversación ni repitas el saludo."
        ),
    }
}

/// Assemble the full system message: optimized prompt, then flow state, then
/// the voice reminder.
pub fn build_system_prompt(optimized: &str, flow: &str) -> String {
    let mut out = String::with_capacity(optimized.len() + flow.len() + VOICE_REMINDER.len() + 4);
    out.push_str(optimized);
    if !flow.is_empty() {
        out.push_str("\n\n");
        out.push_str(flow);
    }
    out.push_str("\n\n");
    out.push_str(VOICE_REMINDER);
    out
}
