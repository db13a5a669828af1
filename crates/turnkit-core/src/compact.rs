// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Turn-budget compaction: once a session's estimated token usage crosses
//! the configured threshold (`AgentConfig::compaction_threshold`, default
//! 0.85 of the model's context window), [`compact_session_with_strategy`]
//! rewrites the message list into a single compaction request the agent
//! loop then sends to the model in place of the user's next turn.  If even
//! that request wouldn't fit, [`emergency_compact`] is the deterministic,
//! model-free fallback that always succeeds.
//!
//! This module only rewrites message lists — it never calls a model.  The
//! agent loop (`agent.rs`) is the one that sends the rewritten request and
//! replaces the session with the resulting summary/checkpoint text.

use turnkit_config::CompactionStrategy;
use turnkit_model::{Message, Role};
use turnkit_tools::OutputCategory;

// ─── Compaction prompts ───────────────────────────────────────────────────────

const NARRATIVE_COMPACTION_PROMPT: &str =
    "The conversation below is about to be dropped to free up context budget. \
     Write a dense prose summary that preserves every technical detail a \
     continuing agent would need: file paths touched, functions/types \
     changed, tool commands run and their results, decisions made and why, \
     and anything the user explicitly asked for that is not yet done. Do \
     not summarise pleasantries or restate the system prompt.";

const STRUCTURED_COMPACTION_PROMPT: &str = "\
The conversation below is about to be dropped to free up context budget. \
Produce a checkpoint of the session state using EXACTLY the Markdown \
sections below, in this order, no additions or omissions. Quote file \
paths, function/tool names, and error text verbatim where they matter.

## Task
What the agent is currently working on, in 1-3 sentences.

## Decisions
Bullet list of technical decisions made so far and the reasoning behind \
each, tagged with the file or component it concerns.

## Files touched
Every file read, edited, or created, with a one-line note on what changed.

## Constraints
Every requirement, constraint, or preference the user stated that must \
still hold.

## Open items
Anything unfinished: subtasks, open questions, follow-ups the user asked \
for but that haven't happened yet.

## Narrative
2-5 dense paragraphs covering what actually happened — tool calls made, \
their outputs, and the reasoning that connected them — so a continuing \
agent can pick up without re-deriving context that was already settled.";

// ─── Public API ───────────────────────────────────────────────────────────────

/// Roll the whole session (minus `system_msg`) into one compaction request
/// using the narrative strategy. A thin wrapper over
/// [`compact_session_with_strategy`] kept for call sites that don't thread a
/// [`CompactionStrategy`] through.
pub fn compact_session(messages: &mut Vec<Message>, system_msg: Option<Message>) -> usize {
    compact_session_with_strategy(messages, system_msg, &CompactionStrategy::Narrative)
}

/// Replace `messages` with a single compaction request built from their
/// rendered transcript, per `strategy`. Returns the message count *before*
/// compaction so the caller can log/report how much history was folded.
///
/// The caller still has to submit the resulting request to the model and
/// rebuild the session from the response — this function only produces the
/// request; it never performs I/O.
pub fn compact_session_with_strategy(
    messages: &mut Vec<Message>,
    system_msg: Option<Message>,
    strategy: &CompactionStrategy,
) -> usize {
    let before = messages.len();
    let prompt = match strategy {
        CompactionStrategy::Structured => STRUCTURED_COMPACTION_PROMPT,
        CompactionStrategy::Narrative => NARRATIVE_COMPACTION_PROMPT,
    };
    let transcript = crate::render::render_transcript(messages, true);
    let request = Message::user(format!("{prompt}\n\n---\n\n{transcript}"));
    messages.clear();
    if let Some(sys) = system_msg {
        messages.push(sys);
    }
    messages.push(request);
    before
}

/// Deterministic, no-model-call fallback used when the session has grown so
/// large that even a compaction *request* (transcript plus prompt) would
/// overflow the budget. Keeps only the last `keep_n` non-system messages and
/// prepends a notice explaining the gap, so the agent never silently loses
/// the fact that history was dropped.
pub fn emergency_compact(
    messages: &mut Vec<Message>,
    system_msg: Option<Message>,
    keep_n: usize,
) -> usize {
    let before = messages.len();
    let non_system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    let keep = keep_n.min(non_system.len());
    let tail = non_system[non_system.len() - keep..].to_vec();
    let notice = Message::assistant(
        "[Emergency compaction: the conversation grew too large to even \
         request a summary, so earlier turns were dropped without one. \
         Context before this point is gone — if something the user asked \
         for earlier isn't visible above, ask them to restate it rather \
         than guessing.]",
    );
    messages.clear();
    if let Some(sys) = system_msg {
        messages.push(sys);
    }
    messages.push(notice);
    messages.extend(tail);
    before
}

/// Category-aware truncation for a single tool result, applied independently
/// of compaction — this runs on every oversized tool output before it's even
/// added to the session, while compaction runs on the session as a whole.
///
/// `content` passes through unchanged when it already fits `cap_tokens`
/// (approximated as 4 bytes/token, matching the calibration the agent loop
/// uses for its own budget estimate). Otherwise the extraction strategy is
/// chosen by [`OutputCategory`] rather than by tool name, so a tool only has
/// to declare which category its output falls into:
///
/// - [`OutputCategory::HeadTail`]: 60 lines from the top, 40 from the
///   bottom — covers the command/setup the tool ran and the final result,
///   which is where terminal output usually carries its signal.
/// - [`OutputCategory::MatchList`]: only the leading matches are kept; a
///   ranked list's tail is the least relevant part of it, unlike a log's.
/// - [`OutputCategory::FileContent`]: an even head/tail split so both a
///   file's top-level declarations and its most recent edits stay visible.
/// - [`OutputCategory::Generic`]: hard cut at the nearest preceding newline.
///
/// Every truncated result ends with a notice naming what was cut, so the
/// model knows more exists and, where applicable, how to page to it.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                     narrow the search pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                     re-read with an offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars]
                .rfind('\n')
                .map(|p| p + 1)
                .unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; output truncated to fit the turn budget ...]",
                &content[..cut]
            )
        }
    }
}

// ─── Private helpers ──────────────────────────────────────────────────────────

/// Keep only the leading lines that fit within `cap_chars`.
fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

/// Keep `max_head` leading lines and `max_tail` trailing lines, inserting a
/// notice between them.  Pass `usize::MAX` to split evenly by character
/// budget instead of a fixed line count.
fn head_tail_lines(
    content: &str,
    cap_chars: usize,
    max_head: usize,
    max_tail: usize,
    notice_template: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
