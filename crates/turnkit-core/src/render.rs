// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Plain-text rendering of [`Message`]s for prompts that embed conversation
//! history as a string rather than as structured `Message` values — used by
//! both the compaction prompts ([`crate::compact`]) and the context-transform
//! chunk summaries ([`crate::context_transform`]) so the two don't drift into
//! two slightly different ideas of what a message "looks like" as text.

use turnkit_model::{ContentPart, Message, MessageContent, Role};

/// One line per message: `Role: text`, with structured content flattened to
/// a readable inline form (`[tool_call: name(args)]`, `[tool_result: ...]`,
/// `[image]`).
pub fn render_message(m: &Message) -> String {
    let role = role_label(m.role);
    let body = render_content(&m.content);
    format!("{role}: {body}")
}

/// Render a whole transcript, one message per paragraph (blank-line
/// separated), optionally skipping system messages — callers that fold the
/// system message in separately (it's never itself a thing to summarise)
/// pass `skip_system: true`.
pub fn render_transcript(messages: &[Message], skip_system: bool) -> String {
    messages
        .iter()
        .filter(|m| !(skip_system && m.role == Role::System))
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::Tool => "Tool",
    }
}

fn render_content(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::ContentParts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.clone(),
                ContentPart::Image { .. } => "[image]".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        MessageContent::ToolCall { function, .. } => {
            format!("[tool_call: {}({})]", function.name, function.arguments)
        }
        MessageContent::ToolResult { content, .. } => {
            let text = content.as_text().unwrap_or("[non-text]");
            format!("[tool_result: {text}]")
        }
    }
}
