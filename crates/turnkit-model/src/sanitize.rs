// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message sanitization: strip or cap image content before it reaches a
//! provider.
//!
//! Call [`strip_images_if_unsupported`] before building a [`CompletionRequest`]
//! to ensure that image parts are replaced with a text placeholder whenever the
//! target model only supports text input. Call [`cap_retained_images`]
//! afterwards to bound how many images a long-running session re-sends on
//! every turn even when the model *does* support vision — base64 image
//! payloads are expensive and a session that has accumulated a dozen
//! screenshots over an hour-long conversation rarely needs all of them
//! resent on every turn.

use crate::{
    catalog::InputModality,
    types::{ContentPart, Message, MessageContent, ToolContentPart, ToolResultContent},
};

const IMAGE_OMITTED: &str = "[image omitted: model does not support image input]";
const IMAGE_AGED_OUT: &str = "[image omitted: older than the most recent images kept in context]";

/// Replace all but the `max_images` most recent image parts across `messages`
/// with a text placeholder, oldest first. A `max_images` of `0` disables the
/// cap (every image is kept, subject only to [`strip_images_if_unsupported`]).
pub fn cap_retained_images(messages: Vec<Message>, max_images: usize) -> Vec<Message> {
    if max_images == 0 {
        return messages;
    }
    let total_images: usize = messages.iter().map(|m| m.image_urls().len()).sum();
    if total_images <= max_images {
        return messages;
    }
    let mut to_drop = total_images - max_images;
    messages
        .into_iter()
        .map(|m| {
            if to_drop == 0 {
                return m;
            }
            let count = m.image_urls().len();
            if count == 0 {
                return m;
            }
            let drop_here = count.min(to_drop);
            to_drop -= drop_here;
            age_out_oldest_images(m, drop_here)
        })
        .collect()
}

/// Replace the first `n` image parts in `m` with a placeholder (messages are
/// visited oldest-first by [`cap_retained_images`], so "first" here means
/// oldest within the message).
fn age_out_oldest_images(mut m: Message, n: usize) -> Message {
    let mut remaining = n;
    m.content = match m.content {
        MessageContent::ContentParts(parts) => {
            let replaced: Vec<ContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Image { .. } if remaining > 0 => {
                        remaining -= 1;
                        ContentPart::Text { text: IMAGE_AGED_OUT.to_string() }
                    }
                    other => other,
                })
                .collect();
            MessageContent::ContentParts(replaced)
        }
        MessageContent::ToolResult { tool_call_id, content } => {
            let content = match content {
                ToolResultContent::Parts(parts) => {
                    let replaced: Vec<ToolContentPart> = parts
                        .into_iter()
                        .map(|p| match p {
                            ToolContentPart::Image { .. } if remaining > 0 => {
                                remaining -= 1;
                                ToolContentPart::Text { text: IMAGE_AGED_OUT.to_string() }
                            }
                            other => other,
                        })
                        .collect();
                    ToolResultContent::Parts(replaced)
                }
                other => other,
            };
            MessageContent::ToolResult { tool_call_id, content }
        }
        other => other,
    };
    m
}

/// Replace all image content in `messages` with a text placeholder when
/// `modalities` does not include [`InputModality::Image`].
///
/// If the model *does* support images this is a no-op and the messages are
/// returned unchanged.
pub fn strip_images_if_unsupported(
    messages: Vec<Message>,
    modalities: &[InputModality],
) -> Vec<Message> {
    if modalities.contains(&InputModality::Image) {
        return messages;
    }
    messages.into_iter().map(strip_message).collect()
}

fn strip_message(mut m: Message) -> Message {
    m.content = match m.content {
        MessageContent::ContentParts(parts) => {
            let stripped: Vec<ContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Image { .. } => {
                        ContentPart::Text { text: IMAGE_OMITTED.to_string() }
                    }
                    other => other,
                })
                .collect();
            // Collapse single text part back to Text for cleaner serialization.
            if stripped.len() == 1 {
                if let ContentPart::Text { text } = &stripped[0] {
                    return Message { content: MessageContent::Text(text.clone()), ..m };
                }
            }
            MessageContent::ContentParts(stripped)
        }
        MessageContent::ToolResult { tool_call_id, content } => {
            let content = strip_tool_result_content(content);
            MessageContent::ToolResult { tool_call_id, content }
        }
        other => other,
    };
    m
}

fn strip_tool_result_content(content: ToolResultContent) -> ToolResultContent {
    match content {
        ToolResultContent::Parts(parts) => {
            let stripped: Vec<ToolContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ToolContentPart::Image { .. } => {
                        ToolContentPart::Text { text: IMAGE_OMITTED.to_string() }
                    }
                    other => other,
                })
                .collect();
            // Collapse single text part back to Text.
            if stripped.len() == 1 {
                if let ToolContentPart::Text { text } = &stripped[0] {
                    return ToolResultContent::Text(text.clone());
                }
            }
            ToolResultContent::Parts(stripped)
        }
        other => other,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPart, ToolContentPart};

    fn text_only_modalities() -> Vec<InputModality> {
        vec![InputModality::Text]
    }

    fn vision_modalities() -> Vec<InputModality> {
        vec![InputModality::Text, InputModality::Image]
    }

    #[test]
    fn no_op_when_image_supported() {
        let msg = Message::user_with_parts(vec![
            ContentPart::Text { text: "hello".into() },
            ContentPart::image("data:image/png;base64,ABC"),
        ]);
        let result = strip_images_if_unsupported(vec![msg], &vision_modalities());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].image_urls(), vec!["data:image/png;base64,ABC"]);
    }

    #[test]
    fn strips_image_parts_from_content_parts() {
        let msg = Message::user_with_parts(vec![
            ContentPart::Text { text: "describe this".into() },
            ContentPart::image("data:image/png;base64,ABC"),
        ]);
        let result = strip_images_if_unsupported(vec![msg], &text_only_modalities());
        assert_eq!(result.len(), 1);
        assert!(result[0].image_urls().is_empty());
        match &result[0].content {
            MessageContent::ContentParts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[1], ContentPart::Text { text } if text == IMAGE_OMITTED));
            }
            other => panic!("expected ContentParts, got {:?}", other),
        }
    }

    #[test]
    fn strips_image_from_single_part_collapses_to_text() {
        let msg = Message::user_with_parts(vec![
            ContentPart::image("data:image/png;base64,ABC"),
        ]);
        let result = strip_images_if_unsupported(vec![msg], &text_only_modalities());
        assert!(matches!(result[0].content, MessageContent::Text(_)));
        assert_eq!(result[0].as_text(), Some(IMAGE_OMITTED));
    }

    #[test]
    fn strips_image_from_tool_result_parts() {
        let parts = vec![
            ToolContentPart::Text { text: "result".into() },
            ToolContentPart::Image { image_url: "data:image/png;base64,XYZ".into() },
        ];
        let msg = Message::tool_result_with_parts("id-1", parts);
        let result = strip_images_if_unsupported(vec![msg], &text_only_modalities());
        match &result[0].content {
            MessageContent::ToolResult { content, .. } => {
                assert!(content.image_urls().is_empty());
                match content {
                    ToolResultContent::Parts(p) => {
                        assert!(matches!(&p[1], ToolContentPart::Text { text } if text == IMAGE_OMITTED));
                    }
                    other => panic!("expected Parts, got {:?}", other),
                }
            }
            other => panic!("expected ToolResult, got {:?}", other),
        }
    }

    #[test]
    fn strips_single_image_tool_result_collapses_to_text() {
        let parts = vec![ToolContentPart::Image { image_url: "data:image/png;base64,XYZ".into() }];
        let msg = Message::tool_result_with_parts("id-1", parts);
        let result = strip_images_if_unsupported(vec![msg], &text_only_modalities());
        match &result[0].content {
            MessageContent::ToolResult { content, .. } => {
                assert!(matches!(content, ToolResultContent::Text(t) if t == IMAGE_OMITTED));
            }
            other => panic!("expected ToolResult, got {:?}", other),
        }
    }

    #[test]
    fn plain_text_messages_pass_through_unchanged() {
        let msgs = vec![
            Message::user("hello"),
            Message::assistant("world"),
        ];
        let result = strip_images_if_unsupported(msgs, &text_only_modalities());
        assert_eq!(result[0].as_text(), Some("hello"));
        assert_eq!(result[1].as_text(), Some("world"));
    }

    fn image_msg(url: &str) -> Message {
        Message::user_with_parts(vec![ContentPart::image(url)])
    }

    #[test]
    fn cap_zero_disables_the_cap() {
        let msgs = vec![image_msg("a"), image_msg("b"), image_msg("c")];
        let result = cap_retained_images(msgs, 0);
        assert_eq!(result.iter().map(|m| m.image_urls().len()).sum::<usize>(), 3);
    }

    #[test]
    fn cap_under_total_is_a_no_op() {
        let msgs = vec![image_msg("a"), image_msg("b")];
        let result = cap_retained_images(msgs, 5);
        assert_eq!(result.iter().map(|m| m.image_urls().len()).sum::<usize>(), 2);
    }

    #[test]
    fn cap_ages_out_oldest_images_first() {
        let msgs = vec![image_msg("oldest"), image_msg("middle"), image_msg("newest")];
        let result = cap_retained_images(msgs, 1);
        assert!(result[0].image_urls().is_empty(), "oldest image should be aged out");
        assert!(result[1].image_urls().is_empty(), "middle image should be aged out");
        assert_eq!(result[2].image_urls(), vec!["newest"], "newest image must survive");
        assert!(result[0].as_text().unwrap_or_default().contains("aged out") ||
            matches!(&result[0].content, MessageContent::ContentParts(p) if p.iter().any(|p| matches!(p, ContentPart::Text { text } if text == IMAGE_AGED_OUT))));
    }

    #[test]
    fn cap_counts_tool_result_images_too() {
        let msgs = vec![
            image_msg("a"),
            Message::tool_result_with_parts(
                "id-1",
                vec![ToolContentPart::Image { image_url: "b".into() }],
            ),
        ];
        let result = cap_retained_images(msgs, 1);
        assert!(result[0].image_urls().is_empty(), "oldest (standalone) image aged out");
        match &result[1].content {
            MessageContent::ToolResult { content, .. } => {
                assert_eq!(content.image_urls(), vec!["b"], "newest tool-result image kept");
            }
            other => panic!("expected ToolResult, got {:?}", other),
        }
    }
}
