// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pluggable pre-request context rewrite, invoked before every provider call.
//!
//! [`ContextTransform::transform`] takes the live session history and
//! returns a (possibly rewritten) copy that is what actually gets sent to
//! the model. [`IdentityTransform`] is the default — it returns the input
//! unchanged. [`DistributorTransform`] instead collapses everything except
//! the most recent messages into a single synthesised summary, run through
//! a secondary ("minion") model so the primary model's own context budget
//! is never spent on historical detail.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Semaphore;

use turnkit_model::{CompletionRequest, Message, MessageContent, ModelProvider, Role};

/// Rewrites the message list handed to the model on every turn.
#[async_trait]
pub trait ContextTransform: Send + Sync {
    async fn transform(&self, messages: &[Message]) -> anyhow::Result<Vec<Message>>;
}

/// No-op transform. The default for every agent unless configured otherwise.
#[derive(Default)]
pub struct IdentityTransform;

#[async_trait]
impl ContextTransform for IdentityTransform {
    async fn transform(&self, messages: &[Message]) -> anyhow::Result<Vec<Message>> {
        Ok(messages.to_vec())
    }
}

const CHUNK_SUMMARY_PROMPT: &str =
    "Summarise the following slice of a conversation history in a dense, \
     information-preserving way. Keep file paths, function/tool names, \
     decisions, and outcomes. Omit pleasantries. Output plain prose, no \
     headers.";

/// Splits older history into natural chunks, summarises each chunk
/// concurrently through a secondary provider, and prepends the aggregated
/// result before the last `keep_recent` messages.
pub struct DistributorTransform {
    secondary_provider: Arc<dyn ModelProvider>,
    max_workers: usize,
    keep_recent: usize,
}

impl DistributorTransform {
    pub fn new(secondary_provider: Arc<dyn ModelProvider>, max_workers: usize, keep_recent: usize) -> Self {
        Self {
            secondary_provider,
            max_workers: max_workers.max(1),
            keep_recent,
        }
    }
}

#[async_trait]
impl ContextTransform for DistributorTransform {
    async fn transform(&self, messages: &[Message]) -> anyhow::Result<Vec<Message>> {
        if messages.len() <= self.keep_recent {
            return Ok(messages.to_vec());
        }

        let split = messages.len() - self.keep_recent;
        let (older, recent) = messages.split_at(split);

        // A system message always belongs at the front, untouched, and is
        // never itself folded into a chunk summary.
        let (system, older) = match older.first() {
            Some(m) if m.role == Role::System => (Some(m.clone()), &older[1..]),
            _ => (None, older),
        };

        if older.is_empty() {
            let mut out = Vec::with_capacity(messages.len());
            out.extend(system);
            out.extend_from_slice(recent);
            return Ok(out);
        }

        let chunks = split_into_chunks(older);
        let summaries = summarize_chunks(&chunks, &self.secondary_provider, self.max_workers).await?;

        let aggregated = summaries.join("\n---\n");
        let aggregated_msg = Message::user(format!("[Aggregated Context]\n{aggregated}"));

        let mut out = Vec::with_capacity(2 + recent.len());
        out.extend(system);
        out.push(aggregated_msg);
        out.extend_from_slice(recent);
        Ok(out)
    }
}

/// Split `messages` into chunks, breaking after a `ToolResult` message or a
/// text-only `Assistant` message — both are natural conversational
/// boundaries where nothing is left dangling half-formed.
fn split_into_chunks(messages: &[Message]) -> Vec<Vec<Message>> {
    let mut chunks = Vec::new();
    let mut current: Vec<Message> = Vec::new();

    for msg in messages {
        let is_boundary = match &msg.content {
            MessageContent::ToolResult { .. } => true,
            MessageContent::Text(_) if msg.role == Role::Assistant => true,
            _ => false,
        };
        current.push(msg.clone());
        if is_boundary {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Summarise each chunk concurrently, bounded by `max_workers` in flight at
/// once, via `provider`.
async fn summarize_chunks(
    chunks: &[Vec<Message>],
    provider: &Arc<dyn ModelProvider>,
    max_workers: usize,
) -> anyhow::Result<Vec<String>> {
    let semaphore = Arc::new(Semaphore::new(max_workers));
    let chunk_futures = chunks.iter().map(|chunk| {
        let provider = Arc::clone(provider);
        let semaphore = Arc::clone(&semaphore);
        let text = serialize_chunk(chunk);
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("semaphore never closed while futures are in flight");
            summarize_one(&provider, text).await
        }
    });

    futures::future::try_join_all(chunk_futures).await
}

async fn summarize_one(provider: &Arc<dyn ModelProvider>, chunk_text: String) -> anyhow::Result<String> {
    let req = CompletionRequest {
        messages: vec![Message::user(format!("{CHUNK_SUMMARY_PROMPT}\n\n---\n\n{chunk_text}"))],
        tools: vec![],
        stream: true,
        system_dynamic_suffix: None,
        cache_key: None,
    };

    let mut stream = provider.complete(req).await?;
    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            turnkit_model::ResponseEvent::TextDelta(t) => summary.push_str(&t),
            turnkit_model::ResponseEvent::Done => break,
            _ => {}
        }
    }
    Ok(summary)
}

fn serialize_chunk(chunk: &[Message]) -> String {
    crate::render::render_transcript(chunk, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnkit_model::ScriptedMockProvider;

    fn tool_call_msg(id: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                function: turnkit_model::FunctionCall {
                    name: "read_file".into(),
                    arguments: "{}".into(),
                },
            },
        }
    }

    #[tokio::test]
    async fn identity_transform_is_a_no_op() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let out = IdentityTransform.transform(&messages).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_text(), Some("hi"));
    }

    #[test]
    fn chunk_boundary_after_tool_result() {
        let messages = vec![
            Message::user("do the thing"),
            tool_call_msg("tc-1"),
            Message::tool_result("tc-1", "done"),
            Message::user("now do another thing"),
        ];
        let chunks = split_into_chunks(&messages);
        assert_eq!(chunks.len(), 2, "should split right after the tool_result");
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn chunk_boundary_after_text_only_assistant_message() {
        let messages = vec![
            Message::user("question"),
            Message::assistant("answer"),
            Message::user("follow-up"),
        ];
        let chunks = split_into_chunks(&messages);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 1);
    }

    #[tokio::test]
    async fn distributor_keeps_recent_messages_verbatim() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("a summary"));
        let transform = DistributorTransform::new(provider, 3, 2);

        let messages = vec![
            Message::system("you are an agent"),
            Message::user("old message 1"),
            Message::assistant("old reply 1"),
            Message::user("recent question"),
            Message::assistant("recent answer"),
        ];

        let out = transform.transform(&messages).await.unwrap();
        // system + aggregated + 2 kept recent messages
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].role, Role::System);
        assert!(out[1].as_text().unwrap().starts_with("[Aggregated Context]"));
        assert_eq!(out[2].as_text(), Some("recent question"));
        assert_eq!(out[3].as_text(), Some("recent answer"));
    }

    #[tokio::test]
    async fn distributor_is_noop_when_history_fits_in_keep_recent() {
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(vec![]));
        let transform = DistributorTransform::new(provider, 3, 10);
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let out = transform.transform(&messages).await.unwrap();
        assert_eq!(out.len(), 2);
    }
}
