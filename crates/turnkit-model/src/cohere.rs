// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cohere driver — native Chat API v2.
//!
//! Uses `POST /v2/chat` with `stream: true`. The response body is
//! newline-delimited JSON (no `data: ` SSE prefix); each line is one
//! streaming event tagged by a `type` field.
//!
//! # Auth
//! `Authorization: Bearer <key>`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    catalog::{static_catalog, ModelCatalogEntry},
    provider::ResponseStream,
    CompletionRequest, MessageContent, ResponseEvent, Role,
};

pub struct CohereProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl CohereProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.cohere.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for CohereProvider {
    fn name(&self) -> &str {
        "cohere"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let mut entries: Vec<ModelCatalogEntry> = static_catalog()
            .into_iter()
            .filter(|e| e.provider == "cohere")
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self.api_key.as_deref().context("COHERE_API_KEY not set")?;

        let messages: Vec<Value> = req
            .messages
            .iter()
            .filter_map(message_to_cohere)
            .collect();

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(model = %self.model, "sending cohere request");

        let resp = self
            .client
            .post(format!("{}/v2/chat", self.base_url))
            .header("Authorization", format!("Bearer {key}"))
            .json(&body)
            .send()
            .await
            .context("Cohere request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Cohere error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => {
                        return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))]));
                    }
                };
                buf.push_str(&text);
                let mut events = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    if let Ok(v) = serde_json::from_str::<Value>(&line) {
                        if let Some(ev) = parse_cohere_event(&v) {
                            events.push(ev);
                        }
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

fn message_to_cohere(m: &crate::Message) -> Option<Value> {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    match &m.content {
        MessageContent::Text(t) => Some(json!({ "role": role, "content": t })),
        MessageContent::ContentParts(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|p| match p {
                    crate::ContentPart::Text { text } => Some(text.clone()),
                    crate::ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" ");
            Some(json!({ "role": role, "content": text }))
        }
        MessageContent::ToolCall { tool_call_id, function } => Some(json!({
            "role": "assistant",
            "tool_calls": [{
                "id": tool_call_id,
                "type": "function",
                "function": { "name": function.name, "arguments": function.arguments },
            }]
        })),
        MessageContent::ToolResult { tool_call_id, content } => {
            let text = content.as_text().unwrap_or("[non-text tool result]").to_string();
            Some(json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": text,
            }))
        }
    }
}

fn parse_cohere_event(v: &Value) -> Option<anyhow::Result<ResponseEvent>> {
    match v["type"].as_str()? {
        "content-delta" => {
            let text = v["delta"]["message"]["content"]["text"].as_str()?.to_string();
            Some(Ok(ResponseEvent::TextDelta(text)))
        }
        "tool-call-start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let tc = &v["delta"]["message"]["tool_calls"];
            let id = tc["id"].as_str().unwrap_or("").to_string();
            let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
            Some(Ok(ResponseEvent::ToolCall { index, id, name, arguments: String::new() }))
        }
        "tool-call-delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let args = v["delta"]["message"]["tool_calls"]["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string();
            Some(Ok(ResponseEvent::ToolCall { index, id: String::new(), name: String::new(), arguments: args }))
        }
        "message-end" => {
            let usage = &v["delta"]["usage"];
            let input_tokens = usage["tokens"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            let output_tokens = usage["tokens"]["output_tokens"].as_u64().unwrap_or(0) as u32;
            Some(Ok(ResponseEvent::Usage {
                input_tokens,
                output_tokens,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_delta() {
        let v = json!({
            "type": "content-delta",
            "delta": { "message": { "content": { "text": "hi" } } }
        });
        let ev = parse_cohere_event(&v).unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hi"));
    }

    #[test]
    fn parse_tool_call_start() {
        let v = json!({
            "type": "tool-call-start",
            "index": 0,
            "delta": { "message": { "tool_calls": { "id": "tc1", "function": { "name": "shell" } } } }
        });
        let ev = parse_cohere_event(&v).unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::ToolCall { name, id, .. } if name == "shell" && id == "tc1"));
    }

    #[test]
    fn parse_unknown_event_returns_none() {
        let v = json!({ "type": "debug" });
        assert!(parse_cohere_event(&v).is_none());
    }

    #[test]
    fn message_to_cohere_maps_text() {
        let m = crate::Message::user("hello");
        let v = message_to_cohere(&m).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");
    }
}
