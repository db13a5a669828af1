// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! AWS Bedrock driver — native Converse Stream API.
//!
//! Uses `POST /model/{id}/converse-stream`, signed with SigV4. Credentials
//! come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (and optionally
//! `AWS_SESSION_TOKEN` for temporary credentials) rather than an API key.
//!
//! The response body is the `application/vnd.amazon.eventstream` binary
//! framing: each message is `total_len(4) | headers_len(4) | prelude_crc(4)
//! | headers | payload | message_crc(4)`. This driver parses the framing to
//! recover the JSON payload of each event but does not verify the CRC32
//! checksums.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    catalog::{static_catalog, ModelCatalogEntry},
    provider::ResponseStream,
    CompletionRequest, MessageContent, ResponseEvent, Role,
};

type HmacSha256 = Hmac<Sha256>;

pub struct BedrockProvider {
    model: String,
    region: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl BedrockProvider {
    pub fn new(
        model: String,
        region: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            region: region
                .or_else(|| std::env::var("AWS_REGION").ok())
                .unwrap_or_else(|| "us-east-1".to_string()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for BedrockProvider {
    fn name(&self) -> &str {
        "aws"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let mut entries: Vec<ModelCatalogEntry> = static_catalog()
            .into_iter()
            .filter(|e| e.provider == "aws")
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID not set")?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        let (system, messages) = build_bedrock_messages(&req.messages);

        let mut body = json!({
            "messages": messages,
            "inferenceConfig": {
                "maxTokens": self.max_tokens,
                "temperature": self.temperature,
            },
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "toolSpec": {
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": { "json": t.parameters },
                        }
                    })
                })
                .collect();
            body["toolConfig"] = json!({ "tools": tools });
        }
        let body_bytes = serde_json::to_vec(&body)?;

        let host = format!("bedrock-runtime.{}.amazonaws.com", self.region);
        let path = format!("/model/{}/converse-stream", uri_encode_path(&self.model));
        let url = format!("https://{host}{path}");

        let now = chrono::Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let mut signed_header_names = vec!["content-type", "host", "x-amz-date"];
        if session_token.is_some() {
            signed_header_names.push("x-amz-security-token");
        }
        signed_header_names.sort();

        let header_value = |name: &str| -> String {
            match name {
                "content-type" => "application/json".to_string(),
                "host" => host.clone(),
                "x-amz-date" => amz_date.clone(),
                "x-amz-security-token" => session_token.clone().unwrap_or_default(),
                _ => String::new(),
            }
        };
        let canonical_headers: String = signed_header_names
            .iter()
            .map(|n| format!("{n}:{}\n", header_value(n)))
            .collect();
        let signed_headers = signed_header_names.join(";");
        let payload_hash = hex::encode(Sha256::digest(&body_bytes));

        let canonical_request = format!(
            "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );
        let credential_scope = format!("{date_stamp}/{}/bedrock/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"bedrock");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={access_key}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
        );

        debug!(model = %self.model, region = %self.region, "sending bedrock converse-stream request");

        let mut request = self
            .client
            .post(&url)
            .header("host", host)
            .header("content-type", "application/json")
            .header("x-amz-date", amz_date)
            .header("authorization", authorization);
        if let Some(token) = &session_token {
            request = request.header("x-amz-security-token", token);
        }

        let resp = request
            .body(body_bytes)
            .send()
            .await
            .context("Bedrock request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Bedrock error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(Vec::<u8>::new(), |buf, chunk| {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))]));
                    }
                };
                buf.extend_from_slice(&bytes);
                let mut events = Vec::new();
                while let Some((frame, consumed)) = parse_event_stream_frame(buf) {
                    buf.drain(..consumed);
                    if let Some(ev) = frame.and_then(|v| parse_bedrock_event(v)) {
                        events.push(ev);
                    }
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode path segments the way SigV4 canonical URIs require
/// (everything but unreserved characters and `/`).
fn uri_encode_path(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Parse one `application/vnd.amazon.eventstream` frame from the front of
/// `buf`. Returns `(decoded_payload, bytes_consumed)` or `None` if `buf`
/// does not yet contain a full frame.
fn parse_event_stream_frame(buf: &[u8]) -> Option<(Option<Value>, usize)> {
    if buf.len() < 12 {
        return None;
    }
    let total_len = u32::from_be_bytes(buf[0..4].try_into().ok()?) as usize;
    if buf.len() < total_len {
        return None;
    }
    let headers_len = u32::from_be_bytes(buf[4..8].try_into().ok()?) as usize;
    let headers_start = 12;
    let headers_end = headers_start + headers_len;
    let payload_end = total_len.saturating_sub(4); // trailing message CRC
    if headers_end > payload_end {
        return Some((None, total_len));
    }
    let headers = parse_event_stream_headers(&buf[headers_start..headers_end]);
    let event_type = headers
        .iter()
        .find(|(k, _)| k == ":event-type")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let message_type = headers
        .iter()
        .find(|(k, _)| k == ":message-type")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let payload = &buf[headers_end..payload_end];
    let mut value = serde_json::from_slice::<Value>(payload).ok()?;
    if message_type == "exception" {
        return Some((
            Some(json!({ "exception": true, "error": value })),
            total_len,
        ));
    }
    if let Some(obj) = value.as_object_mut() {
        obj.insert("__eventType".into(), json!(event_type));
    }
    Some((Some(value), total_len))
}

/// Parse the headers block of an event-stream message: repeated
/// `name_len(1) | name | 7 (string type) | value_len(2, BE) | value`.
fn parse_event_stream_headers(mut buf: &[u8]) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    while !buf.is_empty() {
        let Some(&name_len) = buf.first() else { break };
        let name_len = name_len as usize;
        if buf.len() < 1 + name_len + 3 {
            break;
        }
        let name = String::from_utf8_lossy(&buf[1..1 + name_len]).to_string();
        let mut pos = 1 + name_len;
        let _value_type = buf[pos];
        pos += 1;
        let value_len = u16::from_be_bytes(buf[pos..pos + 2].try_into().unwrap_or([0, 0])) as usize;
        pos += 2;
        if buf.len() < pos + value_len {
            break;
        }
        let value = String::from_utf8_lossy(&buf[pos..pos + value_len]).to_string();
        pos += value_len;
        headers.push((name, value));
        buf = &buf[pos..];
    }
    headers
}

fn parse_bedrock_event(v: Value) -> Option<anyhow::Result<ResponseEvent>> {
    if v["exception"].as_bool() == Some(true) {
        return Some(Ok(ResponseEvent::Error(v["error"].to_string())));
    }
    match v["__eventType"].as_str()? {
        "contentBlockDelta" => {
            let index = v["contentBlockIndex"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            if let Some(text) = delta["text"].as_str() {
                return Some(Ok(ResponseEvent::TextDelta(text.to_string())));
            }
            if let Some(partial) = delta["toolUse"]["input"].as_str() {
                return Some(Ok(ResponseEvent::ToolCall {
                    index,
                    id: String::new(),
                    name: String::new(),
                    arguments: partial.to_string(),
                }));
            }
            None
        }
        "contentBlockStart" => {
            let index = v["contentBlockIndex"].as_u64().unwrap_or(0) as u32;
            let tool_use = &v["start"]["toolUse"];
            if tool_use.is_object() {
                return Some(Ok(ResponseEvent::ToolCall {
                    index,
                    id: tool_use["toolUseId"].as_str().unwrap_or("").to_string(),
                    name: tool_use["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }));
            }
            None
        }
        "messageStop" => {
            if v["stopReason"].as_str() == Some("max_tokens") {
                return Some(Ok(ResponseEvent::MaxTokens));
            }
            None
        }
        "metadata" => {
            let usage = &v["usage"];
            Some(Ok(ResponseEvent::Usage {
                input_tokens: usage["inputTokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["outputTokens"].as_u64().unwrap_or(0) as u32,
                cache_read_tokens: usage["cacheReadInputTokens"].as_u64().unwrap_or(0) as u32,
                cache_write_tokens: usage["cacheWriteInputTokens"].as_u64().unwrap_or(0) as u32,
            }))
        }
        _ => None,
    }
}

fn build_bedrock_messages(messages: &[crate::Message]) -> (Vec<Value>, Vec<Value>) {
    let mut system = Vec::new();
    let mut out = Vec::new();
    for m in messages {
        match m.role {
            Role::System => {
                if let Some(t) = m.as_text() {
                    system.push(json!({ "text": t }));
                }
            }
            Role::User | Role::Tool => {
                out.push(json!({ "role": "user", "content": message_to_bedrock_content(m) }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": message_to_bedrock_content(m) }));
            }
        }
    }
    (system, out)
}

fn message_to_bedrock_content(m: &crate::Message) -> Vec<Value> {
    match &m.content {
        MessageContent::Text(t) => vec![json!({ "text": t })],
        MessageContent::ContentParts(parts) => parts
            .iter()
            .map(|p| match p {
                crate::ContentPart::Text { text } => json!({ "text": text }),
                crate::ContentPart::Image { image_url, .. } => {
                    json!({ "text": format!("[image: {image_url}]") })
                }
            })
            .collect(),
        MessageContent::ToolCall { tool_call_id, function } => vec![json!({
            "toolUse": {
                "toolUseId": tool_call_id,
                "name": function.name,
                "input": serde_json::from_str::<Value>(&function.arguments)
                    .unwrap_or(Value::Null),
            }
        })],
        MessageContent::ToolResult { tool_call_id, content } => vec![json!({
            "toolResult": {
                "toolUseId": tool_call_id,
                "content": [{ "text": content.as_text().unwrap_or("[non-text tool result]") }],
            }
        })],
    }
}
