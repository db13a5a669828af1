// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Vertex AI driver.
//!
//! Speaks the identical payload shape as the native `google` driver
//! ([`crate::google::build_gemini_request_body`]) against a different
//! endpoint (`…/publishers/google/models/<id>:streamGenerateContent`) and
//! with OAuth bearer auth rather than an API key in the URL.
//!
//! # Auth
//! `Authorization: Bearer <access_token>`. Vertex has no long-lived API key;
//! the caller is expected to mint a short-lived OAuth token out-of-band
//! (e.g. via `gcloud auth print-access-token`) and pass it as the model's
//! `api_key`.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::{
    catalog::{static_catalog, ModelCatalogEntry},
    google::{build_gemini_request_body, parse_gemini_chunk},
    provider::ResponseStream,
    CompletionRequest, ResponseEvent,
};

pub struct VertexProvider {
    model: String,
    access_token: Option<String>,
    project: String,
    location: String,
    /// Full base URL override; when set it replaces the default
    /// `https://{location}-aiplatform.googleapis.com/v1` prefix entirely.
    base_url: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl VertexProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: String,
        access_token: Option<String>,
        project: Option<String>,
        location: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            access_token,
            project: project.unwrap_or_default(),
            location: location.unwrap_or_else(|| "us-central1".to_string()),
            base_url,
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for VertexProvider {
    fn name(&self) -> &str {
        "vertex"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let mut entries: Vec<ModelCatalogEntry> = static_catalog()
            .into_iter()
            .filter(|e| e.provider == "vertex")
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let token = self
            .access_token
            .as_deref()
            .context("Vertex access token not set (model.api_key or model.api_key_env)")?;
        if self.project.is_empty() && self.base_url.is_none() {
            bail!("vertex provider requires model.vertex_project (or a full base_url override)");
        }

        let body = build_gemini_request_body(&req, self.max_tokens, self.temperature);

        let url = match &self.base_url {
            Some(base) => format!(
                "{}/publishers/google/models/{}:streamGenerateContent?alt=sse",
                base.trim_end_matches('/'),
                self.model
            ),
            None => format!(
                "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/google/models/{model}:streamGenerateContent?alt=sse",
                loc = self.location,
                proj = self.project,
                model = self.model,
            ),
        };

        debug!(model = %self.model, project = %self.project, "sending Vertex AI request");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&body)
            .send()
            .await
            .context("Vertex AI request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Vertex AI error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream.flat_map(|chunk| {
            let lines = match chunk {
                Ok(b) => String::from_utf8_lossy(&b).to_string(),
                Err(e) => return futures::stream::iter(vec![Err(anyhow::anyhow!(e))]),
            };
            let events: Vec<anyhow::Result<ResponseEvent>> = lines
                .lines()
                .filter_map(|line| {
                    let line = line.strip_prefix("data: ")?.trim();
                    if line == "[DONE]" {
                        return Some(Ok(ResponseEvent::Done));
                    }
                    let v: Value = serde_json::from_str(line).ok()?;
                    Some(parse_gemini_chunk(&v))
                })
                .collect();
            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }
}
