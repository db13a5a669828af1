// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnkit_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Maximum output tokens the provider's model supports for a single
    /// completion (set from the model catalog; 0 when unknown).
    pub max_output_tokens: usize,
    /// Estimated tokens for items sent with every request but not stored in
    /// `messages` (tool schemas, dynamic context block). Refreshed by the
    /// agent loop via `estimate_schema_overhead` before each budget check.
    pub schema_overhead: usize,
    /// Running total of prompt-cache-read tokens reported by the provider.
    pub cache_read_total: u32,
    /// Running total of prompt-cache-write tokens reported by the provider.
    pub cache_write_total: u32,
    /// Correction factor applied to the chars/4 token estimate, calibrated
    /// against the provider's actual reported input token counts.
    pub calibration_factor: f32,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            cache_read_total: 0,
            cache_write_total: 0,
            calibration_factor: 1.0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Usable input token budget: the context window minus the space
    /// reserved for the model's own output and for schema/dynamic-context
    /// overhead not tracked in `token_count`. Returns 0 when `max_tokens`
    /// is unset (budget gating is a no-op in that case).
    pub fn input_budget(&self) -> usize {
        if self.max_tokens == 0 {
            return 0;
        }
        self.max_tokens
            .saturating_sub(self.max_output_tokens)
            .saturating_sub(self.schema_overhead)
    }

    /// Record prompt-cache usage reported by the provider for the turn just
    /// completed.
    pub fn add_cache_usage(&mut self, read: u32, write: u32) {
        self.cache_read_total += read;
        self.cache_write_total += write;
    }

    /// Update the chars/4 calibration factor using the provider's actual
    /// reported input token count for the most recent request.
    ///
    /// `estimated` is the chars/4 estimate (token_count + schema_overhead)
    /// used to build that request. The factor is an exponential moving
    /// average so a single unusual turn cannot swing it wildly.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let observed = actual_input as f32 / estimated as f32;
        const ALPHA: f32 = 0.2;
        self.calibration_factor = self.calibration_factor * (1.0 - ALPHA) + observed * ALPHA;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
