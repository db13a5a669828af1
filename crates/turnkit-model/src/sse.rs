// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Incremental SSE / newline-delimited-JSON line decoder.
//!
//! Provider responses arrive as arbitrarily-sized TCP chunks that may split
//! a line (or a whole SSE record) across chunk boundaries. [`SseDecoder`]
//! carries the unterminated remainder forward across calls to [`push`], so
//! callers only ever see complete records and nothing is dropped or
//! duplicated.
//!
//! In SSE mode, `event:`/`data:` lines are accumulated into a single
//! [`SseRecord`] terminated by a blank line, matching the wire format used
//! by Anthropic, OpenAI-compatible gateways, and Gemini. In JSONL mode
//! (used by Cohere's Chat v2 stream, which has no `data: ` framing at all)
//! every non-blank line is its own record.

/// One decoded record: the optional `event:` field plus the joined `data:`
/// lines (multi-line `data:` fields are joined with `\n`, per the SSE spec).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseRecord {
    pub event: Option<String>,
    pub data: String,
}

/// Decoding mode. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sse,
    Jsonl,
}

pub struct SseDecoder {
    mode: Mode,
    buf: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseDecoder {
    /// `event:`/`data:`-framed decoding (Anthropic, OpenAI-compatible, Gemini).
    pub fn sse() -> Self {
        Self { mode: Mode::Sse, buf: String::new(), pending_event: None, pending_data: Vec::new() }
    }

    /// One JSON object per line, no framing at all (Cohere Chat v2).
    pub fn jsonl() -> Self {
        Self { mode: Mode::Jsonl, buf: String::new(), pending_event: None, pending_data: Vec::new() }
    }

    /// Feed a newly-arrived chunk of bytes and drain every complete record
    /// it produced. Any trailing partial line is retained internally and
    /// prepended to the next call's bytes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseRecord> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            self.feed_line(&line, &mut out);
        }
        out
    }

    /// Flush whatever record is still pending (no terminating blank line
    /// arrived before the stream ended). Only meaningful in SSE mode.
    pub fn finish(&mut self) -> Option<SseRecord> {
        if self.pending_data.is_empty() && self.pending_event.is_none() {
            return None;
        }
        Some(SseRecord { event: self.pending_event.take(), data: self.pending_data.join("\n") })
    }

    fn feed_line(&mut self, line: &str, out: &mut Vec<SseRecord>) {
        match self.mode {
            Mode::Jsonl => {
                if !line.is_empty() {
                    out.push(SseRecord { event: None, data: line.to_string() });
                }
            }
            Mode::Sse => {
                if line.is_empty() {
                    if let Some(rec) = self.finish() {
                        out.push(rec);
                    }
                    return;
                }
                if let Some(rest) = line.strip_prefix("event:") {
                    self.pending_event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    self.pending_data.push(rest.trim_start().to_string());
                }
                // `id:`, `retry:`, and comment lines (`:...`) are ignored —
                // no provider adapter needs them.
            }
        }
    }
}
