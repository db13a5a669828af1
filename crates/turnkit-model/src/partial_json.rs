// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Best-effort parser for incomplete JSON objects.
//!
//! Streaming tool-call arguments arrive one fragment at a time; the caller
//! (progress display, early permission prompts) wants to inspect the
//! argument object *before* the terminal delta arrives. [`parse`] never
//! fails — it reconstructs a plausible completion of the truncated
//! document and falls back to an empty map if that still doesn't parse.

use serde_json::{Map, Value};

/// Parse a possibly-truncated JSON object. Always returns a map — an empty
/// one if nothing could be salvaged. If `s` is already valid JSON, this is
/// equivalent to a standard parse (truncated to an object where needed).
pub fn parse(s: &str) -> Map<String, Value> {
    if let Ok(Value::Object(m)) = serde_json::from_str::<Value>(s) {
        return m;
    }
    let repaired = repair(s);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(Value::Object(m)) => m,
        _ => Map::new(),
    }
}

/// Proper prefixes of `true` / `false` / `null` — strictly shorter than the
/// literal itself, so stripping one never damages a complete literal.
const INCOMPLETE_LITERALS: &[&str] = &["tru", "tr", "fals", "fal", "fa", "nul", "nu"];

fn repair(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    let mut stack: Vec<u8> = Vec::new();

    for &b in bytes {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' => {
                if stack.last() == Some(&b'{') {
                    stack.pop();
                }
            }
            b']' => {
                if stack.last() == Some(&b'[') {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = s.to_string();

    if in_string {
        if escaped {
            // A trailing lone backslash is itself an escape of the closing
            // quote we're about to add — escape it first.
            out.push('\\');
        }
        out.push('"');
    }

    trim_trailing_junk(&mut out);

    for opener in stack.iter().rev() {
        out.push(match opener {
            b'{' => '}',
            b'[' => ']',
            _ => unreachable!(),
        });
    }

    out
}

fn trim_trailing_junk(out: &mut String) {
    loop {
        let trimmed = out.trim_end();
        if trimmed.len() != out.len() {
            out.truncate(trimmed.len());
        }
        if let Some(stripped) = out.strip_suffix(',').or_else(|| out.strip_suffix(':')) {
            *out = stripped.to_string();
            continue;
        }

        let mut stripped_literal = false;
        for lit in INCOMPLETE_LITERALS {
            if out.ends_with(lit) {
                out.truncate(out.len() - lit.len());
                stripped_literal = true;
                break;
            }
        }
        if stripped_literal {
            continue;
        }

        // A trailing `,"key"` or `{"key"` (an opened-but-unvalued key) must
        // be dropped entirely, else the reconstructed document has a key
        // with no value.
        if let Some(trimmed_key) = strip_dangling_key(out) {
            *out = trimmed_key;
            continue;
        }

        break;
    }
}

fn strip_dangling_key(out: &str) -> Option<String> {
    let candidate = out.trim_end();
    // Find a trailing `"..."` with no following `:` — an opened key with no value.
    if !candidate.ends_with('"') {
        return None;
    }
    let body = &candidate[..candidate.len() - 1];
    let key_start = find_unescaped_quote_from_end(body)?;
    let before_key = candidate[..key_start].trim_end();
    if before_key.ends_with('{') {
        Some(before_key.to_string())
    } else if let Some(stripped) = before_key.strip_suffix(',') {
        Some(stripped.to_string())
    } else {
        None
    }
}

fn find_unescaped_quote_from_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = bytes.len();
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let mut backslashes = 0;
            let mut j = i;
            while j > 0 && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
    }
    None
}
