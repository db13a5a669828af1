// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use turnkit_config::AgentMode;
use turnkit_tools::{events::TodoItem, ToolCall};

/// Events emitted by the agent during a single turn.
/// Consumers (CI runner, TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// Best-effort preview of a tool call's arguments while they are still
    /// streaming in, parsed from an incomplete JSON fragment. Emitted before
    /// [`AgentEvent::ToolCallStarted`]; consumers may use it for progress
    /// display or an early permission prompt, but must not dispatch on it —
    /// fields may still be missing or wrong until the call actually starts.
    ToolCallArgsPreview {
        index: u32,
        tool_name: String,
        partial_args: serde_json::Value,
    },
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Running total of cache-read tokens for the session.
        cache_read_total: u32,
        /// Running total of cache-write tokens for the session.
        cache_write_total: u32,
        /// Context window size for the active model.
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// A streaming turn was cancelled mid-flight. Any text already streamed
    /// has been committed to the session as a partial assistant message.
    Aborted { partial_text: String },
}

/// Which compaction path was used to produce a [`AgentEvent::ContextCompacted`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Structured markdown-checkpoint compaction.
    Structured,
    /// Free-form narrative summary compaction.
    Narrative,
    /// Deterministic drop-oldest fallback with no model call.
    Emergency,
}
