// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub permission: PermissionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Named provider configurations, selectable with `--model <key>`.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "openai" | "google" | "vertex" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override. Normalised (no trailing slash) before use.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0)
    pub temperature: Option<f32>,

    // ── Prompt caching (Anthropic only; no-op elsewhere) ───────────────────
    /// Attach an explicit cache-control marker to the system message.
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
    /// Use the extended (1-hour) cache TTL instead of the default 5-minute window.
    #[serde(default)]
    pub extended_cache_time: bool,
    /// Cache tool definitions (the last tool in the list gets the marker).
    #[serde(default = "default_true")]
    pub cache_tools: bool,
    /// Mark the latest message with a cache_control breakpoint.
    #[serde(default = "default_true")]
    pub cache_conversation: bool,
    /// Mark the oldest image content blocks with a cache_control breakpoint
    /// (Anthropic only).
    #[serde(default)]
    pub cache_images: bool,
    /// Mark large tool result blocks with a cache_control breakpoint
    /// (Anthropic only).
    #[serde(default)]
    pub cache_tool_results: bool,

    // ── Provider-specific extras ────────────────────────────────────────────
    /// AWS region for the Bedrock driver (e.g. "us-east-1").
    pub aws_region: Option<String>,
    /// Azure OpenAI resource name, used when `base_url` is not set.
    pub azure_resource: Option<String>,
    /// Azure OpenAI deployment name; defaults to `name` when unset.
    pub azure_deployment: Option<String>,
    /// Azure OpenAI API version query parameter.
    pub azure_api_version: Option<String>,
    /// GCP project id for the Vertex AI driver.
    pub vertex_project: Option<String>,
    /// GCP region for the Vertex AI driver (e.g. "us-central1").
    pub vertex_location: Option<String>,
    /// Path to a YAML fixture file for the `mock` driver. Overridden by the
    /// `TURNKIT_MOCK_RESPONSES` environment variable when set.
    pub mock_responses_file: Option<String>,
    /// Free-form per-driver options merged into the request body (e.g.
    /// OpenRouter's `provider` routing preferences, Portkey's virtual key).
    #[serde(default)]
    pub driver_options: serde_json::Value,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            cache_system_prompt: true,
            extended_cache_time: false,
            cache_tools: true,
            cache_conversation: true,
            cache_images: false,
            cache_tool_results: false,
            aws_region: None,
            azure_resource: None,
            azure_deployment: None,
            azure_api_version: None,
            vertex_project: None,
            vertex_location: None,
            mock_responses_file: None,
            driver_options: serde_json::Value::Null,
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Agent
}
fn default_max_turns() -> u32 {
    0
}
fn default_max_budget_usd() -> f64 {
    0.0
}
fn default_compaction_threshold() -> f32 {
    0.85
}
fn default_compaction_keep_recent() -> usize {
    4
}
fn default_max_concurrent_tools() -> usize {
    4
}
fn default_max_tool_rounds() -> u32 {
    50
}
fn default_tool_result_token_cap() -> usize {
    4_000
}
fn default_max_retained_images() -> usize {
    8
}
fn default_read_file_max_bytes() -> usize {
    20_000
}
fn default_read_image_max_bytes() -> u64 {
    25 * 1024 * 1024
}
fn default_edit_fuzzy_threshold() -> f64 {
    0.85
}
fn default_compaction_overhead_reserve() -> f32 {
    0.05
}
fn default_compaction_strategy() -> CompactionStrategy {
    CompactionStrategy::Structured
}
fn default_context_transform_keep_recent() -> usize {
    4
}
fn default_context_transform_max_workers() -> usize {
    3
}

/// Which prompt the agent sends to the model to produce a compaction summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    /// Markdown checkpoint with fixed sections (task, decisions, files, ...).
    Structured,
    /// Free-form narrative summary.
    Narrative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default tool-availability mode when none is specified on the CLI.
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum number of turns before the loop halts with `BudgetExceeded`.
    /// 0 = unlimited.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Cumulative cost ceiling in USD. 0 = unlimited.
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,
    /// Fraction of the usable input budget at which compaction triggers.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of most recent messages preserved verbatim during compaction.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Maximum number of tool calls executed concurrently within one turn.
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    /// Maximum number of sequential tool-call rounds within a single user turn
    /// before the loop halts with a `BudgetExceeded`-style error.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Maximum tokens kept for a single tool result pushed into session
    /// history; larger outputs are truncated via [`crate::compact::smart_truncate`].
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Maximum number of images kept across the whole session history on any
    /// one request, even when the model supports vision. Older images are
    /// replaced with a placeholder via `turnkit_model::sanitize::cap_retained_images`.
    /// 0 = unlimited.
    #[serde(default = "default_max_retained_images")]
    pub max_retained_images: usize,
    /// Byte ceiling `read_file` applies in addition to its line limit; whichever
    /// constraint is hit first determines where the output is cut.
    #[serde(default = "default_read_file_max_bytes")]
    pub read_file_max_bytes: usize,
    /// Byte ceiling on the raw file `read_image` will decode; files above this
    /// are rejected before the (memory-hungry) decode/resize step runs.
    #[serde(default = "default_read_image_max_bytes")]
    pub read_image_max_bytes: u64,
    /// Minimum combined similarity ratio (0-1) `edit_file`'s fuzzy-match
    /// fallback requires before accepting a window that didn't match exactly
    /// or under indent normalisation.
    #[serde(default = "default_edit_fuzzy_threshold")]
    pub edit_fuzzy_threshold: f64,
    /// Fraction of the input budget subtracted from `compaction_threshold` so
    /// compaction fires early enough to leave room for the summary itself.
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    /// Which compaction prompt to use when the rolling compaction path runs.
    #[serde(default = "default_compaction_strategy")]
    pub compaction_strategy: CompactionStrategy,
    /// System prompt override; leave None to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Enable the "distributor" pre-request context transform, which
    /// summarises older history through a secondary model before every
    /// provider call instead of relying solely on threshold-triggered
    /// compaction. Off by default — identity transform.
    #[serde(default)]
    pub context_transform_enabled: bool,
    /// Number of most recent messages the distributor transform leaves
    /// untouched, verbatim, at the end of the rewritten context.
    #[serde(default = "default_context_transform_keep_recent")]
    pub context_transform_keep_recent: usize,
    /// Maximum number of chunk-summarisation calls the distributor
    /// transform runs concurrently against the secondary provider.
    #[serde(default = "default_context_transform_max_workers")]
    pub context_transform_max_workers: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Agent,
            max_turns: default_max_turns(),
            max_budget_usd: default_max_budget_usd(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            max_concurrent_tools: default_max_concurrent_tools(),
            max_tool_rounds: default_max_tool_rounds(),
            tool_result_token_cap: default_tool_result_token_cap(),
            max_retained_images: default_max_retained_images(),
            read_file_max_bytes: default_read_file_max_bytes(),
            read_image_max_bytes: default_read_image_max_bytes(),
            edit_fuzzy_threshold: default_edit_fuzzy_threshold(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            compaction_strategy: default_compaction_strategy(),
            system_prompt: None,
            context_transform_enabled: false,
            context_transform_keep_recent: default_context_transform_keep_recent(),
            context_transform_max_workers: default_context_transform_max_workers(),
        }
    }
}

/// Gates which tools are registered for use at all. Orthogonal to
/// [`PermissionMode`], which gates the default action on a permission-rule
/// miss for tools that *are* registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only tools only.
    Research,
    /// Plan generation; no code changes.
    Plan,
    /// Full agent with read/write tools.
    Agent,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Research => write!(f, "research"),
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Agent => write!(f, "agent"),
        }
    }
}

/// Mode-dependent default for a permission-rule miss (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Unlisted tools default to Ask.
    #[default]
    Normal,
    /// All write tools are blocked regardless of rules.
    Plan,
    /// Read-only tools auto-allow; edits default to Ask.
    AcceptEdits,
    /// Everything defaults to Allow.
    Yolo,
}

fn default_permission_mode() -> PermissionMode {
    PermissionMode::Normal
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Default behaviour when no rule matches a (tool, specifier) pair.
    #[serde(default = "default_permission_mode")]
    pub mode: PermissionMode,
    /// Static rules in `Tool`/`Tool(specifier)=action` form, e.g.
    /// `"Bash(rm *)=deny"`. Evaluated deny-first, then ask, then allow.
    #[serde(default)]
    pub rules: Vec<String>,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self { mode: PermissionMode::Normal, rules: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Workspace root; all writes must stay within it or `additional_dirs`.
    pub work_dir: Option<String>,
    #[serde(default)]
    pub additional_dirs: Vec<String>,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub excluded_cmds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout in seconds for a single shell tool call.
    pub shell_timeout_secs: u64,
    /// Timeout in seconds for a single network fetch.
    pub fetch_timeout_secs: u64,
    /// Web fetch/search configuration.
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { shell_timeout_secs: 120, fetch_timeout_secs: 30, web: WebConfig::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Search API key (also checked via the provider's env var).
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
    /// Default maximum characters returned by web_fetch.
    pub fetch_max_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { search: WebSearchConfig::default(), fetch_max_chars: 50_000 }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_model_provider_is_anthropic() {
        let c = Config::default();
        assert_eq!(c.model.provider, "anthropic");
    }

    #[test]
    fn config_default_api_key_env_is_none() {
        let c = Config::default();
        assert!(c.model.api_key_env.is_none());
    }

    #[test]
    fn config_default_agent_mode_is_agent() {
        let c = Config::default();
        assert_eq!(c.agent.default_mode, AgentMode::Agent);
    }

    #[test]
    fn config_default_max_turns_is_unlimited() {
        let c = Config::default();
        assert_eq!(c.agent.max_turns, 0);
    }

    #[test]
    fn config_default_compaction_threshold_in_range() {
        let c = Config::default();
        assert!(c.agent.compaction_threshold > 0.0 && c.agent.compaction_threshold < 1.0);
    }

    #[test]
    fn config_default_compaction_keep_recent_is_four() {
        let c = Config::default();
        assert_eq!(c.agent.compaction_keep_recent, 4);
    }

    #[test]
    fn config_default_permission_mode_is_normal() {
        let c = Config::default();
        assert_eq!(c.permission.mode, PermissionMode::Normal);
    }

    #[test]
    fn config_default_sandbox_has_no_allowed_domains() {
        let c = Config::default();
        assert!(c.sandbox.allowed_domains.is_empty());
    }

    #[test]
    fn config_cache_flags_can_be_disabled_via_yaml() {
        let yaml_str = "model:\n  provider: anthropic\n  name: claude-sonnet-4-5\n  \
                        cache_system_prompt: false\n  cache_tools: false\n  \
                        cache_conversation: false\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert!(!c.model.cache_system_prompt);
        assert!(!c.model.cache_tools);
        assert!(!c.model.cache_conversation);
    }

    #[test]
    fn config_cache_flags_omitted_yaml_uses_defaults() {
        let yaml_str = "model:\n  provider: anthropic\n  name: claude-sonnet-4-5\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert!(c.model.cache_system_prompt);
        assert!(c.model.cache_tools);
        assert!(c.model.cache_conversation);
    }

    #[test]
    fn config_serialises_to_valid_yaml() {
        let c = Config::default();
        let yaml_str = serde_yaml::to_string(&c).unwrap();
        assert!(yaml_str.contains("provider"));
        assert!(yaml_str.contains("anthropic"));
    }

    #[test]
    fn config_deserialises_from_yaml() {
        let yaml_str =
            "model:\n  provider: anthropic\n  name: claude-opus-4-5\n  max_tokens: 8192\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.provider, "anthropic");
        assert_eq!(c.model.max_tokens, Some(8192));
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "model:\n  name: claude-opus-4-5\n  provider: anthropic\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.name, "claude-opus-4-5");
        assert_eq!(c.agent.max_turns, AgentConfig::default().max_turns);
    }

    #[test]
    fn agent_mode_yaml_serde_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Wrap {
            mode: AgentMode,
        }
        let w = Wrap { mode: AgentMode::Plan };
        let s = serde_yaml::to_string(&w).unwrap();
        let back: Wrap = serde_yaml::from_str(&s).unwrap();
        assert_eq!(back.mode, AgentMode::Plan);
    }

    #[test]
    fn permission_mode_yaml_serde_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Wrap {
            mode: PermissionMode,
        }
        let w = Wrap { mode: PermissionMode::Yolo };
        let s = serde_yaml::to_string(&w).unwrap();
        let back: Wrap = serde_yaml::from_str(&s).unwrap();
        assert_eq!(back.mode, PermissionMode::Yolo);
    }

    #[test]
    fn permission_rules_parsed_from_yaml_list() {
        let yaml = "permission:\n  mode: yolo\n  rules:\n    - \"Bash(rm *)=deny\"\n    - \"Bash=allow\"\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.permission.mode, PermissionMode::Yolo);
        assert_eq!(c.permission.rules, vec!["Bash(rm *)=deny", "Bash=allow"]);
    }

    #[test]
    fn config_providers_deserialised_from_yaml() {
        let yaml = "providers:\n  work:\n    provider: anthropic\n    name: claude-opus-4-5\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.providers.get("work").unwrap().name, "claude-opus-4-5");
    }
}
