// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Permission rule engine.
//!
//! Rules are strings of the form `Tool(specifier)=action` or bare
//! `Tool=action` (specifier matches anything). `*` in either the tool name
//! or the specifier is a shell glob. Evaluation checks deny rules first,
//! then ask, then allow — the first match in the highest-precedence class
//! wins. A miss falls back to a [`PermissionMode`]-dependent default.

use regex::Regex;
use serde_json::Value;

use turnkit_config::PermissionMode;

/// Per-tool approval policy a [`crate::Tool`] suggests as its own default,
/// independent of the rule engine below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking
    Auto,
    /// Ask user before each invocation
    Ask,
    /// Never run; return an error
    Deny,
}

/// Outcome of evaluating a tool call against the permission rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Ask,
    Deny(String),
}

/// An action a [`PermissionRule`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Allow,
    Ask,
    Deny,
}

/// A single parsed `Tool(specifier)=action` rule.
#[derive(Debug, Clone)]
struct PermissionRule {
    tool: Regex,
    specifier: Option<Regex>,
    action: Action,
    raw: String,
}

impl PermissionRule {
    /// Parse one rule string. Returns `None` for malformed input.
    ///
    /// Grammar: `ToolGlob[(SpecifierGlob)]=allow|ask|deny`. The specifier
    /// is found by splitting on the first `(` with a balanced trailing `)`
    /// immediately before `=`.
    fn parse(raw: &str) -> Option<Self> {
        let (lhs, action_str) = raw.rsplit_once('=')?;
        let action = match action_str.trim().to_ascii_lowercase().as_str() {
            "allow" => Action::Allow,
            "ask" => Action::Ask,
            "deny" => Action::Deny,
            _ => return None,
        };

        let lhs = lhs.trim();
        let (tool_part, specifier_part) = match lhs.find('(') {
            Some(open) if lhs.ends_with(')') => (&lhs[..open], Some(&lhs[open + 1..lhs.len() - 1])),
            Some(_) | None => (lhs, None),
        };

        if tool_part.is_empty() {
            return None;
        }

        let tool = glob_to_regex_case_insensitive(tool_part)?;
        let specifier = match specifier_part {
            Some(s) if !s.is_empty() => Some(glob_to_regex(s)?),
            _ => None,
        };

        Some(Self { tool, specifier, action, raw: raw.to_string() })
    }

    fn matches(&self, tool_name: &str, specifier: &str) -> bool {
        if !self.tool.is_match(tool_name) {
            return false;
        }
        match &self.specifier {
            None => true,
            Some(re) => re.is_match(specifier),
        }
    }
}

/// Evaluates tool calls against a configured list of permission rules.
#[derive(Debug)]
pub struct PermissionChecker {
    rules: Vec<PermissionRule>,
    mode: PermissionMode,
}

impl PermissionChecker {
    /// Build a checker from raw `"Tool(spec)=action"` rule strings.
    /// Rules that fail to parse are skipped silently — malformed config
    /// entries should not be able to widen what a run is allowed to do.
    pub fn new(rules: &[String], mode: PermissionMode) -> Self {
        let rules = rules.iter().filter_map(|r| PermissionRule::parse(r)).collect();
        Self { rules, mode }
    }

    /// Append a rule at runtime (e.g. from a CLI `--allow-tool` flag or an
    /// in-session "always allow" response to an Ask prompt).
    pub fn add_rule(&mut self, raw: &str) -> bool {
        match PermissionRule::parse(raw) {
            Some(rule) => {
                self.rules.push(rule);
                true
            }
            None => false,
        }
    }

    /// Evaluate a tool call. `args` is the tool call's raw JSON arguments,
    /// used to extract the specifier.
    pub fn decide(&self, tool_name: &str, args: &Value) -> PermissionDecision {
        let specifier = extract_specifier(tool_name, args);

        if let Some(rule) = self.rules.iter().find(|r| r.action == Action::Deny && r.matches(tool_name, &specifier)) {
            return PermissionDecision::Deny(format!("denied by rule `{}`", rule.raw));
        }
        if self.rules.iter().any(|r| r.action == Action::Ask && r.matches(tool_name, &specifier)) {
            return PermissionDecision::Ask;
        }
        if self.rules.iter().any(|r| r.action == Action::Allow && r.matches(tool_name, &specifier)) {
            return PermissionDecision::Allow;
        }

        // No rule matched — fall back to the permission mode's default.
        match self.mode {
            PermissionMode::Yolo => PermissionDecision::Allow,
            PermissionMode::Plan => {
                if is_write_tool(tool_name) {
                    PermissionDecision::Deny("write tools are blocked in plan mode".into())
                } else {
                    PermissionDecision::Ask
                }
            }
            PermissionMode::AcceptEdits => {
                if is_write_tool(tool_name) {
                    PermissionDecision::Ask
                } else {
                    PermissionDecision::Allow
                }
            }
            PermissionMode::Normal => PermissionDecision::Ask,
        }
    }
}

/// Tools whose effect is a filesystem or state mutation, per the permission
/// mode's read/write distinction.
fn is_write_tool(tool_name: &str) -> bool {
    matches!(
        tool_name.to_ascii_lowercase().as_str(),
        "write" | "write_file" | "edit" | "edit_file" | "delete_file" | "delete"
            | "run_terminal_command" | "bash" | "shell" | "switch_mode" | "todo_write"
    )
}

/// Extract the specifier string used for rule matching, per tool type.
fn extract_specifier(tool_name: &str, args: &Value) -> String {
    let str_field = |field: &str| args.get(field).and_then(|v| v.as_str()).unwrap_or("").to_string();

    match tool_name.to_ascii_lowercase().as_str() {
        "bash" | "shell" | "run_terminal_command" => {
            str_field("shell_command")
        }
        "edit" | "edit_file" | "write" | "write_file" | "read" | "read_file" | "delete_file" => {
            str_field("path")
        }
        "grep" | "ls" | "list_dir" | "find_file" => str_field("path"),
        "webfetch" | "web_fetch" | "web_search" => {
            let url = str_field("url");
            let query = str_field("query");
            let raw = if !url.is_empty() { url } else { query };
            url_host(&raw).map(|h| format!("domain:{h}")).unwrap_or_default()
        }
        _ => String::new(),
    }
}

fn url_host(raw: &str) -> Option<String> {
    let without_scheme = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Convert a simple shell glob pattern to a case-sensitive [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    build_glob_regex(pattern, false)
}

fn glob_to_regex_case_insensitive(pattern: &str) -> Option<Regex> {
    build_glob_regex(pattern, true)
}

fn build_glob_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut re = String::from(if case_insensitive { "(?i)^" } else { "^" });
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn deny_beats_allow_for_same_specifier() {
        let checker = PermissionChecker::new(
            &rules(&["Bash(rm *)=allow", "Bash(rm *)=deny"]),
            PermissionMode::Normal,
        );
        let decision = checker.decide("bash", &json!({"shell_command": "rm /tmp/foo"}));
        assert!(matches!(decision, PermissionDecision::Deny(_)));
    }

    #[test]
    fn bare_tool_matches_any_specifier() {
        let checker = PermissionChecker::new(&rules(&["Read=allow"]), PermissionMode::Normal);
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/anything"})),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn specifier_glob_restricts_match() {
        let checker = PermissionChecker::new(&rules(&["Edit(/etc/*)=deny"]), PermissionMode::Yolo);
        assert!(matches!(
            checker.decide("edit_file", &json!({"path": "/etc/passwd"})),
            PermissionDecision::Deny(_)
        ));
        assert_eq!(
            checker.decide("edit_file", &json!({"path": "/home/user/foo.rs"})),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn tool_match_is_case_insensitive() {
        let checker = PermissionChecker::new(&rules(&["bash(ls *)=deny"]), PermissionMode::Normal);
        assert!(matches!(
            checker.decide("Bash", &json!({"shell_command": "ls /tmp"})),
            PermissionDecision::Deny(_)
        ));
    }

    #[test]
    fn miss_in_yolo_mode_allows() {
        let checker = PermissionChecker::new(&rules(&[]), PermissionMode::Yolo);
        assert_eq!(
            checker.decide("run_terminal_command", &json!({"shell_command": "rm -rf /"})),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn miss_in_plan_mode_denies_write_tools() {
        let checker = PermissionChecker::new(&rules(&[]), PermissionMode::Plan);
        assert!(matches!(
            checker.decide("edit_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Deny(_)
        ));
    }

    #[test]
    fn miss_in_plan_mode_asks_for_read_tools() {
        let checker = PermissionChecker::new(&rules(&[]), PermissionMode::Plan);
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Ask
        );
    }

    #[test]
    fn miss_in_accept_edits_mode_allows_reads_asks_writes() {
        let checker = PermissionChecker::new(&rules(&[]), PermissionMode::AcceptEdits);
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Allow
        );
        assert_eq!(
            checker.decide("write_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Ask
        );
    }

    #[test]
    fn miss_in_normal_mode_asks() {
        let checker = PermissionChecker::new(&rules(&[]), PermissionMode::Normal);
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Ask
        );
    }

    #[test]
    fn web_fetch_specifier_is_domain() {
        let checker = PermissionChecker::new(
            &rules(&["WebFetch(domain:example.com)=deny"]),
            PermissionMode::Yolo,
        );
        assert!(matches!(
            checker.decide("web_fetch", &json!({"url": "https://example.com/path"})),
            PermissionDecision::Deny(_)
        ));
        assert_eq!(
            checker.decide("web_fetch", &json!({"url": "https://other.com/path"})),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn dynamic_rule_can_be_added_at_runtime() {
        let mut checker = PermissionChecker::new(&rules(&[]), PermissionMode::Normal);
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Ask
        );
        assert!(checker.add_rule("Read=allow"));
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Allow
        );
    }

    #[test]
    fn malformed_rule_is_rejected() {
        let mut checker = PermissionChecker::new(&rules(&["not a rule"]), PermissionMode::Normal);
        assert!(!checker.add_rule("also not a rule"));
        // Falls through to the mode default rather than matching anything.
        assert_eq!(
            checker.decide("read_file", &json!({"path": "/tmp/x"})),
            PermissionDecision::Ask
        );
    }
}
