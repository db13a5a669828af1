// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests for turnkit's core logic using the mock model provider.
use std::sync::Arc;

use turnkit_config::{AgentConfig, AgentMode, Config, PermissionMode};
use turnkit_core::{Agent, AgentRuntimeContext};
use turnkit_model::MockProvider;
use turnkit_tools::{events::ToolEvent, PermissionChecker, PermissionDecision, ToolRegistry};
use tokio::sync::{mpsc, Mutex};

fn mock_agent(mode: AgentMode) -> Agent {
    let model: Arc<dyn turnkit_model::ModelProvider> = Arc::new(MockProvider);
    let tools = Arc::new(ToolRegistry::default());
    let config = Arc::new(AgentConfig::default());
    let permission = Arc::new(PermissionChecker::new(&[], PermissionMode::Yolo));
    let sandbox = Arc::new(turnkit_sandbox::PathSandbox::new(std::env::temp_dir(), vec![]));
    let mode_lock = Arc::new(Mutex::new(mode));
    let (_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);
    Agent::new(
        model,
        tools,
        config,
        permission,
        sandbox,
        AgentRuntimeContext::default(),
        mode_lock,
        tool_event_rx,
        128_000,
    )
}

#[tokio::test]
async fn agent_returns_mock_response() {
    let mut agent = mock_agent(AgentMode::Agent);
    let (tx, mut rx) = mpsc::channel(64);
    agent.submit("hello", tx).await.unwrap();

    let mut got_text = false;
    while let Ok(event) = rx.try_recv() {
        if let turnkit_core::AgentEvent::TextDelta(t) = event {
            assert!(t.contains("MOCK"));
            got_text = true;
        }
    }
    assert!(got_text, "expected at least one TextDelta event");
}

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.model.provider, "anthropic");
    assert!(cfg.agent.max_concurrent_tools > 0);
    assert!(cfg.agent.compaction_threshold > 0.0);
}

#[test]
fn permission_checker_default_rules_ask_for_writes() {
    let cfg = Config::default();
    let checker = PermissionChecker::new(&cfg.permission.rules, cfg.permission.mode);
    assert_eq!(
        checker.decide("write_file", &serde_json::json!({"path": "/tmp/x"})),
        PermissionDecision::Ask
    );
}

#[test]
fn permission_checker_deny_rule_from_config() {
    let cfg = Config {
        permission: turnkit_config::PermissionConfig {
            mode: PermissionMode::Normal,
            rules: vec!["Bash(rm -rf *)=deny".into()],
        },
        ..Config::default()
    };
    let checker = PermissionChecker::new(&cfg.permission.rules, cfg.permission.mode);
    assert!(matches!(
        checker.decide("bash", &serde_json::json!({"shell_command": "rm -rf /"})),
        PermissionDecision::Deny(_)
    ));
}

#[tokio::test]
async fn shell_tool_executes_echo() {
    use turnkit_tools::Tool;
    use turnkit_tools::{RunTerminalCommandTool, ToolCall};

    let tool = RunTerminalCommandTool {
        timeout_secs: 30,
        ..RunTerminalCommandTool::default()
    };
    let call = ToolCall {
        id: "1".into(),
        name: "run_terminal_command".into(),
        args: serde_json::json!({ "shell_command": "echo hello_world", "workdir": ".", "timeout_secs": 10 }),
    };
    let output = tool.execute(&call).await;
    assert!(!output.is_error);
    assert!(output.content.contains("hello_world"));
}

#[tokio::test]
async fn fs_tool_write_read_roundtrip() {
    use turnkit_tools::{ReadFileTool, Tool, ToolCall, WriteTool};

    let path = format!("/tmp/turnkit_test_{}.txt", uuid::Uuid::new_v4());

    let write_call = ToolCall {
        id: "w1".into(),
        name: "write".into(),
        args: serde_json::json!({ "path": path, "content": "roundtrip", "append": false }),
    };
    let wo = WriteTool.execute(&write_call).await;
    assert!(!wo.is_error, "write failed: {}", wo.content);

    let read_call = ToolCall {
        id: "r1".into(),
        name: "read_file".into(),
        args: serde_json::json!({ "path": path }),
    };
    let ro = ReadFileTool::default().execute(&read_call).await;
    assert!(!ro.is_error);
    assert!(ro.content.contains("roundtrip"));

    let _ = std::fs::remove_file(&path);
}
