// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use turnkit_config::{AgentMode, PermissionMode};

/// Output format for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Human-readable text streamed to stdout as it arrives.
    #[default]
    Text,
    /// One JSON record per line — every `AgentEvent`, verbatim.
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(
    name = "turnkit",
    about = "A terminal coding agent that drives an LLM through a multi-turn, tool-using conversation",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The task to hand to the agent. Read from stdin if omitted and stdin is not a TTY.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Tool-availability mode.
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Default behaviour for a permission-rule miss.
    #[arg(long, short = 'p', value_enum)]
    pub permission_mode: Option<PermissionMode>,

    /// Named provider entry from `providers:` in config, or a bare model name
    /// to use with the default provider.
    #[arg(long, short = 'M', env = "TURNKIT_MODEL")]
    pub model: Option<String>,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Workspace root; all file writes are confined to it. Defaults to the
    /// current directory.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Allow outbound network access for tools (web_fetch, web_search).
    #[arg(long)]
    pub allow_network: bool,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Maximum turns before the run halts with a budget-exceeded exit code.
    /// Overrides `agent.max_turns` in config.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
    /// List available models for the configured provider(s).
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic").
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models.
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table.
        #[arg(long)]
        json: bool,
    },
    /// List all supported model providers.
    ListProviders {
        /// Show detailed information for each provider.
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Package manifest operations (install/remove/list).
    Package {
        #[command(subcommand)]
        command: PackageCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum PackageCommands {
    /// List installed packages.
    List,
    /// Remove an installed package by name.
    Remove {
        name: String,
        /// Remove the local (workspace-scoped) entry instead of the global one.
        #[arg(long)]
        local: bool,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "turnkit", &mut std::io::stdout());
}

pub trait IsTerminal {
    fn is_terminal(&self) -> bool;
}

impl IsTerminal for std::io::Stdin {
    fn is_terminal(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe { libc::isatty(self.as_raw_fd()) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}
