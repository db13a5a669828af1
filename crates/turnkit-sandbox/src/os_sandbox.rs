use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

/// Options threaded through every sandboxed command. Cloned per call;
/// per-call overrides merge non-zero fields over these defaults.
#[derive(Debug, Clone, Default)]
pub struct SandboxOptions {
    pub work_dir: PathBuf,
    pub additional_dirs: Vec<PathBuf>,
    pub allow_network: bool,
    pub allowed_domains: Vec<String>,
    pub excluded_cmds: Vec<String>,
}

/// The three OS-level isolation backends named in the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSandboxBackend {
    /// macOS `sandbox-exec` with a generated SBPL profile.
    Seatbelt,
    /// Linux `bwrap` (bubblewrap).
    Bwrap,
    /// No process wrapping — write-path validation is still enforced by
    /// [`crate::PathSandbox`] upstream of dispatch.
    Noop,
}

impl OsSandboxBackend {
    /// Pick the backend appropriate for the current OS, falling back to
    /// `Noop` when neither wrapper binary is expected to exist.
    pub fn for_current_os() -> Self {
        if cfg!(target_os = "macos") {
            OsSandboxBackend::Seatbelt
        } else if cfg!(target_os = "linux") {
            OsSandboxBackend::Bwrap
        } else {
            OsSandboxBackend::Noop
        }
    }
}

/// Inspect the first shell token of `command_line` against the
/// configuration-supplied denylist.
pub fn is_excluded_cmd(command_line: &str, excluded: &[String]) -> bool {
    let first = command_line.split_whitespace().next().unwrap_or("");
    let first = first.rsplit('/').next().unwrap_or(first);
    excluded.iter().any(|e| e == first)
}

fn seatbelt_profile(opts: &SandboxOptions) -> String {
    let mut profile = String::from("(version 1)\n(deny default)\n(allow file-read*)\n");
    for dir in std::iter::once(&opts.work_dir).chain(opts.additional_dirs.iter()) {
        profile.push_str(&format!(
            "(allow file-write* (subpath \"{}\"))\n",
            dir.display()
        ));
    }
    profile.push_str("(allow file-write* (subpath \"/tmp\"))\n");
    profile.push_str("(allow file-write* (subpath \"/var/folders\"))\n");
    if opts.allow_network {
        profile.push_str("(allow network*)\n");
    }
    profile
}

/// Build a `bwrap` argument list wrapping `sh -c <command>`.
fn bwrap_args(opts: &SandboxOptions, command: &str) -> Vec<String> {
    let mut args = vec![
        "--ro-bind".into(), "/".into(), "/".into(),
        "--dev".into(), "/dev".into(),
        "--proc".into(), "/proc".into(),
        "--tmpfs".into(), "/tmp".into(),
    ];
    for dir in std::iter::once(&opts.work_dir).chain(opts.additional_dirs.iter()) {
        let d = dir.display().to_string();
        args.push("--bind".into());
        args.push(d.clone());
        args.push(d);
    }
    if !opts.allow_network {
        args.push("--unshare-net".into());
    }
    args.push("sh".into());
    args.push("-c".into());
    args.push(command.into());
    args
}

/// Build the `tokio::process::Command` that will run `command` under the
/// given backend and sandbox options. The returned command has not been
/// spawned yet.
pub fn wrapped_command(backend: OsSandboxBackend, opts: &SandboxOptions, command: &str) -> Command {
    match backend {
        OsSandboxBackend::Seatbelt => {
            let profile = seatbelt_profile(opts);
            debug!(profile = %profile, "seatbelt profile");
            let mut cmd = Command::new("sandbox-exec");
            cmd.arg("-p").arg(profile).arg("sh").arg("-c").arg(command);
            cmd
        }
        OsSandboxBackend::Bwrap => {
            let args = bwrap_args(opts, command);
            debug!(?args, "bwrap invocation");
            let mut cmd = Command::new("bwrap");
            cmd.args(args);
            cmd
        }
        OsSandboxBackend::Noop => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(work_dir: &str) -> SandboxOptions {
        SandboxOptions {
            work_dir: PathBuf::from(work_dir),
            additional_dirs: vec![],
            allow_network: false,
            allowed_domains: vec![],
            excluded_cmds: vec![],
        }
    }

    #[test]
    fn seatbelt_profile_denies_by_default() {
        let profile = seatbelt_profile(&opts("/tmp/w"));
        assert!(profile.contains("(deny default)"));
        assert!(profile.contains("/tmp/w"));
    }

    #[test]
    fn seatbelt_profile_allows_network_when_requested() {
        let mut o = opts("/tmp/w");
        o.allow_network = true;
        assert!(seatbelt_profile(&o).contains("network*"));
    }

    #[test]
    fn seatbelt_profile_denies_network_by_default() {
        let profile = seatbelt_profile(&opts("/tmp/w"));
        assert!(!profile.contains("network*"));
    }

    #[test]
    fn bwrap_unshares_net_when_network_forbidden() {
        let args = bwrap_args(&opts("/tmp/w"), "echo hi");
        assert!(args.iter().any(|a| a == "--unshare-net"));
    }

    #[test]
    fn bwrap_keeps_network_when_allowed() {
        let mut o = opts("/tmp/w");
        o.allow_network = true;
        let args = bwrap_args(&o, "echo hi");
        assert!(!args.iter().any(|a| a == "--unshare-net"));
    }

    #[test]
    fn bwrap_binds_each_writable_root() {
        let mut o = opts("/tmp/w");
        o.additional_dirs.push(PathBuf::from("/tmp/extra"));
        let args = bwrap_args(&o, "echo hi");
        assert!(args.iter().any(|a| a == "/tmp/w"));
        assert!(args.iter().any(|a| a == "/tmp/extra"));
    }

    #[test]
    fn excluded_cmd_matches_first_token() {
        let denylist = vec!["curl".to_string()];
        assert!(is_excluded_cmd("curl http://evil", &denylist));
        assert!(!is_excluded_cmd("echo curl", &denylist));
    }

    #[test]
    fn excluded_cmd_strips_path_prefix() {
        let denylist = vec!["rm".to_string()];
        assert!(is_excluded_cmd("/bin/rm -rf /", &denylist));
    }

    #[test]
    fn for_current_os_returns_a_known_variant() {
        let backend = OsSandboxBackend::for_current_os();
        assert!(matches!(
            backend,
            OsSandboxBackend::Seatbelt | OsSandboxBackend::Bwrap | OsSandboxBackend::Noop
        ));
    }
}
