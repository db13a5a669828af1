//! Path confinement (C6) and OS-level process isolation (C7).
//!
//! Every file-mutating tool call passes through [`PathSandbox::validate`]
//! before it reaches the filesystem, and every shell invocation is wrapped
//! by an [`OsSandboxBackend`] before the child process is spawned.

pub mod os_sandbox;
pub mod path_sandbox;

pub use os_sandbox::{wrapped_command, OsSandboxBackend};
pub use path_sandbox::{PathSandbox, SandboxError};
