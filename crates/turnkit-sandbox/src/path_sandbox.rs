use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path outside sandbox: {0}")]
    OutsideSandbox(String),
}

/// Confines write operations to a set of allowed roots. Reads are always
/// permitted — the path sandbox only gates mutation.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    work_dir: PathBuf,
    additional_dirs: Vec<PathBuf>,
}

impl PathSandbox {
    pub fn new(work_dir: impl Into<PathBuf>, additional_dirs: Vec<PathBuf>) -> Self {
        Self { work_dir: work_dir.into(), additional_dirs }
    }

    fn roots(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.work_dir).chain(self.additional_dirs.iter())
    }

    /// Validate `path` for the given access kind. Reads are always `Ok`;
    /// writes require `path` to equal, or descend from, one of the
    /// sandbox's roots.
    pub fn validate(&self, path: &Path, write: bool) -> Result<(), SandboxError> {
        if !write {
            return Ok(());
        }

        let resolved = resolve_best_effort(path);

        for root in self.roots() {
            let root = resolve_best_effort(root);
            if is_within(&resolved, &root) {
                return Ok(());
            }
        }

        Err(SandboxError::OutsideSandbox(path.display().to_string()))
    }
}

/// Resolve symlinks when possible; fall back to the raw path (e.g. the
/// path does not exist yet — a write target that will be created).
fn resolve_best_effort(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `candidate` is within `root` iff it equals `root` or descends from it.
/// A separator is appended to both sides before the prefix check so that
/// `/tmp-evil` can never match an allowlisted `/tmp`.
fn is_within(candidate: &Path, root: &Path) -> bool {
    if candidate == root {
        return true;
    }
    let sep = std::path::MAIN_SEPARATOR;
    let mut root_str = root.to_string_lossy().into_owned();
    if !root_str.ends_with(sep) {
        root_str.push(sep);
    }
    let candidate_str = candidate.to_string_lossy().into_owned();
    candidate_str.starts_with(&root_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_at(root: &Path) -> PathSandbox {
        PathSandbox::new(root.to_path_buf(), vec![])
    }

    #[test]
    fn read_is_always_ok() {
        let sandbox = sandbox_at(Path::new("/tmp/nonexistent-root-xyz"));
        assert!(sandbox.validate(Path::new("/etc/passwd"), false).is_ok());
    }

    #[test]
    fn write_within_work_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_at(dir.path());
        let target = dir.path().join("sub/file.txt");
        assert!(sandbox.validate(&target, true).is_ok());
    }

    #[test]
    fn write_equal_to_work_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_at(dir.path());
        assert!(sandbox.validate(dir.path(), true).is_ok());
    }

    #[test]
    fn write_outside_work_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_at(dir.path());
        assert!(sandbox.validate(Path::new("/etc/passwd"), true).is_err());
    }

    #[test]
    fn prefix_bypass_is_rejected() {
        // work_dir = /tmp/W ; /tmp/W-evil/x must NOT match.
        let base = tempfile::tempdir().unwrap();
        let w = base.path().join("W");
        std::fs::create_dir(&w).unwrap();
        let evil = base.path().join("W-evil");
        std::fs::create_dir(&evil).unwrap();

        let sandbox = sandbox_at(&w);
        assert!(sandbox.validate(&evil.join("x"), true).is_err());
        assert!(sandbox.validate(&w.join("x"), true).is_ok());
    }

    #[test]
    fn additional_dirs_are_honored() {
        let work = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        let sandbox = PathSandbox::new(work.path().to_path_buf(), vec![extra.path().to_path_buf()]);
        assert!(sandbox.validate(&extra.path().join("x"), true).is_ok());
    }

    #[test]
    fn is_within_requires_separator_boundary() {
        assert!(is_within(Path::new("/tmp/W/x"), Path::new("/tmp/W")));
        assert!(!is_within(Path::new("/tmp/W-evil/x"), Path::new("/tmp/W")));
        assert!(is_within(Path::new("/tmp/W"), Path::new("/tmp/W")));
    }
}
