use std::path::{Path, PathBuf};

use crate::MemoryError;

const MAX_DEPTH: usize = 5;

/// Expand `@path` import lines in `body`. `visited` accumulates absolute
/// paths already expanded in this tree; any revisit is reported as an
/// import cycle rather than silently deduplicated.
pub fn expand(
    body: &str,
    base_dir: &Path,
    depth: usize,
    visited: &mut Vec<PathBuf>,
) -> Result<String, MemoryError> {
    let mut out = String::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("@@") {
            out.push('@');
            out.push_str(rest);
            out.push('\n');
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            let target = rest.trim();
            if depth >= MAX_DEPTH {
                out.push_str(line);
                out.push('\n');
                continue;
            }

            let path = resolve(base_dir, target);
            if !path.is_file() {
                out.push_str(&format!("<!-- import not found: {target} -->\n"));
                continue;
            }

            let canon = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if visited.contains(&canon) {
                return Err(MemoryError::ImportCycle);
            }
            visited.push(canon);

            let content = std::fs::read_to_string(&path).map_err(|e| MemoryError::Io(e.to_string()))?;
            let nested_base = path.parent().unwrap_or(base_dir);
            out.push_str(&expand(&content, nested_base, depth + 1, visited)?);
            out.push('\n');
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

fn resolve(base_dir: &Path, target: &str) -> PathBuf {
    let p = Path::new(target);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
