//! Memory hierarchy loader (C9): composes the system prompt's memory
//! section from five independently-loaded, priority-ordered levels.

mod frontmatter;
mod import;

pub use frontmatter::FrontMatter;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("import cycle detected")]
    ImportCycle,
    #[error("io error reading {0}")]
    Io(String),
}

/// Priority order: index 0 has the highest priority. Matches the order
/// entries are flattened in after all levels finish loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryLevel {
    ProjectRules = 0,
    ClaudeCompat = 1,
    ClaudeRules = 2,
    UserClaudeCompat = 3,
    AutoMemory = 4,
}

impl MemoryLevel {
    pub const ALL: [MemoryLevel; 5] = [
        MemoryLevel::ProjectRules,
        MemoryLevel::ClaudeCompat,
        MemoryLevel::ClaudeRules,
        MemoryLevel::UserClaudeCompat,
        MemoryLevel::AutoMemory,
    ];
}

#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub source_path: PathBuf,
    pub resolved_content: String,
    pub level: MemoryLevel,
    pub path_globs: Vec<String>,
}

/// Resolves the on-disk location each [`MemoryLevel`] reads from for a
/// given project directory.
pub struct MemoryLoader {
    project_dir: PathBuf,
    home_dir: PathBuf,
}

impl MemoryLoader {
    pub fn new(project_dir: impl Into<PathBuf>, home_dir: impl Into<PathBuf>) -> Self {
        Self { project_dir: project_dir.into(), home_dir: home_dir.into() }
    }

    fn path_for(&self, level: MemoryLevel) -> PathBuf {
        match level {
            MemoryLevel::ProjectRules => self.project_dir.join(".turnkit").join("memory.md"),
            MemoryLevel::ClaudeCompat => self.project_dir.join("CLAUDE.md"),
            MemoryLevel::ClaudeRules => self.project_dir.join(".claude").join("CLAUDE.md"),
            MemoryLevel::UserClaudeCompat => self.home_dir.join(".claude").join("CLAUDE.md"),
            MemoryLevel::AutoMemory => auto_memory_dir(&self.home_dir, &self.project_dir),
        }
    }

    /// Load all five levels concurrently, filter by `active_files`, and
    /// flatten into priority order. Front matter `paths` restrict an
    /// entry to sessions where at least one active file matches.
    pub async fn load(&self, active_files: &[String]) -> Result<Vec<MemoryEntry>, MemoryError> {
        let (a, b, c, d, e) = tokio::join!(
            load_level(self.path_for(MemoryLevel::ProjectRules), MemoryLevel::ProjectRules),
            load_level(self.path_for(MemoryLevel::ClaudeCompat), MemoryLevel::ClaudeCompat),
            load_level(self.path_for(MemoryLevel::ClaudeRules), MemoryLevel::ClaudeRules),
            load_level(self.path_for(MemoryLevel::UserClaudeCompat), MemoryLevel::UserClaudeCompat),
            load_auto_memory(self.path_for(MemoryLevel::AutoMemory)),
        );

        let slots = [a, b, c, d, e];
        let mut entries = Vec::new();
        for slot in slots {
            if let Some(entry) = slot? {
                if matches_active_files(&entry.path_globs, active_files) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }
}

fn matches_active_files(globs: &[String], active_files: &[String]) -> bool {
    if globs.is_empty() {
        return true;
    }
    active_files.iter().any(|f| {
        let base = Path::new(f).file_name().and_then(|n| n.to_str()).unwrap_or(f);
        globs.iter().any(|g| glob_match(g, f) || glob_match(g, base))
    })
}

/// Minimal `*`/`?` glob match, sufficient for path filtering.
fn glob_match(pattern: &str, text: &str) -> bool {
    let regex_src = format!(
        "^{}$",
        regex::escape(pattern).replace("\\*", ".*").replace("\\?", ".")
    );
    regex::Regex::new(&regex_src).map(|re| re.is_match(text)).unwrap_or(false)
}

async fn load_level(path: PathBuf, level: MemoryLevel) -> Result<Option<MemoryEntry>, MemoryError> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| MemoryError::Io(e.to_string()))?;
    let (front, body) = frontmatter::split(&raw);
    let canon = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
    let expanded = import::expand(&body, path.parent().unwrap_or(Path::new(".")), 0, &mut vec![canon])?;
    Ok(Some(MemoryEntry {
        source_path: path,
        resolved_content: expanded,
        level,
        path_globs: front.map(|f| f.paths).unwrap_or_default(),
    }))
}

/// AutoMemory is a directory of `.md` notes; all are concatenated.
async fn load_auto_memory(dir: PathBuf) -> Result<Option<MemoryEntry>, MemoryError> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut names = Vec::new();
    let mut rd = tokio::fs::read_dir(&dir).await.map_err(|e| MemoryError::Io(e.to_string()))?;
    while let Ok(Some(entry)) = rd.next_entry().await {
        if entry.path().extension().and_then(|e| e.to_str()) == Some("md") {
            names.push(entry.path());
        }
    }
    names.sort();
    if names.is_empty() {
        return Ok(None);
    }
    let mut combined = String::new();
    for path in &names {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            let canon = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            let expanded = import::expand(&text, dir.as_path(), 0, &mut vec![canon])?;
            combined.push_str(&expanded);
            combined.push('\n');
        }
    }
    Ok(Some(MemoryEntry {
        source_path: dir,
        resolved_content: combined,
        level: MemoryLevel::AutoMemory,
        path_globs: vec![],
    }))
}

fn auto_memory_dir(home: &Path, project_dir: &Path) -> PathBuf {
    let project_str = project_dir.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(project_str.as_bytes());
    let digest = hasher.finalize();
    let short: String = hex::encode(digest).chars().take(16).collect();
    home.join(".pi-go").join("projects").join(short).join("memory")
}
