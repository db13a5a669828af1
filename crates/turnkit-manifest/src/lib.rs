//! Package manifest registry (C13): atomic JSON read/mutate/write-temp/
//! rename I/O over a list of installed packages.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub source: String,
    pub path: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub local: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub packages: Vec<Package>,
}

/// Owns the manifest file path and provides atomic mutation helpers.
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the manifest, returning the default (empty) manifest when the
    /// file does not yet exist.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert `pkg` by `(name, local)` and persist atomically.
    pub fn add(&self, pkg: Package) -> Result<(), ManifestError> {
        let mut manifest = self.load()?;
        if let Some(existing) = manifest
            .packages
            .iter_mut()
            .find(|p| p.name == pkg.name && p.local == pkg.local)
        {
            *existing = pkg;
        } else {
            manifest.packages.push(pkg);
        }
        self.write(&manifest)
    }

    /// Remove the package matching `(name, local)`. Returns whether an
    /// entry was found and removed.
    pub fn remove(&self, name: &str, local: bool) -> Result<bool, ManifestError> {
        let mut manifest = self.load()?;
        let before = manifest.packages.len();
        manifest.packages.retain(|p| !(p.name == name && p.local == local));
        let found = manifest.packages.len() != before;
        if found {
            self.write(&manifest)?;
        }
        Ok(found)
    }

    /// Find the package matching `(name, local)`.
    pub fn find(&self, name: &str, local: bool) -> Result<Option<Package>, ManifestError> {
        let manifest = self.load()?;
        Ok(manifest.packages.into_iter().find(|p| p.name == name && p.local == local))
    }

    fn write(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
            set_dir_perms(dir)?;
        }
        let json = serde_json::to_vec_pretty(manifest)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        set_file_perms(tmp.path())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_perms(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_file_perms(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_perms(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_dir_perms(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
