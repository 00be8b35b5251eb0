// src/core/storage/repository.rs

//! The on-disk configuration repository owned by a single node process:
//! `config/` (versioned snapshots), `sanskrit/` (the change journal) and
//! `license/`. The repository is created whole or opened whole; a partial
//! set of subtrees is treated as corruption.

use crate::core::NomadError;
use crate::core::storage::config_store::ConfigStore;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_DIR: &str = "config";
pub const LICENSE_DIR: &str = "license";
pub const JOURNAL_DIR: &str = "sanskrit";
pub const LICENSE_FILE: &str = "license.xml";
const LOCK_FILE: &str = ".lock";

/// Advisory exclusive ownership of the repository root. The lock file holds
/// the owning pid and is removed when the guard drops.
#[derive(Debug)]
struct RepositoryLock {
    path: PathBuf,
}

impl RepositoryLock {
    fn acquire(root: &Path) -> Result<Self, NomadError> {
        let path = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(&path).unwrap_or_default();
                Err(NomadError::StorageError(format!(
                    "Configuration repository {} is locked by another process (pid {})",
                    root.display(),
                    owner.trim()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "Could not remove repository lock {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[derive(Debug)]
pub struct NomadRepository {
    root: PathBuf,
    _lock: RepositoryLock,
}

impl NomadRepository {
    /// Opens the repository at `root`. An absent root is created with all
    /// three subtrees; a root with only some of them present is a hard
    /// error, because it means a previous create or reset was interrupted.
    pub fn open(root: &Path) -> Result<Self, NomadError> {
        let subdirs = [
            root.join(CONFIG_DIR),
            root.join(LICENSE_DIR),
            root.join(JOURNAL_DIR),
        ];
        let present: Vec<bool> = subdirs.iter().map(|d| d.is_dir()).collect();
        if present.iter().any(|p| *p) && !present.iter().all(|p| *p) {
            let missing: Vec<String> = subdirs
                .iter()
                .zip(&present)
                .filter(|(_, p)| !**p)
                .map(|(d, _)| d.display().to_string())
                .collect();
            return Err(NomadError::StorageError(format!(
                "Configuration repository {} is partially formed; missing: {}",
                root.display(),
                missing.join(", ")
            )));
        }
        if !present.iter().any(|p| *p) {
            for dir in &subdirs {
                fs::create_dir_all(dir)?;
            }
            info!("Created configuration repository at {}.", root.display());
        }
        let lock = RepositoryLock::acquire(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn license_dir(&self) -> PathBuf {
        self.root.join(LICENSE_DIR)
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join(JOURNAL_DIR)
    }

    /// The node name encoded in the snapshot filenames, when any snapshot
    /// exists.
    pub fn discover_node_name(&self) -> Result<Option<String>, NomadError> {
        ConfigStore::discover_node_name(&self.config_dir())
    }

    pub fn license(&self) -> Result<Option<String>, NomadError> {
        let path = self.license_dir().join(LICENSE_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Installs (or with `None`, removes) the license file. Returns the
    /// previous content so callers can restore it.
    pub fn install_license(&self, content: Option<&str>) -> Result<Option<String>, NomadError> {
        let previous = self.license()?;
        let path = self.license_dir().join(LICENSE_FILE);
        match content {
            Some(content) => fs::write(&path, content)?,
            None => {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(previous)
    }

    /// Moves the three subtrees aside into timestamped backups and starts
    /// empty. Used when a node is detached and returns to diagnostic mode.
    pub fn reset(&self) -> Result<(), NomadError> {
        let stamp = Local::now().format("%Y%m%d.%H%M%S");
        for name in [CONFIG_DIR, LICENSE_DIR, JOURNAL_DIR] {
            let dir = self.root.join(name);
            let backup = self.root.join(format!("backup-{name}-{stamp}"));
            fs::rename(&dir, &backup).map_err(|e| {
                NomadError::StorageError(format!(
                    "Failed to move {} aside to {}: {e}",
                    dir.display(),
                    backup.display()
                ))
            })?;
            fs::create_dir_all(&dir)?;
        }
        info!(
            "Configuration repository {} was reset; previous state saved under backup-*-{stamp}.",
            self.root.display()
        );
        Ok(())
    }
}
