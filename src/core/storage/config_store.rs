// src/core/storage/config_store.rs

//! The versioned config store: one durable `NodeContext` snapshot per
//! committed or prepared version, written atomically (temp file + rename).

use crate::core::NomadError;
use crate::core::model::context::NodeContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The persisted wrapper around a snapshot. `format` records the shape the
/// document was written in; documents without the field predate versioning
/// and count as format 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotDocument {
    #[serde(default = "default_format")]
    pub format: u32,
    pub node_context: NodeContext,
}

fn default_format() -> u32 {
    1
}

pub struct ConfigStore {
    dir: PathBuf,
    node_name: String,
}

impl ConfigStore {
    pub fn open(dir: &Path, node_name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            node_name: node_name.to_string(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Scans the snapshot filenames for the node name they encode. A store
    /// that holds records for more than one node is corrupt.
    pub fn discover_node_name(dir: &Path) -> Result<Option<String>, NomadError> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((name, _)) = parse_snapshot_file_name(file_name) {
                names.insert(name);
            }
        }
        if names.len() > 1 {
            return Err(NomadError::StorageError(format!(
                "Config store {} holds records for more than one node: {}",
                dir.display(),
                names.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(names.into_iter().next())
    }

    /// Writes the snapshot for a version atomically and durably.
    pub fn save(&self, version: u64, context: &NodeContext) -> Result<(), NomadError> {
        let document = SnapshotDocument {
            format: crate::core::change::codec::CURRENT_FORMAT,
            node_context: context.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let final_path = self.path_for(version);
        let temp_path = self
            .dir
            .join(format!(".tmp-{}-{}", version, rand::random::<u32>()));
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                NomadError::StorageError(format!(
                    "Failed to write config snapshot {}: {e}",
                    final_path.display()
                ))
            })?;
        drop(file);
        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            NomadError::StorageError(format!(
                "Failed to move config snapshot into place at {}: {e}",
                final_path.display()
            ))
        })?;
        sync_dir(&self.dir);
        debug!(
            "Saved config snapshot for version {} at {}.",
            version,
            final_path.display()
        );
        Ok(())
    }

    /// Reads the exact document last written for a version.
    pub fn load(&self, version: u64) -> Result<SnapshotDocument, NomadError> {
        let path = self.path_for(version);
        let bytes = fs::read(&path).map_err(|e| {
            NomadError::StorageError(format!(
                "Failed to read config snapshot {}: {e}",
                path.display()
            ))
        })?;
        let document: SnapshotDocument = serde_json::from_slice(&bytes)?;
        Ok(document)
    }

    pub fn has_version(&self, version: u64) -> bool {
        self.path_for(version).is_file()
    }

    /// All stored versions for this node, ascending.
    pub fn versions(&self) -> Result<Vec<u64>, NomadError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((name, version)) = parse_snapshot_file_name(file_name) {
                if name == self.node_name {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Removes a snapshot (used when a prepared change rolls back).
    pub fn delete(&self, version: u64) -> Result<(), NomadError> {
        let path = self.path_for(version);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config snapshot {} was already gone when deleting.",
                    path.display()
                );
                Ok(())
            }
            Err(e) => Err(NomadError::StorageError(format!(
                "Failed to delete config snapshot {}: {e}",
                path.display()
            ))),
        }
    }

    fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{}.{}.json", self.node_name, version))
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("dir", &self.dir)
            .field("node_name", &self.node_name)
            .finish()
    }
}

/// Parses `<node-name>.<version>.json`; the node name may itself contain
/// dots, so the version is taken from the end.
fn parse_snapshot_file_name(file_name: &str) -> Option<(String, u64)> {
    let stem = file_name.strip_suffix(".json")?;
    let (name, version) = stem.rsplit_once('.')?;
    if name.is_empty() {
        return None;
    }
    let version = version.parse::<u64>().ok()?;
    Some((name.to_string(), version))
}

/// Best-effort directory fsync so the rename itself is durable.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
