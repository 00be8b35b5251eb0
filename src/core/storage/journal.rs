// src/core/storage/journal.rs

//! The append-only change journal ("sanskrit"): the durable record of every
//! Nomad state transition on this node.
//!
//! The on-disk form is a JSON-lines file of *entries* (`add`, `mark`,
//! `takeover`). Replaying the entries at startup materializes the logical
//! change records and, as a side effect, the mutative message counter (the
//! number of entries), which makes the counter crash-durable without a
//! separate file. Every append is fsynced before the caller replies.

use crate::core::NomadError;
use crate::core::change::NomadChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const JOURNAL_FILE: &str = "append.log";

/// The lifecycle state of one change record. Exactly one terminal state
/// (committed or rolled back) per version; at most one prepared record
/// outstanding, and it is always the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeState {
    Prepared,
    Committed,
    RolledBack,
}

/// One logical Nomad log record, materialized from the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeRecord {
    pub version: u64,
    /// SHA-256 of the change's canonical encoding. Identifies the change
    /// across servers: a coordinator run prepares the same hash everywhere.
    pub change_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_record_hash: Option<String>,
    pub state: ChangeState,
    pub change: NomadChange,
    /// SHA-256 of the config snapshot this change produced.
    pub change_result_hash: String,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_timestamp: Option<DateTime<Utc>>,
}

/// The physical journal entries. `add` carries a full record in PREPARED
/// state; `mark` resolves the latest record; `takeover` only fences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
enum JournalEntry {
    Add {
        record: ChangeRecord,
    },
    Mark {
        version: u64,
        state: ChangeState,
        applied_host: String,
        applied_user: String,
        applied_timestamp: DateTime<Utc>,
    },
    Takeover {
        host: String,
        user: String,
        timestamp: DateTime<Utc>,
    },
}

pub struct ChangeJournal {
    path: PathBuf,
    file: File,
    records: Vec<ChangeRecord>,
    entry_count: u64,
    last_add_hash: Option<String>,
    last_mutation: Option<(String, String)>,
}

impl ChangeJournal {
    /// Opens (or creates) the journal in the given directory and replays it.
    pub fn open(dir: &Path) -> Result<Self, NomadError> {
        let path = dir.join(JOURNAL_FILE);
        let mut journal = Self {
            file: OpenOptions::new().create(true).append(true).open(&path)?,
            path,
            records: Vec::new(),
            entry_count: 0,
            last_add_hash: None,
            last_mutation: None,
        };
        journal.replay()?;
        debug!(
            "Change journal opened at {} with {} records ({} entries).",
            journal.path.display(),
            journal.records.len(),
            journal.entry_count
        );
        Ok(journal)
    }

    fn replay(&mut self) -> Result<(), NomadError> {
        let reader = BufReader::new(File::open(&self.path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                NomadError::StorageError(format!(
                    "Corrupt journal {} at line {}: {e}",
                    self.path.display(),
                    line_no + 1
                ))
            })?;
            self.replay_entry(entry, &line, line_no + 1)?;
        }
        Ok(())
    }

    fn replay_entry(
        &mut self,
        entry: JournalEntry,
        line: &str,
        line_no: usize,
    ) -> Result<(), NomadError> {
        match entry {
            JournalEntry::Add { record } => {
                self.check_add(&record).map_err(|e| {
                    NomadError::StorageError(format!(
                        "Corrupt journal {} at line {line_no}: {e}",
                        self.path.display()
                    ))
                })?;
                self.last_add_hash = Some(entry_hash(line));
                self.last_mutation =
                    Some((record.creation_host.clone(), record.creation_user.clone()));
                self.records.push(record);
            }
            JournalEntry::Mark {
                version,
                state,
                applied_host,
                applied_user,
                applied_timestamp,
            } => {
                let record = self.records.last_mut().ok_or_else(|| {
                    NomadError::StorageError(format!(
                        "Corrupt journal {}: mark entry at line {line_no} without a record",
                        self.path.display()
                    ))
                })?;
                if record.version != version || record.state != ChangeState::Prepared {
                    return Err(NomadError::StorageError(format!(
                        "Corrupt journal {}: mark for version {version} at line {line_no} does not resolve the outstanding prepared record",
                        self.path.display()
                    )));
                }
                record.state = state;
                record.applied_host = Some(applied_host.clone());
                record.applied_user = Some(applied_user.clone());
                record.applied_timestamp = Some(applied_timestamp);
                self.last_mutation = Some((applied_host, applied_user));
            }
            JournalEntry::Takeover { host, user, .. } => {
                self.last_mutation = Some((host, user));
            }
        }
        self.entry_count += 1;
        Ok(())
    }

    fn check_add(&self, record: &ChangeRecord) -> Result<(), NomadError> {
        if let Some(last) = self.records.last() {
            if last.state == ChangeState::Prepared {
                return Err(NomadError::StorageError(format!(
                    "version {} added while version {} is still prepared",
                    record.version, last.version
                )));
            }
        }
        let floor = self.records.last().map(|r| r.version).unwrap_or(0);
        if record.version <= floor {
            return Err(NomadError::StorageError(format!(
                "version {} added out of order (highest recorded is {floor})",
                record.version
            )));
        }
        if record.prev_record_hash != self.last_add_hash {
            return Err(NomadError::StorageError(format!(
                "hash chain broken at version {}",
                record.version
            )));
        }
        if record.state != ChangeState::Prepared {
            return Err(NomadError::StorageError(format!(
                "version {} added in non-prepared state",
                record.version
            )));
        }
        Ok(())
    }

    /// Appends a new PREPARED record. The journal fills in the hash chain.
    /// Durable (fsync) before return.
    pub fn append_prepared(&mut self, mut record: ChangeRecord) -> Result<(), NomadError> {
        record.prev_record_hash = self.last_add_hash.clone();
        record.state = ChangeState::Prepared;
        self.check_add(&record)?;
        let line = serde_json::to_string(&JournalEntry::Add {
            record: record.clone(),
        })?;
        self.append_line(&line)?;
        self.last_add_hash = Some(entry_hash(&line));
        self.last_mutation = Some((record.creation_host.clone(), record.creation_user.clone()));
        self.records.push(record);
        Ok(())
    }

    /// Resolves the outstanding prepared record to a terminal state.
    pub fn mark(
        &mut self,
        version: u64,
        state: ChangeState,
        applied_host: &str,
        applied_user: &str,
        applied_timestamp: DateTime<Utc>,
    ) -> Result<(), NomadError> {
        if state == ChangeState::Prepared {
            return Err(NomadError::InvalidInput(
                "A record cannot be marked back to prepared".to_string(),
            ));
        }
        let Some(record) = self.records.last() else {
            return Err(NomadError::StorageError("Journal is empty".to_string()));
        };
        if record.version != version || record.state != ChangeState::Prepared {
            return Err(NomadError::StorageError(format!(
                "No outstanding prepared record for version {version}"
            )));
        }
        let line = serde_json::to_string(&JournalEntry::Mark {
            version,
            state,
            applied_host: applied_host.to_string(),
            applied_user: applied_user.to_string(),
            applied_timestamp,
        })?;
        self.append_line(&line)?;
        let record = self.records.last_mut().expect("checked above");
        record.state = state;
        record.applied_host = Some(applied_host.to_string());
        record.applied_user = Some(applied_user.to_string());
        record.applied_timestamp = Some(applied_timestamp);
        self.last_mutation = Some((applied_host.to_string(), applied_user.to_string()));
        Ok(())
    }

    /// Records a coordinator takeover. Fences without touching any record.
    pub fn note_takeover(&mut self, host: &str, user: &str) -> Result<(), NomadError> {
        let line = serde_json::to_string(&JournalEntry::Takeover {
            host: host.to_string(),
            user: user.to_string(),
            timestamp: Utc::now(),
        })?;
        self.append_line(&line)?;
        self.last_mutation = Some((host.to_string(), user.to_string()));
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> Result<(), NomadError> {
        writeln!(self.file, "{line}")
            .and_then(|_| self.file.sync_all())
            .map_err(|e| {
                NomadError::StorageError(format!(
                    "Failed to append to journal {}: {e}",
                    self.path.display()
                ))
            })?;
        self.entry_count += 1;
        Ok(())
    }

    pub fn latest(&self) -> Option<&ChangeRecord> {
        self.records.last()
    }

    pub fn find_by_version(&self, version: u64) -> Option<&ChangeRecord> {
        self.records
            .binary_search_by_key(&version, |r| r.version)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Records in the inclusive version range, clamped to what exists.
    pub fn list(&self, from: u64, to: u64) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.version >= from && r.version <= to)
            .collect()
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// The mutative message counter: the number of durable entries.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_mutation(&self) -> Option<(&str, &str)> {
        self.last_mutation
            .as_ref()
            .map(|(h, u)| (h.as_str(), u.as_str()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ChangeJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeJournal")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .field("entries", &self.entry_count)
            .finish()
    }
}

fn entry_hash(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over arbitrary bytes, hex-encoded. Used for config result hashes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
