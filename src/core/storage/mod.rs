// src/core/storage/mod.rs

//! Durable per-node configuration storage: the versioned snapshot store,
//! the append-only change journal, and the repository layout that owns both.

pub mod config_store;
pub mod journal;
pub mod repository;

pub use config_store::{ConfigStore, SnapshotDocument};
pub use journal::{ChangeJournal, ChangeRecord, ChangeState, content_hash};
pub use repository::NomadRepository;
