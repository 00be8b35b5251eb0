// src/core/nomad/server.rs

//! The per-node Nomad state machine.
//!
//! Every accepted mutating message is journaled (and the associated snapshot
//! written) before the reply is produced, so a crash after the journal write
//! is indistinguishable from a lost reply: the coordinator resends with the
//! same expected counter and reads the durable outcome from the rejection's
//! state summary. The caller is the serializer; all mutating operations take
//! `&mut self` and are expected to run behind a single mutex.

use crate::core::NomadError;
use crate::core::change::NomadChange;
use crate::core::change::codec::CURRENT_FORMAT;
use crate::core::model::cluster::Cluster;
use crate::core::model::context::NodeContext;
use crate::core::model::validator::validate_cluster;
use crate::core::nomad::messages::{
    AcceptRejectResponse, ChangeInfo, CommitMessage, DiscoverResponse, PrepareMessage,
    RejectionReason, RollbackMessage, ServerMode, ServerStateSummary, TakeoverMessage,
};
use crate::core::storage::config_store::ConfigStore;
use crate::core::storage::journal::{ChangeJournal, ChangeRecord, ChangeState, content_hash};
use crate::core::storage::repository::NomadRepository;
use chrono::Utc;
use tracing::{error, info, warn};

const UNKNOWN_IDENTITY: &str = "unknown";

/// What a commit produced, handed to the embedding service so it can update
/// its runtime/upcoming contexts and notify listeners outside the server
/// lock.
#[derive(Debug, Clone)]
pub struct CommittedChange {
    pub version: u64,
    pub change: NomadChange,
    pub context: NodeContext,
}

pub struct NomadServer {
    node_name: String,
    journal: ChangeJournal,
    config_store: ConfigStore,
    mode: ServerMode,
    current_version: u64,
    highest_version: u64,
    committed: Option<NodeContext>,
    committed_format: u32,
}

impl NomadServer {
    /// Opens the state machine over a repository, rebuilding volatile state
    /// from the journal and the snapshot store.
    pub fn open(repository: &NomadRepository, node_name: &str) -> Result<Self, NomadError> {
        let journal = ChangeJournal::open(&repository.journal_dir())?;
        let config_store = ConfigStore::open(&repository.config_dir(), node_name);

        let highest_version = journal.latest().map(|r| r.version).unwrap_or(0);
        let mode = match journal.latest() {
            Some(r) if r.state == ChangeState::Prepared => ServerMode::Prepared,
            _ => ServerMode::Accepting,
        };
        let current_version = journal
            .records()
            .iter()
            .rev()
            .find(|r| r.state == ChangeState::Committed)
            .map(|r| r.version)
            .unwrap_or(0);

        let (committed, committed_format) = if current_version > 0 {
            let document = config_store.load(current_version)?;
            (Some(document.node_context), document.format)
        } else {
            (None, CURRENT_FORMAT)
        };

        if mode == ServerMode::Prepared && !config_store.has_version(highest_version) {
            return Err(NomadError::StorageError(format!(
                "Prepared version {highest_version} has no config snapshot; the repository is corrupt"
            )));
        }

        info!(
            "Nomad server for node '{}' opened: mode={}, v={}, h={}, m={}.",
            node_name,
            mode,
            current_version,
            highest_version,
            journal.entry_count()
        );

        Ok(Self {
            node_name: node_name.to_string(),
            journal,
            config_store,
            mode,
            current_version,
            highest_version,
            committed,
            committed_format,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    pub fn highest_version(&self) -> u64 {
        self.highest_version
    }

    /// The cluster of the last committed configuration, if any.
    pub fn committed_cluster(&self) -> Option<&Cluster> {
        self.committed.as_ref().map(|c| &c.cluster)
    }

    pub fn committed_context(&self) -> Option<&NodeContext> {
        self.committed.as_ref()
    }

    /// Reads the exact snapshot stored for a version.
    pub fn context_at(&self, version: u64) -> Result<NodeContext, NomadError> {
        Ok(self.config_store.load(version)?.node_context)
    }

    pub fn state_summary(&self) -> ServerStateSummary {
        ServerStateSummary {
            mutative_message_count: self.journal.entry_count(),
            current_version: self.current_version,
            highest_version: self.highest_version,
            mode: self.mode,
        }
    }

    /// Non-mutating snapshot of this server's protocol state.
    pub fn discover(&self) -> DiscoverResponse {
        let (last_mutation_host, last_mutation_user) = match self.journal.last_mutation() {
            Some((h, u)) => (Some(h.to_string()), Some(u.to_string())),
            None => (None, None),
        };
        DiscoverResponse {
            mode: self.mode,
            mutative_message_count: self.journal.entry_count(),
            last_mutation_host,
            last_mutation_user,
            current_version: self.current_version,
            highest_version: self.highest_version,
            latest_change: self.journal.latest().map(ChangeInfo::from),
            latest_committed_change: self
                .journal
                .records()
                .iter()
                .rev()
                .find(|r| r.state == ChangeState::Committed)
                .map(ChangeInfo::from),
        }
    }

    pub fn prepare(&mut self, message: &PrepareMessage) -> AcceptRejectResponse {
        if self.mode != ServerMode::Accepting {
            return self.reject(
                RejectionReason::WrongMode,
                format!(
                    "A change is already prepared at version {}",
                    self.highest_version
                ),
            );
        }
        if let Some(response) = self.check_counter(message.expected_mutative_message_count) {
            return response;
        }
        // The coordinator proposes max(h)+1 across the cluster, which can
        // be ahead of this server's own h when a previous change was
        // rejected here but rolled back elsewhere. Anything at or below h
        // has already been decided and is refused.
        if message.new_version <= self.highest_version {
            return self.reject(
                RejectionReason::WrongVersion,
                format!(
                    "Version {} is not ahead of the highest seen version {}",
                    message.new_version, self.highest_version
                ),
            );
        }
        if self.committed_format < CURRENT_FORMAT
            && !matches!(message.change, NomadChange::FormatUpgrade { .. })
        {
            return self.reject(
                RejectionReason::ChangeUnapplicable,
                format!(
                    "Configuration is stored in format v{}; a format upgrade must commit before other changes",
                    self.committed_format
                ),
            );
        }

        let new_cluster = match message.change.apply(self.committed_cluster()) {
            Ok(cluster) => cluster,
            Err(e) => return self.reject(RejectionReason::ChangeUnapplicable, e.to_string()),
        };
        if let Err(e) = validate_cluster(&new_cluster) {
            return self.reject(RejectionReason::ChangeUnapplicable, e.to_string());
        }
        let new_context = match self.resolve_self(new_cluster) {
            Ok(context) => context,
            Err(e) => return self.reject(RejectionReason::ChangeUnapplicable, e.to_string()),
        };

        if let Err(e) = self.config_store.save(message.new_version, &new_context) {
            error!(
                "Failed to persist the proposed configuration for version {}: {}",
                message.new_version, e
            );
            return self.reject(RejectionReason::StorageFailure, e.to_string());
        }
        let result_hash = cluster_result_hash(&new_context.cluster);

        let (creation_host, creation_user) = self.identity();
        let record = ChangeRecord {
            version: message.new_version,
            change_hash: change_hash(&message.change),
            prev_record_hash: None,
            state: ChangeState::Prepared,
            change: message.change.clone(),
            change_result_hash: result_hash,
            creation_host,
            creation_user,
            creation_timestamp: Utc::now(),
            applied_host: None,
            applied_user: None,
            applied_timestamp: None,
        };
        if let Err(e) = self.journal.append_prepared(record) {
            error!(
                "Failed to journal the prepared change for version {}: {}",
                message.new_version, e
            );
            let _ = self.config_store.delete(message.new_version);
            return self.reject(RejectionReason::StorageFailure, e.to_string());
        }

        self.mode = ServerMode::Prepared;
        self.highest_version = message.new_version;
        info!(
            "Prepared version {} on node '{}': {}.",
            message.new_version,
            self.node_name,
            message.change.summary()
        );
        AcceptRejectResponse::accepted(self.state_summary())
    }

    pub fn commit(&mut self, message: &CommitMessage) -> (AcceptRejectResponse, Option<CommittedChange>) {
        if self.mode != ServerMode::Prepared {
            let response = self.reject(
                RejectionReason::WrongMode,
                "No change is prepared on this server",
            );
            return (response, None);
        }
        if let Some(response) = self.check_counter(message.expected_mutative_message_count) {
            return (response, None);
        }
        let (prepared_version, change) = {
            let record = self.journal.latest().expect("prepared mode implies a record");
            (record.version, record.change.clone())
        };
        if message.version != prepared_version {
            let response = self.reject(
                RejectionReason::WrongVersion,
                format!("Prepared version is {prepared_version}, not {}", message.version),
            );
            return (response, None);
        }

        // Snapshot readability is confirmed before the terminal mark so a
        // committed journal never points at an unreadable configuration.
        let document = match self.config_store.load(prepared_version) {
            Ok(document) => document,
            Err(e) => {
                error!(
                    "Cannot read the prepared configuration for version {}: {}",
                    prepared_version, e
                );
                let response = self.reject(RejectionReason::StorageFailure, e.to_string());
                return (response, None);
            }
        };
        let (applied_host, applied_user) = self.identity();
        if let Err(e) = self.journal.mark(
            prepared_version,
            ChangeState::Committed,
            &applied_host,
            &applied_user,
            Utc::now(),
        ) {
            error!("Failed to journal the commit of version {}: {}", prepared_version, e);
            let response = self.reject(RejectionReason::StorageFailure, e.to_string());
            return (response, None);
        }

        self.mode = ServerMode::Accepting;
        self.current_version = prepared_version;
        self.committed = Some(document.node_context.clone());
        self.committed_format = document.format;
        info!(
            "Committed version {} on node '{}': {}.",
            prepared_version,
            self.node_name,
            change.summary()
        );
        let committed = CommittedChange {
            version: prepared_version,
            change,
            context: document.node_context,
        };
        (AcceptRejectResponse::accepted(self.state_summary()), Some(committed))
    }

    pub fn rollback(&mut self, message: &RollbackMessage) -> AcceptRejectResponse {
        if self.mode != ServerMode::Prepared {
            return self.reject(
                RejectionReason::WrongMode,
                "No change is prepared on this server",
            );
        }
        if let Some(response) = self.check_counter(message.expected_mutative_message_count) {
            return response;
        }
        let prepared_version = self
            .journal
            .latest()
            .expect("prepared mode implies a record")
            .version;
        if message.version != prepared_version {
            return self.reject(
                RejectionReason::WrongVersion,
                format!("Prepared version is {prepared_version}, not {}", message.version),
            );
        }
        let (applied_host, applied_user) = self.identity();
        if let Err(e) = self.journal.mark(
            prepared_version,
            ChangeState::RolledBack,
            &applied_host,
            &applied_user,
            Utc::now(),
        ) {
            error!("Failed to journal the rollback of version {}: {}", prepared_version, e);
            return self.reject(RejectionReason::StorageFailure, e.to_string());
        }
        if let Err(e) = self.config_store.delete(prepared_version) {
            // The journal is the authority; a leftover snapshot is harmless.
            warn!(
                "Could not delete the rolled-back snapshot for version {}: {}",
                prepared_version, e
            );
        }
        self.mode = ServerMode::Accepting;
        info!(
            "Rolled back version {} on node '{}'.",
            prepared_version, self.node_name
        );
        AcceptRejectResponse::accepted(self.state_summary())
    }

    /// Fences earlier coordinators by bumping the counter and adopting the
    /// new coordinator's identity. Valid in any mode.
    pub fn takeover(&mut self, message: &TakeoverMessage) -> AcceptRejectResponse {
        if let Some(response) = self.check_counter(message.expected_mutative_message_count) {
            return response;
        }
        if let Err(e) = self.journal.note_takeover(&message.host, &message.user) {
            error!("Failed to journal a takeover: {}", e);
            return self.reject(RejectionReason::StorageFailure, e.to_string());
        }
        info!(
            "Coordinator takeover on node '{}' by {}@{}.",
            self.node_name, message.user, message.host
        );
        AcceptRejectResponse::accepted(self.state_summary())
    }

    fn check_counter(&self, expected: u64) -> Option<AcceptRejectResponse> {
        let actual = self.journal.entry_count();
        if expected != actual {
            return Some(self.reject(
                RejectionReason::StaleCounter,
                format!("Expected mutative message count {expected}, server is at {actual}"),
            ));
        }
        None
    }

    fn reject(&self, reason: RejectionReason, message: impl Into<String>) -> AcceptRejectResponse {
        let message = message.into();
        warn!(
            "Rejected message on node '{}' ({}): {}",
            self.node_name, reason, message
        );
        AcceptRejectResponse::rejected(reason, message, self.state_summary())
    }

    /// Locates this node inside a transformed cluster: by the committed
    /// context's UIDs when one exists, by node name otherwise (activation).
    fn resolve_self(&self, new_cluster: Cluster) -> Result<NodeContext, NomadError> {
        match &self.committed {
            Some(context) => context.with_cluster(new_cluster).ok_or_else(|| {
                NomadError::ChangeUnapplicable(format!(
                    "Node '{}' is not part of the resulting cluster; detach it instead of changing it away",
                    self.node_name
                ))
            }),
            None => NodeContext::by_name(new_cluster, &self.node_name).map_err(|_| {
                NomadError::ChangeUnapplicable(format!(
                    "Node '{}' does not appear in the proposed cluster",
                    self.node_name
                ))
            }),
        }
    }

    fn identity(&self) -> (String, String) {
        match self.journal.last_mutation() {
            Some((host, user)) => (host.to_string(), user.to_string()),
            None => (UNKNOWN_IDENTITY.to_string(), UNKNOWN_IDENTITY.to_string()),
        }
    }
}

impl std::fmt::Debug for NomadServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NomadServer")
            .field("node_name", &self.node_name)
            .field("mode", &self.mode)
            .field("current_version", &self.current_version)
            .field("highest_version", &self.highest_version)
            .finish()
    }
}

/// The deterministic identity of a change: the hash of its canonical
/// encoding. Every server prepared with the same change reports the same
/// hash, which is what lets a later coordinator recognize an incomplete
/// change as "the same" across servers.
pub fn change_hash(change: &NomadChange) -> String {
    let encoded = crate::core::change::codec::encode_string(change)
        .expect("changes are always encodable");
    content_hash(encoded.as_bytes())
}

/// The deterministic identity of a change's outcome: the hash of the
/// resulting cluster's canonical encoding. Deliberately computed over the
/// cluster, not the per-node snapshot, so every server reports the same
/// result hash for the same applied change.
pub fn cluster_result_hash(cluster: &Cluster) -> String {
    let encoded =
        serde_json::to_vec(cluster).expect("clusters are always encodable");
    content_hash(&encoded)
}
