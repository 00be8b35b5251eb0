// src/core/nomad/messages.rs

//! The semantic wire messages of the Nomad protocol. The encoding is JSON
//! via serde; the transport framing is the embedder's business.

use crate::core::change::NomadChange;
use crate::core::storage::journal::{ChangeRecord, ChangeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Nomad server is either accepting new changes or holding one prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMode {
    Accepting,
    Prepared,
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Accepting => write!(f, "ACCEPTING"),
            ServerMode::Prepared => write!(f, "PREPARED"),
        }
    }
}

/// The `{m, v, h, mode}` tuple every response carries so a coordinator can
/// resynchronize after any rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerStateSummary {
    pub mutative_message_count: u64,
    pub current_version: u64,
    pub highest_version: u64,
    pub mode: ServerMode,
}

/// A compact descriptor of a change record, as reported by Discover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChangeInfo {
    pub change_hash: String,
    pub version: u64,
    pub state: ChangeState,
    pub summary: String,
    pub result_hash: String,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

impl From<&ChangeRecord> for ChangeInfo {
    fn from(record: &ChangeRecord) -> Self {
        Self {
            change_hash: record.change_hash.clone(),
            version: record.version,
            state: record.state,
            summary: record.change.summary(),
            result_hash: record.change_result_hash.clone(),
            creation_host: record.creation_host.clone(),
            creation_user: record.creation_user.clone(),
            creation_timestamp: record.creation_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoverResponse {
    pub mode: ServerMode,
    pub mutative_message_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mutation_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mutation_user: Option<String>,
    pub current_version: u64,
    pub highest_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_change: Option<ChangeInfo>,
    /// The latest change in COMMITTED state, which may differ from
    /// `latest_change` when the newest record is prepared or rolled back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_committed_change: Option<ChangeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrepareMessage {
    pub expected_mutative_message_count: u64,
    pub new_version: u64,
    pub change: NomadChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitMessage {
    pub expected_mutative_message_count: u64,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RollbackMessage {
    pub expected_mutative_message_count: u64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TakeoverMessage {
    pub expected_mutative_message_count: u64,
    pub host: String,
    pub user: String,
}

/// Why a mutative message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    WrongMode,
    StaleCounter,
    WrongVersion,
    ChangeUnapplicable,
    StorageFailure,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::WrongMode => "WRONG_MODE",
            RejectionReason::StaleCounter => "STALE_COUNTER",
            RejectionReason::WrongVersion => "WRONG_VERSION",
            RejectionReason::ChangeUnapplicable => "CHANGE_UNAPPLICABLE",
            RejectionReason::StorageFailure => "STORAGE_FAILURE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AcceptRejectResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
    pub current_state: ServerStateSummary,
}

impl AcceptRejectResponse {
    pub fn accepted(state: ServerStateSummary) -> Self {
        Self {
            accepted: true,
            rejection_reason: None,
            rejection_message: None,
            current_state: state,
        }
    }

    pub fn rejected(
        reason: RejectionReason,
        message: impl Into<String>,
        state: ServerStateSummary,
    ) -> Self {
        Self {
            accepted: false,
            rejection_reason: Some(reason),
            rejection_message: Some(message.into()),
            current_state: state,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// A one-line description of the rejection for operator-facing output.
    pub fn describe_rejection(&self) -> String {
        match (&self.rejection_reason, &self.rejection_message) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (Some(reason), None) => reason.to_string(),
            _ => "accepted".to_string(),
        }
    }
}
