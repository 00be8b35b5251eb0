// src/core/errors.rs

//! Defines the primary error type for the whole crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure the coordination core can
/// surface. Using `thiserror` allows for clean error definitions and
/// automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum NomadError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A concurrent mutation was detected through the mutative message counter.
    #[error("Concurrent mutation detected: expected mutative message count {expected}, server is at {actual}")]
    CounterMismatch { expected: u64, actual: u64 },

    /// The server's mode machine refused the operation.
    #[error("Operation not allowed in the server's current mode: {0}")]
    WrongMode(String),

    #[error("Wrong change version: {0}")]
    WrongVersion(String),

    /// Durability failed. The server stays in its prior state.
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server {server} is unreachable: {reason}")]
    Unreachable { server: String, reason: String },

    /// Servers disagree on committed state; the payload describes the divergence.
    #[error("Cluster configuration is inconsistent: {0}")]
    ClusterInconsistent(String),

    #[error("Prepare phase failed: {0}")]
    PrepareFailed(String),

    /// Prepare succeeded everywhere but Commit was only partially applied.
    /// The cluster is left with an incomplete change that a later
    /// coordinator run must resolve.
    #[error("Two-phase commit failed: {0}")]
    TwoPhaseCommitFailed(String),

    #[error("License violation: {0}")]
    LicenseViolation(String),

    #[error("Change cannot be applied: {0}")]
    ChangeUnapplicable(String),

    #[error("Node is already activated")]
    AlreadyActivated,
}

impl NomadError {
    /// The exit-code contract of the operator tooling built on this crate:
    /// 1 user error, 2 consistency error, 3 two-phase commit failure,
    /// 4 I/O error.
    pub fn exit_code(&self) -> i32 {
        match self {
            NomadError::InvalidInput(_)
            | NomadError::ValidationError(_)
            | NomadError::LicenseViolation(_)
            | NomadError::ChangeUnapplicable(_)
            | NomadError::PrepareFailed(_)
            | NomadError::AlreadyActivated => 1,
            NomadError::ClusterInconsistent(_)
            | NomadError::CounterMismatch { .. }
            | NomadError::WrongMode(_)
            | NomadError::WrongVersion(_) => 2,
            NomadError::TwoPhaseCommitFailed(_) => 3,
            NomadError::Io(_) | NomadError::StorageError(_) | NomadError::Unreachable { .. } => 4,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for NomadError {
    fn clone(&self) -> Self {
        match self {
            NomadError::Io(e) => NomadError::Io(Arc::clone(e)),
            NomadError::InvalidInput(s) => NomadError::InvalidInput(s.clone()),
            NomadError::ValidationError(s) => NomadError::ValidationError(s.clone()),
            NomadError::CounterMismatch { expected, actual } => NomadError::CounterMismatch {
                expected: *expected,
                actual: *actual,
            },
            NomadError::WrongMode(s) => NomadError::WrongMode(s.clone()),
            NomadError::WrongVersion(s) => NomadError::WrongVersion(s.clone()),
            NomadError::StorageError(s) => NomadError::StorageError(s.clone()),
            NomadError::Unreachable { server, reason } => NomadError::Unreachable {
                server: server.clone(),
                reason: reason.clone(),
            },
            NomadError::ClusterInconsistent(s) => NomadError::ClusterInconsistent(s.clone()),
            NomadError::PrepareFailed(s) => NomadError::PrepareFailed(s.clone()),
            NomadError::TwoPhaseCommitFailed(s) => NomadError::TwoPhaseCommitFailed(s.clone()),
            NomadError::LicenseViolation(s) => NomadError::LicenseViolation(s.clone()),
            NomadError::ChangeUnapplicable(s) => NomadError::ChangeUnapplicable(s.clone()),
            NomadError::AlreadyActivated => NomadError::AlreadyActivated,
        }
    }
}

impl PartialEq for NomadError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NomadError::Io(e1), NomadError::Io(e2)) => e1.to_string() == e2.to_string(),
            (NomadError::InvalidInput(s1), NomadError::InvalidInput(s2)) => s1 == s2,
            (NomadError::ValidationError(s1), NomadError::ValidationError(s2)) => s1 == s2,
            (
                NomadError::CounterMismatch {
                    expected: e1,
                    actual: a1,
                },
                NomadError::CounterMismatch {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (NomadError::WrongMode(s1), NomadError::WrongMode(s2)) => s1 == s2,
            (NomadError::WrongVersion(s1), NomadError::WrongVersion(s2)) => s1 == s2,
            (NomadError::StorageError(s1), NomadError::StorageError(s2)) => s1 == s2,
            (
                NomadError::Unreachable {
                    server: n1,
                    reason: r1,
                },
                NomadError::Unreachable {
                    server: n2,
                    reason: r2,
                },
            ) => n1 == n2 && r1 == r2,
            (NomadError::ClusterInconsistent(s1), NomadError::ClusterInconsistent(s2)) => s1 == s2,
            (NomadError::PrepareFailed(s1), NomadError::PrepareFailed(s2)) => s1 == s2,
            (NomadError::TwoPhaseCommitFailed(s1), NomadError::TwoPhaseCommitFailed(s2)) => {
                s1 == s2
            }
            (NomadError::LicenseViolation(s1), NomadError::LicenseViolation(s2)) => s1 == s2,
            (NomadError::ChangeUnapplicable(s1), NomadError::ChangeUnapplicable(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for NomadError {
    fn from(e: std::io::Error) -> Self {
        NomadError::Io(Arc::new(e))
    }
}

impl From<uuid::Error> for NomadError {
    fn from(e: uuid::Error) -> Self {
        NomadError::InvalidInput(format!("Malformed UID: {e}"))
    }
}

impl From<serde_json::Error> for NomadError {
    fn from(e: serde_json::Error) -> Self {
        NomadError::StorageError(format!("JSON serialization/deserialization error: {e}"))
    }
}
