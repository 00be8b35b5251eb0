// src/core/nomad/mod.rs

//! The Nomad protocol: the per-node two-phase state machine, the wire
//! messages, the transport seam, and the coordinator that drives a set of
//! servers through prepare, commit and rollback.

pub mod client;
pub mod endpoint;
pub mod messages;
pub mod server;

pub use client::{
    ChangeResult, NomadClient, RecoveryPolicy, ServerAck, ServerOutcome, ServerSpec, Timeouts,
};
pub use endpoint::{EmbeddedEndpoint, NomadEndpoint};
pub use messages::{
    AcceptRejectResponse, ChangeInfo, CommitMessage, DiscoverResponse, PrepareMessage,
    RejectionReason, RollbackMessage, ServerMode, ServerStateSummary, TakeoverMessage,
};
pub use server::{CommittedChange, NomadServer, change_hash};
