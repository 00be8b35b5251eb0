// src/core/nomad/endpoint.rs

//! The pinned transport interface between the coordinator and a Nomad
//! server. The real wire (framing, TLS, pooling) lives with the embedder;
//! this crate only needs a way to exchange the protocol messages, with
//! transport-level failures reported as opaque errors.

use crate::core::nomad::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, PrepareMessage, RollbackMessage,
    TakeoverMessage,
};
use crate::core::nomad::server::NomadServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[async_trait]
pub trait NomadEndpoint: Send + Sync {
    async fn discover(&self) -> anyhow::Result<DiscoverResponse>;
    async fn prepare(&self, message: PrepareMessage) -> anyhow::Result<AcceptRejectResponse>;
    async fn commit(&self, message: CommitMessage) -> anyhow::Result<AcceptRejectResponse>;
    async fn rollback(&self, message: RollbackMessage) -> anyhow::Result<AcceptRejectResponse>;
    async fn takeover(&self, message: TakeoverMessage) -> anyhow::Result<AcceptRejectResponse>;
}

/// An in-process endpoint over a bare server. Used in tests and by tooling
/// that runs against a local repository without a live node.
///
/// Commits routed through this endpoint do not notify any dynamic-config
/// service; a node-hosted server is reached through its service instead.
#[derive(Clone)]
pub struct EmbeddedEndpoint {
    server: Arc<Mutex<NomadServer>>,
}

impl EmbeddedEndpoint {
    pub fn new(server: Arc<Mutex<NomadServer>>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<Mutex<NomadServer>> {
        &self.server
    }
}

#[async_trait]
impl NomadEndpoint for EmbeddedEndpoint {
    async fn discover(&self) -> anyhow::Result<DiscoverResponse> {
        Ok(self.server.lock().discover())
    }

    async fn prepare(&self, message: PrepareMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.server.lock().prepare(&message))
    }

    async fn commit(&self, message: CommitMessage) -> anyhow::Result<AcceptRejectResponse> {
        let (response, _committed) = self.server.lock().commit(&message);
        Ok(response)
    }

    async fn rollback(&self, message: RollbackMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.server.lock().rollback(&message))
    }

    async fn takeover(&self, message: TakeoverMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.server.lock().takeover(&message))
    }
}
