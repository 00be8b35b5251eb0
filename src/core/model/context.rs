// src/core/model/context.rs

//! `NodeContext`: a cluster snapshot paired with the identity of one of its
//! nodes. This is the unit the versioned config store persists.

use crate::core::NomadError;
use crate::core::model::cluster::Cluster;
use crate::core::model::node::Node;
use crate::core::model::stripe::Stripe;
use crate::core::model::uid::Uid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeContext {
    pub cluster: Cluster,
    pub stripe_uid: Uid,
    pub node_uid: Uid,
}

impl NodeContext {
    /// Builds a context for the node identified by `(stripe_uid, node_uid)`.
    /// Fails when the cluster holds no such node.
    pub fn new(cluster: Cluster, stripe_uid: Uid, node_uid: Uid) -> Result<Self, NomadError> {
        if cluster.node_by_uid(stripe_uid, node_uid).is_none() {
            return Err(NomadError::InvalidInput(format!(
                "Cluster '{}' has no node {node_uid} in stripe {stripe_uid}",
                cluster.name
            )));
        }
        Ok(Self {
            cluster,
            stripe_uid,
            node_uid,
        })
    }

    /// Builds a context by node name. This is the fallback used when UIDs
    /// are absent, e.g. for identities carried over from the V1 form.
    pub fn by_name(cluster: Cluster, node_name: &str) -> Result<Self, NomadError> {
        let (stripe_uid, node_uid) = {
            let (stripe, node) = cluster.node_by_name(node_name).ok_or_else(|| {
                NomadError::InvalidInput(format!(
                    "Cluster '{}' has no node named '{node_name}'",
                    cluster.name
                ))
            })?;
            (stripe.uid, node.uid)
        };
        Ok(Self {
            cluster,
            stripe_uid,
            node_uid,
        })
    }

    pub fn stripe(&self) -> &Stripe {
        self.cluster
            .stripe_by_uid(self.stripe_uid)
            .expect("Invariant violation: node context points at a stripe absent from its cluster")
    }

    pub fn node(&self) -> &Node {
        self.cluster
            .node_by_uid(self.stripe_uid, self.node_uid)
            .expect("Invariant violation: node context points at a node absent from its cluster")
    }

    pub fn node_name(&self) -> &str {
        &self.node().name
    }

    /// Re-homes this context onto a transformed cluster, following the node
    /// by UID first and by name second. Returns `None` when the node is no
    /// longer part of the cluster (it was detached).
    pub fn with_cluster(&self, cluster: Cluster) -> Option<NodeContext> {
        if cluster
            .node_by_uid(self.stripe_uid, self.node_uid)
            .is_some()
        {
            return Some(NodeContext {
                cluster,
                stripe_uid: self.stripe_uid,
                node_uid: self.node_uid,
            });
        }
        let name = self.node_name().to_string();
        NodeContext::by_name(cluster, &name).ok()
    }
}
