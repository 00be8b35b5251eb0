// src/core/model/stripe.rs

//! A stripe: a failure-domain grouping of nodes within a cluster.

use crate::core::model::address::Address;
use crate::core::model::node::Node;
use crate::core::model::uid::Uid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Stripe {
    pub name: String,
    pub uid: Uid,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Stripe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uid::generate(),
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            uid: Uid::generate(),
            nodes,
        }
    }

    pub fn node_by_uid(&self, uid: Uid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.uid == uid)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_by_address(&self, address: &Address) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.address() == address)
    }

    /// Adds a node to this stripe. The caller is expected to have run
    /// `Node::clone_for_attachment` against a reference member so the
    /// cluster-wide fields line up; address uniqueness is enforced by the
    /// cluster validator.
    pub fn attach_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Removes the node with the given address. Idempotent; returns whether
    /// a removal occurred.
    pub fn detach_node(&mut self, address: &Address) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| &n.address() != address);
        self.nodes.len() != before
    }
}
