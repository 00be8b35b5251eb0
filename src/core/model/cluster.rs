// src/core/model/cluster.rs

//! The root of the topology model: a cluster of stripes of nodes.

use crate::core::NomadError;
use crate::core::model::address::Address;
use crate::core::model::node::Node;
use crate::core::model::stripe::Stripe;
use crate::core::model::uid::Uid;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CLIENT_RECONNECT_WINDOW: Duration = Duration::from_secs(120);
pub const DEFAULT_CLIENT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Which side of a partition keeps serving when quorum is lost.
///
/// The textual form is `availability` or `consistency:<voters>`, which is
/// also how the corresponding setting is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailoverPriority {
    Availability,
    Consistency { voters: u32 },
}

impl fmt::Display for FailoverPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverPriority::Availability => write!(f, "availability"),
            FailoverPriority::Consistency { voters } => write!(f, "consistency:{voters}"),
        }
    }
}

impl FromStr for FailoverPriority {
    type Err = NomadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "availability" => Ok(FailoverPriority::Availability),
            "consistency" => Ok(FailoverPriority::Consistency { voters: 0 }),
            other => {
                let voters = other
                    .strip_prefix("consistency:")
                    .and_then(|v| v.parse::<u32>().ok())
                    .ok_or_else(|| {
                        NomadError::InvalidInput(format!(
                            "Invalid failover priority '{other}': expected 'availability' or 'consistency:<voters>'"
                        ))
                    })?;
                Ok(FailoverPriority::Consistency { voters })
            }
        }
    }
}

impl TryFrom<String> for FailoverPriority {
    type Error = NomadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FailoverPriority> for String {
    fn from(p: FailoverPriority) -> Self {
        p.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub name: String,
    pub uid: Uid,
    #[serde(default = "default_failover_priority")]
    pub failover_priority: FailoverPriority,
    #[serde(with = "humantime_serde", default = "default_reconnect_window")]
    pub client_reconnect_window: Duration,
    #[serde(with = "humantime_serde", default = "default_lease_duration")]
    pub client_lease_duration: Duration,
    /// Cluster-wide offheap resources, name to size in bytes.
    #[serde(default)]
    pub offheap_resources: IndexMap<String, u64>,
    #[serde(default)]
    pub stripes: Vec<Stripe>,
}

fn default_failover_priority() -> FailoverPriority {
    FailoverPriority::Availability
}
fn default_reconnect_window() -> Duration {
    DEFAULT_CLIENT_RECONNECT_WINDOW
}
fn default_lease_duration() -> Duration {
    DEFAULT_CLIENT_LEASE_DURATION
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uid::generate(),
            failover_priority: default_failover_priority(),
            client_reconnect_window: DEFAULT_CLIENT_RECONNECT_WINDOW,
            client_lease_duration: DEFAULT_CLIENT_LEASE_DURATION,
            offheap_resources: IndexMap::new(),
            stripes: Vec::new(),
        }
    }

    pub fn with_stripes(name: impl Into<String>, stripes: Vec<Stripe>) -> Self {
        let mut cluster = Self::new(name);
        cluster.stripes = stripes;
        cluster
    }

    pub fn node_count(&self) -> usize {
        self.stripes.iter().map(|s| s.nodes.len()).sum()
    }

    /// Iterates over all nodes, stripe by stripe.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.stripes.iter().flat_map(|s| s.nodes.iter())
    }

    pub fn stripe_by_uid(&self, uid: Uid) -> Option<&Stripe> {
        self.stripes.iter().find(|s| s.uid == uid)
    }

    pub fn stripe_by_uid_mut(&mut self, uid: Uid) -> Option<&mut Stripe> {
        self.stripes.iter_mut().find(|s| s.uid == uid)
    }

    /// Resolves a node by its owning stripe UID and its own UID.
    pub fn node_by_uid(&self, stripe_uid: Uid, node_uid: Uid) -> Option<&Node> {
        self.stripe_by_uid(stripe_uid)?.node_by_uid(node_uid)
    }

    /// Name-based lookup across all stripes, returning the owning stripe as
    /// well. Supported for backward compatibility with the V1 persisted
    /// form, which addressed nodes by name.
    pub fn node_by_name(&self, name: &str) -> Option<(&Stripe, &Node)> {
        self.stripes
            .iter()
            .find_map(|s| s.node_by_name(name).map(|n| (s, n)))
    }

    pub fn node_by_address(&self, address: &Address) -> Option<(&Stripe, &Node)> {
        self.stripes
            .iter()
            .find_map(|s| s.node_by_address(address).map(|n| (s, n)))
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.node_by_address(address).is_some()
    }

    /// Attaches a node to the stripe with the given UID. The target stripe
    /// must already exist and be non-empty, and the node's address must not
    /// collide with an existing member.
    pub fn attach_node(&mut self, stripe_uid: Uid, node: Node) -> Result<(), NomadError> {
        if self.contains_address(&node.address()) {
            return Err(NomadError::ValidationError(format!(
                "Node address {} is already a member of cluster '{}'",
                node.address(),
                self.name
            )));
        }
        let stripe = self.stripe_by_uid_mut(stripe_uid).ok_or_else(|| {
            NomadError::ValidationError(format!("No stripe with UID {stripe_uid}"))
        })?;
        if stripe.nodes.is_empty() {
            return Err(NomadError::ValidationError(format!(
                "Stripe '{}' has no member to attach to",
                stripe.name
            )));
        }
        stripe.attach_node(node);
        Ok(())
    }

    /// Detaches the node with the given address from whichever stripe holds
    /// it. Idempotent; returns whether a removal occurred.
    pub fn detach_node(&mut self, address: &Address) -> bool {
        self.stripes.iter_mut().any(|s| s.detach_node(address))
    }
}
