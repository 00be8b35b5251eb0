// src/core/change/mod.rs

//! The change algebra: every mutation of the topology is one of these typed
//! changes, applied through the two-phase protocol. A change is pure data:
//! `can_apply` and `apply` never perform I/O, so the prepare-time and
//! commit-time applications of the same change agree.

use crate::core::NomadError;
use crate::core::model::address::Address;
use crate::core::model::cluster::Cluster;
use crate::core::model::node::Node;
use crate::core::model::setting::Mutability;
use crate::core::model::uid::Uid;
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod setting_change;

pub use setting_change::{SettingChange, SettingOperation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum NomadChange {
    /// Sets the initial topology on fresh nodes. Only applicable while a
    /// node has no committed configuration yet.
    ClusterActivation {
        cluster: Cluster,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        license: Option<String>,
    },
    Setting(SettingChange),
    /// An atomic composite: children apply in order against the
    /// progressively transformed cluster.
    MultiSetting { changes: Vec<SettingChange> },
    /// Attaches a node to an existing stripe. The node is expected to have
    /// been cloned-for-attachment from a reference member.
    NodeAddition { stripe_uid: Uid, node: Box<Node> },
    /// Detaches the node with the given address.
    NodeRemoval { stripe_uid: Uid, address: Address },
    /// Rewrites the persisted shape from one format version to the next.
    /// Semantically a no-op on the topology.
    FormatUpgrade { from: u32, to: u32 },
}

impl NomadChange {
    pub fn activation(cluster: Cluster, license: Option<String>) -> Self {
        NomadChange::ClusterActivation { cluster, license }
    }

    /// Checks whether this change could apply to the given committed state
    /// (`None` before activation).
    pub fn can_apply(&self, current: Option<&Cluster>) -> Result<(), NomadError> {
        self.apply(current).map(|_| ())
    }

    /// Produces the transformed cluster. Deterministic and referentially
    /// transparent.
    pub fn apply(&self, current: Option<&Cluster>) -> Result<Cluster, NomadError> {
        match self {
            NomadChange::ClusterActivation { cluster, .. } => {
                if current.is_some() {
                    return Err(NomadError::ChangeUnapplicable(
                        "Cluster is already activated".to_string(),
                    ));
                }
                for node in cluster.nodes() {
                    if node.name.trim().is_empty() || node.hostname.trim().is_empty() {
                        return Err(NomadError::ChangeUnapplicable(format!(
                            "Activation requires every node to declare a name and hostname; got name='{}' hostname='{}'",
                            node.name, node.hostname
                        )));
                    }
                }
                Ok(cluster.clone())
            }
            NomadChange::Setting(change) => {
                let cluster = require_activated(current)?;
                change.apply(cluster)
            }
            NomadChange::MultiSetting { changes } => {
                let cluster = require_activated(current)?;
                if changes.is_empty() {
                    return Err(NomadError::InvalidInput(
                        "A multi-change must contain at least one change".to_string(),
                    ));
                }
                changes
                    .iter()
                    .try_fold(cluster.clone(), |acc, change| change.apply(&acc))
            }
            NomadChange::NodeAddition { stripe_uid, node } => {
                let cluster = require_activated(current)?;
                let mut next = cluster.clone();
                next.attach_node(*stripe_uid, (**node).clone())?;
                Ok(next)
            }
            NomadChange::NodeRemoval {
                stripe_uid,
                address,
            } => {
                let cluster = require_activated(current)?;
                let stripe = cluster.stripe_by_uid(*stripe_uid).ok_or_else(|| {
                    NomadError::ChangeUnapplicable(format!("No stripe with UID {stripe_uid}"))
                })?;
                if stripe.node_by_address(address).is_none() {
                    return Err(NomadError::ChangeUnapplicable(format!(
                        "No node at {address} in stripe '{}'",
                        stripe.name
                    )));
                }
                if cluster.node_count() == 1 {
                    return Err(NomadError::ChangeUnapplicable(
                        "Cannot detach the last node of the cluster".to_string(),
                    ));
                }
                let mut next = cluster.clone();
                next.detach_node(address);
                Ok(next)
            }
            NomadChange::FormatUpgrade { from, to } => {
                let cluster = require_activated(current)?;
                if from >= to {
                    return Err(NomadError::InvalidInput(format!(
                        "Format upgrade must move forward: {from} -> {to}"
                    )));
                }
                Ok(cluster.clone())
            }
        }
    }

    /// One line for operators and the journal's change descriptor.
    pub fn summary(&self) -> String {
        match self {
            NomadChange::ClusterActivation { cluster, .. } => {
                format!("activate cluster '{}'", cluster.name)
            }
            NomadChange::Setting(change) => change.summary(),
            NomadChange::MultiSetting { changes } => changes
                .iter()
                .map(SettingChange::summary)
                .collect::<Vec<_>>()
                .join(", "),
            NomadChange::NodeAddition { node, .. } => {
                format!("attach node '{}' at {}", node.name, node.address())
            }
            NomadChange::NodeRemoval { address, .. } => format!("detach node at {address}"),
            NomadChange::FormatUpgrade { from, to } => {
                format!("upgrade config format v{from} -> v{to}")
            }
        }
    }

    /// Whether the committed change takes effect without a restart. A
    /// composite is runtime-applicable only when every child is.
    pub fn is_runtime_applicable(&self) -> bool {
        match self {
            NomadChange::ClusterActivation { .. } | NomadChange::FormatUpgrade { .. } => true,
            NomadChange::Setting(change) => {
                change.setting.mutability() == Mutability::AtRuntime
            }
            NomadChange::MultiSetting { changes } => changes
                .iter()
                .all(|c| c.setting.mutability() == Mutability::AtRuntime),
            // Membership is maintained live; the surviving nodes do not
            // restart for a topology change.
            NomadChange::NodeAddition { .. } | NomadChange::NodeRemoval { .. } => true,
        }
    }
}

fn require_activated(current: Option<&Cluster>) -> Result<&Cluster, NomadError> {
    current.ok_or_else(|| {
        NomadError::ChangeUnapplicable(
            "Node has no committed configuration yet: only a cluster activation is accepted"
                .to_string(),
        )
    })
}
