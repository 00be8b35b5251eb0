// src/core/model/applicability.rs

//! The scope a change targets: the whole cluster, one stripe, or one node.

use crate::core::NomadError;
use crate::core::model::cluster::Cluster;
use crate::core::model::uid::Uid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The level an applicability (or a setting) operates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    Cluster,
    Stripe,
    Node,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Cluster => write!(f, "cluster"),
            Scope::Stripe => write!(f, "stripe"),
            Scope::Node => write!(f, "node"),
        }
    }
}

/// How a stripe is addressed. The UID form is canonical; the index form
/// (1-based, as written in V1 documents) only appears when decoding legacy
/// payloads and is rewritten by a format upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StripeRef {
    Uid(Uid),
    Index(usize),
}

/// How a node is addressed. Name addressing is the V1 legacy form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Uid(Uid),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireApplicability", into = "WireApplicability")]
pub enum Applicability {
    Cluster,
    Stripe { stripe: StripeRef },
    Node { stripe: StripeRef, node: NodeRef },
}

impl Applicability {
    pub fn cluster() -> Self {
        Applicability::Cluster
    }

    pub fn stripe(stripe_uid: Uid) -> Self {
        Applicability::Stripe {
            stripe: StripeRef::Uid(stripe_uid),
        }
    }

    pub fn node(stripe_uid: Uid, node_uid: Uid) -> Self {
        Applicability::Node {
            stripe: StripeRef::Uid(stripe_uid),
            node: NodeRef::Uid(node_uid),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Applicability::Cluster => Scope::Cluster,
            Applicability::Stripe { .. } => Scope::Stripe,
            Applicability::Node { .. } => Scope::Node,
        }
    }

    /// True when any part of this applicability still uses the legacy
    /// index/name addressing.
    pub fn is_legacy(&self) -> bool {
        match self {
            Applicability::Cluster => false,
            Applicability::Stripe { stripe } => matches!(stripe, StripeRef::Index(_)),
            Applicability::Node { stripe, node } => {
                matches!(stripe, StripeRef::Index(_)) || matches!(node, NodeRef::Name(_))
            }
        }
    }

    /// Rewrites legacy index/name addressing into canonical UIDs against the
    /// given cluster. UID-addressed values pass through unchanged.
    pub fn resolve(&self, cluster: &Cluster) -> Result<Applicability, NomadError> {
        let resolve_stripe = |stripe: &StripeRef| -> Result<Uid, NomadError> {
            match stripe {
                StripeRef::Uid(uid) => cluster
                    .stripe_by_uid(*uid)
                    .map(|s| s.uid)
                    .ok_or_else(|| NomadError::InvalidInput(format!("No stripe with UID {uid}"))),
                StripeRef::Index(id) => cluster
                    .stripes
                    .get(id.checked_sub(1).ok_or_else(|| {
                        NomadError::InvalidInput("Stripe ids are 1-based".to_string())
                    })?)
                    .map(|s| s.uid)
                    .ok_or_else(|| NomadError::InvalidInput(format!("No stripe with id {id}"))),
            }
        };
        match self {
            Applicability::Cluster => Ok(Applicability::Cluster),
            Applicability::Stripe { stripe } => Ok(Applicability::stripe(resolve_stripe(stripe)?)),
            Applicability::Node { stripe, node } => {
                let stripe_uid = resolve_stripe(stripe)?;
                let node_uid = match node {
                    NodeRef::Uid(uid) => cluster
                        .node_by_uid(stripe_uid, *uid)
                        .map(|n| n.uid)
                        .ok_or_else(|| {
                            NomadError::InvalidInput(format!("No node with UID {uid}"))
                        })?,
                    NodeRef::Name(name) => {
                        let stripe = cluster
                            .stripe_by_uid(stripe_uid)
                            .expect("stripe resolved above");
                        stripe.node_by_name(name).map(|n| n.uid).ok_or_else(|| {
                            NomadError::InvalidInput(format!(
                                "No node named '{name}' in stripe '{}'",
                                stripe.name
                            ))
                        })?
                    }
                };
                Ok(Applicability::node(stripe_uid, node_uid))
            }
        }
    }
}

impl fmt::Display for Applicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applicability::Cluster => write!(f, "cluster"),
            Applicability::Stripe { stripe } => match stripe {
                StripeRef::Uid(uid) => write!(f, "stripe:{uid}"),
                StripeRef::Index(id) => write!(f, "stripe:{id}"),
            },
            Applicability::Node { node, .. } => match node {
                NodeRef::Uid(uid) => write!(f, "node:{uid}"),
                NodeRef::Name(name) => write!(f, "node:{name}"),
            },
        }
    }
}

/// The flat wire shape shared by the V1 and V2 formats. V2 writes the UID
/// fields; V1 documents carry `stripe-id` (1-based) and `node-name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WireApplicability {
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

impl From<Applicability> for WireApplicability {
    fn from(a: Applicability) -> Self {
        let mut wire = WireApplicability {
            scope: a.scope(),
            stripe_uid: None,
            node_uid: None,
            stripe_id: None,
            node_name: None,
        };
        let put_stripe = |stripe: &StripeRef, wire: &mut WireApplicability| match stripe {
            StripeRef::Uid(uid) => wire.stripe_uid = Some(*uid),
            StripeRef::Index(id) => wire.stripe_id = Some(*id),
        };
        match &a {
            Applicability::Cluster => {}
            Applicability::Stripe { stripe } => put_stripe(stripe, &mut wire),
            Applicability::Node { stripe, node } => {
                put_stripe(stripe, &mut wire);
                match node {
                    NodeRef::Uid(uid) => wire.node_uid = Some(*uid),
                    NodeRef::Name(name) => wire.node_name = Some(name.clone()),
                }
            }
        }
        wire
    }
}

impl TryFrom<WireApplicability> for Applicability {
    type Error = NomadError;

    fn try_from(wire: WireApplicability) -> Result<Self, Self::Error> {
        let stripe_ref = || -> Result<StripeRef, NomadError> {
            match (wire.stripe_uid, wire.stripe_id) {
                (Some(uid), _) => Ok(StripeRef::Uid(uid)),
                (None, Some(id)) => Ok(StripeRef::Index(id)),
                (None, None) => Err(NomadError::InvalidInput(
                    "Applicability is missing its stripe address".to_string(),
                )),
            }
        };
        match wire.scope {
            Scope::Cluster => Ok(Applicability::Cluster),
            Scope::Stripe => Ok(Applicability::Stripe {
                stripe: stripe_ref()?,
            }),
            Scope::Node => {
                let node = match (wire.node_uid, &wire.node_name) {
                    (Some(uid), _) => NodeRef::Uid(uid),
                    (None, Some(name)) => NodeRef::Name(name.clone()),
                    (None, None) => {
                        return Err(NomadError::InvalidInput(
                            "Applicability is missing its node address".to_string(),
                        ));
                    }
                };
                Ok(Applicability::Node {
                    stripe: stripe_ref()?,
                    node,
                })
            }
        }
    }
}
