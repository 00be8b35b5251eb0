// src/core/model/node.rs

//! The per-node topology value type and its security posture.

use crate::core::model::address::Address;
use crate::core::model::uid::Uid;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 9410;
pub const DEFAULT_GROUP_PORT: u16 = 9430;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// The authentication scheme a cluster enforces, when any.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AuthScheme {
    File,
    Ldap,
    Certificate,
}

/// A node's security posture. Consistency of these fields across the whole
/// cluster is enforced by the validator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSecurity {
    #[serde(default)]
    pub ssl_tls: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authc: Option<AuthScheme>,
    #[serde(default)]
    pub whitelist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_dir: Option<PathBuf>,
}

impl NodeSecurity {
    /// True when any security feature is enabled on this node.
    pub fn any_enabled(&self) -> bool {
        self.ssl_tls || self.authc.is_some() || self.whitelist
    }
}

/// A member of a stripe. Immutable by convention: mutations go through
/// committed changes once the cluster is activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Node {
    pub name: String,
    pub uid: Uid,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_group_port")]
    pub group_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Overrides the advertised `hostname:port` when the node sits behind
    /// NAT or a proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<Address>,
    #[serde(default)]
    pub data_dirs: IndexMap<String, PathBuf>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_dir: Option<PathBuf>,
    #[serde(default)]
    pub security: NodeSecurity,
    #[serde(default)]
    pub tc_properties: IndexMap<String, String>,
    #[serde(default)]
    pub loggers: IndexMap<String, String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_group_port() -> u16 {
    DEFAULT_GROUP_PORT
}
fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_metadata_dir() -> Option<PathBuf> {
    Some(PathBuf::from("metadata"))
}

impl Node {
    /// Creates a node with factory defaults and a fresh UID.
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            uid: Uid::generate(),
            hostname: hostname.into(),
            port,
            group_port: DEFAULT_GROUP_PORT,
            bind_address: default_bind_address(),
            public_address: None,
            data_dirs: IndexMap::new(),
            log_dir: default_log_dir(),
            backup_dir: None,
            metadata_dir: default_metadata_dir(),
            audit_log_dir: None,
            security: NodeSecurity::default(),
            tc_properties: IndexMap::new(),
            loggers: IndexMap::new(),
        }
    }

    /// The address this node is reachable at cluster-wide: the public
    /// address when one is set, the internal `hostname:port` otherwise.
    pub fn address(&self) -> Address {
        self.public_address
            .clone()
            .unwrap_or_else(|| self.internal_address())
    }

    pub fn internal_address(&self) -> Address {
        Address::new(self.hostname.clone(), self.port)
    }

    pub fn group_address(&self) -> Address {
        Address::new(self.hostname.clone(), self.group_port)
    }

    /// Prepares this node for attachment to a stripe by copying the fields
    /// that must be uniform across the cluster from a reference node that is
    /// already a member: data directory layout and security posture.
    /// Identity fields (name, UID, addresses, private directories) are kept.
    pub fn clone_for_attachment(&self, reference: &Node) -> Node {
        let mut attached = self.clone();
        attached.data_dirs = reference.data_dirs.clone();
        attached.security = NodeSecurity {
            ssl_tls: reference.security.ssl_tls,
            authc: reference.security.authc,
            whitelist: reference.security.whitelist,
            security_dir: attached.security.security_dir.clone(),
        };
        attached
    }

    /// Substitutes path parameters against this node's identity:
    /// `%h` expands to the hostname, `%n` to the node name.
    pub fn substitute(&self, raw: &str) -> String {
        raw.replace("%h", &self.hostname).replace("%n", &self.name)
    }
}
