// src/core/model/setting.rs

//! The setting catalog: every dynamically manageable setting, described as
//! data. Each `Setting` carries its allowed scopes, its mutability, whether
//! it is keyed, its default, and its parsing/validation rules; the change
//! algebra drives the model exclusively through this catalog.

use crate::core::NomadError;
use crate::core::model::address::Address;
use crate::core::model::applicability::{Applicability, Scope};
use crate::core::model::cluster::{Cluster, FailoverPriority};
use crate::core::model::node::{AuthScheme, Node};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use strum::IntoEnumIterator;

/// When a committed change to a setting takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mutability {
    /// Applied to the live process as soon as the change commits.
    AtRuntime,
    /// Committed to the upcoming configuration; effective after restart.
    RequiresRestart,
    /// Fixed once the cluster is activated.
    ConfigurationOnly,
}

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
    strum_macros::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Setting {
    // Cluster-wide settings.
    ClusterName,
    FailoverPriority,
    OffheapResources,
    ClientReconnectWindow,
    ClientLeaseDuration,
    // Node identity. Fixed after activation.
    NodeName,
    NodeHostname,
    NodePort,
    NodeGroupPort,
    NodeBindAddress,
    NodePublicAddress,
    // Node directories.
    DataDirs,
    NodeLogDir,
    NodeBackupDir,
    NodeMetadataDir,
    AuditLogDir,
    // Security posture. Uniformity across the cluster is the validator's job.
    SslTls,
    Authc,
    Whitelist,
    SecurityDir,
    // Free-form per-node maps.
    TcProperties,
    NodeLoggers,
}

static SETTINGS_BY_NAME: Lazy<HashMap<String, Setting>> = Lazy::new(|| {
    Setting::iter().map(|s| (s.to_string(), s)).collect()
});

impl Setting {
    /// Looks a setting up by its user-facing kebab-case name.
    pub fn from_name(name: &str) -> Option<Setting> {
        SETTINGS_BY_NAME.get(name).copied()
    }

    /// Whether a change at the given scope may target this setting.
    pub fn allows_scope(&self, scope: Scope) -> bool {
        use Setting::*;
        match self {
            ClusterName | FailoverPriority | OffheapResources | ClientReconnectWindow
            | ClientLeaseDuration => scope == Scope::Cluster,
            // Identity settings address exactly one node.
            NodeName | NodeHostname | NodePort | NodeGroupPort | NodeBindAddress
            | NodePublicAddress => scope == Scope::Node,
            // Everything else may be set on one node, a stripe, or broadcast
            // cluster-wide.
            DataDirs | NodeLogDir | NodeBackupDir | NodeMetadataDir | AuditLogDir | SslTls
            | Authc | Whitelist | SecurityDir | TcProperties | NodeLoggers => true,
        }
    }

    /// Keyed (map) settings take `key=value` operands; scalar settings take
    /// a bare value.
    pub fn is_map(&self) -> bool {
        matches!(
            self,
            Setting::OffheapResources
                | Setting::DataDirs
                | Setting::TcProperties
                | Setting::NodeLoggers
        )
    }

    pub fn required_at_activation(&self) -> bool {
        matches!(
            self,
            Setting::ClusterName | Setting::NodeName | Setting::NodeHostname | Setting::NodePort
        )
    }

    pub fn mutability(&self) -> Mutability {
        use Setting::*;
        match self {
            ClusterName | OffheapResources | ClientReconnectWindow | ClientLeaseDuration
            | NodePublicAddress | DataDirs | NodeBackupDir | TcProperties | NodeLoggers => {
                Mutability::AtRuntime
            }
            FailoverPriority | NodeLogDir | AuditLogDir | SslTls | Authc | Whitelist
            | SecurityDir => Mutability::RequiresRestart,
            NodeName | NodeHostname | NodePort | NodeGroupPort | NodeBindAddress
            | NodeMetadataDir => Mutability::ConfigurationOnly,
        }
    }

    /// The factory default restored by an `unset`, when one exists.
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            Setting::FailoverPriority => Some("availability"),
            Setting::ClientReconnectWindow => Some("120s"),
            Setting::ClientLeaseDuration => Some("60s"),
            Setting::NodePort => Some("9410"),
            Setting::NodeGroupPort => Some("9430"),
            Setting::NodeBindAddress => Some("0.0.0.0"),
            Setting::NodeLogDir => Some("logs"),
            Setting::NodeMetadataDir => Some("metadata"),
            _ => None,
        }
    }

    /// Validates the operands of a `set` against this setting's shape and
    /// value syntax, without touching any cluster.
    pub fn validate_set(&self, key: Option<&str>, value: Option<&str>) -> Result<(), NomadError> {
        let name = self;
        if self.is_map() {
            if key.is_none() {
                return Err(NomadError::InvalidInput(format!(
                    "Setting '{name}' is keyed: expected <key>=<value>"
                )));
            }
        } else if key.is_some() {
            return Err(NomadError::InvalidInput(format!(
                "Setting '{name}' is not keyed"
            )));
        }
        let value = value.ok_or_else(|| {
            NomadError::InvalidInput(format!("Setting '{name}' requires a value"))
        })?;
        self.parse_value(value).map(|_| ())
    }

    /// Checks value syntax, returning the canonical string form.
    fn parse_value(&self, value: &str) -> Result<String, NomadError> {
        let name = self;
        use Setting::*;
        match self {
            ClusterName | NodeName => {
                if value.trim().is_empty() {
                    return Err(NomadError::InvalidInput(format!(
                        "Setting '{name}' must not be blank"
                    )));
                }
                Ok(value.to_string())
            }
            NodeHostname | NodeBindAddress => {
                if value.trim().is_empty() || value.contains(char::is_whitespace) {
                    return Err(NomadError::InvalidInput(format!(
                        "Invalid host '{value}' for setting '{name}'"
                    )));
                }
                Ok(value.to_string())
            }
            FailoverPriority => Ok(value.parse::<crate::core::model::cluster::FailoverPriority>()?.to_string()),
            OffheapResources => {
                let bytes = parse_byte_size(value)?;
                if bytes == 0 {
                    return Err(NomadError::InvalidInput(
                        "Offheap resource sizes must be greater than zero".to_string(),
                    ));
                }
                Ok(bytes.to_string())
            }
            ClientReconnectWindow | ClientLeaseDuration => {
                let d = humantime::parse_duration(value).map_err(|e| {
                    NomadError::InvalidInput(format!("Invalid duration '{value}': {e}"))
                })?;
                if d.is_zero() {
                    return Err(NomadError::InvalidInput(format!(
                        "Setting '{name}' must be positive"
                    )));
                }
                Ok(value.to_string())
            }
            NodePort | NodeGroupPort => {
                value.parse::<u16>().map(|p| p.to_string()).map_err(|_| {
                    NomadError::InvalidInput(format!("Invalid port '{value}' for setting '{name}'"))
                })
            }
            NodePublicAddress => Ok(value.parse::<Address>()?.to_string()),
            DataDirs | NodeLogDir | NodeBackupDir | NodeMetadataDir | AuditLogDir
            | SecurityDir => {
                if value.trim().is_empty() {
                    return Err(NomadError::InvalidInput(format!(
                        "Setting '{name}' requires a path"
                    )));
                }
                Ok(value.to_string())
            }
            SslTls | Whitelist => value
                .parse::<bool>()
                .map(|b| b.to_string())
                .map_err(|_| {
                    NomadError::InvalidInput(format!(
                        "Setting '{name}' expects 'true' or 'false', got '{value}'"
                    ))
                }),
            Authc => Ok(AuthScheme::from_str(value)
                .map_err(|_| {
                    NomadError::InvalidInput(format!("Invalid authentication scheme '{value}'"))
                })?
                .to_string()),
            TcProperties | NodeLoggers => Ok(value.to_string()),
        }
    }

    /// Applies a `set` to every entity the applicability targets.
    pub fn apply_set(
        &self,
        cluster: &mut Cluster,
        applicability: &Applicability,
        key: Option<&str>,
        value: &str,
    ) -> Result<(), NomadError> {
        let name = self;
        self.validate_set(key, Some(value))?;
        if !self.allows_scope(applicability.scope()) {
            return Err(NomadError::InvalidInput(format!(
                "Setting '{name}' cannot be set at {} scope",
                applicability.scope()
            )));
        }
        if applicability.scope() == Scope::Cluster && !self.is_node_setting() {
            return self.apply_cluster_set(cluster, key, value);
        }
        for_each_target_node(cluster, applicability, |node| {
            self.apply_node_set(node, key, value)
        })
    }

    /// Applies an `unset`, restoring the catalog default (scalar) or
    /// removing entries (map).
    pub fn apply_unset(
        &self,
        cluster: &mut Cluster,
        applicability: &Applicability,
        key: Option<&str>,
    ) -> Result<(), NomadError> {
        let name = self;
        if !self.allows_scope(applicability.scope()) {
            return Err(NomadError::InvalidInput(format!(
                "Setting '{name}' cannot be unset at {} scope",
                applicability.scope()
            )));
        }
        if self.is_map() {
            if applicability.scope() == Scope::Cluster && !self.is_node_setting() {
                return self.apply_cluster_unset(cluster, key);
            }
            return for_each_target_node(cluster, applicability, |node| {
                self.apply_node_unset(node, key)
            });
        }
        match self.default_value() {
            Some(default) => self.apply_set(cluster, applicability, None, default),
            None => {
                if applicability.scope() == Scope::Cluster && !self.is_node_setting() {
                    return Err(NomadError::InvalidInput(format!(
                        "Setting '{name}' has no default and cannot be unset"
                    )));
                }
                for_each_target_node(cluster, applicability, |node| {
                    self.apply_node_unset(node, key)
                })
            }
        }
    }

    fn is_node_setting(&self) -> bool {
        !matches!(
            self,
            Setting::ClusterName
                | Setting::FailoverPriority
                | Setting::OffheapResources
                | Setting::ClientReconnectWindow
                | Setting::ClientLeaseDuration
        )
    }

    fn apply_cluster_set(
        &self,
        cluster: &mut Cluster,
        key: Option<&str>,
        value: &str,
    ) -> Result<(), NomadError> {
        match self {
            Setting::ClusterName => cluster.name = value.to_string(),
            Setting::FailoverPriority => {
                cluster.failover_priority = value.parse::<FailoverPriority>()?;
            }
            Setting::OffheapResources => {
                let key = key.expect("validated above");
                cluster
                    .offheap_resources
                    .insert(key.to_string(), parse_byte_size(value)?);
            }
            Setting::ClientReconnectWindow => {
                cluster.client_reconnect_window = humantime::parse_duration(value)
                    .map_err(|e| NomadError::InvalidInput(e.to_string()))?;
            }
            Setting::ClientLeaseDuration => {
                cluster.client_lease_duration = humantime::parse_duration(value)
                    .map_err(|e| NomadError::InvalidInput(e.to_string()))?;
            }
            _ => unreachable!("not a cluster setting: {}", self),
        }
        Ok(())
    }

    fn apply_cluster_unset(
        &self,
        cluster: &mut Cluster,
        key: Option<&str>,
    ) -> Result<(), NomadError> {
        match self {
            Setting::OffheapResources => {
                match key {
                    Some(k) => {
                        cluster.offheap_resources.shift_remove(k);
                    }
                    None => cluster.offheap_resources.clear(),
                }
                Ok(())
            }
            _ => unreachable!("not a keyed cluster setting: {}", self),
        }
    }

    fn apply_node_set(
        &self,
        node: &mut Node,
        key: Option<&str>,
        value: &str,
    ) -> Result<(), NomadError> {
        use Setting::*;
        match self {
            NodeName => node.name = value.to_string(),
            NodeHostname => node.hostname = value.to_string(),
            NodePort => node.port = value.parse().expect("validated above"),
            NodeGroupPort => node.group_port = value.parse().expect("validated above"),
            NodeBindAddress => node.bind_address = value.to_string(),
            NodePublicAddress => node.public_address = Some(value.parse()?),
            DataDirs => {
                let key = key.expect("validated above");
                node.data_dirs.insert(key.to_string(), PathBuf::from(value));
            }
            NodeLogDir => node.log_dir = PathBuf::from(value),
            NodeBackupDir => node.backup_dir = Some(PathBuf::from(value)),
            NodeMetadataDir => node.metadata_dir = Some(PathBuf::from(value)),
            AuditLogDir => node.audit_log_dir = Some(PathBuf::from(value)),
            SslTls => node.security.ssl_tls = value.parse().expect("validated above"),
            Authc => {
                node.security.authc =
                    Some(AuthScheme::from_str(value).expect("validated above"));
            }
            Whitelist => node.security.whitelist = value.parse().expect("validated above"),
            SecurityDir => node.security.security_dir = Some(PathBuf::from(value)),
            TcProperties => {
                let key = key.expect("validated above");
                node.tc_properties.insert(key.to_string(), value.to_string());
            }
            NodeLoggers => {
                let key = key.expect("validated above");
                node.loggers.insert(key.to_string(), value.to_string());
            }
            _ => unreachable!("not a node setting: {}", self),
        }
        Ok(())
    }

    fn apply_node_unset(&self, node: &mut Node, key: Option<&str>) -> Result<(), NomadError> {
        use Setting::*;
        let name = self;
        match self {
            NodePublicAddress => node.public_address = None,
            NodeBackupDir => node.backup_dir = None,
            AuditLogDir => node.audit_log_dir = None,
            SslTls => node.security.ssl_tls = false,
            Authc => node.security.authc = None,
            Whitelist => node.security.whitelist = false,
            SecurityDir => node.security.security_dir = None,
            DataDirs => match key {
                Some(k) => {
                    node.data_dirs.shift_remove(k);
                }
                None => node.data_dirs.clear(),
            },
            TcProperties => match key {
                Some(k) => {
                    node.tc_properties.shift_remove(k);
                }
                None => node.tc_properties.clear(),
            },
            NodeLoggers => match key {
                Some(k) => {
                    node.loggers.shift_remove(k);
                }
                None => node.loggers.clear(),
            },
            _ => {
                return Err(NomadError::InvalidInput(format!(
                    "Setting '{name}' has no default and cannot be unset"
                )));
            }
        }
        Ok(())
    }
}

/// Visits every node the applicability targets, in stripe order.
fn for_each_target_node(
    cluster: &mut Cluster,
    applicability: &Applicability,
    mut f: impl FnMut(&mut Node) -> Result<(), NomadError>,
) -> Result<(), NomadError> {
    let resolved = applicability.resolve(cluster)?;
    match resolved {
        Applicability::Cluster => {
            for stripe in &mut cluster.stripes {
                for node in &mut stripe.nodes {
                    f(node)?;
                }
            }
        }
        Applicability::Stripe { stripe } => {
            let uid = match stripe {
                crate::core::model::applicability::StripeRef::Uid(uid) => uid,
                _ => unreachable!("resolve() yields UID refs"),
            };
            let stripe = cluster
                .stripe_by_uid_mut(uid)
                .ok_or_else(|| NomadError::InvalidInput(format!("No stripe with UID {uid}")))?;
            for node in &mut stripe.nodes {
                f(node)?;
            }
        }
        Applicability::Node { stripe, node } => {
            let (stripe_uid, node_uid) = match (stripe, node) {
                (
                    crate::core::model::applicability::StripeRef::Uid(s),
                    crate::core::model::applicability::NodeRef::Uid(n),
                ) => (s, n),
                _ => unreachable!("resolve() yields UID refs"),
            };
            let stripe = cluster.stripe_by_uid_mut(stripe_uid).ok_or_else(|| {
                NomadError::InvalidInput(format!("No stripe with UID {stripe_uid}"))
            })?;
            let node = stripe
                .nodes
                .iter_mut()
                .find(|n| n.uid == node_uid)
                .ok_or_else(|| NomadError::InvalidInput(format!("No node with UID {node_uid}")))?;
            f(node)?;
        }
    }
    Ok(())
}

/// Parses a human-readable byte size: a plain number of bytes, or a number
/// with a `B`, `KB`, `MB`, `GB` or `TB` suffix (binary multiples).
pub fn parse_byte_size(value: &str) -> Result<u64, NomadError> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let number: u64 = digits.parse().map_err(|_| {
        NomadError::InvalidInput(format!("Invalid size '{value}': expected <number>[B|KB|MB|GB|TB]"))
    })?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        "TB" => 1024_u64.pow(4),
        other => {
            return Err(NomadError::InvalidInput(format!(
                "Invalid size unit '{other}' in '{value}'"
            )));
        }
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| NomadError::InvalidInput(format!("Size '{value}' overflows")))
}
