// src/core/model/validator.rs

//! Whole-cluster invariant checks, run against every proposed topology
//! before a change is allowed to prepare. Checks run in a fixed order and
//! the first violation wins.

use crate::core::NomadError;
use crate::core::model::cluster::{Cluster, FailoverPriority};
use crate::core::model::node::Node;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Validates a proposed cluster. Returns the first violation encountered.
pub fn validate_cluster(cluster: &Cluster) -> Result<(), NomadError> {
    check_cluster_name(cluster)?;
    check_unique_addresses(cluster)?;
    check_unique_node_names(cluster)?;
    check_data_dir_uniformity(cluster)?;
    check_failover_priority(cluster)?;
    check_security_consistency(cluster)?;
    check_offheap_resources(cluster)?;
    check_client_timings(cluster)?;
    check_paths(cluster)?;
    Ok(())
}

fn check_cluster_name(cluster: &Cluster) -> Result<(), NomadError> {
    if cluster.name.trim().is_empty() {
        return Err(NomadError::ValidationError(
            "Cluster name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_unique_addresses(cluster: &Cluster) -> Result<(), NomadError> {
    let mut seen = HashSet::new();
    for node in cluster.nodes() {
        let addr = node.address();
        if !seen.insert(addr.clone()) {
            return Err(NomadError::ValidationError(format!(
                "Duplicate node address: {addr}"
            )));
        }
    }
    Ok(())
}

fn check_unique_node_names(cluster: &Cluster) -> Result<(), NomadError> {
    for stripe in &cluster.stripes {
        let mut seen = HashSet::new();
        for node in &stripe.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(NomadError::ValidationError(format!(
                    "Duplicate node name '{}' in stripe '{}'",
                    node.name, stripe.name
                )));
            }
        }
    }
    Ok(())
}

fn check_data_dir_uniformity(cluster: &Cluster) -> Result<(), NomadError> {
    for stripe in &cluster.stripes {
        let mut expected: Option<(&Node, BTreeSet<&String>)> = None;
        for node in &stripe.nodes {
            let names: BTreeSet<&String> = node.data_dirs.keys().collect();
            match &expected {
                None => expected = Some((node, names)),
                Some((first, first_names)) => {
                    if *first_names != names {
                        return Err(NomadError::ValidationError(format!(
                            "Nodes '{}' and '{}' of stripe '{}' declare different data directory names",
                            first.name, node.name, stripe.name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_failover_priority(cluster: &Cluster) -> Result<(), NomadError> {
    if let FailoverPriority::Consistency { voters } = cluster.failover_priority {
        // Voter count plus node count must break ties.
        let total = 2 * voters as usize + cluster.node_count();
        if total % 2 == 0 {
            return Err(NomadError::ValidationError(format!(
                "Consistency failover requires an odd voting majority: {} voters with {} nodes cannot break a tie",
                voters,
                cluster.node_count()
            )));
        }
    }
    Ok(())
}

fn check_security_consistency(cluster: &Cluster) -> Result<(), NomadError> {
    let mut nodes = cluster.nodes();
    let Some(first) = nodes.next() else {
        return Ok(());
    };
    for node in cluster.nodes().skip(1) {
        if node.security.ssl_tls != first.security.ssl_tls
            || node.security.authc != first.security.authc
            || node.security.whitelist != first.security.whitelist
        {
            return Err(NomadError::ValidationError(format!(
                "Security settings differ between nodes '{}' and '{}': ssl-tls, authc and whitelist must be uniform cluster-wide",
                first.name, node.name
            )));
        }
    }
    let security_enabled = first.security.any_enabled();
    for node in cluster.nodes() {
        if security_enabled && node.security.security_dir.is_none() {
            return Err(NomadError::ValidationError(format!(
                "Node '{}' must declare a security directory when security is enabled",
                node.name
            )));
        }
        if !security_enabled && node.security.security_dir.is_some() {
            return Err(NomadError::ValidationError(format!(
                "Node '{}' declares a security directory but no security feature is enabled",
                node.name
            )));
        }
    }
    if first.security.authc == Some(crate::core::model::node::AuthScheme::Certificate)
        && !first.security.ssl_tls
    {
        return Err(NomadError::ValidationError(
            "Certificate authentication requires ssl-tls to be enabled".to_string(),
        ));
    }
    Ok(())
}

fn check_offheap_resources(cluster: &Cluster) -> Result<(), NomadError> {
    // IndexMap keys are unique by construction; sizes still need checking.
    for (name, size) in &cluster.offheap_resources {
        if *size == 0 {
            return Err(NomadError::ValidationError(format!(
                "Offheap resource '{name}' must have a size greater than zero"
            )));
        }
    }
    Ok(())
}

fn check_client_timings(cluster: &Cluster) -> Result<(), NomadError> {
    if cluster.client_reconnect_window.is_zero() {
        return Err(NomadError::ValidationError(
            "client-reconnect-window must be positive".to_string(),
        ));
    }
    if cluster.client_lease_duration.is_zero() {
        return Err(NomadError::ValidationError(
            "client-lease-duration must be positive".to_string(),
        ));
    }
    if cluster.client_lease_duration > cluster.client_reconnect_window {
        return Err(NomadError::ValidationError(format!(
            "client-lease-duration ({:?}) must not exceed client-reconnect-window ({:?})",
            cluster.client_lease_duration, cluster.client_reconnect_window
        )));
    }
    Ok(())
}

fn check_paths(cluster: &Cluster) -> Result<(), NomadError> {
    for node in cluster.nodes() {
        let mut paths: HashMap<String, String> = HashMap::new();
        paths.insert("log-dir".into(), node.log_dir.display().to_string());
        if let Some(p) = &node.backup_dir {
            paths.insert("backup-dir".into(), p.display().to_string());
        }
        if let Some(p) = &node.metadata_dir {
            paths.insert("metadata-dir".into(), p.display().to_string());
        }
        if let Some(p) = &node.audit_log_dir {
            paths.insert("audit-log-dir".into(), p.display().to_string());
        }
        if let Some(p) = &node.security.security_dir {
            paths.insert("security-dir".into(), p.display().to_string());
        }
        for (name, p) in &node.data_dirs {
            paths.insert(format!("data-dirs.{name}"), p.display().to_string());
        }
        for (setting, raw) in paths {
            let substituted = node.substitute(raw.as_str());
            if substituted.trim().is_empty() {
                return Err(NomadError::ValidationError(format!(
                    "Node '{}': {setting} resolves to an empty path",
                    node.name
                )));
            }
            if substituted.contains('%') {
                return Err(NomadError::ValidationError(format!(
                    "Node '{}': {setting} '{raw}' contains an unresolved placeholder",
                    node.name
                )));
            }
            if substituted.contains('\0') {
                return Err(NomadError::ValidationError(format!(
                    "Node '{}': {setting} '{raw}' is not a valid path",
                    node.name
                )));
            }
        }
    }
    Ok(())
}
