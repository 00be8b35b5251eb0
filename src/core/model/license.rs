// src/core/model/license.rs

//! The pinned interface to the external license collaborator. License
//! parsing proper lives outside this crate; here a license is opaque
//! content plus a validator that checks a proposed cluster against it.

use crate::core::NomadError;
use crate::core::model::cluster::Cluster;
use crate::core::model::setting::parse_byte_size;

/// Validates opaque license content against a proposed cluster.
pub trait LicenseValidator: Send + Sync {
    fn validate(&self, license: &str, cluster: &Cluster) -> Result<(), NomadError>;
}

/// The capability limits a license grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LicenseLimits {
    pub max_nodes: usize,
    pub max_offheap_bytes: u64,
}

/// The default validator: reads `nodes = <count>` and `offheap = <size>`
/// lines out of the license content and checks the cluster's node count and
/// total offheap allocation against them. Unknown lines are ignored.
#[derive(Debug, Default)]
pub struct CapacityLicenseValidator;

impl CapacityLicenseValidator {
    pub fn parse_limits(license: &str) -> Result<LicenseLimits, NomadError> {
        let mut max_nodes = None;
        let mut max_offheap_bytes = None;
        for line in license.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "nodes" => {
                    max_nodes = Some(value.trim().parse::<usize>().map_err(|_| {
                        NomadError::LicenseViolation(format!(
                            "Malformed license: bad node count '{}'",
                            value.trim()
                        ))
                    })?);
                }
                "offheap" => {
                    max_offheap_bytes = Some(parse_byte_size(value.trim()).map_err(|_| {
                        NomadError::LicenseViolation(format!(
                            "Malformed license: bad offheap limit '{}'",
                            value.trim()
                        ))
                    })?);
                }
                _ => {}
            }
        }
        match (max_nodes, max_offheap_bytes) {
            (Some(max_nodes), Some(max_offheap_bytes)) => Ok(LicenseLimits {
                max_nodes,
                max_offheap_bytes,
            }),
            _ => Err(NomadError::LicenseViolation(
                "Malformed license: missing 'nodes' or 'offheap' limit".to_string(),
            )),
        }
    }
}

impl LicenseValidator for CapacityLicenseValidator {
    fn validate(&self, license: &str, cluster: &Cluster) -> Result<(), NomadError> {
        let limits = Self::parse_limits(license)?;
        if cluster.node_count() > limits.max_nodes {
            return Err(NomadError::LicenseViolation(format!(
                "Cluster has {} nodes but the license allows {}",
                cluster.node_count(),
                limits.max_nodes
            )));
        }
        let total_offheap: u64 = cluster.offheap_resources.values().sum();
        if total_offheap > limits.max_offheap_bytes {
            return Err(NomadError::LicenseViolation(format!(
                "Cluster allocates {total_offheap} bytes of offheap but the license allows {}",
                limits.max_offheap_bytes
            )));
        }
        Ok(())
    }
}
