// tests/common/mod.rs

//! Shared fixtures for the unit and property suites.
//!
//! **Note:** Not every helper is used by every suite; they are available
//! for use when needed.

#![allow(dead_code)]

use nomad_config::core::change::NomadChange;
use nomad_config::core::model::cluster::Cluster;
use nomad_config::core::model::context::NodeContext;
use nomad_config::core::model::node::Node;
use nomad_config::core::model::stripe::Stripe;
use nomad_config::core::service::dynamic_config::{
    Collaborators, DynamicConfigService, HostInfo,
};
use nomad_config::core::service::restart::RestartHook;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TEST_HOST: &str = "ops-host";
pub const TEST_USER: &str = "ops-user";

/// A node with a unique port so addresses never collide in test clusters.
pub fn test_node(name: &str, port: u16) -> Node {
    let mut node = Node::new(name, "localhost", port);
    node.data_dirs
        .insert("main".to_string(), format!("data/{name}").into());
    node
}

/// A single-stripe cluster over the given (name, port) pairs.
pub fn single_stripe_cluster(name: &str, members: &[(&str, u16)]) -> Cluster {
    let nodes = members
        .iter()
        .map(|(name, port)| test_node(name, *port))
        .collect();
    Cluster::with_stripes(name, vec![Stripe::with_nodes("stripe-1", nodes)])
}

/// The startup configuration of one node: a single-node diagnostic cluster.
pub fn diagnostic_context(name: &str, port: u16) -> NodeContext {
    let cluster = single_stripe_cluster("diagnostic", &[(name, port)]);
    NodeContext::by_name(cluster, name).expect("the diagnostic cluster contains its own node")
}

pub fn activation(cluster: &Cluster) -> NomadChange {
    NomadChange::activation(cluster.clone(), None)
}

/// A restart hook that counts invocations.
#[derive(Default)]
pub struct CountingRestartHook {
    pub restarts: AtomicUsize,
}

impl RestartHook for CountingRestartHook {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn collaborators() -> Collaborators {
    Collaborators {
        restart_hook: Arc::new(CountingRestartHook::default()),
        host_info: HostInfo {
            host: TEST_HOST.to_string(),
            user: TEST_USER.to_string(),
        },
        license_validator: None,
    }
}

pub fn service_at(root: &Path, name: &str, port: u16) -> Arc<DynamicConfigService> {
    DynamicConfigService::new(root, diagnostic_context(name, port), collaborators())
        .expect("service opens over a fresh repository")
}
