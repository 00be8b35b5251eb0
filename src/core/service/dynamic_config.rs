// src/core/service/dynamic_config.rs

//! The dynamic-config service: binds the storage layer and the Nomad state
//! machine to a running node. It tracks two views of the configuration —
//! `runtime` (in effect now) and `upcoming` (after any pending restart) —
//! intercepts committed changes to keep them current, and fans events out
//! to subscribers.

use crate::core::NomadError;
use crate::core::change::NomadChange;
use crate::core::model::cluster::Cluster;
use crate::core::model::context::NodeContext;
use crate::core::model::license::LicenseValidator;
use crate::core::model::validator::validate_cluster;
use crate::core::nomad::endpoint::NomadEndpoint;
use crate::core::nomad::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, PrepareMessage, RejectionReason,
    RollbackMessage, TakeoverMessage,
};
use crate::core::nomad::server::{CommittedChange, NomadServer};
use crate::core::service::listeners::{DynamicConfigListener, ListenerHandle, ListenerRegistry};
use crate::core::service::restart::{DelayedRestarter, RestartHook};
use crate::core::storage::repository::NomadRepository;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// The identity this node reports in operator-facing output.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub host: String,
    pub user: String,
}

/// The external collaborators a service is wired with at construction.
pub struct Collaborators {
    pub restart_hook: Arc<dyn RestartHook>,
    pub host_info: HostInfo,
    pub license_validator: Option<Arc<dyn LicenseValidator>>,
}

pub struct DynamicConfigService {
    node_name: String,
    /// The startup (diagnostic) configuration: a single-node cluster built
    /// from the node's own settings. Reported as runtime/upcoming until an
    /// activation commits, and again after a reset.
    diagnostic_context: NodeContext,
    repository: NomadRepository,
    server: Mutex<NomadServer>,
    runtime: RwLock<Option<NodeContext>>,
    upcoming: RwLock<Option<NodeContext>>,
    activated: AtomicBool,
    activation_armed: AtomicBool,
    pending_activation: Mutex<Option<Cluster>>,
    listeners: Arc<ListenerRegistry>,
    restarter: DelayedRestarter,
    license_validator: Option<Arc<dyn LicenseValidator>>,
    host_info: HostInfo,
}

impl DynamicConfigService {
    /// Opens (or creates) the repository at `root` and binds a Nomad server
    /// for this node to it. A repository that already holds a committed
    /// configuration brings the node up activated.
    pub fn new(
        root: &Path,
        diagnostic_context: NodeContext,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, NomadError> {
        let node_name = diagnostic_context.node_name().to_string();
        let repository = NomadRepository::open(root)?;
        if let Some(discovered) = repository.discover_node_name()? {
            if discovered != node_name {
                return Err(NomadError::StorageError(format!(
                    "Repository at {} belongs to node '{}', not '{}'",
                    root.display(),
                    discovered,
                    node_name
                )));
            }
        }
        let server = NomadServer::open(&repository, &node_name)?;
        let committed = server.committed_context().cloned();
        let activated = committed.is_some();
        if activated {
            info!(
                "Node '{}' starts activated at version {}.",
                node_name,
                server.current_version()
            );
        } else {
            info!("Node '{}' starts in diagnostic mode.", node_name);
        }
        Ok(Arc::new(Self {
            node_name,
            diagnostic_context,
            repository,
            server: Mutex::new(server),
            runtime: RwLock::new(committed.clone()),
            upcoming: RwLock::new(committed),
            activated: AtomicBool::new(activated),
            activation_armed: AtomicBool::new(false),
            pending_activation: Mutex::new(None),
            listeners: Arc::new(ListenerRegistry::new()),
            restarter: DelayedRestarter::new(collaborators.restart_hook),
            license_validator: collaborators.license_validator,
            host_info: collaborators.host_info,
        }))
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn host_info(&self) -> &HostInfo {
        &self.host_info
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    /// The configuration currently in effect in the running process.
    pub fn runtime_context(&self) -> NodeContext {
        self.runtime
            .read()
            .clone()
            .unwrap_or_else(|| self.diagnostic_context.clone())
    }

    /// The configuration that will be in effect after any pending
    /// restart-required changes are applied.
    pub fn upcoming_context(&self) -> NodeContext {
        self.upcoming
            .read()
            .clone()
            .unwrap_or_else(|| self.diagnostic_context.clone())
    }

    pub fn is_restart_required(&self) -> bool {
        *self.runtime.read() != *self.upcoming.read()
    }

    pub fn register_listener(&self, listener: Arc<dyn DynamicConfigListener>) -> ListenerHandle {
        ListenerRegistry::register(&self.listeners, listener)
    }

    /// Installs a license (or removes it with `None`), validating it against
    /// the cluster the node is headed for: the pending activation cluster
    /// when one is prepared, the upcoming cluster otherwise. Transactional:
    /// on validation failure the previously installed license, or none, is
    /// restored.
    pub fn install_license(&self, content: Option<&str>) -> Result<(), NomadError> {
        let cluster = self
            .pending_activation
            .lock()
            .clone()
            .unwrap_or_else(|| self.upcoming_context().cluster);
        self.install_validated_license(content, &cluster)
    }

    fn install_validated_license(
        &self,
        content: Option<&str>,
        cluster: &Cluster,
    ) -> Result<(), NomadError> {
        let previous = self.repository.install_license(content)?;
        if let (Some(content), Some(validator)) = (content, self.license_validator.as_ref()) {
            if let Err(e) = validator.validate(content, cluster) {
                if let Err(restore) = self.repository.install_license(previous.as_deref()) {
                    error!("Failed to restore the previous license: {}", restore);
                }
                return Err(e);
            }
        }
        info!(
            "License {} on node '{}'.",
            if content.is_some() { "installed" } else { "removed" },
            self.node_name
        );
        Ok(())
    }

    pub fn license(&self) -> Result<Option<String>, NomadError> {
        self.repository.license()
    }

    /// Validates the proposed cluster, checks that this node is one of its
    /// members, installs the license, and arms activation. The cluster
    /// activation change itself then flows through the Nomad protocol.
    pub fn prepare_activation(
        &self,
        cluster: Cluster,
        license: Option<&str>,
    ) -> Result<(), NomadError> {
        if self.is_activated() {
            return Err(NomadError::AlreadyActivated);
        }
        validate_cluster(&cluster)?;

        let my_address = self.diagnostic_context.node().address();
        let member = cluster.node_by_name(&self.node_name).is_some()
            || cluster.node_by_address(&my_address).is_some();
        if !member {
            return Err(NomadError::ValidationError(format!(
                "Node '{}' ({}) does not appear in the proposed cluster '{}'",
                self.node_name, my_address, cluster.name
            )));
        }

        self.install_validated_license(license, &cluster)?;
        *self.pending_activation.lock() = Some(cluster);
        self.activate()?;
        info!(
            "Activation prepared on node '{}' by {}@{}.",
            self.node_name, self.host_info.user, self.host_info.host
        );
        Ok(())
    }

    /// Arms the node to accept a cluster activation change. Single-shot:
    /// fails once the node is activated.
    pub fn activate(&self) -> Result<(), NomadError> {
        if self.is_activated() {
            return Err(NomadError::AlreadyActivated);
        }
        if self.pending_activation.lock().is_none() {
            return Err(NomadError::InvalidInput(
                "No activation has been prepared on this node".to_string(),
            ));
        }
        self.activation_armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Schedules a delayed restart through the external hook.
    pub fn restart(&self, delay: Duration) -> Result<(), NomadError> {
        self.restarter.schedule(delay)
    }

    pub fn is_restart_pending(&self) -> bool {
        self.restarter.is_pending()
    }

    /// Wipes this node's repository (keeping timestamped backups) and
    /// returns it to diagnostic mode. Used when the node is detached from
    /// its cluster.
    pub fn reset(&self) -> Result<(), NomadError> {
        {
            let mut server = self.server.lock();
            self.repository.reset()?;
            *server = NomadServer::open(&self.repository, &self.node_name)?;
        }
        *self.runtime.write() = None;
        *self.upcoming.write() = None;
        self.activated.store(false, Ordering::SeqCst);
        self.activation_armed.store(false, Ordering::SeqCst);
        *self.pending_activation.lock() = None;
        warn!(
            "Node '{}' was reset and returned to diagnostic mode.",
            self.node_name
        );
        Ok(())
    }

    // --- The local message surface. The node's transport hands incoming
    // --- Nomad messages to these, so committed changes always pass through
    // --- the service's interception.

    pub fn handle_discover(&self) -> DiscoverResponse {
        self.server.lock().discover()
    }

    pub fn handle_prepare(&self, message: &PrepareMessage) -> AcceptRejectResponse {
        if matches!(message.change, NomadChange::ClusterActivation { .. })
            && !self.activation_armed.load(Ordering::SeqCst)
        {
            let state = self.server.lock().state_summary();
            return AcceptRejectResponse::rejected(
                RejectionReason::ChangeUnapplicable,
                "Activation has not been prepared on this node",
                state,
            );
        }
        self.server.lock().prepare(message)
    }

    pub fn handle_commit(&self, message: &CommitMessage) -> AcceptRejectResponse {
        let (response, committed) = self.server.lock().commit(message);
        if let Some(committed) = committed {
            self.apply_committed(committed);
        }
        response
    }

    pub fn handle_rollback(&self, message: &RollbackMessage) -> AcceptRejectResponse {
        self.server.lock().rollback(message)
    }

    pub fn handle_takeover(&self, message: &TakeoverMessage) -> AcceptRejectResponse {
        self.server.lock().takeover(message)
    }

    /// Intercepts a committed change: swaps the upcoming (and, for
    /// runtime-applicable changes, the runtime) context, then notifies
    /// listeners. Runs after the server lock is released; no lock is held
    /// while listeners execute.
    fn apply_committed(&self, committed: CommittedChange) {
        let CommittedChange {
            version,
            change,
            context,
        } = committed;

        if let NomadChange::ClusterActivation { license, .. } = &change {
            *self.upcoming.write() = Some(context.clone());
            *self.runtime.write() = Some(context.clone());
            self.activated.store(true, Ordering::SeqCst);
            self.activation_armed.store(false, Ordering::SeqCst);
            *self.pending_activation.lock() = None;
            if let Some(license) = license {
                if let Err(e) = self.install_validated_license(Some(license), &context.cluster) {
                    error!(
                        "The license carried by the activation change did not install: {}",
                        e
                    );
                }
            }
            info!(
                "Node '{}' activated into cluster '{}' at version {}.",
                self.node_name, context.cluster.name, version
            );
            self.listeners.notify(|l| l.on_activation(&context.cluster));
            return;
        }

        let runtime_applicable = change.is_runtime_applicable();
        *self.upcoming.write() = Some(context.clone());
        if runtime_applicable {
            // The runtime view may still lag the upcoming one by pending
            // restart-required changes, so the new change is replayed onto
            // it rather than adopting the upcoming context wholesale.
            let current = self.runtime_context();
            let runtime_context = match change.apply(Some(&current.cluster)) {
                Ok(cluster) => current.with_cluster(cluster).unwrap_or_else(|| context.clone()),
                Err(e) => {
                    warn!(
                        "Committed change could not be replayed onto the runtime configuration ({}); adopting the upcoming configuration wholesale.",
                        e
                    );
                    context.clone()
                }
            };
            *self.runtime.write() = Some(runtime_context.clone());
            info!(
                "Version {} applied to the running process: {}.",
                version,
                change.summary()
            );
            self.listeners
                .notify(|l| l.on_new_runtime_configuration(&runtime_context, &change));
        } else {
            info!(
                "Version {} committed; effective after restart: {}.",
                version,
                change.summary()
            );
            self.listeners
                .notify(|l| l.on_new_upcoming_configuration(&context, &change));
        }
    }
}

/// A service is directly usable as the endpoint for its own node, which is
/// how in-process coordinators (and tests) reach it.
#[async_trait]
impl NomadEndpoint for DynamicConfigService {
    async fn discover(&self) -> anyhow::Result<DiscoverResponse> {
        Ok(self.handle_discover())
    }

    async fn prepare(&self, message: PrepareMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.handle_prepare(&message))
    }

    async fn commit(&self, message: CommitMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.handle_commit(&message))
    }

    async fn rollback(&self, message: RollbackMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.handle_rollback(&message))
    }

    async fn takeover(&self, message: TakeoverMessage) -> anyhow::Result<AcceptRejectResponse> {
        Ok(self.handle_takeover(&message))
    }
}
