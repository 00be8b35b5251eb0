// tests/unit_client_test.rs

//! Coordinator runs against real services backed by temp-dir repositories,
//! wired through in-process endpoints.

mod common;

use async_trait::async_trait;
use common::{collaborators, diagnostic_context, single_stripe_cluster};
use nomad_config::core::change::setting_change::SettingChange;
use nomad_config::core::change::NomadChange;
use nomad_config::core::errors::NomadError;
use nomad_config::core::model::applicability::Applicability;
use nomad_config::core::model::cluster::Cluster;
use nomad_config::core::model::setting::Setting;
use nomad_config::core::nomad::client::{
    NomadClient, RecoveryPolicy, ServerOutcome, ServerSpec, Timeouts,
};
use nomad_config::core::nomad::endpoint::{EmbeddedEndpoint, NomadEndpoint};
use nomad_config::core::nomad::server::NomadServer;
use nomad_config::core::storage::repository::NomadRepository;
use parking_lot::Mutex;
use nomad_config::core::nomad::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, PrepareMessage, RollbackMessage,
    ServerMode, TakeoverMessage,
};
use nomad_config::core::service::dynamic_config::DynamicConfigService;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Wraps an endpoint with switchable fault injection.
struct FaultyEndpoint {
    inner: Arc<dyn NomadEndpoint>,
    unreachable: AtomicBool,
    fail_commits: AtomicBool,
    fail_prepares: AtomicBool,
}

impl FaultyEndpoint {
    fn new(inner: Arc<dyn NomadEndpoint>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            unreachable: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
            fail_prepares: AtomicBool::new(false),
        })
    }

    fn check(&self, flag: &AtomicBool) -> anyhow::Result<()> {
        if self.unreachable.load(Ordering::SeqCst) || flag.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused (injected)");
        }
        Ok(())
    }
}

#[async_trait]
impl NomadEndpoint for FaultyEndpoint {
    async fn discover(&self) -> anyhow::Result<DiscoverResponse> {
        self.check(&self.unreachable)?;
        self.inner.discover().await
    }

    async fn prepare(&self, message: PrepareMessage) -> anyhow::Result<AcceptRejectResponse> {
        self.check(&self.fail_prepares)?;
        self.inner.prepare(message).await
    }

    async fn commit(&self, message: CommitMessage) -> anyhow::Result<AcceptRejectResponse> {
        self.check(&self.fail_commits)?;
        self.inner.commit(message).await
    }

    async fn rollback(&self, message: RollbackMessage) -> anyhow::Result<AcceptRejectResponse> {
        self.check(&self.unreachable)?;
        self.inner.rollback(message).await
    }

    async fn takeover(&self, message: TakeoverMessage) -> anyhow::Result<AcceptRejectResponse> {
        self.check(&self.unreachable)?;
        self.inner.takeover(message).await
    }
}

struct Fixture {
    _dirs: Vec<TempDir>,
    services: Vec<Arc<DynamicConfigService>>,
    endpoints: Vec<Arc<FaultyEndpoint>>,
    cluster: Cluster,
}

impl Fixture {
    fn new(count: usize) -> Self {
        let members: Vec<(String, u16)> = (1..=count)
            .map(|i| (format!("node-{i}"), 9400 + (i as u16) * 100))
            .collect();
        let member_refs: Vec<(&str, u16)> =
            members.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        let cluster = single_stripe_cluster("test-cluster", &member_refs);

        let mut dirs = Vec::new();
        let mut services = Vec::new();
        let mut endpoints = Vec::new();
        for (name, port) in &members {
            let dir = TempDir::new().unwrap();
            let service = DynamicConfigService::new(
                dir.path(),
                diagnostic_context(name, *port),
                collaborators(),
            )
            .unwrap();
            endpoints.push(FaultyEndpoint::new(service.clone()));
            services.push(service);
            dirs.push(dir);
        }
        Self {
            _dirs: dirs,
            services,
            endpoints,
            cluster,
        }
    }

    fn client(&self) -> NomadClient {
        let specs = self
            .services
            .iter()
            .zip(&self.endpoints)
            .map(|(service, endpoint)| {
                ServerSpec::new(
                    service.node_name(),
                    endpoint.clone() as Arc<dyn NomadEndpoint>,
                )
            })
            .collect();
        NomadClient::new(specs, "coordinator-host", "admin").with_timeouts(Timeouts {
            request: Duration::from_secs(2),
            retry_interval: Duration::from_millis(10),
            envelope: Duration::from_secs(10),
        })
    }

    async fn activate(&self) {
        for service in &self.services {
            service
                .prepare_activation(self.cluster.clone(), None)
                .unwrap();
        }
        let result = self
            .client()
            .run_change(NomadChange::activation(self.cluster.clone(), None))
            .await
            .unwrap();
        assert!(result.success, "{result:?}");
    }

    fn backup_dir_change(&self, node_index: usize) -> NomadChange {
        let stripe = &self.cluster.stripes[0];
        NomadChange::Setting(SettingChange::set(
            Applicability::node(stripe.uid, stripe.nodes[node_index].uid),
            Setting::NodeBackupDir,
            None,
            "/backup",
        ))
    }
}

#[tokio::test]
async fn test_fresh_activation_of_two_nodes() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    let discoveries = fixture.client().discover_all().await;
    let mut responses = Vec::new();
    for (name, result) in discoveries {
        let response = result.unwrap_or_else(|e| panic!("{name} unreachable: {e}"));
        assert_eq!(response.mode, ServerMode::Accepting);
        assert_eq!(response.current_version, 1);
        assert_eq!(response.highest_version, 1);
        responses.push(response);
    }
    // Both servers witness the same committed change (timestamps are
    // stamped per server and may differ).
    let a = responses[0].latest_change.as_ref().unwrap();
    let b = responses[1].latest_change.as_ref().unwrap();
    assert_eq!(a.change_hash, b.change_hash);
    assert_eq!(a.result_hash, b.result_hash);
    assert_eq!(a.state, b.state);
    assert_eq!(
        responses[0].mutative_message_count,
        responses[1].mutative_message_count
    );

    for service in &fixture.services {
        assert!(service.is_activated());
        assert_eq!(service.runtime_context().cluster, fixture.cluster);
        assert!(!service.is_restart_required());
    }
}

#[tokio::test]
async fn test_set_runtime_setting_applies_everywhere() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(1))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.version, 2);
    assert!(
        result
            .acks
            .iter()
            .all(|a| a.outcome == ServerOutcome::Committed)
    );

    for service in &fixture.services {
        let upcoming = service.upcoming_context();
        let node_b = upcoming.cluster.node_by_name("node-2").unwrap().1;
        assert_eq!(node_b.backup_dir, Some("/backup".into()));
        // Backup dir is runtime-applicable: no restart needed.
        assert_eq!(service.runtime_context(), upcoming);
        assert!(!service.is_restart_required());
    }
}

#[tokio::test]
async fn test_restart_required_setting_diverges_runtime_from_upcoming() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    let change = NomadChange::Setting(SettingChange::set(
        Applicability::cluster(),
        Setting::NodeLogDir,
        None,
        "/var/log/cluster",
    ));
    let result = fixture.client().run_change(change).await.unwrap();
    assert!(result.success);

    for service in &fixture.services {
        assert!(service.is_restart_required());
        let upcoming_log = service
            .upcoming_context()
            .node()
            .log_dir
            .clone();
        assert_eq!(upcoming_log, std::path::PathBuf::from("/var/log/cluster"));
        assert_ne!(service.runtime_context().node().log_dir, upcoming_log);
    }
}

#[tokio::test]
async fn test_multi_change_is_atomic_across_the_cluster() {
    let fixture = Fixture::new(2);
    fixture.activate().await;
    let stripe = &fixture.cluster.stripes[0];

    let change = NomadChange::MultiSetting {
        changes: vec![
            SettingChange::set(
                Applicability::node(stripe.uid, stripe.nodes[0].uid),
                Setting::TcProperties,
                Some("foo"),
                "bar",
            ),
            SettingChange::set(
                Applicability::cluster(),
                Setting::OffheapResources,
                Some("bar"),
                "512MB",
            ),
        ],
    };
    let result = fixture.client().run_change(change).await.unwrap();
    assert!(result.success);

    for service in &fixture.services {
        let cluster = service.upcoming_context().cluster;
        let node_a = cluster.node_by_name("node-1").unwrap().1;
        assert_eq!(node_a.tc_properties.get("foo"), Some(&"bar".to_string()));
        assert_eq!(
            cluster.offheap_resources.get("bar"),
            Some(&(512 * 1024 * 1024))
        );
    }
}

#[tokio::test]
async fn test_prepare_failure_rolls_back_accepted_servers() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    fixture.endpoints[1].fail_prepares.store(true, Ordering::SeqCst);
    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(matches!(result.failure, Some(NomadError::PrepareFailed(_))));
    let node_1 = result.acks.iter().find(|a| a.server == "node-1").unwrap();
    assert_eq!(node_1.outcome, ServerOutcome::RolledBack);
    fixture.endpoints[1].fail_prepares.store(false, Ordering::SeqCst);

    // Both servers are back to accepting with nothing half-applied.
    for (name, result) in fixture.client().discover_all().await {
        let response = result.unwrap();
        assert_eq!(response.mode, ServerMode::Accepting, "{name}");
        assert_eq!(response.current_version, 1, "{name}");
    }

    // The cluster accepts the next change even though the highest seen
    // versions diverged during the rollback.
    let retry = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await
        .unwrap();
    assert!(retry.success, "{retry:?}");
    assert_eq!(retry.version, 3);
}

#[tokio::test]
async fn test_commit_failure_surfaces_and_repair_completes_it() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    // Scenario: node-2 crashes between Prepare-ack and Commit.
    fixture.endpoints[1].fail_commits.store(true, Ordering::SeqCst);
    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(1))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(matches!(
        result.failure,
        Some(NomadError::TwoPhaseCommitFailed(_))
    ));

    // node-1 committed, node-2 is stuck prepared.
    let discoveries = fixture.client().discover_all().await;
    let states: Vec<(String, ServerMode, u64)> = discoveries
        .into_iter()
        .map(|(name, r)| {
            let r = r.unwrap();
            (name, r.mode, r.current_version)
        })
        .collect();
    assert_eq!(states[0].1, ServerMode::Accepting);
    assert_eq!(states[0].2, 2);
    assert_eq!(states[1].1, ServerMode::Prepared);
    assert_eq!(states[1].2, 1);

    // A new change is refused until the incomplete one is resolved. The
    // partial commit reads as a committed-version divergence at discovery.
    let refused = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await;
    assert!(matches!(refused, Err(NomadError::ClusterInconsistent(_))));

    // node-2 comes back; the next coordinator run commits the straggler.
    fixture.endpoints[1].fail_commits.store(false, Ordering::SeqCst);
    let repaired = fixture
        .client()
        .repair(RecoveryPolicy::Auto)
        .await
        .unwrap();
    assert!(repaired.success, "{repaired:?}");

    for (name, result) in fixture.client().discover_all().await {
        let response = result.unwrap();
        assert_eq!(response.mode, ServerMode::Accepting, "{name}");
        assert_eq!(response.current_version, 2, "{name}");
    }
    let node_b = fixture.services[1]
        .upcoming_context()
        .cluster
        .node_by_name("node-2")
        .unwrap()
        .1
        .backup_dir
        .clone();
    assert_eq!(node_b, Some("/backup".into()));
}

#[tokio::test]
async fn test_repair_rollback_policy_discards_prepared_change() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    for endpoint in &fixture.endpoints {
        endpoint.fail_commits.store(true, Ordering::SeqCst);
    }
    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(1))
        .await
        .unwrap();
    assert!(!result.success);
    for endpoint in &fixture.endpoints {
        endpoint.fail_commits.store(false, Ordering::SeqCst);
    }

    let repaired = fixture
        .client()
        .repair(RecoveryPolicy::Rollback)
        .await
        .unwrap();
    assert!(repaired.success, "{repaired:?}");
    assert!(
        repaired
            .acks
            .iter()
            .all(|a| a.outcome == ServerOutcome::RolledBack)
    );
    for (_, result) in fixture.client().discover_all().await {
        let response = result.unwrap();
        assert_eq!(response.mode, ServerMode::Accepting);
        assert_eq!(response.current_version, 1);
    }
}

#[tokio::test]
async fn test_unreachable_server_aborts_without_force() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    fixture.endpoints[1].unreachable.store(true, Ordering::SeqCst);
    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await;
    let err = result.expect_err("an unreachable server must abort the run");
    assert_eq!(err.exit_code(), 4);
    match err {
        NomadError::Unreachable { server, .. } => assert!(server.contains("node-2")),
        other => panic!("expected an unreachable error, got {other:?}"),
    }
}

/// Detaching a node runs the removal through the surviving members; the
/// detached node itself is then reset back to diagnostic mode.
#[tokio::test]
async fn test_detach_node_via_survivors_and_reset() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    let stripe = &fixture.cluster.stripes[0];
    let removal = NomadChange::NodeRemoval {
        stripe_uid: stripe.uid,
        address: "localhost:9600".parse().unwrap(),
    };
    let survivor = NomadClient::new(
        vec![ServerSpec::new(
            "node-1",
            fixture.endpoints[0].clone() as Arc<dyn NomadEndpoint>,
        )],
        "coordinator-host",
        "admin",
    );
    let result = survivor.run_change(removal).await.unwrap();
    assert!(result.success, "{result:?}");

    let upcoming = fixture.services[0].upcoming_context();
    assert_eq!(upcoming.cluster.node_count(), 1);
    assert!(upcoming.cluster.node_by_name("node-2").is_none());
    // Membership is maintained live on the survivors.
    assert!(!fixture.services[0].is_restart_required());

    // The detached node wipes its repository (keeping backups) and returns
    // to its single-node diagnostic configuration.
    fixture.services[1].reset().unwrap();
    assert!(!fixture.services[1].is_activated());
    let diagnostic = fixture.services[1].upcoming_context();
    assert_eq!(diagnostic.cluster.node_count(), 1);
    assert_eq!(diagnostic.node_name(), "node-2");
}

/// The coordinator also drives bare servers (no service wrapper) through
/// in-process endpoints, which is how repair tooling works on a stopped
/// node's repository.
#[tokio::test]
async fn test_embedded_endpoints_drive_bare_servers() {
    let cluster = single_stripe_cluster("bare", &[("node-1", 9410), ("node-2", 9510)]);
    let mut dirs = Vec::new();
    let mut repositories = Vec::new();
    let mut servers = Vec::new();
    for name in ["node-1", "node-2"] {
        let dir = TempDir::new().unwrap();
        let repository = NomadRepository::open(dir.path()).unwrap();
        let server = Arc::new(Mutex::new(NomadServer::open(&repository, name).unwrap()));
        servers.push(server);
        repositories.push(repository);
        dirs.push(dir);
    }
    let specs = ["node-1", "node-2"]
        .iter()
        .zip(&servers)
        .map(|(name, server)| {
            ServerSpec::new(
                *name,
                Arc::new(EmbeddedEndpoint::new(server.clone())) as Arc<dyn NomadEndpoint>,
            )
        })
        .collect();

    let client = NomadClient::new(specs, "coordinator-host", "admin");
    let result = client
        .run_change(NomadChange::activation(cluster.clone(), None))
        .await
        .unwrap();
    assert!(result.success, "{result:?}");

    for server in &servers {
        let server = server.lock();
        assert_eq!(server.current_version(), 1);
        assert_eq!(server.committed_cluster().unwrap(), &cluster);
    }
}

#[tokio::test]
async fn test_force_mode_skips_unreachable_servers() {
    let fixture = Fixture::new(2);
    fixture.activate().await;

    fixture.endpoints[1].unreachable.store(true, Ordering::SeqCst);
    let result = fixture
        .client()
        .with_force(true)
        .run_change(fixture.backup_dir_change(0))
        .await
        .unwrap();
    assert!(result.success, "{result:?}");
    let skipped = result.acks.iter().find(|a| a.server == "node-2").unwrap();
    assert_eq!(skipped.outcome, ServerOutcome::Skipped);

    // The skipped server diverged; a later non-forced run refuses to act.
    fixture.endpoints[1].unreachable.store(false, Ordering::SeqCst);
    let refused = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await;
    assert!(matches!(refused, Err(NomadError::ClusterInconsistent(_))));
}

#[tokio::test]
async fn test_divergent_committed_versions_detected() {
    let fixture = Fixture::new(2);
    // Activate only node-1; node-2 stays diagnostic.
    fixture.services[0]
        .prepare_activation(
            single_stripe_cluster("solo", &[("node-1", 9500)]),
            None,
        )
        .unwrap();
    let solo_cluster = single_stripe_cluster("solo", &[("node-1", 9500)]);
    let solo = NomadClient::new(
        vec![ServerSpec::new(
            "node-1",
            fixture.endpoints[0].clone() as Arc<dyn NomadEndpoint>,
        )],
        "coordinator-host",
        "admin",
    );
    let activated = solo
        .run_change(NomadChange::activation(solo_cluster, None))
        .await
        .unwrap();
    assert!(activated.success, "{activated:?}");

    let result = fixture
        .client()
        .run_change(fixture.backup_dir_change(0))
        .await;
    assert!(matches!(result, Err(NomadError::ClusterInconsistent(_))));
}

#[tokio::test]
async fn test_empty_server_list_is_invalid_input() {
    let client = NomadClient::new(Vec::new(), "h", "u");
    let result = client
        .run_change(NomadChange::activation(
            single_stripe_cluster("c", &[("node-1", 9410)]),
            None,
        ))
        .await;
    assert!(matches!(result, Err(NomadError::InvalidInput(_))));
}
