// src/core/nomad/client.rs

//! The coordinator: drives a set of Nomad servers through a two-phase
//! change. Discovery, consistency checking, takeover fencing, prepare,
//! then commit (or rollback), with bounded-parallel fan-out and individual
//! request deadlines.

use crate::core::NomadError;
use crate::core::change::NomadChange;
use crate::core::nomad::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, PrepareMessage, RollbackMessage,
    ServerMode, TakeoverMessage,
};
use crate::core::nomad::endpoint::NomadEndpoint;
use futures::StreamExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PARALLELISM: usize = 8;
const COMMIT_RETRY_ATTEMPTS: u32 = 5;

/// Per-try timeout, retry interval and overall envelope: the `-t`, `-r`
/// and `-e` knobs.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub request: Duration,
    pub retry_interval: Duration,
    pub envelope: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            retry_interval: Duration::from_secs(2),
            envelope: Duration::from_secs(120),
        }
    }
}

/// How `repair` resolves an incomplete change when no server has committed
/// it yet but all hold the same prepared change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Commit when safe, roll back otherwise.
    Auto,
    Commit,
    Rollback,
}

/// One server under coordination: a display name plus its transport.
#[derive(Clone)]
pub struct ServerSpec {
    pub name: String,
    pub endpoint: Arc<dyn NomadEndpoint>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, endpoint: Arc<dyn NomadEndpoint>) -> Self {
        Self {
            name: name.into(),
            endpoint,
        }
    }
}

/// What happened on one server during a coordinator run.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOutcome {
    Committed,
    RolledBack,
    PrepareRejected(String),
    CommitRejected(String),
    RollbackRejected(String),
    Unreachable(String),
    /// Not contacted: it was unreachable at discovery and force mode let
    /// the run proceed without it.
    Skipped,
}

impl fmt::Display for ServerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerOutcome::Committed => write!(f, "committed"),
            ServerOutcome::RolledBack => write!(f, "rolled back"),
            ServerOutcome::PrepareRejected(reason) => write!(f, "prepare rejected ({reason})"),
            ServerOutcome::CommitRejected(reason) => write!(f, "commit rejected ({reason})"),
            ServerOutcome::RollbackRejected(reason) => write!(f, "rollback rejected ({reason})"),
            ServerOutcome::Unreachable(reason) => write!(f, "unreachable ({reason})"),
            ServerOutcome::Skipped => write!(f, "skipped (force)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerAck {
    pub server: String,
    pub outcome: ServerOutcome,
}

/// The aggregate result of a coordinator run. `success` means every
/// contacted server committed the same version of the same change.
#[derive(Debug)]
pub struct ChangeResult {
    pub success: bool,
    pub version: u64,
    pub acks: Vec<ServerAck>,
    pub failure: Option<NomadError>,
}

/// A server's live protocol state as tracked through one coordinator run.
struct Session {
    name: String,
    endpoint: Arc<dyn NomadEndpoint>,
    counter: u64,
    discover: DiscoverResponse,
}

pub struct NomadClient {
    servers: Vec<ServerSpec>,
    host: String,
    user: String,
    timeouts: Timeouts,
    parallelism: usize,
    force: bool,
}

impl NomadClient {
    pub fn new(servers: Vec<ServerSpec>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            servers,
            host: host.into(),
            user: user.into(),
            timeouts: Timeouts::default(),
            parallelism: DEFAULT_PARALLELISM,
            force: false,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Force mode: proceed when some servers are unreachable at discovery.
    /// The operator accepts the divergence risk.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Gathers `Discover` responses from every server, in configured order.
    pub async fn discover_all(&self) -> Vec<(String, Result<DiscoverResponse, NomadError>)> {
        let request = self.timeouts.request;
        let mut results = futures::stream::iter(self.servers.iter().enumerate().map(
            |(index, spec)| {
                let name = spec.name.clone();
                let endpoint = spec.endpoint.clone();
                async move {
                    let result = call_with_deadline(&name, request, endpoint.discover()).await;
                    (index, name, result)
                }
            },
        ))
        .buffer_unordered(self.parallelism)
        .collect::<Vec<_>>()
        .await;
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, name, result)| (name, result))
            .collect()
    }

    /// Runs a full two-phase change across the cluster.
    ///
    /// Pre-flight failures (unreachable servers, inconsistent cluster, an
    /// outstanding prepared change, a fencing conflict) abort with an error
    /// before anything is mutated. Once Prepare has been sent, the run
    /// always produces a `ChangeResult` describing every server's fate.
    pub async fn run_change(&self, change: NomadChange) -> Result<ChangeResult, NomadError> {
        let deadline = Instant::now() + self.timeouts.envelope;
        let (mut sessions, skipped) = self.discover_phase().await?;
        check_consistency(&sessions)?;
        if let Some(prepared) = sessions.iter().find(|s| s.discover.mode == ServerMode::Prepared)
        {
            return Err(NomadError::WrongMode(format!(
                "Server {} holds a prepared change at version {}; repair the incomplete change first",
                prepared.name, prepared.discover.highest_version
            )));
        }

        self.takeover_phase(&mut sessions).await?;

        let new_version = sessions
            .iter()
            .map(|s| s.discover.highest_version)
            .max()
            .unwrap_or(0)
            + 1;
        info!(
            "Coordinating change at version {}: {}.",
            new_version,
            change.summary()
        );

        let mut acks: Vec<ServerAck> = skipped
            .into_iter()
            .map(|server| ServerAck {
                server,
                outcome: ServerOutcome::Skipped,
            })
            .collect();

        match self.prepare_phase(&mut sessions, &change, new_version).await {
            PreparePhase::Accepted => {}
            PreparePhase::Failed {
                mut phase_acks,
                detail,
            } => {
                acks.append(&mut phase_acks);
                return Ok(ChangeResult {
                    success: false,
                    version: new_version,
                    acks,
                    failure: Some(NomadError::PrepareFailed(detail)),
                });
            }
        }

        let (mut commit_acks, commit_failures) =
            self.commit_phase(&mut sessions, new_version, deadline).await;
        acks.append(&mut commit_acks);

        if commit_failures.is_empty() {
            Ok(ChangeResult {
                success: true,
                version: new_version,
                acks,
                failure: None,
            })
        } else {
            let detail = format!(
                "Version {new_version} was prepared everywhere but commit did not complete on: {}",
                commit_failures.join("; ")
            );
            error!("{detail}");
            Ok(ChangeResult {
                success: false,
                version: new_version,
                acks,
                failure: Some(NomadError::TwoPhaseCommitFailed(detail)),
            })
        }
    }

    /// Resolves an incomplete change left behind by a failed run: commits it
    /// when some server already committed (or when every server holds the
    /// same prepared change and the policy allows), rolls it back otherwise.
    pub async fn repair(&self, policy: RecoveryPolicy) -> Result<ChangeResult, NomadError> {
        let (mut sessions, skipped) = self.discover_phase().await?;
        let prepared: Vec<usize> = sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.discover.mode == ServerMode::Prepared)
            .map(|(i, _)| i)
            .collect();
        if prepared.is_empty() {
            return Err(NomadError::InvalidInput(
                "No incomplete change: no server holds a prepared change".to_string(),
            ));
        }

        // The outstanding change is identified by (version, change hash) of
        // the prepared record.
        let infos: Vec<(u64, String)> = prepared
            .iter()
            .map(|&i| {
                let info = sessions[i]
                    .discover
                    .latest_change
                    .as_ref()
                    .expect("a prepared server reports its latest change");
                (info.version, info.change_hash.clone())
            })
            .collect();
        let (version, hash) = infos[0].clone();
        let uniform_prepared = infos.iter().all(|(v, h)| *v == version && *h == hash);

        let committed_elsewhere = sessions.iter().any(|s| {
            s.discover
                .latest_committed_change
                .as_ref()
                .is_some_and(|c| c.version == version && c.change_hash == hash)
        });

        let commit = if committed_elsewhere {
            info!(
                "Version {version} is already committed on part of the cluster; committing the stragglers."
            );
            true
        } else if uniform_prepared && prepared.len() == sessions.len() {
            match policy {
                RecoveryPolicy::Auto | RecoveryPolicy::Commit => true,
                RecoveryPolicy::Rollback => false,
            }
        } else if policy == RecoveryPolicy::Commit && uniform_prepared {
            true
        } else {
            false
        };

        self.takeover_phase(&mut sessions).await?;

        let mut acks: Vec<ServerAck> = skipped
            .into_iter()
            .map(|server| ServerAck {
                server,
                outcome: ServerOutcome::Skipped,
            })
            .collect();
        let mut failures = Vec::new();
        let deadline = Instant::now() + self.timeouts.envelope;

        for index in prepared {
            let session = &mut sessions[index];
            let target_version = session
                .discover
                .latest_change
                .as_ref()
                .map(|c| c.version)
                .unwrap_or(version);
            let outcome = if commit {
                self.commit_one(session, target_version, deadline).await
            } else {
                self.rollback_one(session, target_version).await
            };
            match &outcome {
                ServerOutcome::Committed | ServerOutcome::RolledBack => {}
                other => failures.push(format!("{}: {other}", session.name)),
            }
            acks.push(ServerAck {
                server: session.name.clone(),
                outcome,
            });
        }

        let success = failures.is_empty();
        let failure = if success {
            None
        } else {
            Some(NomadError::TwoPhaseCommitFailed(format!(
                "Repair did not complete on: {}",
                failures.join("; ")
            )))
        };
        Ok(ChangeResult {
            success,
            version,
            acks,
            failure,
        })
    }

    // --- Phases ---

    async fn discover_phase(&self) -> Result<(Vec<Session>, Vec<String>), NomadError> {
        if self.servers.is_empty() {
            return Err(NomadError::InvalidInput(
                "No servers to coordinate".to_string(),
            ));
        }
        let mut sessions = Vec::new();
        let mut skipped = Vec::new();
        let mut unreachable = Vec::new();

        let request = self.timeouts.request;
        let mut results = futures::stream::iter(self.servers.iter().enumerate().map(
            |(index, spec)| {
                let name = spec.name.clone();
                let endpoint = spec.endpoint.clone();
                async move {
                    let result = call_with_deadline(&name, request, endpoint.discover()).await;
                    (index, name, endpoint, result)
                }
            },
        ))
        .buffer_unordered(self.parallelism)
        .collect::<Vec<_>>()
        .await;
        // Keep the configured server order for deterministic reporting.
        results.sort_by_key(|(index, _, _, _)| *index);

        for (_, name, endpoint, result) in results {
            match result {
                Ok(discover) => {
                    debug!(
                        "Discovered {}: mode={}, v={}, h={}, m={}.",
                        name,
                        discover.mode,
                        discover.current_version,
                        discover.highest_version,
                        discover.mutative_message_count
                    );
                    sessions.push(Session {
                        name,
                        endpoint,
                        counter: discover.mutative_message_count,
                        discover,
                    });
                }
                Err(e) => {
                    if self.force {
                        warn!("Skipping unreachable server {name} (force): {e}");
                        skipped.push(name);
                    } else {
                        unreachable.push((name, e));
                    }
                }
            }
        }

        if !unreachable.is_empty() {
            let detail = unreachable
                .iter()
                .map(|(name, e)| format!("{name}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(NomadError::Unreachable {
                server: unreachable
                    .iter()
                    .map(|(name, _)| name.clone())
                    .collect::<Vec<_>>()
                    .join(", "),
                reason: detail,
            });
        }
        if sessions.is_empty() {
            return Err(NomadError::Unreachable {
                server: "all".to_string(),
                reason: "No server is reachable".to_string(),
            });
        }
        Ok((sessions, skipped))
    }

    /// Fences any previous coordinator on every server and adopts the
    /// returned counters.
    async fn takeover_phase(&self, sessions: &mut [Session]) -> Result<(), NomadError> {
        for session in sessions.iter_mut() {
            let message = TakeoverMessage {
                expected_mutative_message_count: session.counter,
                host: self.host.clone(),
                user: self.user.clone(),
            };
            let response = call_with_deadline(
                &session.name,
                self.timeouts.request,
                session.endpoint.takeover(message),
            )
            .await?;
            if !response.is_accepted() {
                return Err(NomadError::CounterMismatch {
                    expected: session.counter,
                    actual: response.current_state.mutative_message_count,
                });
            }
            session.counter = response.current_state.mutative_message_count;
        }
        Ok(())
    }

    async fn prepare_phase(
        &self,
        sessions: &mut [Session],
        change: &NomadChange,
        new_version: u64,
    ) -> PreparePhase {
        let results = self
            .fan_out_responses(sessions, |session| {
                let message = PrepareMessage {
                    expected_mutative_message_count: session.counter,
                    new_version,
                    change: change.clone(),
                };
                let endpoint = session.endpoint.clone();
                async move { endpoint.prepare(message).await }
            })
            .await;

        let mut accepted = Vec::new();
        let mut failures = Vec::new();
        let mut outcomes: Vec<(usize, ServerOutcome)> = Vec::new();
        for (index, result) in results {
            match result {
                Ok(response) if response.is_accepted() => {
                    sessions[index].counter = response.current_state.mutative_message_count;
                    accepted.push(index);
                }
                Ok(response) => {
                    let reason = response.describe_rejection();
                    warn!("Prepare rejected by {}: {}", sessions[index].name, reason);
                    failures.push(format!("{}: {reason}", sessions[index].name));
                    outcomes.push((index, ServerOutcome::PrepareRejected(reason)));
                }
                Err(e) => {
                    warn!("Prepare unreachable on {}: {}", sessions[index].name, e);
                    failures.push(format!("{}: {e}", sessions[index].name));
                    outcomes.push((index, ServerOutcome::Unreachable(e.to_string())));
                }
            }
        }

        if failures.is_empty() {
            return PreparePhase::Accepted;
        }

        // Roll the accepted servers back so the cluster converges on the
        // rejection.
        info!(
            "Prepare failed; rolling back {} server(s) that accepted version {}.",
            accepted.len(),
            new_version
        );
        for index in accepted {
            let outcome = self.rollback_one(&mut sessions[index], new_version).await;
            outcomes.push((index, outcome));
        }
        outcomes.sort_by_key(|(index, _)| *index);
        let phase_acks = outcomes
            .into_iter()
            .map(|(index, outcome)| ServerAck {
                server: sessions[index].name.clone(),
                outcome,
            })
            .collect();
        PreparePhase::Failed {
            phase_acks,
            detail: failures.join("; "),
        }
    }

    async fn commit_phase(
        &self,
        sessions: &mut [Session],
        version: u64,
        deadline: Instant,
    ) -> (Vec<ServerAck>, Vec<String>) {
        let mut acks = Vec::new();
        let mut failures = Vec::new();
        for session in sessions.iter_mut() {
            let outcome = self.commit_one(session, version, deadline).await;
            match &outcome {
                ServerOutcome::Committed => {}
                other => failures.push(format!("{}: {other}", session.name)),
            }
            acks.push(ServerAck {
                server: session.name.clone(),
                outcome,
            });
        }
        (acks, failures)
    }

    /// Commits one server, retrying transport failures with bounded
    /// exponential backoff. A rejection whose state summary shows the
    /// version already committed counts as success: the previous attempt's
    /// reply was lost, not the commit.
    async fn commit_one(
        &self,
        session: &mut Session,
        version: u64,
        deadline: Instant,
    ) -> ServerOutcome {
        let mut delay = self.timeouts.retry_interval;
        for attempt in 0..=COMMIT_RETRY_ATTEMPTS {
            let message = CommitMessage {
                expected_mutative_message_count: session.counter,
                version,
            };
            match call_with_deadline(
                &session.name,
                self.timeouts.request,
                session.endpoint.commit(message),
            )
            .await
            {
                Ok(response) if response.is_accepted() => {
                    session.counter = response.current_state.mutative_message_count;
                    return ServerOutcome::Committed;
                }
                Ok(response) => {
                    let state = response.current_state;
                    if state.current_version >= version && state.mode == ServerMode::Accepting {
                        // Lost reply: the server already holds the commit.
                        session.counter = state.mutative_message_count;
                        return ServerOutcome::Committed;
                    }
                    return ServerOutcome::CommitRejected(response.describe_rejection());
                }
                Err(e) => {
                    if attempt == COMMIT_RETRY_ATTEMPTS || Instant::now() + delay > deadline {
                        return ServerOutcome::Unreachable(e.to_string());
                    }
                    warn!(
                        "Commit attempt {}/{} on {} failed: {}. Retrying in {:?}.",
                        attempt + 1,
                        COMMIT_RETRY_ATTEMPTS,
                        session.name,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        unreachable!("commit retry loop always returns");
    }

    async fn rollback_one(&self, session: &mut Session, version: u64) -> ServerOutcome {
        let message = RollbackMessage {
            expected_mutative_message_count: session.counter,
            version,
        };
        match call_with_deadline(
            &session.name,
            self.timeouts.request,
            session.endpoint.rollback(message),
        )
        .await
        {
            Ok(response) if response.is_accepted() => {
                session.counter = response.current_state.mutative_message_count;
                ServerOutcome::RolledBack
            }
            Ok(response) => ServerOutcome::RollbackRejected(response.describe_rejection()),
            Err(e) => ServerOutcome::Unreachable(e.to_string()),
        }
    }

    // --- Fan-out plumbing ---

    async fn fan_out_responses<F, Fut>(
        &self,
        sessions: &[Session],
        make: F,
    ) -> Vec<(usize, Result<AcceptRejectResponse, NomadError>)>
    where
        F: Fn(&Session) -> Fut,
        Fut: Future<Output = anyhow::Result<AcceptRejectResponse>>,
    {
        let request = self.timeouts.request;
        let mut results = futures::stream::iter(sessions.iter().enumerate().map(
            |(index, session)| {
                let fut = make(session);
                let name = session.name.clone();
                async move { (index, call_with_deadline(&name, request, fut).await) }
            },
        ))
        .buffer_unordered(self.parallelism)
        .collect::<Vec<_>>()
        .await;
        results.sort_by_key(|(index, _)| *index);
        results
    }

}

enum PreparePhase {
    Accepted,
    Failed {
        phase_acks: Vec<ServerAck>,
        detail: String,
    },
}

/// All reachable servers must agree on the committed state: same current
/// version and, where reported, the same latest committed change down to
/// its metadata.
fn check_consistency(sessions: &[Session]) -> Result<(), NomadError> {
    let mut divergences = Vec::new();

    let versions: Vec<u64> = sessions.iter().map(|s| s.discover.current_version).collect();
    if versions.windows(2).any(|w| w[0] != w[1]) {
        for session in sessions {
            divergences.push(format!(
                "{}: v={}, h={}",
                session.name, session.discover.current_version, session.discover.highest_version
            ));
        }
        return Err(NomadError::ClusterInconsistent(format!(
            "Servers disagree on the committed version: {}",
            divergences.join("; ")
        )));
    }

    // Creation timestamps are stamped per server and legitimately differ;
    // everything else about the latest committed change must match.
    let identity = |c: &crate::core::nomad::messages::ChangeInfo| {
        (
            c.version,
            c.change_hash.clone(),
            c.result_hash.clone(),
            c.creation_host.clone(),
            c.creation_user.clone(),
        )
    };
    let mut committed = sessions
        .iter()
        .filter_map(|s| {
            s.discover
                .latest_committed_change
                .as_ref()
                .map(|c| (s.name.as_str(), c))
        })
        .peekable();
    if let Some((_, first)) = committed.peek().copied() {
        let expected = identity(first);
        for (name, info) in committed {
            if identity(info) != expected {
                return Err(NomadError::ClusterInconsistent(format!(
                    "Server {name} reports a different latest committed change ({} at version {}) than its peers ({} at version {})",
                    info.change_hash, info.version, first.change_hash, first.version
                )));
            }
        }
    }
    Ok(())
}

async fn call_with_deadline<T>(
    server: &str,
    request_timeout: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, NomadError> {
    match tokio::time::timeout(request_timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(NomadError::Unreachable {
            server: server.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(NomadError::Unreachable {
            server: server.to_string(),
            reason: format!("No response within {request_timeout:?}"),
        }),
    }
}
