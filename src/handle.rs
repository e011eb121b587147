use crate::capabilities::Capabilities;
use crate::clienv::DOCKER_HOST;
use crate::env_guard::EnvironmentGuard;
use crate::error::Result;
use crate::mounts::MountManager;
use crate::options::ServiceOptions;
use crate::paths::ResolvedPaths;
use crate::port::PortLease;
use crate::supervisor::{DaemonCommand, DaemonSupervisor, SupervisorState};
use crate::teardown::{TeardownReport, TeardownStep};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Snapshot of a running daemon, safe to hand out of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonInfo {
    pub tag: String,
    pub pid: Option<u32>,
    pub state: &'static str,
    pub listen: String,
    pub connection: String,
    pub exec_root: PathBuf,
    pub relocated: bool,
    pub uptime_secs: u64,
}

/// One running dockerd and every side effect it was started with.
pub struct DaemonHandle {
    paths: ResolvedPaths,
    supervisor: DaemonSupervisor,
    mounts: MountManager,
    env_guard: EnvironmentGuard,
    started_at: Instant,
}

impl DaemonHandle {
    /// Resolve paths, apply binds, spawn and wait for readiness, then point
    /// DOCKER_HOST at the daemon.
    ///
    /// A failed start leaves no binds and no daemon behind.
    pub async fn start(
        options: &ServiceOptions,
        caps: &Capabilities,
        lease: Option<&dyn PortLease>,
    ) -> Result<Self> {
        let paths = caps
            .resolver()
            .resolve(options, lease.map(|lease| lease.address()))?;
        let command = DaemonCommand::new(options, &paths);

        let mounts = MountManager::new(caps.mounter.clone());
        mounts.apply(&paths.binds).await?;

        let mut supervisor = DaemonSupervisor::new(caps.processes.clone(), caps.probe.clone())
            .with_timing(caps.timing.clone());

        if let Err(e) = supervisor.start(&command, &paths.listen, lease).await {
            error!(tag = %paths.tag, "dockerd failed to start: {}", e);
            supervisor.abort().await;
            let report = mounts.reverse(&paths.binds).await;
            if !report.is_clean() {
                warn!(tag = %paths.tag, "Cleanup after failed start was incomplete");
            }
            return Err(e);
        }

        let mut env_guard = EnvironmentGuard::new(caps.environment.clone(), DOCKER_HOST);
        env_guard.apply(&paths.connection.to_string());

        info!(
            tag = %paths.tag,
            pid = ?supervisor.pid(),
            connection = %paths.connection,
            "dockerd service started"
        );

        Ok(Self {
            paths,
            supervisor,
            mounts,
            env_guard,
            started_at: Instant::now(),
        })
    }

    pub fn tag(&self) -> &str {
        &self.paths.tag
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn info(&self) -> DaemonInfo {
        DaemonInfo {
            tag: self.paths.tag.clone(),
            pid: self.supervisor.pid(),
            state: self.supervisor.state().as_str(),
            listen: self.paths.listen.to_string(),
            connection: self.paths.connection.to_string(),
            exec_root: self.paths.effective_exec_root.clone(),
            relocated: self.paths.is_relocated(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Terminate the daemon, reverse binds, restore DOCKER_HOST, in that
    /// order. Every step runs whatever happened before it.
    pub async fn stop(mut self) -> TeardownReport {
        let mut report = TeardownReport::new();

        report.record(TeardownStep::Terminate, self.supervisor.terminate().await);
        report.merge(self.mounts.reverse(&self.paths.binds).await);

        self.env_guard.restore();
        report.done(TeardownStep::RestoreEnvironment);

        report
    }
}
