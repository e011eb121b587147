//! Lifecycle of one dockerd process.
//!
//! ```text
//! Idle -> Spawning -> Polling -> Running -> Terminating -> Stopped
//!            |           |
//!            +-----------+--> Failed
//! ```
//!
//! Every wait is a bounded loop of fixed-interval polls; there is no other
//! timeout or cancellation mechanism.

use crate::error::{Result, ServiceError};
use crate::options::ServiceOptions;
use crate::paths::{ListenAddress, ResolvedPaths};
use crate::port::{LeaseLock, PortLease};
use crate::probe::ReadinessProbe;
use crate::process::{DaemonProcess, ProcessHost, Signal};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const DOCKERD: &str = "dockerd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Spawning,
    Polling,
    Running,
    Terminating,
    Stopped,
    Failed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Spawning => "spawning",
            SupervisorState::Polling => "polling",
            SupervisorState::Running => "running",
            SupervisorState::Terminating => "terminating",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Failed => "failed",
        }
    }
}

/// Poll budgets. The defaults give 5 s for readiness, 5.5 s for a graceful
/// exit and 2.5 s more after SIGKILL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTiming {
    pub interval: Duration,
    pub readiness_attempts: u32,
    pub graceful_attempts: u32,
    pub forceful_attempts: u32,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            readiness_attempts: 50,
            graceful_attempts: 55,
            forceful_attempts: 25,
        }
    }
}

/// Program and arguments for one dockerd instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DaemonCommand {
    pub fn new(options: &ServiceOptions, paths: &ResolvedPaths) -> Self {
        let mut args = Vec::new();
        if let Some(ref bridge) = options.bridge {
            args.extend(["--bridge".to_string(), bridge.clone()]);
        }
        args.extend([
            "--exec-root".to_string(),
            paths.effective_exec_root.display().to_string(),
            "--graph".to_string(),
            paths.graph.display().to_string(),
            "--host".to_string(),
            paths.listen.to_string(),
            "--pidfile".to_string(),
            paths.pidfile.display().to_string(),
            "--storage-driver".to_string(),
            options.storage_driver.clone(),
        ]);
        if options.debug {
            args.push("--debug".to_string());
        }

        Self {
            program: DOCKERD.to_string(),
            args,
        }
    }
}

pub struct DaemonSupervisor {
    host: Arc<dyn ProcessHost>,
    probe: Arc<dyn ReadinessProbe>,
    timing: PollTiming,
    state: SupervisorState,
    process: Option<Box<dyn DaemonProcess>>,
    pid: Option<u32>,
}

impl DaemonSupervisor {
    pub fn new(host: Arc<dyn ProcessHost>, probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            host,
            probe,
            timing: PollTiming::default(),
            state: SupervisorState::Idle,
            process: None,
            pid: None,
        }
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// PID of the directly spawned process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn the daemon and wait until it answers on `listen`.
    ///
    /// With a port lease, the placeholder listener is released under the
    /// lease lock right before the spawn; the lock is dropped as soon as the
    /// spawn returns, whatever its outcome.
    pub async fn start(
        &mut self,
        command: &DaemonCommand,
        listen: &ListenAddress,
        lease: Option<&dyn PortLease>,
    ) -> Result<()> {
        if let Err(e) = self.spawn(command, lease).await {
            self.state = SupervisorState::Failed;
            return Err(e);
        }

        self.state = SupervisorState::Polling;
        match self.await_ready(listen).await {
            Ok(()) => {
                self.state = SupervisorState::Running;
                info!(pid = ?self.pid, listen = %listen, "dockerd is ready");
                Ok(())
            }
            Err(e) => {
                self.state = SupervisorState::Failed;
                Err(e)
            }
        }
    }

    async fn spawn(&mut self, command: &DaemonCommand, lease: Option<&dyn PortLease>) -> Result<()> {
        self.state = SupervisorState::Spawning;

        let program = self
            .host
            .locate(&command.program)
            .ok_or_else(|| ServiceError::ExecutableNotFound(command.program.clone()))?;
        debug!("Spawning {} {}", program.display(), command.args.join(" "));

        let spawned = {
            let _lock = match lease {
                Some(lease) => {
                    let lock = LeaseLock::acquire(lease).await;
                    lease.unbind();
                    Some(lock)
                }
                None => None,
            };
            self.host.spawn(&program, &command.args).await
        };

        let mut process = spawned.map_err(|e| ServiceError::SpawnFailure(e.to_string()))?;
        if !process.is_alive() {
            return Err(ServiceError::SpawnFailure(
                "process exited immediately".to_string(),
            ));
        }

        self.pid = process.pid();
        self.process = Some(process);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.process
            .as_mut()
            .map(|process| process.is_alive())
            .unwrap_or(false)
    }

    async fn await_ready(&mut self, listen: &ListenAddress) -> Result<()> {
        let attempts = self.timing.readiness_attempts;

        for attempt in 1..=attempts {
            if self.probe.probe(listen).await {
                if self.is_alive() {
                    debug!("dockerd answered on attempt {}/{}", attempt, attempts);
                    return Ok(());
                }
                return Err(ServiceError::ProcessDied);
            }

            trace!("dockerd not listening yet (attempt {}/{})", attempt, attempts);
            tokio::time::sleep(self.timing.interval).await;
            if !self.is_alive() {
                return Err(ServiceError::ProcessDied);
            }
        }

        Err(ServiceError::ReadinessTimeout { attempts })
    }

    /// Stop the daemon: SIGTERM its worker, then SIGKILL if it lingers.
    ///
    /// Failures are returned as [`ServiceError::TerminationIncomplete`] and
    /// logged; the supervisor ends in `Stopped` either way.
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.pid else {
            return Err(ServiceError::TerminationIncomplete(
                "dockerd service never started".to_string(),
            ));
        };

        self.state = SupervisorState::Terminating;
        let result = self.terminate_workers(pid).await;
        self.reap().await;
        self.state = SupervisorState::Stopped;

        if let Err(ref e) = result {
            error!("Couldn't terminate dockerd (PID {}) cleanly: {}", pid, e);
        }
        result
    }

    /// Best-effort cleanup after a failed start. Keeps the `Failed` state.
    pub async fn abort(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if let Err(e) = self.terminate_workers(pid).await {
            warn!("Failed start left dockerd (PID {}) behind: {}", pid, e);
        }
        self.reap().await;
    }

    /// Behind a privilege wrapper the real daemon is the wrapper's child;
    /// otherwise the spawned process is the daemon. A wrapper without
    /// children is signalled directly.
    async fn find_workers(&self, pid: u32) -> Vec<u32> {
        if !self.host.spawns_wrapper() {
            return vec![pid];
        }
        match self.host.children(pid).await {
            Ok(children) if children.is_empty() => vec![pid],
            Ok(children) => {
                if children.len() > 1 {
                    warn!("Expected one dockerd worker under PID {}, found {:?}", pid, children);
                }
                children
            }
            Err(e) => {
                warn!("Could not list children of PID {}, signalling it directly: {}", pid, e);
                vec![pid]
            }
        }
    }

    async fn terminate_workers(&mut self, pid: u32) -> Result<()> {
        let workers = self.find_workers(pid).await;
        let mut failures = Vec::new();

        for worker in workers {
            if let Err(e) = self.stop_worker(worker).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::TerminationIncomplete(failures.join("; ")))
        }
    }

    async fn stop_worker(&mut self, pid: u32) -> Result<()> {
        self.send(pid, Signal::Terminate).await?;
        if self.wait_gone(pid, self.timing.graceful_attempts).await {
            debug!("PID {} exited after SIGTERM", pid);
            return Ok(());
        }

        warn!("PID {} ignored SIGTERM, sending SIGKILL", pid);
        self.send(pid, Signal::Kill).await?;
        if self.wait_gone(pid, self.timing.forceful_attempts).await {
            debug!("PID {} exited after SIGKILL", pid);
            return Ok(());
        }

        Err(ServiceError::TerminationIncomplete(format!(
            "PID {} still present after SIGKILL",
            pid
        )))
    }

    async fn send(&mut self, pid: u32, signal: Signal) -> Result<()> {
        match self.host.signal(pid, signal).await {
            Ok(()) => Ok(()),
            // Exited on its own between discovery and the signal
            Err(_) if !self.is_present(pid).await => Ok(()),
            Err(e) => Err(ServiceError::TerminationIncomplete(format!(
                "SIG{} to PID {} failed: {}",
                signal.as_str(),
                pid,
                e
            ))),
        }
    }

    /// Our own child stays in the process table as a zombie until waited on,
    /// so its liveness comes from the child handle, which also reaps it.
    async fn is_present(&mut self, pid: u32) -> bool {
        if self.process.is_some() && self.pid == Some(pid) {
            self.is_alive()
        } else {
            self.host.exists(pid).await
        }
    }

    async fn wait_gone(&mut self, pid: u32, attempts: u32) -> bool {
        for _ in 0..attempts {
            if !self.is_present(pid).await {
                return true;
            }
            tokio::time::sleep(self.timing.interval).await;
        }
        !self.is_present(pid).await
    }

    /// Give the wrapper a moment to exit after its worker, collecting its
    /// exit status when it does.
    async fn reap(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        for _ in 0..self.timing.forceful_attempts {
            if !process.is_alive() {
                return;
            }
            tokio::time::sleep(self.timing.interval).await;
        }
        debug!("Spawned process {:?} still running after its worker stopped", process.pid());
    }
}
