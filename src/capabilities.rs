use crate::clienv;
use crate::env_guard::{Environment, ProcessEnvironment};
use crate::executor::CommandExecutor;
use crate::mounts::{BindMounter, SystemBindMounter};
use crate::paths::{PathResolver, SocketLimits};
use crate::probe::{DockerInfoProbe, ReadinessProbe};
use crate::process::{ProcessHost, SystemProcessHost};
use crate::supervisor::PollTiming;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a daemon needs from the outside world, bundled so a registry
/// can be built against the real system or against test doubles.
#[derive(Clone)]
pub struct Capabilities {
    pub processes: Arc<dyn ProcessHost>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub mounter: Arc<dyn BindMounter>,
    pub environment: Arc<dyn Environment>,
    /// Home directory holding relocated exec-roots
    pub home: PathBuf,
    pub limits: SocketLimits,
    pub timing: PollTiming,
}

impl Capabilities {
    /// Local machine, with privileged operations through sudo when `elevate` is set.
    pub fn system(elevate: bool) -> Self {
        let executor = CommandExecutor::new(elevate);
        Self {
            processes: Arc::new(SystemProcessHost::new(executor.clone())),
            probe: Arc::new(DockerInfoProbe::new()),
            mounter: Arc::new(SystemBindMounter::new(executor)),
            environment: Arc::new(ProcessEnvironment),
            home: clienv::home_dir(),
            limits: SocketLimits::default(),
            timing: PollTiming::default(),
        }
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(&self.home).with_limits(self.limits.clone())
    }
}
