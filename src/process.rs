use crate::executor::{check_status, CommandExecutor};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Child;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Terminate => "TERM",
            Signal::Kill => "KILL",
        }
    }

    #[cfg(unix)]
    fn raw(&self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// A spawned daemon process (possibly a privilege wrapper around it).
pub trait DaemonProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Whether the spawned process has not exited yet.
    fn is_alive(&mut self) -> bool;
}

/// OS process primitives used by the supervisor.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Whether `spawn` starts a privilege wrapper whose child is the daemon.
    fn spawns_wrapper(&self) -> bool;

    /// Find `program` on the search path.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    async fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn DaemonProcess>>;

    /// Direct children of `pid`.
    async fn children(&self, pid: u32) -> io::Result<Vec<u32>>;

    async fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// Whether `pid` is still in the process table.
    async fn exists(&self, pid: u32) -> bool;
}

struct ChildProcess {
    child: Child,
}

impl DaemonProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// [`ProcessHost`] for the local machine. dockerd and the signals sent to it
/// go through the executor so they work when the daemon runs as root.
pub struct SystemProcessHost {
    executor: CommandExecutor,
}

impl SystemProcessHost {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

fn parse_pids(stdout: &[u8]) -> Vec<u32> {
    String::from_utf8_lossy(stdout)
        .split_whitespace()
        .filter_map(|pid| pid.parse().ok())
        .collect()
}

#[async_trait]
impl ProcessHost for SystemProcessHost {
    fn spawns_wrapper(&self) -> bool {
        self.executor.elevates()
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        let found = which::which(program).ok();
        trace!(program = %program, found = ?found, "Located executable");
        found
    }

    async fn spawn(&self, program: &Path, args: &[String]) -> io::Result<Box<dyn DaemonProcess>> {
        let program = program.display().to_string();
        let mut cmd = self.executor.command(&program, args);
        cmd.stdin(Stdio::null()).kill_on_drop(false);

        let child = cmd.spawn()?;
        debug!("Spawned {} with PID {:?}", program, child.id());
        Ok(Box::new(ChildProcess { child }))
    }

    async fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
        let args = [
            "-o".to_string(),
            "pid".to_string(),
            "--ppid".to_string(),
            pid.to_string(),
            "--no-headers".to_string(),
        ];
        let output = self.executor.run("ps", &args).await?;
        // ps exits 1 when nothing matched
        if output.status.code() == Some(1) && output.stdout.is_empty() {
            return Ok(Vec::new());
        }
        let output = check_status("ps", &args, output)?;
        Ok(parse_pids(&output.stdout))
    }

    async fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        debug!("Sending SIG{} to PID {}", signal.as_str(), pid);

        #[cfg(unix)]
        if !self.executor.elevates() {
            let rc = unsafe { libc::kill(pid as libc::pid_t, signal.raw()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            return Ok(());
        }

        self.executor
            .sudo_check(
                "kill",
                &["-s".to_string(), signal.as_str().to_string(), pid.to_string()],
            )
            .await
            .map(|_| ())
    }

    async fn exists(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            // EPERM: alive but owned by someone else (root dockerd)
            let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
            rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        }

        #[cfg(not(unix))]
        {
            self.executor
                .run("ps", &["-p".to_string(), pid.to_string()])
                .await
                .map(|output| output.status.success())
                .unwrap_or(false)
        }
    }
}
