//! In-memory stand-ins for the OS capabilities, shared by unit tests.

use crate::mounts::BindMounter;
use crate::port::PortLease;
use crate::probe::ReadinessProbe;
use crate::process::{DaemonProcess, ProcessHost, Signal};
use crate::paths::ListenAddress;
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// PID of the spawned privilege wrapper.
pub const WRAPPER_PID: u32 = 100;
/// PID of the daemon the wrapper forks.
pub const WORKER_PID: u32 = 101;

struct ProcessState {
    wrapped: bool,
    installed: bool,
    spawn_error: bool,
    alive: bool,
    die_after_checks: Option<u32>,
    checks: u32,
    children: Option<Vec<u32>>,
    dies_on: Option<Signal>,
    gone: HashSet<u32>,
    signals: Vec<(u32, Signal, Instant)>,
    spawned: Vec<Vec<String>>,
}

#[derive(Clone)]
pub struct FakeProcessHost {
    state: Arc<Mutex<ProcessState>>,
}

impl FakeProcessHost {
    /// Installed dockerd that forks one worker which exits on SIGTERM.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProcessState {
                wrapped: true,
                installed: true,
                spawn_error: false,
                alive: true,
                die_after_checks: None,
                checks: 0,
                children: Some(vec![WORKER_PID]),
                dies_on: Some(Signal::Terminate),
                gone: HashSet::new(),
                signals: Vec::new(),
                spawned: Vec::new(),
            })),
        }
    }

    fn update(self, f: impl FnOnce(&mut ProcessState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// The spawned process is the daemon itself, with `WORKER_PID` as its helper child.
    pub fn unwrapped(self) -> Self {
        self.update(|s| s.wrapped = false)
    }

    pub fn not_installed(self) -> Self {
        self.update(|s| s.installed = false)
    }

    pub fn spawn_error(self) -> Self {
        self.update(|s| s.spawn_error = true)
    }

    pub fn exits_immediately(self) -> Self {
        self.update(|s| s.alive = false)
    }

    /// Liveness checks after the `n`th report the process as dead.
    pub fn dies_after_checks(self, n: u32) -> Self {
        self.update(|s| s.die_after_checks = Some(n))
    }

    /// Signal that makes a process exit; `None` means nothing does.
    pub fn dies_on(self, signal: Option<Signal>) -> Self {
        self.update(|s| s.dies_on = signal)
    }

    pub fn children_error(self) -> Self {
        self.update(|s| s.children = None)
    }

    pub fn signals(&self) -> Vec<(u32, Signal, Instant)> {
        self.state.lock().unwrap().signals.clone()
    }

    pub fn spawned(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().spawned.clone()
    }
}

struct FakeProcess {
    state: Arc<Mutex<ProcessState>>,
}

impl DaemonProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(WRAPPER_PID)
    }

    fn is_alive(&mut self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.checks += 1;
        if let Some(limit) = state.die_after_checks {
            if state.checks > limit {
                state.alive = false;
            }
        }
        state.alive
    }
}

#[async_trait]
impl ProcessHost for FakeProcessHost {
    fn spawns_wrapper(&self) -> bool {
        self.state.lock().unwrap().wrapped
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        state
            .installed
            .then(|| PathBuf::from("/usr/bin").join(program))
    }

    async fn spawn(&self, _program: &Path, args: &[String]) -> io::Result<Box<dyn DaemonProcess>> {
        let mut state = self.state.lock().unwrap();
        if state.spawn_error {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "sudo refused"));
        }
        state.spawned.push(args.to_vec());
        Ok(Box::new(FakeProcess {
            state: Arc::clone(&self.state),
        }))
    }

    async fn children(&self, _pid: u32) -> io::Result<Vec<u32>> {
        let state = self.state.lock().unwrap();
        state
            .children
            .clone()
            .ok_or_else(|| io::Error::other("ps failed"))
    }

    async fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.signals.push((pid, signal, Instant::now()));
        let dies = match state.dies_on {
            Some(Signal::Terminate) => true,
            Some(Signal::Kill) => signal == Signal::Kill,
            None => false,
        };
        if dies {
            state.gone.insert(pid);
            state.alive = false;
        }
        Ok(())
    }

    async fn exists(&self, pid: u32) -> bool {
        let state = self.state.lock().unwrap();
        if pid == WRAPPER_PID {
            state.alive
        } else {
            !state.gone.contains(&pid)
        }
    }
}

/// Probe that succeeds from the `n`th attempt on, or never.
pub struct FakeProbe {
    ready_at: Option<u32>,
    attempts: AtomicU32,
}

impl FakeProbe {
    pub fn ready_after(n: u32) -> Self {
        Self {
            ready_at: Some(n),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn never() -> Self {
        Self {
            ready_at: None,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for FakeProbe {
    async fn probe(&self, _address: &ListenAddress) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready_at.is_some_and(|n| attempt >= n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    CreateDir(PathBuf),
    Bind(PathBuf),
    Unmount(PathBuf),
    RemoveDir(PathBuf),
}

#[derive(Default)]
pub struct FakeMounter {
    calls: Mutex<Vec<MountCall>>,
    mounted: Mutex<Vec<PathBuf>>,
    fail_bind: Option<PathBuf>,
    fail_unmount: Option<PathBuf>,
}

impl FakeMounter {
    pub fn fail_bind_at(mut self, mount_point: &Path) -> Self {
        self.fail_bind = Some(mount_point.to_path_buf());
        self
    }

    pub fn fail_unmount_at(mut self, mount_point: &Path) -> Self {
        self.fail_unmount = Some(mount_point.to_path_buf());
        self
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.mounted.lock().unwrap().clone()
    }

    fn log(&self, call: MountCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BindMounter for FakeMounter {
    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.log(MountCall::CreateDir(path.to_path_buf()));
        Ok(())
    }

    async fn bind(&self, _real: &Path, mount_point: &Path) -> io::Result<()> {
        self.log(MountCall::Bind(mount_point.to_path_buf()));
        if self.fail_bind.as_deref() == Some(mount_point) {
            return Err(io::Error::other("mount: permission denied"));
        }
        self.mounted.lock().unwrap().push(mount_point.to_path_buf());
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> io::Result<()> {
        self.log(MountCall::Unmount(mount_point.to_path_buf()));
        if self.fail_unmount.as_deref() == Some(mount_point) {
            return Err(io::Error::other("umount: target is busy"));
        }
        self.mounted.lock().unwrap().retain(|p| p != mount_point);
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.log(MountCall::RemoveDir(path.to_path_buf()));
        Ok(())
    }
}

/// Lease that records the order of lock/bind operations.
#[derive(Default)]
pub struct FakeLease {
    events: Mutex<Vec<&'static str>>,
}

impl FakeLease {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl PortLease for FakeLease {
    fn address(&self) -> (String, u16) {
        ("127.0.0.1".to_string(), 2375)
    }

    async fn lock(&self) {
        self.push("lock");
    }

    fn unlock(&self) {
        self.push("unlock");
    }

    fn bind(&self) -> io::Result<()> {
        self.push("bind");
        Ok(())
    }

    fn unbind(&self) {
        self.push("unbind");
    }
}
