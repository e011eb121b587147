//! Path resolution for a managed daemon.
//!
//! Everything the daemon is told about the filesystem is computed here, once,
//! from [`ServiceOptions`]: chroot-prefixed state directories, the listen and
//! connection addresses, and whether the exec-root has to be relocated.
//!
//! dockerd puts its containerd control socket under the exec-root. A UNIX
//! socket path longer than the platform limit cannot be bound, and a deep
//! chroot pushes the exec-root past it quickly. In that case the real exec-root
//! is bind-mounted at `~/.cs-docker/<tag>` and the daemon is pointed there, so
//! the socket path length no longer depends on the chroot depth.

use crate::error::{Result, ServiceError};
use crate::options::{HostSpec, ServiceOptions};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Longest usable UNIX socket path, in bytes.
pub const MAX_SOCKET_PATH: usize = 91;

/// Socket dockerd creates below its exec-root.
pub const CONTAINERD_SOCKET_SUFFIX: &str = "/libcontainerd/docker-containerd.sock";

/// Directory under the home directory holding relocated exec-roots.
pub const BIND_DIR: &str = ".cs-docker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketLimits {
    pub max_len: usize,
    pub suffix: String,
}

impl SocketLimits {
    pub fn new(max_len: usize, suffix: impl Into<String>) -> Self {
        Self {
            max_len,
            suffix: suffix.into(),
        }
    }

    /// Whether a socket placed under `dir` stays within the limit.
    pub fn fits(&self, dir: &Path) -> bool {
        dir.as_os_str().len() + self.suffix.len() <= self.max_len
    }
}

impl Default for SocketLimits {
    fn default() -> Self {
        Self::new(MAX_SOCKET_PATH, CONTAINERD_SOCKET_SUFFIX)
    }
}

/// Address the daemon listens on or clients connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    UnixSocket(PathBuf),
    NetworkAddress { host: String, port: u16 },
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::UnixSocket(path) => write!(f, "unix://{}", path.display()),
            ListenAddress::NetworkAddress { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

impl Serialize for ListenAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A directory exposed at a shorter path for the lifetime of one daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMountRecord {
    pub real: PathBuf,
    pub mount_point: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPaths {
    pub tag: String,
    /// Chroot-prefixed exec-root as it exists on the host
    pub exec_root: PathBuf,
    /// Exec-root handed to the daemon: `exec_root` or a bind-mount target
    pub effective_exec_root: PathBuf,
    pub graph: PathBuf,
    pub pidfile: PathBuf,
    pub listen: ListenAddress,
    /// Advertised through DOCKER_HOST
    pub connection: ListenAddress,
    pub binds: Vec<BindMountRecord>,
}

impl ResolvedPaths {
    pub fn is_relocated(&self) -> bool {
        !self.binds.is_empty()
    }
}

/// Join `path` below `chroot`, or return it unchanged without a chroot.
pub fn in_chroot(chroot: Option<&Path>, path: &Path) -> PathBuf {
    match chroot {
        Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}

/// Directory name for a tag's bind target; path separators and other odd
/// characters are flattened so the target stays one level deep.
fn bind_dir_name(tag: &str) -> String {
    tag.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct PathResolver {
    home: PathBuf,
    limits: SocketLimits,
}

impl PathResolver {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            limits: SocketLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SocketLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &SocketLimits {
        &self.limits
    }

    /// Short, tag-dependent location for a relocated exec-root.
    pub fn bind_target(&self, tag: &str) -> PathBuf {
        self.home.join(BIND_DIR).join(bind_dir_name(tag))
    }

    /// Resolve all paths for `options`.
    ///
    /// `lease_address` is the `(host, port)` of the port lease and is only
    /// consulted for network hosts.
    pub fn resolve(
        &self,
        options: &ServiceOptions,
        lease_address: Option<(String, u16)>,
    ) -> Result<ResolvedPaths> {
        let chroot = options.chroot.as_deref();
        let exec_root = in_chroot(chroot, &options.exec_root);

        let (effective_exec_root, binds) = if self.limits.fits(&exec_root) {
            (exec_root.clone(), Vec::new())
        } else {
            let target = self.bind_target(&options.tag);
            if !self.limits.fits(&target) {
                return Err(ServiceError::SocketPathTooLong {
                    path: target,
                    max: self.limits.max_len,
                });
            }
            tracing::debug!(
                real = %exec_root.display(),
                target = %target.display(),
                "Exec-root too long for control socket, relocating"
            );
            let record = BindMountRecord {
                real: exec_root.clone(),
                mount_point: target.clone(),
            };
            (target, vec![record])
        };

        let (listen, connection) = match options.host_spec() {
            HostSpec::Unix(path) => (
                ListenAddress::UnixSocket(in_chroot(chroot, &path)),
                ListenAddress::UnixSocket(path),
            ),
            HostSpec::Network => {
                let (host, port) = lease_address.ok_or_else(|| {
                    ServiceError::Config(format!(
                        "host '{}' is a network listener but no port lease was supplied",
                        options.host
                    ))
                })?;
                let address = ListenAddress::NetworkAddress { host, port };
                (address.clone(), address)
            }
        };

        Ok(ResolvedPaths {
            tag: options.tag.clone(),
            exec_root,
            effective_exec_root,
            graph: in_chroot(chroot, &options.graph),
            pidfile: in_chroot(chroot, &options.pidfile),
            listen,
            connection,
            binds,
        })
    }
}
