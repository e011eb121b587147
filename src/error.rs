use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("executable '{0}' not found on PATH")]
    ExecutableNotFound(String),

    #[error("daemon failed to spawn: {0}")]
    SpawnFailure(String),

    #[error("daemon process died before becoming ready")]
    ProcessDied,

    #[error("daemon did not answer readiness probes after {attempts} attempts")]
    ReadinessTimeout { attempts: u32 },

    #[error("bind mount {real} -> {mount_point} failed: {reason}")]
    MountFailure {
        real: PathBuf,
        mount_point: PathBuf,
        reason: String,
    },

    #[error("dockerd with service tag '{0}' already executing")]
    AlreadyRunning(String),

    #[error("could not terminate daemon cleanly: {0}")]
    TerminationIncomplete(String),

    #[error("socket path {path} exceeds {max} bytes even after relocation")]
    SocketPathTooLong { path: PathBuf, max: usize },

    #[error("invalid service options: {0}")]
    Config(String),

    #[error("port lease: {0}")]
    PortLease(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
