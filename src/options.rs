use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const UNIX_SCHEME: &str = "unix://";

/// How the daemon is contacted, parsed once from the `host` option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSpec {
    /// Local listener at the given path (inside the chroot view)
    Unix(PathBuf),
    /// Network listener; address comes from a port lease
    Network,
}

impl HostSpec {
    pub fn parse(host: &str) -> Self {
        match host.strip_prefix(UNIX_SCHEME) {
            Some(path) => HostSpec::Unix(PathBuf::from(path)),
            None => HostSpec::Network,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, HostSpec::Network)
    }
}

/// Inclusive port range, written as `"<lower>-<upper>"` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    pub lower: u16,
    pub upper: u16,
}

impl PortRange {
    pub fn new(lower: u16, upper: u16) -> Self {
        Self { lower, upper }
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.lower..=self.upper
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(2222, 3333)
    }
}

impl TryFrom<String> for PortRange {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (lower, upper) = value
            .split_once('-')
            .ok_or_else(|| format!("port range '{}' must look like <lower>-<upper>", value))?;
        let lower: u16 = lower
            .trim()
            .parse()
            .map_err(|e| format!("bad lower port in '{}': {}", value, e))?;
        let upper: u16 = upper
            .trim()
            .parse()
            .map_err(|e| format!("bad upper port in '{}': {}", value, e))?;
        if lower > upper {
            return Err(format!("port range '{}' is empty", value));
        }
        Ok(Self { lower, upper })
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lower, self.upper)
    }
}

/// Options for one managed dockerd instance.
///
/// Keys mirror the daemon's own flag names so a section of a build file can be
/// pasted in as-is:
///
/// ```toml
/// tag = "images"
/// chroot = "/build/root"
/// host = "unix:///var/run/docker.sock"
/// storage-driver = "overlay2"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ServiceOptions {
    /// Root of the chroot the daemon serves; `None` means the host root
    pub chroot: Option<PathBuf>,
    pub exec_root: PathBuf,
    pub graph: PathBuf,
    /// `unix://<path>` for a local socket, anything else (e.g. `tcp://`) for network
    pub host: String,
    pub pidfile: PathBuf,
    pub storage_driver: String,
    /// Bridge for containers; dockerd uses docker0 when unset
    pub bridge: Option<String>,
    pub tag: String,
    pub debug: bool,
    /// Run dockerd, mounts, and signals through sudo
    pub sudo: bool,
    /// Fixed port for network listeners
    pub port: Option<u16>,
    pub port_range: PortRange,
    pub interfaces: Vec<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            chroot: None,
            exec_root: PathBuf::from("/var/run/docker"),
            graph: PathBuf::from("/var/lib/docker"),
            host: format!("{}/var/run/docker.sock", UNIX_SCHEME),
            pidfile: PathBuf::from("/var/run/docker.pid"),
            storage_driver: "devicemapper".to_string(),
            bridge: None,
            tag: "_".to_string(),
            debug: false,
            sudo: true,
            port: None,
            port_range: PortRange::default(),
            interfaces: vec!["localhost".to_string()],
        }
    }
}

impl ServiceOptions {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading service options");

        if !path.exists() {
            tracing::trace!("Options file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read options from {}", path.display()))?;

        let options: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse options from {}", path.display()))?;

        options.validate()?;
        tracing::trace!(tag = %options.tag, host = %options.host, "Service options loaded");
        Ok(options)
    }

    pub fn host_spec(&self) -> HostSpec {
        HostSpec::parse(&self.host)
    }

    /// First configured interface, used as the network listen host.
    pub fn interface(&self) -> &str {
        self.interfaces
            .first()
            .map(String::as_str)
            .unwrap_or("localhost")
    }

    pub fn validate(&self) -> Result<()> {
        if self.tag.trim().is_empty() {
            anyhow::bail!("tag must not be empty");
        }
        for (name, path) in [
            ("exec-root", &self.exec_root),
            ("graph", &self.graph),
            ("pidfile", &self.pidfile),
        ] {
            if !path.is_absolute() {
                anyhow::bail!("{} must be an absolute path: {}", name, path.display());
            }
        }
        if let HostSpec::Unix(path) = self.host_spec() {
            if !path.is_absolute() {
                anyhow::bail!("unix host must name an absolute path: {}", self.host);
            }
        }
        Ok(())
    }
}
