use std::path::PathBuf;

/// Connection address variable read by docker clients.
pub const DOCKER_HOST: &str = "DOCKER_HOST";
/// Config file override.
pub const CS_DOCKER_CONFIG: &str = "CS_DOCKER_CONFIG";
/// Home directory override for relocated exec-roots.
pub const CS_DOCKER_HOME: &str = "CS_DOCKER_HOME";

const FALLBACK_HOME: &str = "/tmp";
const CONFIG_SUBDIR: &str = "cs-docker";
const CONFIG_FILE: &str = "service.toml";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Home directory used for short bind-mount targets ($CS_DOCKER_HOME or ~)
pub fn home_dir() -> PathBuf {
    let dir = env_opt(CS_DOCKER_HOME)
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_HOME));
    tracing::trace!(dir = %dir.display(), "Resolved home directory");
    dir
}

/// Service config path ($CS_DOCKER_CONFIG or ~/.config/cs-docker/service.toml)
pub fn config_path() -> PathBuf {
    let path = env_opt(CS_DOCKER_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| home_dir().join(".config"))
                .join(CONFIG_SUBDIR)
                .join(CONFIG_FILE)
        });
    tracing::trace!(path = %path.display(), "Resolved config path");
    path
}
