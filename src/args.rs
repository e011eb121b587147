use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dockerd-service")]
#[command(version)]
#[command(about = "Run a dockerd instance for a build session", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start dockerd, wait for Ctrl+C or SIGTERM, then stop it
    Run {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the resolved paths and bind decision as JSON
    Paths {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Args)]
pub(crate) struct TargetArgs {
    /// Options file (default: $CS_DOCKER_CONFIG or ~/.config/cs-docker/service.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service tag, overriding the options file
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Chroot the daemon serves, overriding the options file
    #[arg(long)]
    pub chroot: Option<PathBuf>,
}
