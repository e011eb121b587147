use std::io;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs helper commands either directly or through `sudo`.
///
/// Mounts, signals to a root-owned dockerd, and process-table queries all go
/// through here so the elevation decision lives in one place.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    elevate: bool,
    sudo_program: String,
}

impl CommandExecutor {
    pub fn new(elevate: bool) -> Self {
        Self {
            elevate,
            sudo_program: "sudo".to_string(),
        }
    }

    pub fn elevates(&self) -> bool {
        self.elevate
    }

    /// Build a command, wrapped in sudo when elevation is on.
    pub fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = if self.elevate {
            let mut cmd = Command::new(&self.sudo_program);
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }

    /// Run without elevation.
    pub async fn run(&self, program: &str, args: &[String]) -> io::Result<Output> {
        debug!("Running command: {} {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        debug!("Command finished with exit code: {:?}", output.status.code());
        Ok(output)
    }

    /// Run with elevation when it is enabled.
    pub async fn sudo_run(&self, program: &str, args: &[String]) -> io::Result<Output> {
        if self.elevate {
            info!("Running privileged command: {} {:?}", program, args);
        } else {
            debug!("Running command: {} {:?}", program, args);
        }
        let output = self
            .command(program, args)
            .stdin(Stdio::null())
            .output()
            .await?;
        debug!(
            "Privileged command finished with exit code: {:?}",
            output.status.code()
        );
        Ok(output)
    }

    /// Like [`sudo_run`](Self::sudo_run) but non-zero exits become errors.
    pub async fn sudo_check(&self, program: &str, args: &[String]) -> io::Result<Output> {
        let output = self.sudo_run(program, args).await?;
        check_status(program, args, output)
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Turn a failed exit status into an error carrying stderr.
pub fn check_status(program: &str, args: &[String], output: Output) -> io::Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(io::Error::other(format!(
        "{} {} failed (exit {:?}): {}",
        program,
        args.join(" "),
        output.status.code(),
        stderr.trim()
    )))
}
