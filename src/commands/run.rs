use super::load_options;
use crate::args::TargetArgs;
use dockerd_service::teardown::StepOutcome;
use dockerd_service::{
    Capabilities, PortAllocator, PortLease, ServiceRegistry, TcpPortLease, TeardownReport,
};
use tracing::{info, warn};

pub(crate) async fn cmd_run(target: TargetArgs) -> anyhow::Result<()> {
    let options = load_options(&target)?;
    let registry = ServiceRegistry::new(Capabilities::system(options.sudo));

    let lease: Option<TcpPortLease> = if options.host_spec().is_network() {
        Some(PortAllocator::new().lease(options.interface(), options.port, options.port_range)?)
    } else {
        None
    };

    let daemon = registry
        .create(&options, lease.as_ref().map(|lease| lease as &dyn PortLease))
        .await?;

    println!("dockerd '{}' ready (PID {:?})", daemon.tag, daemon.pid);
    println!("DOCKER_HOST={}", daemon.connection);

    shutdown_signal().await?;
    info!("Shutdown requested");

    // stop-time failures are diagnostics only; the exit status reflects the start
    report_shutdown(&registry.dispose_all().await);
    Ok(())
}

/// Print every teardown report and return how many daemons did not stop cleanly.
fn report_shutdown(reports: &[(String, TeardownReport)]) -> usize {
    let mut incomplete = 0;
    for (tag, report) in reports {
        print_report(tag, report);
        if !report.is_clean() {
            warn!("dockerd '{}' shutdown was incomplete", tag);
            incomplete += 1;
        }
    }
    incomplete
}

fn print_report(tag: &str, report: &TeardownReport) {
    println!("Stopped dockerd '{}':", tag);
    for (step, outcome) in report.steps() {
        match outcome {
            StepOutcome::Done => println!("  ok      {}", step),
            StepOutcome::Failed(reason) => println!("  failed  {}: {}", step, reason),
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
