use super::load_options;
use crate::args::TargetArgs;
use anyhow::Context;
use dockerd_service::{clienv, PathResolver};

pub(crate) fn cmd_paths(target: TargetArgs) -> anyhow::Result<()> {
    let options = load_options(&target)?;

    // network hosts get a placeholder address; no port is leased here
    let lease_address = options
        .host_spec()
        .is_network()
        .then(|| (options.interface().to_string(), options.port.unwrap_or(0)));

    let paths = PathResolver::new(clienv::home_dir()).resolve(&options, lease_address)?;
    let json = serde_json::to_string_pretty(&paths).context("Failed to serialize paths")?;
    println!("{}", json);

    Ok(())
}
