pub(crate) mod paths;
pub(crate) mod run;

use crate::args::TargetArgs;
use dockerd_service::clienv;
use dockerd_service::ServiceOptions;

/// Options file plus command-line overrides.
pub(crate) fn load_options(target: &TargetArgs) -> anyhow::Result<ServiceOptions> {
    let path = target.config.clone().unwrap_or_else(clienv::config_path);
    let mut options = ServiceOptions::load(&path)?;

    if let Some(ref tag) = target.tag {
        options.tag = tag.clone();
    }
    if let Some(ref chroot) = target.chroot {
        options.chroot = Some(chroot.clone());
    }
    options.validate()?;

    Ok(options)
}
