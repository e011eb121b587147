pub mod capabilities;
pub mod clienv;
pub mod env_guard;
pub mod error;
pub mod executor;
pub mod handle;
pub mod mounts;
pub mod options;
pub mod paths;
pub mod port;
pub mod probe;
pub mod process;
pub mod registry;
pub mod supervisor;
pub mod teardown;

#[cfg(test)]
mod testing;

pub use capabilities::Capabilities;
pub use error::{Result, ServiceError};
pub use handle::{DaemonHandle, DaemonInfo};
pub use options::ServiceOptions;
pub use paths::{ListenAddress, PathResolver, ResolvedPaths};
pub use port::{PortAllocator, PortLease, TcpPortLease};
pub use registry::ServiceRegistry;
pub use teardown::{TeardownReport, TeardownStep};
