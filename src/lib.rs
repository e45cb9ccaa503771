//! Orchestration core for driving and verifying high-availability
//! behaviour of a master/standby, primary/mirror database cluster.
//!
//! Every action goes through a [`RemoteExecutor`] and every check re-reads
//! the catalog through a [`CatalogClient`]; waits are bounded by a
//! [`PollPolicy`] taken from [`HarnessConfig`].

mod catalog;
mod config;
pub mod constants;
mod errors;
mod executor;
mod expansion;
mod failover;
mod poller;
mod process;
mod scenario;
mod topology;

pub use catalog::*;
pub use config::*;
pub use errors::*;
pub use executor::*;
pub use expansion::*;
pub use failover::*;
pub use poller::*;
pub use process::*;
pub use scenario::*;
pub use topology::*;

#[cfg(test)]
mod errors_test;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
