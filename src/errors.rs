//! HA Orchestration Error Hierarchy
//!
//! Errors are grouped by the layer that raises them. Transport and catalog
//! reachability failures are transient and may be retried by the convergence
//! poller; everything else is fatal to the calling scenario step.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::executor::Target;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command could not be carried to its target (spawn, ssh session, timeout)
    #[error(transparent)]
    Execution(#[from] ExecutionFailed),

    /// Catalog could not be read
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Catalog content does not match the expected post-condition
    #[error(transparent)]
    StateMismatch(#[from] StateMismatchError),

    /// A poll or join exceeded its budget
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// A kill/start/probe could not be issued or returned a non-liveness code
    #[error(transparent)]
    ProcessControl(#[from] ProcessControlError),

    #[error("process id not found in {path} after {attempts} attempts")]
    PidNotFound { path: PathBuf, attempts: usize },

    /// Expansion started a higher ranked table before a lower ranked one
    #[error(transparent)]
    RankOrder(#[from] RankOrderError),

    /// Admin action ran but reported failure through its exit code
    #[error("{action} on {target} exited with {exit_code}: {stderr}")]
    ActionFailed {
        action: String,
        target: Target,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Poll stopped early after too many consecutive transient failures
    #[error("{what}: gave up after {attempts} consecutive errors")]
    PollAborted {
        what: String,
        attempts: u32,
        #[source]
        cause: Box<Error>,
    },

    #[error("invalid failover transition {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Scenario state was used before it was recorded
    #[error("scenario state error: {0}")]
    Scenario(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient errors mean "not converged yet" inside a poll.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Execution(_) | Error::Discovery(DiscoveryError::Unreachable { .. }) => true,
            Error::ProcessControl(ProcessControlError::NotIssued { source, .. }) => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to execute `{command}` on {target}: {cause}")]
pub struct ExecutionFailed {
    pub command: String,
    pub target: Target,
    pub cause: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// No instance accepted the connection (expected during failover)
    #[error("catalog at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The instance answered but the query itself failed
    #[error("catalog query on {endpoint} failed with exit code {exit_code}: {stderr}")]
    QueryFailed {
        endpoint: String,
        exit_code: i32,
        stderr: String,
    },

    /// The catalog answered with rows of an unexpected shape
    #[error("malformed catalog row {row:?}: {reason}")]
    Malformed { row: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
#[error("{check}: expected {expected}, observed {} row(s): {observed:?}", observed.len())]
pub struct StateMismatchError {
    pub check: String,
    pub expected: String,
    pub observed: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{what} did not converge within {elapsed:?} (last observed: {})", last_observed.as_deref().unwrap_or("nothing"))]
pub struct TimeoutError {
    pub what: String,
    pub elapsed: Duration,
    pub last_observed: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessControlError {
    /// The control command never reached the host
    #[error("could not issue {action} on {host}")]
    NotIssued {
        action: String,
        host: String,
        #[source]
        source: Box<Error>,
    },

    /// Probe returned an exit code that is neither "found" nor "absent"
    #[error("probe `{probe}` on {host} failed with exit code {exit_code}: {stderr}")]
    ProbeFailed {
        probe: String,
        host: String,
        exit_code: i32,
        stderr: String,
    },

    /// Signal delivery was refused for a reason other than a missing process
    #[error("{action} on {host} was rejected with exit code {exit_code}: {stderr}")]
    Rejected {
        action: String,
        host: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("no running postmaster for data directory {data_dir} on {host}")]
    NotRunning { data_dir: PathBuf, host: String },

    #[error("pid {pid} for data directory {data_dir} on {host} is still running after kill")]
    StillRunning {
        pid: u32,
        data_dir: PathBuf,
        host: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[error(
    "rank {later_rank} started expanding at {later_started} before rank {earlier_rank} ({earlier_started})"
)]
pub struct RankOrderError {
    pub earlier_rank: i32,
    pub earlier_started: String,
    pub later_rank: i32,
    pub later_started: String,
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::Scenario(format!("detached command task failed: {err}"))
    }
}
