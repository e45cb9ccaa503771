use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::info;
use tracing::warn;

use super::shell_quote;
use super::CommandOutput;
use super::RemoteExecutor;
use super::ShellCommand;
use super::Target;
use crate::ClusterConfig;
use crate::Error;
use crate::Result;
use crate::Segment;

/// Environment script shipped with the installation
const GREENPLUM_PATH_SCRIPT: &str = "greenplum_path.sh";

/// How long a redistribution may run before it stops on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedistributeBound {
    Unbounded,
    /// Stop at this wall clock time
    EndTime(NaiveDateTime),
    /// Stop after this much time
    Duration(Duration),
}

impl RedistributeBound {
    fn args(&self) -> Option<String> {
        match self {
            RedistributeBound::Unbounded => None,
            RedistributeBound::EndTime(end) => {
                Some(format!("-e '{}'", end.format("%Y-%m-%d %H:%M:%S")))
            }
            RedistributeBound::Duration(d) => {
                let secs = d.as_secs();
                Some(format!(
                    "-d {:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs % 3600) / 60,
                    secs % 60
                ))
            }
        }
    }
}

/// Named administrative actions. The harness only triggers them and reads
/// their exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    InitStandby {
        host: String,
        port: u16,
        data_dir: PathBuf,
    },
    RemoveStandby,
    ActivateStandby {
        data_dir: PathBuf,
        port: u16,
    },
    /// Immediate shutdown of a single instance
    StopInstance {
        data_dir: PathBuf,
    },
    /// Deletes an instance data directory so it can be re-initialized
    RemoveDataDir {
        data_dir: PathBuf,
    },
    ExpandInitialize {
        inputfile: PathBuf,
        database: String,
    },
    Redistribute {
        database: String,
        bound: RedistributeBound,
    },
}

impl AdminAction {
    pub fn name(&self) -> &'static str {
        match self {
            AdminAction::InitStandby { .. } => "init-standby",
            AdminAction::RemoveStandby => "remove-standby",
            AdminAction::ActivateStandby { .. } => "activate-standby",
            AdminAction::StopInstance { .. } => "stop-instance",
            AdminAction::RemoveDataDir { .. } => "remove-data-dir",
            AdminAction::ExpandInitialize { .. } => "expand-initialize",
            AdminAction::Redistribute { .. } => "redistribute",
        }
    }
}

/// Renders admin actions against one cluster's layout and runs them.
pub struct AdminActions<E: RemoteExecutor> {
    executor: Arc<E>,
    cluster: ClusterConfig,
}

impl<E: RemoteExecutor> AdminActions<E> {
    pub fn new(
        executor: Arc<E>,
        cluster: ClusterConfig,
    ) -> Self {
        Self { executor, cluster }
    }

    pub fn executor(&self) -> Arc<E> {
        self.executor.clone()
    }

    /// Same actions, with the utility environment pointed at `master`
    /// instead of the configured master.
    pub fn for_master(
        &self,
        master: &Segment,
    ) -> Self {
        let mut cluster = self.cluster.clone();
        cluster.master_host = master.host.clone();
        cluster.master_port = master.port;
        cluster.master_data_dir = master.data_dir.clone();
        Self {
            executor: self.executor.clone(),
            cluster,
        }
    }

    pub fn command(
        &self,
        action: &AdminAction,
    ) -> ShellCommand {
        let line = match action {
            AdminAction::InitStandby {
                host,
                port,
                data_dir,
            } => format!(
                "gpinitstandby -a -s {} -P {} -F {}",
                host,
                port,
                shell_quote(&data_dir.display().to_string())
            ),
            AdminAction::RemoveStandby => "gpinitstandby -ra".to_string(),
            AdminAction::ActivateStandby { data_dir, .. } => format!(
                "gpactivatestandby -a -d {}",
                shell_quote(&data_dir.display().to_string())
            ),
            AdminAction::StopInstance { data_dir } => format!(
                "pg_ctl stop -m immediate -D {}",
                shell_quote(&data_dir.display().to_string())
            ),
            AdminAction::RemoveDataDir { data_dir } => {
                format!("rm -rf {}", shell_quote(&data_dir.display().to_string()))
            }
            AdminAction::ExpandInitialize {
                inputfile,
                database,
            } => format!(
                "gpexpand -D {} -i {}",
                shell_quote(database),
                shell_quote(&inputfile.display().to_string())
            ),
            AdminAction::Redistribute { database, bound } => match bound.args() {
                Some(args) => format!("gpexpand -D {} {}", shell_quote(database), args),
                None => format!("gpexpand -D {}", shell_quote(database)),
            },
        };

        let mut command = ShellCommand::new(action.name(), line)
            .with_env(
                "MASTER_DATA_DIRECTORY",
                self.cluster.master_data_dir.display().to_string(),
            )
            .with_env("PGPORT", self.cluster.master_port.to_string());

        if let AdminAction::ActivateStandby { data_dir, port } = action {
            command = command
                .with_env("MASTER_DATA_DIRECTORY", data_dir.display().to_string())
                .with_env("PGPORT", port.to_string());
        }

        if !self.cluster.gphome.as_os_str().is_empty() {
            command = command.sourcing(self.cluster.gphome.join(GREENPLUM_PATH_SCRIPT));
        }
        command
    }

    /// Runs `action` on `target`. A nonzero exit is reported as `ActionFailed`.
    pub async fn run(
        &self,
        action: &AdminAction,
        target: &Target,
    ) -> Result<CommandOutput> {
        let command = self.command(action);
        info!(action = action.name(), %target, "running admin action");

        let output = self.executor.execute(&command, target).await?;
        if !output.success() {
            warn!(
                action = action.name(),
                %target,
                exit_code = output.exit_code,
                "admin action failed: {}",
                output.stderr.trim()
            );
            return Err(Error::ActionFailed {
                action: action.name().to_string(),
                target: target.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}
