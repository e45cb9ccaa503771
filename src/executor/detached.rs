use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::info;
use tracing::warn;

use super::CommandOutput;
use super::RemoteExecutor;
use super::ShellCommand;
use super::Target;
use crate::Result;
use crate::TimeoutError;

/// A long-running command started in the background and joined later.
pub struct DetachedCommand {
    name: String,
    target: Target,
    handle: JoinHandle<Result<CommandOutput>>,
}

impl DetachedCommand {
    pub fn spawn<E: RemoteExecutor>(
        executor: Arc<E>,
        command: ShellCommand,
        target: Target,
    ) -> Self {
        info!(command = %command.name, %target, "starting detached command");
        let name = command.name.clone();
        let task_target = target.clone();
        let handle =
            tokio::spawn(async move { executor.execute(&command, &task_target).await });
        Self {
            name,
            target,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits up to `limit` for the command; the task is aborted on timeout.
    pub async fn join(
        mut self,
        limit: Duration,
    ) -> Result<CommandOutput> {
        match timeout(limit, &mut self.handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(command = %self.name, target = %self.target, "detached command still running after {:?}", limit);
                self.handle.abort();
                Err(TimeoutError {
                    what: format!("detached command `{}` on {}", self.name, self.target),
                    elapsed: limit,
                    last_observed: Some("still running".to_string()),
                }
                .into())
            }
        }
    }
}

impl std::fmt::Debug for DetachedCommand {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DetachedCommand")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
