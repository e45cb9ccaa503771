//! Command execution on the local host or on a named remote host.
//!
//! The executor never interprets application exit codes. It fails only when
//! the command could not be carried to its target: the process could not be
//! spawned, the ssh session could not be set up, or the command outlived the
//! configured timeout.

mod admin;
mod detached;
pub use admin::*;
pub use detached::*;


use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::ExecutionFailed;
use crate::ExecutorConfig;
use crate::Result;
use crate::SshConfig;

/// ssh reserves this exit code for its own failures
const SSH_TRANSPORT_EXIT_CODE: i32 = 255;

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Local,
    Remote(String),
}

impl Target {
    pub fn remote(host: impl Into<String>) -> Self {
        Target::Remote(host.into())
    }

    pub fn host(&self) -> &str {
        match self {
            Target::Local => "localhost",
            Target::Remote(host) => host,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Remote(host) => write!(f, "{host}"),
        }
    }
}

/// A shell command line with the environment it needs spelled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Short label used in logs and errors
    pub name: String,
    pub line: String,
    pub env: Vec<(String, String)>,
    /// Script sourced before the command runs
    pub preamble: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(
        name: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            line: line.into(),
            env: Vec::new(),
            preamble: None,
        }
    }

    /// Sets `key`, replacing an earlier value for the same key
    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    pub fn sourcing(
        mut self,
        script: impl AsRef<Path>,
    ) -> Self {
        self.preamble = Some(script.as_ref().to_path_buf());
        self
    }

    /// Command line for a local shell; environment is passed to the process
    pub fn render_local(&self) -> String {
        match &self.preamble {
            Some(script) => format!(
                "source {} && {}",
                shell_quote(&script.display().to_string()),
                self.line
            ),
            None => self.line.clone(),
        }
    }

    /// Command line for a remote shell; environment is exported inline
    pub fn render_remote(&self) -> String {
        let mut parts = Vec::new();
        if let Some(script) = &self.preamble {
            parts.push(format!("source {}", shell_quote(&script.display().to_string())));
        }
        for (key, value) in &self.env {
            parts.push(format!("export {}={}", key, shell_quote(value)));
        }
        parts.push(self.line.clone());
        parts.join(" && ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync + 'static {
    /// Runs `command` on `target` and blocks until it finishes.
    async fn execute(
        &self,
        command: &ShellCommand,
        target: &Target,
    ) -> Result<CommandOutput>;
}

/// Executes through `<shell> -c` locally and through the ssh client remotely.
/// One process (and one ssh session) per call.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    ssh: SshConfig,
    settings: ExecutorConfig,
}

impl ShellExecutor {
    pub fn new(
        ssh: SshConfig,
        settings: ExecutorConfig,
    ) -> Self {
        Self { ssh, settings }
    }

    pub(crate) fn build(
        &self,
        command: &ShellCommand,
        target: &Target,
    ) -> Command {
        match target {
            Target::Local => {
                let mut cmd = Command::new(&self.settings.shell);
                cmd.arg("-c").arg(command.render_local());
                cmd.envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                cmd
            }
            Target::Remote(host) => {
                let mut cmd = Command::new(&self.ssh.program);
                cmd.args(self.ssh_args(host));
                cmd.arg(command.render_remote());
                cmd
            }
        }
    }

    pub(crate) fn ssh_args(
        &self,
        host: &str,
    ) -> Vec<String> {
        let mut args = Vec::new();
        if self.ssh.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.ssh.connect_timeout_in_secs));
        if !self.ssh.user.is_empty() {
            args.push("-l".to_string());
            args.push(self.ssh.user.clone());
        }
        args.push(host.to_string());
        args
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.command_timeout_in_ms)
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn execute(
        &self,
        command: &ShellCommand,
        target: &Target,
    ) -> Result<CommandOutput> {
        let failed = |cause: String| ExecutionFailed {
            command: command.name.clone(),
            target: target.clone(),
            cause,
        };

        let mut cmd = self.build(command, target);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %command.name, %target, line = %command.line, "execute");

        let child = cmd.spawn().map_err(|e| failed(format!("spawn failed: {e}")))?;

        let limit = self.command_timeout();
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(format!("wait failed: {e}")).into()),
            Err(_) => {
                warn!(command = %command.name, %target, "command timed out after {:?}", limit);
                return Err(failed(format!("timed out after {limit:?}")).into());
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if matches!(target, Target::Remote(_)) && result.exit_code == SSH_TRANSPORT_EXIT_CODE {
            return Err(failed(result.stderr.trim().to_string()).into());
        }

        debug!(command = %command.name, %target, exit_code = result.exit_code, "finished");
        Ok(result)
    }
}

/// Single-quotes `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
