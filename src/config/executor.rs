use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::POSTMASTER_PID_FILE;
use crate::Error;
use crate::Result;

/// Remote session parameters. One session is opened per command.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SshConfig {
    /// ssh client binary
    #[serde(default = "default_ssh_program")]
    pub program: String,

    /// Remote login; the current user when empty
    #[serde(default)]
    pub user: String,

    /// Passed as `-o ConnectTimeout=<secs>`
    #[serde(default = "default_connect_timeout_in_secs")]
    pub connect_timeout_in_secs: u64,

    /// Passed as `-o BatchMode=yes` so a missing key fails instead of prompting
    #[serde(default = "default_batch_mode")]
    pub batch_mode: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            user: String::new(),
            connect_timeout_in_secs: default_connect_timeout_in_secs(),
            batch_mode: default_batch_mode(),
        }
    }
}

impl SshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "ssh program cannot be empty".into(),
            )));
        }
        if self.connect_timeout_in_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "connect_timeout_in_secs must be > 0".into(),
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// Shell used to interpret command lines locally
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Upper bound for a single command, after which the child is killed
    #[serde(default = "default_command_timeout_in_ms")]
    pub command_timeout_in_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            command_timeout_in_ms: default_command_timeout_in_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "shell cannot be empty".into(),
            )));
        }
        if self.command_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "command_timeout_in_ms must be > 0".into(),
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessConfig {
    /// Attempts when a pid file is being written concurrently
    #[serde(default = "default_pid_file_retries")]
    pub pid_file_retries: usize,

    /// Name of the pid file inside a segment data directory
    #[serde(default = "default_pid_file_name")]
    pub pid_file_name: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            pid_file_retries: default_pid_file_retries(),
            pid_file_name: default_pid_file_name(),
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pid_file_retries == 0 {
            return Err(Error::Config(ConfigError::Message(
                "pid_file_retries must be > 0".into(),
            )));
        }
        if self.pid_file_name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "pid_file_name cannot be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}
fn default_connect_timeout_in_secs() -> u64 {
    10
}
fn default_batch_mode() -> bool {
    true
}
fn default_shell() -> String {
    "bash".to_string()
}
fn default_command_timeout_in_ms() -> u64 {
    600_000
}
fn default_pid_file_retries() -> usize {
    5
}
fn default_pid_file_name() -> String {
    POSTMASTER_PID_FILE.to_string()
}
