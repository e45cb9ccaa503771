//! Process lifecycle control on cluster hosts: signal delivery, liveness
//! probes, pid file reads and postmaster kills.


use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::PID_FILE_RETRY_STEP_MS;
use crate::constants::POSTMASTER_PROCESS_NAME;
use crate::poll_until;
use crate::shell_quote;
use crate::Cluster;
use crate::CommandOutput;
use crate::Error;
use crate::PollPolicy;
use crate::ProcessConfig;
use crate::ProcessControlError;
use crate::RemoteExecutor;
use crate::Result;
use crate::Segment;
use crate::ShellCommand;
use crate::Target;
use crate::Verdict;

/// pgrep: at least one process matched
const PGREP_FOUND: i32 = 0;
/// pgrep: nothing matched
const PGREP_NOT_FOUND: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Existence probe, nothing is delivered
    Zero,
    Hup,
    Int,
    Kill,
    Term,
    Stop,
    Cont,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Zero => "0",
            Signal::Hup => "HUP",
            Signal::Int => "INT",
            Signal::Kill => "KILL",
            Signal::Term => "TERM",
            Signal::Stop => "STOP",
            Signal::Cont => "CONT",
        }
    }

    fn kill_args(&self) -> String {
        match self {
            Signal::Zero => "-0".to_string(),
            other => format!("-s {}", other.name()),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Delivered,
    /// The pid was already gone
    NoSuchProcess,
}

pub struct ProcessController<E: RemoteExecutor> {
    executor: Arc<E>,
    policy: PollPolicy,
    settings: ProcessConfig,
}

impl<E: RemoteExecutor> ProcessController<E> {
    pub fn new(
        executor: Arc<E>,
        policy: PollPolicy,
        settings: ProcessConfig,
    ) -> Self {
        Self {
            executor,
            policy,
            settings,
        }
    }

    /// Runs a control command; a transport failure means it was never issued.
    async fn issue(
        &self,
        action: &str,
        line: String,
        target: &Target,
    ) -> Result<CommandOutput> {
        let command = ShellCommand::new(action, line);
        self.executor.execute(&command, target).await.map_err(|e| {
            ProcessControlError::NotIssued {
                action: action.to_string(),
                host: target.host().to_string(),
                source: Box::new(e),
            }
            .into()
        })
    }

    /// Sends `signal` to `pid` on `target`.
    pub async fn kill(
        &self,
        pid: u32,
        target: &Target,
        signal: Signal,
    ) -> Result<KillOutcome> {
        let action = format!("kill {signal} {pid}");
        let output = self
            .issue(&action, format!("kill {} {}", signal.kill_args(), pid), target)
            .await?;

        if output.success() {
            debug!(pid, %target, %signal, "signal delivered");
            return Ok(KillOutcome::Delivered);
        }
        if output.stderr.contains("No such process") {
            debug!(pid, %target, "process already gone");
            return Ok(KillOutcome::NoSuchProcess);
        }
        Err(ProcessControlError::Rejected {
            action,
            host: target.host().to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }
        .into())
    }

    /// `kill -0` probe. A permission error still proves the process exists.
    pub async fn is_alive(
        &self,
        pid: u32,
        target: &Target,
    ) -> Result<bool> {
        let output = self
            .issue("kill -0", format!("kill -0 {pid}"), target)
            .await?;
        if output.success() {
            return Ok(true);
        }
        Ok(output.stderr.contains("not permitted"))
    }

    /// Polls until `pid` is gone.
    pub async fn wait_for_down(
        &self,
        pid: u32,
        target: &Target,
        timeout: Duration,
    ) -> Result<()> {
        let policy = self.policy.with_timeout(timeout);
        let what = format!("pid {pid} on {target} exits");
        poll_until(&what, &policy, || async move {
            if self.is_alive(pid, target).await? {
                Ok(Verdict::Pending(format!("pid {pid} still running")))
            } else {
                Ok(Verdict::Satisfied(()))
            }
        })
        .await
    }

    /// pgrep exit status; codes other than found/absent are fatal
    async fn pgrep(
        &self,
        name: &str,
        target: &Target,
    ) -> Result<bool> {
        let probe = format!("pgrep {name}");
        let output = self
            .issue(&probe, format!("pgrep {}", shell_quote(name)), target)
            .await?;
        match output.exit_code {
            PGREP_FOUND => Ok(true),
            PGREP_NOT_FOUND => Ok(false),
            exit_code => Err(ProcessControlError::ProbeFailed {
                probe,
                host: target.host().to_string(),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into()),
        }
    }

    /// Polls until a process named `name` is running on `target`.
    pub async fn wait_for_up(
        &self,
        name: &str,
        target: &Target,
        timeout: Duration,
    ) -> Result<()> {
        let policy = self.policy.with_timeout(timeout);
        let what = format!("{name} running on {target}");
        poll_until(&what, &policy, || async move {
            if self.pgrep(name, target).await? {
                Ok(Verdict::Satisfied(()))
            } else {
                Ok(Verdict::Pending(format!("no {name} process")))
            }
        })
        .await?;
        info!(name, %target, "process is up");
        Ok(())
    }

    /// Polls until no process named `name` is running on `target`.
    pub async fn wait_for_exit(
        &self,
        name: &str,
        target: &Target,
        timeout: Duration,
    ) -> Result<()> {
        let policy = self.policy.with_timeout(timeout);
        let what = format!("{name} gone from {target}");
        poll_until(&what, &policy, || async move {
            if self.pgrep(name, target).await? {
                Ok(Verdict::Pending(format!("{name} still running")))
            } else {
                Ok(Verdict::Satisfied(()))
            }
        })
        .await?;
        info!(name, %target, "process is down");
        Ok(())
    }

    /// Reads the first line of a local pid file.
    ///
    /// The file may be mid-write, so an absent or empty first line is retried
    /// with a linear backoff of `attempt * 100ms`.
    pub async fn read_pid_file(
        &self,
        path: &Path,
        retries: usize,
    ) -> Result<u32> {
        for attempt in 1..=retries {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                if let Some(pid) = parse_pid(&content) {
                    return Ok(pid);
                }
            }
            debug!(path = %path.display(), attempt, "pid file not readable yet");
            if attempt < retries {
                sleep(Duration::from_millis(PID_FILE_RETRY_STEP_MS * attempt as u64)).await;
            }
        }
        Err(Error::PidNotFound {
            path: path.to_path_buf(),
            attempts: retries,
        })
    }

    /// Postmaster pid of `segment`, when that process is alive.
    pub async fn segment_pid(
        &self,
        segment: &Segment,
    ) -> Result<Option<u32>> {
        let target = Target::remote(&segment.host);
        let pid_file = segment.data_dir.join(&self.settings.pid_file_name);
        let output = self
            .issue(
                "read pid file",
                format!("head -1 {}", shell_quote(&pid_file.display().to_string())),
                &target,
            )
            .await?;

        let pid = match output.success().then(|| parse_pid(&output.stdout)).flatten() {
            Some(pid) => pid,
            None => return Ok(None),
        };
        if self.is_alive(pid, &target).await? {
            Ok(Some(pid))
        } else {
            debug!(pid, segment = %segment, "stale pid file");
            Ok(None)
        }
    }

    /// SIGKILLs the postmaster of `segment` and waits until it is gone.
    pub async fn kill_segment(
        &self,
        segment: &Segment,
        timeout: Duration,
    ) -> Result<u32> {
        let target = Target::remote(&segment.host);
        let pid = self.segment_pid(segment).await?.ok_or_else(|| {
            ProcessControlError::NotRunning {
                data_dir: segment.data_dir.clone(),
                host: segment.host.clone(),
            }
        })?;

        info!(pid, segment = %segment, "killing postmaster");
        self.kill(pid, &target, Signal::Kill).await?;

        if let Err(e) = self.wait_for_down(pid, &target, timeout).await {
            warn!(pid, segment = %segment, "postmaster survived kill: {}", e);
            return Err(match e {
                Error::Timeout(_) => ProcessControlError::StillRunning {
                    pid,
                    data_dir: segment.data_dir.clone(),
                    host: segment.host.clone(),
                }
                .into(),
                other => other,
            });
        }

        // a restarted postmaster under a new pid counts as a failed kill
        if let Some(live) = self.segment_pid(segment).await? {
            warn!(pid, live, segment = %segment, "postmaster is running again");
            return Err(ProcessControlError::StillRunning {
                pid: live,
                data_dir: segment.data_dir.clone(),
                host: segment.host.clone(),
            }
            .into());
        }
        Ok(pid)
    }

    /// Kills the postmaster of every primary in `cluster`, in dbid order.
    ///
    /// Stops at the first primary that has no running postmaster or
    /// survives the kill.
    pub async fn kill_all_primaries(
        &self,
        cluster: &Cluster,
        timeout: Duration,
    ) -> Result<Vec<u32>> {
        let mut pids = Vec::new();
        for primary in cluster.primaries() {
            pids.push(self.kill_segment(primary, timeout).await?);
        }
        info!(killed = pids.len(), "all primaries killed");
        Ok(pids)
    }

    /// `pkill postgres` on each host. Hosts with nothing running are fine.
    pub async fn kill_database_on_hosts(
        &self,
        hosts: &[String],
    ) -> Result<()> {
        let action = format!("pkill {POSTMASTER_PROCESS_NAME}");
        for host in hosts {
            let target = Target::remote(host);
            let output = self
                .issue(&action, format!("{action} || true"), &target)
                .await?;
            if !output.success() {
                return Err(ProcessControlError::Rejected {
                    action,
                    host: host.clone(),
                    exit_code: output.exit_code,
                    stderr: output.stderr.trim().to_string(),
                }
                .into());
            }
            info!(%target, "database processes killed");
        }
        Ok(())
    }

    /// The configured pid file attempt count
    pub fn pid_file_retries(&self) -> usize {
        self.settings.pid_file_retries
    }
}

fn parse_pid(content: &str) -> Option<u32> {
    content.lines().next()?.trim().parse().ok()
}
