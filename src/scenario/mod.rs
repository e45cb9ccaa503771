//! Per-scenario state.
//!
//! Steps of one scenario share a [`ScenarioContext`] instead of ambient
//! globals: segments saved for later steps, the failover plan in flight,
//! the expansion baseline and at most one background command.

#[cfg(test)]
mod scenario_test;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::Cluster;
use crate::CommandOutput;
use crate::DetachedCommand;
use crate::Error;
use crate::FailoverPlan;
use crate::HarnessConfig;
use crate::RemoteExecutor;
use crate::Result;
use crate::Segment;
use crate::SegmentSelector;
use crate::ShellCommand;
use crate::Target;

/// Length of generated scenario ids
const SCENARIO_ID_LEN: usize = 10;

#[derive(Debug)]
pub struct ScenarioContext {
    id: String,
    config: HarnessConfig,
    saved: BTreeMap<SegmentSelector, Segment>,
    failover: Option<FailoverPlan>,
    /// Data segment count recorded before an expansion
    expansion_baseline: Option<usize>,
    last_output: Option<CommandOutput>,
    detached: Option<DetachedCommand>,
}

impl ScenarioContext {
    pub fn new(config: HarnessConfig) -> Self {
        let id = nanoid::nanoid!(SCENARIO_ID_LEN);
        info!(scenario = %id, "scenario started");
        Self {
            id,
            config,
            saved: BTreeMap::new(),
            failover: None,
            expansion_baseline: None,
            last_output: None,
            detached: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Remembers the first segment of the selected kind in `cluster`.
    pub fn save_segment(
        &mut self,
        selector: SegmentSelector,
        cluster: &Cluster,
    ) -> Result<&Segment> {
        let segment = cluster.select(selector).cloned().ok_or_else(|| {
            Error::Scenario(format!("no {} segment to save", selector.role()))
        })?;
        info!(scenario = %self.id, ?selector, segment = %segment, "saved segment");
        self.saved.insert(selector, segment);
        self.saved(selector)
    }

    pub fn saved(
        &self,
        selector: SegmentSelector,
    ) -> Result<&Segment> {
        self.saved
            .get(&selector)
            .ok_or_else(|| Error::Scenario(format!("no {} segment was saved", selector.role())))
    }

    pub fn set_failover(
        &mut self,
        plan: FailoverPlan,
    ) {
        self.failover = Some(plan);
    }

    pub fn failover_mut(&mut self) -> Result<&mut FailoverPlan> {
        self.failover
            .as_mut()
            .ok_or_else(|| Error::Scenario("no failover in progress".to_string()))
    }

    pub fn take_failover(&mut self) -> Option<FailoverPlan> {
        self.failover.take()
    }

    pub fn record_expansion_baseline(
        &mut self,
        data_segments: usize,
    ) {
        self.expansion_baseline = Some(data_segments);
    }

    pub fn expansion_baseline(&self) -> Result<usize> {
        self.expansion_baseline
            .ok_or_else(|| Error::Scenario("segment count was not recorded before expansion".to_string()))
    }

    pub fn record_output(
        &mut self,
        output: CommandOutput,
    ) {
        self.last_output = Some(output);
    }

    pub fn last_output(&self) -> Option<&CommandOutput> {
        self.last_output.as_ref()
    }

    /// Starts `command` in the background. Only one may be outstanding.
    pub fn spawn_detached<E: RemoteExecutor>(
        &mut self,
        executor: Arc<E>,
        command: ShellCommand,
        target: Target,
    ) -> Result<()> {
        if let Some(running) = &self.detached {
            return Err(Error::Scenario(format!(
                "detached command `{}` is still outstanding",
                running.name()
            )));
        }
        self.detached = Some(DetachedCommand::spawn(executor, command, target));
        Ok(())
    }

    pub fn has_detached(&self) -> bool {
        self.detached.is_some()
    }

    /// Waits for the background command and checks its exit code.
    pub async fn join_detached(
        &mut self,
        expected_exit: i32,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let detached = self
            .detached
            .take()
            .ok_or_else(|| Error::Scenario("no detached command to join".to_string()))?;
        let name = detached.name().to_string();
        let target = detached.target().clone();

        let output = detached.join(timeout).await?;
        self.last_output = Some(output.clone());
        if output.exit_code != expected_exit {
            return Err(Error::ActionFailed {
                action: name,
                target,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}
