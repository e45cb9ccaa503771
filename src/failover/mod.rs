//! Master/standby failover.
//!
//! A [`FailoverPlan`] walks a fixed sequence of phases. Each orchestrator
//! step checks the transition before issuing any action, so an out-of-order
//! call fails with `InvalidTransition` and touches nothing.

mod orchestrator;
pub use orchestrator::*;


use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::Error;
use crate::Result;
use crate::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    NotInitialized,
    Initializing,
    /// Standby registered, replication stream not yet reported
    Syncing,
    InSync,
    MasterDown,
    Activating,
    NewMaster,
    /// The original master took its role back
    Reverted,
}

impl FailoverPhase {
    pub fn name(&self) -> &'static str {
        match self {
            FailoverPhase::NotInitialized => "NotInitialized",
            FailoverPhase::Initializing => "Initializing",
            FailoverPhase::Syncing => "Syncing",
            FailoverPhase::InSync => "InSync",
            FailoverPhase::MasterDown => "MasterDown",
            FailoverPhase::Activating => "Activating",
            FailoverPhase::NewMaster => "NewMaster",
            FailoverPhase::Reverted => "Reverted",
        }
    }

    pub fn can_advance_to(
        &self,
        next: FailoverPhase,
    ) -> bool {
        use FailoverPhase::*;
        matches!(
            (self, next),
            (NotInitialized, Initializing)
                | (Initializing, Syncing)
                | (Initializing, InSync)
                | (Syncing, InSync)
                | (InSync, MasterDown)
                | (MasterDown, Activating)
                | (Activating, NewMaster)
                | (NewMaster, Reverted)
        )
    }
}

impl fmt::Display for FailoverPhase {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the standby is to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbyTarget {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FailoverPlan {
    /// Master at the time the plan was made
    pub source: Segment,
    pub standby: Option<StandbyTarget>,
    /// Catalog entry of the standby once registered, then of the new master
    pub target: Option<Segment>,
    phase: FailoverPhase,
}

impl FailoverPlan {
    pub fn new(source: Segment) -> Self {
        Self {
            source,
            standby: None,
            target: None,
            phase: FailoverPhase::NotInitialized,
        }
    }

    pub fn phase(&self) -> FailoverPhase {
        self.phase
    }

    /// Fails without changing the phase if `next` is not a legal successor.
    pub fn check(
        &self,
        next: FailoverPhase,
    ) -> Result<()> {
        if self.phase.can_advance_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.phase.name(),
                to: next.name(),
            })
        }
    }

    pub fn advance(
        &mut self,
        next: FailoverPhase,
    ) -> Result<()> {
        self.check(next)?;
        info!(from = %self.phase, to = %next, "failover phase");
        self.phase = next;
        Ok(())
    }
}
