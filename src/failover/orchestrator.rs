use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::FailoverPhase;
use super::FailoverPlan;
use super::StandbyTarget;
use crate::constants::FTS_PROBE_QUERY;
use crate::poll_until;
use crate::AdminAction;
use crate::AdminActions;
use crate::CatalogClient;
use crate::CatalogEndpoint;
use crate::Cluster;
use crate::Error;
use crate::PollPolicies;
use crate::PollPolicy;
use crate::RemoteExecutor;
use crate::Result;
use crate::Segment;
use crate::SegmentRole;
use crate::StateMismatchError;
use crate::Target;
use crate::TopologyDiscovery;
use crate::Verdict;
use crate::MASTER_CONTENT_ID;

/// Drives standby creation, master failure and activation, and verifies
/// every step against the catalog.
pub struct FailoverOrchestrator<E: RemoteExecutor, C: CatalogClient> {
    discovery: TopologyDiscovery<C>,
    admin: AdminActions<E>,
    policies: PollPolicies,
}

impl<E: RemoteExecutor, C: CatalogClient> FailoverOrchestrator<E, C> {
    pub fn new(
        discovery: TopologyDiscovery<C>,
        admin: AdminActions<E>,
        policies: PollPolicies,
    ) -> Self {
        Self {
            discovery,
            admin,
            policies,
        }
    }

    fn database(&self) -> &str {
        &self.discovery.endpoint().database
    }

    fn master_of(cluster: &Cluster) -> Result<Segment> {
        cluster.master().cloned().ok_or_else(|| {
            StateMismatchError {
                check: "master entry".to_string(),
                expected: "exactly 1 master row".to_string(),
                observed: cluster.describe_rows(),
            }
            .into()
        })
    }

    /// Snapshots the cluster and plans a failover away from its master.
    pub async fn begin(&self) -> Result<FailoverPlan> {
        let cluster = self.discovery.snapshot().await?;
        if let Some(standby) = cluster.standby() {
            return Err(StateMismatchError {
                check: "no standby before failover".to_string(),
                expected: "0 standby rows".to_string(),
                observed: vec![standby.to_string()],
            }
            .into());
        }
        let source = Self::master_of(&cluster)?;
        info!(master = %source, "planning failover");
        Ok(FailoverPlan::new(source))
    }

    /// Removes a registered standby and waits for its catalog row to go.
    /// Returns whether anything was removed.
    pub async fn ensure_no_standby(&self) -> Result<bool> {
        let cluster = self.discovery.snapshot().await?;
        if cluster.standby().is_none() {
            return Ok(false);
        }
        let master = Self::master_of(&cluster)?;
        info!(standby = ?cluster.standby().map(|s| s.to_string()), "removing existing standby");
        self.admin
            .run(&AdminAction::RemoveStandby, &Target::remote(&master.host))
            .await?;

        poll_until("standby row removed", &self.policies.catalog, || async move {
            let cluster = self.discovery.snapshot().await?;
            match cluster.standby() {
                None => Ok(Verdict::Satisfied(())),
                Some(s) => Ok(Verdict::Pending(format!("standby still registered: {s}"))),
            }
        })
        .await?;
        Ok(true)
    }

    /// Creates the standby and waits until it is registered and streaming.
    pub async fn initialize_standby(
        &self,
        plan: &mut FailoverPlan,
        standby: StandbyTarget,
    ) -> Result<Segment> {
        plan.advance(FailoverPhase::Initializing)?;

        self.admin
            .run(
                &AdminAction::InitStandby {
                    host: standby.host.clone(),
                    port: standby.port,
                    data_dir: standby.data_dir.clone(),
                },
                &Target::remote(&plan.source.host),
            )
            .await?;
        plan.standby = Some(standby);

        let endpoint = plan.source.endpoint(self.database());
        let syncing_seen = AtomicBool::new(false);
        let (endpoint, syncing) = (&endpoint, &syncing_seen);
        let registered = poll_until("standby streaming", &self.policies.catalog, || async move {
            self.standby_state(endpoint, syncing).await
        })
        .await?;

        if syncing_seen.load(Ordering::SeqCst) {
            plan.advance(FailoverPhase::Syncing)?;
        }
        plan.advance(FailoverPhase::InSync)?;
        info!(standby = %registered, "standby in sync");
        plan.target = Some(registered.clone());
        Ok(registered)
    }

    async fn standby_state(
        &self,
        endpoint: &CatalogEndpoint,
        syncing: &AtomicBool,
    ) -> Result<Verdict<Segment>> {
        let cluster = self.discovery.snapshot_at(endpoint).await?;
        let standbys: Vec<&Segment> = cluster.segments_with(SegmentRole::Standby).collect();
        let streams = self.discovery.replication_rows(endpoint).await?;

        if standbys.len() > 1 || streams.len() > 1 {
            return Err(StateMismatchError {
                check: "standby entries".to_string(),
                expected: "at most 1 standby row and 1 replication row".to_string(),
                observed: standbys
                    .iter()
                    .map(|s| s.to_string())
                    .chain(streams.iter().map(|r| r.join("|")))
                    .collect(),
            }
            .into());
        }

        match (standbys.first(), streams.len()) {
            (Some(standby), 1) => Ok(Verdict::Satisfied((*standby).clone())),
            (Some(standby), _) => {
                syncing.store(true, Ordering::SeqCst);
                Ok(Verdict::Pending(format!("{standby} registered, no replication stream")))
            }
            (None, _) => Ok(Verdict::Pending("no standby row".to_string())),
        }
    }

    /// One-shot check: exactly one standby row and one replication row.
    pub async fn verify_standby_entries(&self) -> Result<Segment> {
        let endpoint = self.discovery.endpoint().clone();
        let cluster = self.discovery.snapshot_at(&endpoint).await?;
        let standbys: Vec<&Segment> = cluster.segments_with(SegmentRole::Standby).collect();
        let streams = self.discovery.replication_rows(&endpoint).await?;

        if standbys.len() != 1 {
            return Err(StateMismatchError {
                check: "standby entries".to_string(),
                expected: "exactly 1 standby row".to_string(),
                observed: standbys.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }
        if streams.len() != 1 {
            return Err(StateMismatchError {
                check: "standby replication".to_string(),
                expected: "exactly 1 replication row".to_string(),
                observed: streams.iter().map(|r| r.join("|")).collect(),
            }
            .into());
        }
        Ok(standbys[0].clone())
    }

    /// Records that the master went down by other means.
    pub fn master_failed(
        &self,
        plan: &mut FailoverPlan,
    ) -> Result<()> {
        warn!(master = %plan.source, "master reported down");
        plan.advance(FailoverPhase::MasterDown)
    }

    /// Immediate shutdown of the planned source master.
    pub async fn stop_master(
        &self,
        plan: &mut FailoverPlan,
    ) -> Result<()> {
        plan.check(FailoverPhase::MasterDown)?;
        self.admin
            .run(
                &AdminAction::StopInstance {
                    data_dir: plan.source.data_dir.clone(),
                },
                &Target::remote(&plan.source.host),
            )
            .await?;
        self.master_failed(plan)
    }

    /// Promotes the standby and waits for it to report itself as master.
    pub async fn activate_standby(
        &self,
        plan: &mut FailoverPlan,
    ) -> Result<Segment> {
        plan.check(FailoverPhase::Activating)?;
        let standby = plan
            .target
            .clone()
            .ok_or_else(|| Error::Scenario("failover plan has no registered standby".to_string()))?;
        plan.advance(FailoverPhase::Activating)?;

        self.admin
            .run(
                &AdminAction::ActivateStandby {
                    data_dir: standby.data_dir.clone(),
                    port: standby.port,
                },
                &Target::remote(&standby.host),
            )
            .await?;

        let promoted = self.await_new_master(&standby, &self.policies.catalog).await?;
        plan.advance(FailoverPhase::NewMaster)?;
        plan.target = Some(promoted.clone());
        info!(master = %promoted, "standby activated");
        Ok(promoted)
    }

    fn promoted_rows<'a>(
        cluster: &'a Cluster,
        standby_dbid: i32,
    ) -> (Vec<&'a Segment>, Vec<&'a Segment>) {
        cluster
            .segments()
            .iter()
            .filter(|s| s.content_id == MASTER_CONTENT_ID)
            .partition(|s| {
                s.role == SegmentRole::Master
                    && s.preferred_role == SegmentRole::Master
                    && s.dbid == standby_dbid
            })
    }

    /// Polls the former standby's own catalog until it lists itself as
    /// the acting and preferred master.
    pub async fn await_new_master(
        &self,
        standby: &Segment,
        policy: &PollPolicy,
    ) -> Result<Segment> {
        let endpoint = &standby.endpoint(self.database());
        let what = format!("dbid {} becomes master", standby.dbid);
        poll_until(&what, policy, || async move {
            let cluster = self.discovery.snapshot_at(endpoint).await?;
            let (matching, others) = Self::promoted_rows(&cluster, standby.dbid);
            debug!(matching = matching.len(), others = others.len(), "master rows on standby");
            if matching.len() == 1 {
                return Ok(Verdict::Satisfied(matching[0].clone()));
            }
            Ok(Verdict::Pending(
                matching
                    .iter()
                    .chain(others.iter())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            ))
        })
        .await
    }

    /// One-shot check of the promoted master's catalog entry.
    pub async fn verify_new_master(
        &self,
        plan: &FailoverPlan,
    ) -> Result<Segment> {
        let promoted = plan
            .target
            .as_ref()
            .ok_or_else(|| Error::Scenario("failover plan has no target".to_string()))?;
        let cluster = self
            .discovery
            .snapshot_at(&promoted.endpoint(self.database()))
            .await?;
        let (matching, others) = Self::promoted_rows(&cluster, promoted.dbid);
        if matching.len() != 1 {
            return Err(StateMismatchError {
                check: "new master entry".to_string(),
                expected: format!(
                    "exactly 1 row with content=-1, role=p, preferred_role=p, dbid={}",
                    promoted.dbid
                ),
                observed: matching
                    .iter()
                    .chain(others.iter())
                    .map(|s| s.to_string())
                    .collect(),
            }
            .into());
        }
        Ok(matching[0].clone())
    }

    /// Immediate shutdown of the registered standby. Waits until the master
    /// no longer reports a replication stream.
    pub async fn stop_standby(&self) -> Result<Segment> {
        let cluster = self.discovery.snapshot().await?;
        let standby = cluster.standby().cloned().ok_or_else(|| StateMismatchError {
            check: "standby entry".to_string(),
            expected: "exactly 1 standby row".to_string(),
            observed: cluster.describe_rows(),
        })?;

        self.admin
            .run(
                &AdminAction::StopInstance {
                    data_dir: standby.data_dir.clone(),
                },
                &Target::remote(&standby.host),
            )
            .await?;

        let endpoint = self.discovery.endpoint();
        poll_until("standby replication stopped", &self.policies.catalog, || async move {
            let streams = self.discovery.replication_rows(endpoint).await?;
            if streams.is_empty() {
                Ok(Verdict::Satisfied(()))
            } else {
                Ok(Verdict::Pending(format!("{} replication rows", streams.len())))
            }
        })
        .await?;
        warn!(standby = %standby, "standby is down");
        Ok(standby)
    }

    /// Hands the master role back to the instance the plan started from.
    ///
    /// The old master directory is wiped and re-initialized as a standby of
    /// the acting master, the acting master is stopped, and the old directory
    /// is activated again. Returns the restored master entry, which carries
    /// the dbid assigned when it was re-initialized.
    pub async fn revert_to_original_master(
        &self,
        plan: &mut FailoverPlan,
    ) -> Result<Segment> {
        plan.check(FailoverPhase::Reverted)?;
        let acting = plan
            .target
            .clone()
            .ok_or_else(|| Error::Scenario("failover plan has no target".to_string()))?;
        let original = plan.source.clone();
        info!(from = %acting, to = %original, "reverting to original master");

        self.admin
            .run(
                &AdminAction::RemoveDataDir {
                    data_dir: original.data_dir.clone(),
                },
                &Target::remote(&original.host),
            )
            .await?;

        let admin = self.admin.for_master(&acting);
        admin
            .run(
                &AdminAction::InitStandby {
                    host: original.host.clone(),
                    port: original.port,
                    data_dir: original.data_dir.clone(),
                },
                &Target::remote(&acting.host),
            )
            .await?;

        let endpoint = &acting.endpoint(self.database());
        let syncing = &AtomicBool::new(false);
        let registered = poll_until(
            "original master streaming as standby",
            &self.policies.catalog,
            || async move { self.standby_state(endpoint, syncing).await },
        )
        .await?;
        if registered.host != original.host || registered.data_dir != original.data_dir {
            return Err(StateMismatchError {
                check: "re-initialized standby".to_string(),
                expected: format!("standby at {}:{}", original.host, original.data_dir.display()),
                observed: vec![registered.to_string()],
            }
            .into());
        }

        admin
            .run(
                &AdminAction::StopInstance {
                    data_dir: acting.data_dir.clone(),
                },
                &Target::remote(&acting.host),
            )
            .await?;
        admin
            .run(
                &AdminAction::ActivateStandby {
                    data_dir: original.data_dir.clone(),
                    port: original.port,
                },
                &Target::remote(&original.host),
            )
            .await?;

        let restored = self.await_new_master(&registered, &self.policies.catalog).await?;
        plan.advance(FailoverPhase::Reverted)?;
        plan.target = Some(restored.clone());
        info!(master = %restored, "original master restored");
        Ok(restored)
    }

    /// Requests a fault probe and waits until `mirror` acts as primary.
    pub async fn await_mirror_promotion(
        &self,
        primary: &Segment,
        mirror: &Segment,
        policy: &PollPolicy,
    ) -> Result<Segment> {
        info!(failed = %primary, mirror = %mirror, "waiting for mirror promotion");
        self.discovery
            .catalog()
            .query(self.discovery.endpoint(), FTS_PROBE_QUERY)
            .await?;

        let what = format!("mirror dbid {} promoted for content {}", mirror.dbid, mirror.content_id);
        poll_until(&what, policy, || async move {
            let cluster = self.discovery.snapshot().await?;
            match cluster.by_dbid(mirror.dbid) {
                Some(s) if s.role == SegmentRole::Primary && s.is_up => {
                    Ok(Verdict::Satisfied(s.clone()))
                }
                Some(s) => {
                    let old = cluster
                        .by_dbid(primary.dbid)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    Ok(Verdict::Pending(format!("{s}; failed primary {old}")))
                }
                None => Ok(Verdict::Pending(format!("dbid {} not in catalog", mirror.dbid))),
            }
        })
        .await
    }

    /// Resync wait: every instance reports up.
    pub async fn await_all_up(
        &self,
        policy: &PollPolicy,
    ) -> Result<Cluster> {
        poll_until("all segments up", policy, || async move {
            let cluster = self.discovery.snapshot().await?;
            let down: Vec<String> = cluster
                .segments()
                .iter()
                .filter(|s| !s.is_up)
                .map(|s| s.dbid.to_string())
                .collect();
            if down.is_empty() {
                Ok(Verdict::Satisfied(cluster))
            } else {
                Ok(Verdict::Pending(format!("dbids down: {}", down.join(","))))
            }
        })
        .await
    }

    pub fn discovery(&self) -> &TopologyDiscovery<C> {
        &self.discovery
    }

    pub fn policies(&self) -> &PollPolicies {
        &self.policies
    }
}
