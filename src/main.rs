use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use clap::Parser;
use clap::Subcommand;
use ha_harness::AdminActions;
use ha_harness::Error;
use ha_harness::ExpansionCoordinator;
use ha_harness::ExpansionPlan;
use ha_harness::FailoverOrchestrator;
use ha_harness::HarnessConfig;
use ha_harness::ProcessController;
use ha_harness::PsqlCatalog;
use ha_harness::RankedTable;
use ha_harness::RedistributeBound;
use ha_harness::Result;
use ha_harness::ScenarioContext;
use ha_harness::SegmentSelector;
use ha_harness::ShellExecutor;
use ha_harness::StandbyTarget;
use ha_harness::Target;
use ha_harness::TopologyDiscovery;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const LOG_FILE_NAME: &str = "ha-harness.log";

#[derive(Parser, Debug)]
#[command(name = "ha-harness", version, about = "Drive and verify cluster failover and expansion")]
struct Cli {
    /// Extra configuration file merged over `CONFIG_PATH` and defaults
    #[arg(long, env = "HA_CONFIG_OVERRIDE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the segment configuration and check its invariants
    Topology,
    /// Wait for a named process to appear on a host
    WaitUp {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Wait for a pid or a named process to go away
    WaitDown {
        #[arg(long, conflicts_with = "name", required_unless_present = "name")]
        pid: Option<u32>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Wait until every segment reports up
    WaitResync,
    /// Kill the postmaster of the first segment of a kind
    KillSegment {
        #[arg(long, default_value = "primary")]
        kind: SegmentSelector,
    },
    /// Kill the postmaster of every primary
    KillAllPrimaries,
    /// Kill every postgres process on the given hosts
    KillDatabase {
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
    },
    /// Kill a primary and wait for its mirror to take over
    FailSegment,
    /// Immediate shutdown of the registered standby
    StopStandby,
    /// Create a standby, stop the master and activate the standby
    Failover {
        #[arg(long)]
        standby_host: String,
        #[arg(long)]
        standby_port: u16,
        #[arg(long)]
        standby_data_dir: PathBuf,
        /// Afterwards hand the master role back to the original master
        #[arg(long)]
        revert: bool,
    },
    /// Add the segments listed in an inputfile and verify the count
    Expand {
        #[arg(long)]
        inputfile: PathBuf,
        /// `schema.table=rank`, repeatable
        #[arg(long = "rank", value_parser = parse_ranked_table)]
        ranks: Vec<RankedTable>,
    },
    /// Run table redistribution, optionally bounded
    Redistribute {
        /// Stop after this many seconds
        #[arg(long, conflicts_with = "end_time")]
        duration_secs: Option<u64>,
        /// Stop at `YYYY-MM-DD HH:MM:SS`
        #[arg(long, value_parser = parse_end_time)]
        end_time: Option<NaiveDateTime>,
    },
    /// Check that tables started redistributing in rank order
    VerifyRanks {
        #[arg(long, value_delimiter = ',', required = true)]
        ranks: Vec<i32>,
    },
}

fn parse_ranked_table(s: &str) -> std::result::Result<RankedTable, String> {
    let (table, rank) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected schema.table=rank, got `{s}`"))?;
    let rank = rank.trim().parse::<i32>().map_err(|e| format!("rank: {e}"))?;
    Ok(RankedTable {
        table: table.trim().to_string(),
        rank,
    })
}

fn parse_end_time(s: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map_err(|e| e.to_string())
}

/// Shared handles built once from the validated configuration
struct Harness {
    executor: Arc<ShellExecutor>,
    catalog: Arc<PsqlCatalog<ShellExecutor>>,
    context: ScenarioContext,
}

impl Harness {
    fn new(config: HarnessConfig) -> Self {
        let executor = Arc::new(ShellExecutor::new(config.ssh.clone(), config.executor.clone()));
        let catalog = Arc::new(PsqlCatalog::new(executor.clone(), config.cluster.psql.clone()));
        Self {
            executor,
            catalog,
            context: ScenarioContext::new(config),
        }
    }

    fn config(&self) -> &HarnessConfig {
        self.context.config()
    }

    fn discovery(&self) -> TopologyDiscovery<PsqlCatalog<ShellExecutor>> {
        TopologyDiscovery::new(self.catalog.clone(), self.config().cluster.master_endpoint())
    }

    fn admin(&self) -> AdminActions<ShellExecutor> {
        AdminActions::new(self.executor.clone(), self.config().cluster.clone())
    }

    fn processes(&self) -> ProcessController<ShellExecutor> {
        ProcessController::new(
            self.executor.clone(),
            self.config().poll.process,
            self.config().process.clone(),
        )
    }

    fn failover(&self) -> FailoverOrchestrator<ShellExecutor, PsqlCatalog<ShellExecutor>> {
        FailoverOrchestrator::new(self.discovery(), self.admin(), self.config().poll.clone())
    }

    fn expansion(&self) -> ExpansionCoordinator<ShellExecutor, PsqlCatalog<ShellExecutor>> {
        ExpansionCoordinator::new(
            self.catalog.clone(),
            self.admin(),
            self.config().cluster.master_endpoint(),
            self.config().cluster.working_dir.clone(),
        )
    }

    async fn run(
        &mut self,
        command: Command,
    ) -> Result<()> {
        let process_timeout = self.config().poll.process.timeout();
        match command {
            Command::Topology => {
                let cluster = self.discovery().snapshot().await?;
                ha_harness::print_cluster_table(&cluster);
                cluster.check_invariants()?;
            }
            Command::WaitUp { name, host } => {
                self.processes()
                    .wait_for_up(&name, &target_of(host), process_timeout)
                    .await?;
            }
            Command::WaitDown { pid, name, host } => {
                let target = target_of(host);
                match (pid, name) {
                    (Some(pid), _) => {
                        self.processes()
                            .wait_for_down(pid, &target, process_timeout)
                            .await?
                    }
                    (None, Some(name)) => {
                        self.processes()
                            .wait_for_exit(&name, &target, process_timeout)
                            .await?
                    }
                    (None, None) => {
                        return Err(Error::InvalidInput("either --pid or --name is required".to_string()))
                    }
                }
            }
            Command::WaitResync => {
                let resync = self.config().poll.resync;
                let cluster = self.failover().await_all_up(&resync).await?;
                ha_harness::print_cluster_table(&cluster);
            }
            Command::KillSegment { kind } => {
                let cluster = self.discovery().snapshot().await?;
                let segment = self.context.save_segment(kind, &cluster)?.clone();
                let pid = self.processes().kill_segment(&segment, process_timeout).await?;
                info!(%segment, pid, "segment killed");
            }
            Command::KillAllPrimaries => {
                let cluster = self.discovery().snapshot().await?;
                let pids = self
                    .processes()
                    .kill_all_primaries(&cluster, process_timeout)
                    .await?;
                info!(?pids, "primaries killed");
            }
            Command::KillDatabase { hosts } => {
                self.processes().kill_database_on_hosts(&hosts).await?;
            }
            Command::FailSegment => self.fail_segment().await?,
            Command::StopStandby => {
                let standby = self.failover().stop_standby().await?;
                info!(%standby, "standby stopped");
            }
            Command::Failover {
                standby_host,
                standby_port,
                standby_data_dir,
                revert,
            } => {
                self.run_failover(
                    StandbyTarget {
                        host: standby_host,
                        port: standby_port,
                        data_dir: standby_data_dir,
                    },
                    revert,
                )
                .await?
            }
            Command::Expand { inputfile, ranks } => self.expand(&inputfile, ranks).await?,
            Command::Redistribute {
                duration_secs,
                end_time,
            } => {
                let bound = match (duration_secs, end_time) {
                    (Some(secs), _) => RedistributeBound::Duration(Duration::from_secs(secs)),
                    (None, Some(at)) => RedistributeBound::EndTime(at),
                    (None, None) => RedistributeBound::Unbounded,
                };
                let output = self.expansion().redistribute(bound).await?;
                self.context.record_output(output);
            }
            Command::VerifyRanks { ranks } => self.expansion().verify_rank_order(&ranks).await?,
        }
        Ok(())
    }

    async fn fail_segment(&mut self) -> Result<()> {
        let cluster = self.discovery().snapshot().await?;
        cluster.check_invariants()?;
        let primary = self
            .context
            .save_segment(SegmentSelector::Primary, &cluster)?
            .clone();
        let mirror = match cluster.pair(primary.content_id) {
            (_, Some(mirror)) => mirror.clone(),
            (_, None) => {
                return Err(Error::Scenario(format!(
                    "content {} has no mirror to promote",
                    primary.content_id
                )))
            }
        };

        let timeout = self.config().poll.process.timeout();
        self.processes().kill_segment(&primary, timeout).await?;

        let catalog = self.config().poll.catalog;
        let promoted = self
            .failover()
            .await_mirror_promotion(&primary, &mirror, &catalog)
            .await?;
        info!(segment = %promoted, "mirror acting as primary");
        Ok(())
    }

    async fn run_failover(
        &mut self,
        standby: StandbyTarget,
        revert: bool,
    ) -> Result<()> {
        let orchestrator = self.failover();
        if orchestrator.ensure_no_standby().await? {
            warn!("removed a leftover standby before failover");
        }

        self.context.set_failover(orchestrator.begin().await?);
        let plan = self.context.failover_mut()?;
        orchestrator.initialize_standby(plan, standby).await?;
        orchestrator.verify_standby_entries().await?;
        orchestrator.stop_master(plan).await?;
        orchestrator.activate_standby(plan).await?;
        let master = orchestrator.verify_new_master(plan).await?;
        info!(%master, "failover complete");

        if revert {
            let restored = orchestrator.revert_to_original_master(plan).await?;
            info!(master = %restored, "original master restored");
        }
        Ok(())
    }

    async fn expand(
        &mut self,
        inputfile: &Path,
        ranks: Vec<RankedTable>,
    ) -> Result<()> {
        let text = tokio::fs::read_to_string(inputfile).await?;
        let plan = ExpansionPlan::parse_inputfile(&text)?.with_ranked_tables(ranks);
        plan.validate()?;

        let coordinator = self.expansion();
        self.context
            .record_expansion_baseline(coordinator.data_segment_count().await?);
        let after = coordinator.expand_and_verify(&plan).await?;
        if !plan.ranked_tables.is_empty() {
            coordinator.assign_ranks(&plan.ranked_tables).await?;
        }
        info!(
            before = self.context.expansion_baseline()?,
            after,
            "expansion initialized"
        );
        Ok(())
    }
}

fn target_of(host: Option<String>) -> Target {
    host.map(Target::Remote).unwrap_or(Target::Local)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HarnessConfig::new()?;
    if let Some(path) = &cli.config {
        config = config.with_override_config(path)?;
    }
    let config = config.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.cluster.log_dir);

    let mut harness = Harness::new(config);
    info!(scenario = harness.context.id(), command = ?cli.command, "running");

    let result = harness.run(cli.command).await;

    if let Err(e) = &result {
        error!("scenario {} failed: {}", harness.context.id(), e);
    }
    result
}

pub fn init_observability(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    guard
}
