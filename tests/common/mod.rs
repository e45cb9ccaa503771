//! In-memory cluster used by the integration tests. One value plays both
//! the catalog and the command transport, so admin actions change what the
//! next catalog read returns.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ha_harness::constants::DATA_SEGMENT_COUNT_QUERY;
use ha_harness::constants::EXPANSION_STATUS_QUERY;
use ha_harness::constants::FTS_PROBE_QUERY;
use ha_harness::constants::PING_QUERY;
use ha_harness::constants::REPLICATION_QUERY;
use ha_harness::constants::SEGMENT_CONFIGURATION_QUERY;
use ha_harness::AdminActions;
use ha_harness::CatalogClient;
use ha_harness::CatalogEndpoint;
use ha_harness::CatalogRow;
use ha_harness::ClusterConfig;
use ha_harness::CommandOutput;
use ha_harness::DiscoveryError;
use ha_harness::ExpansionCoordinator;
use ha_harness::ExpansionPlan;
use ha_harness::FailoverOrchestrator;
use ha_harness::PollPolicies;
use ha_harness::PollPolicy;
use ha_harness::ProcessConfig;
use ha_harness::ProcessController;
use ha_harness::RemoteExecutor;
use ha_harness::Result;
use ha_harness::ShellCommand;
use ha_harness::Target;
use ha_harness::TopologyDiscovery;

pub const MASTER_HOST: &str = "mdw";
pub const STANDBY_HOST: &str = "smdw";
pub const MASTER_PORT: u16 = 5432;
pub const DATABASE: &str = "postgres";

/// First second of the simulated redistribution
const REDISTRIBUTION_EPOCH: &str = "2026-05-04 10:00";

pub fn row(
    dbid: i32,
    content: i32,
    role: &str,
    host: &str,
    port: u16,
    data_dir: &str,
) -> CatalogRow {
    [
        dbid.to_string(),
        content.to_string(),
        role.to_string(),
        role.to_string(),
        host.to_string(),
        port.to_string(),
        data_dir.to_string(),
        "u".to_string(),
    ]
    .to_vec()
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn failed(
    stderr: &str,
    exit_code: i32,
) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches('\'').to_string()
}

#[derive(Default)]
struct FakeState {
    rows: Vec<CatalogRow>,
    standby_streaming: bool,
    standby_down: bool,
    master_down: bool,
    promoted: bool,
    killed: HashSet<u32>,
    /// Tables known to the expansion schedule, by name
    schedule: BTreeMap<String, (i32, Option<String>)>,
    pending_tables: Vec<String>,
    /// Start higher ranks first
    invert_ranks: bool,
    commands: Vec<String>,
}

impl FakeState {
    fn pid_of(
        &self,
        data_dir: &str,
    ) -> Option<u32> {
        self.rows
            .iter()
            .find(|r| r[6] == data_dir)
            .and_then(|r| r[0].parse::<u32>().ok())
            .map(|dbid| 4000 + dbid)
    }

    fn standby_registered(&self) -> bool {
        self.rows.iter().any(|r| r[1] == "-1" && r[2] == "m")
    }

    /// Demotes killed primaries and promotes their mirrors.
    fn apply_fault_probe(&mut self) {
        let failed: Vec<String> = self
            .rows
            .iter()
            .filter(|r| r[1] != "-1" && r[2] == "p")
            .filter(|r| {
                r[0].parse::<u32>()
                    .map(|dbid| self.killed.contains(&(4000 + dbid)))
                    .unwrap_or(false)
            })
            .map(|r| r[1].clone())
            .collect();
        for content in failed {
            for r in self.rows.iter_mut().filter(|r| r[1] == content) {
                if r[2] == "p" {
                    r[2] = "m".to_string();
                    r[7] = "d".to_string();
                } else {
                    r[2] = "p".to_string();
                }
            }
        }
    }

    fn status_rows(&self) -> Vec<CatalogRow> {
        let mut rows: Vec<CatalogRow> = self
            .schedule
            .values()
            .map(|(rank, started)| vec![rank.to_string(), started.clone().unwrap_or_default()])
            .collect();
        rows.sort_by_key(|r| r[0].parse::<i32>().unwrap_or_default());
        rows
    }

    fn redistribute(&mut self) {
        let mut order: Vec<(i32, String)> = self
            .schedule
            .iter()
            .map(|(table, (rank, _))| (*rank, table.clone()))
            .collect();
        order.sort();
        if self.invert_ranks {
            order.reverse();
        }
        for (second, (_, table)) in order.into_iter().enumerate() {
            if let Some(entry) = self.schedule.get_mut(&table) {
                entry.1 = Some(format!("{REDISTRIBUTION_EPOCH}:{second:02}"));
            }
        }
    }
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// Master plus two contents, each with a primary and a mirror
    pub fn mirrored() -> Self {
        let rows = vec![
            row(1, -1, "p", MASTER_HOST, MASTER_PORT, "/data/master/gpseg-1"),
            row(2, 0, "p", "sdw1", 6000, "/data/primary/gpseg0"),
            row(3, 1, "p", "sdw2", 6000, "/data/primary/gpseg1"),
            row(4, 0, "m", "sdw2", 7000, "/data/mirror/gpseg0"),
            row(5, 1, "m", "sdw1", 7000, "/data/mirror/gpseg1"),
        ];
        Self {
            state: Mutex::new(FakeState {
                rows,
                ..Default::default()
            }),
        }
    }

    /// Adds a streaming standby left over from an earlier run.
    pub fn with_registered_standby(self) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .rows
                .push(row(6, -1, "m", STANDBY_HOST, MASTER_PORT, "/data/standby/gpseg-1"));
            state.standby_streaming = true;
        }
        self
    }

    /// Tables that `gpexpand -i` puts on the redistribution schedule
    pub fn with_tables(
        self,
        tables: &[&str],
    ) -> Self {
        self.state.lock().unwrap().pending_tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn inverting_ranks(self) -> Self {
        self.state.lock().unwrap().invert_ranks = true;
        self
    }

    /// `<target>: <line>` for every command executed so far
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn rows(&self) -> Vec<CatalogRow> {
        self.state.lock().unwrap().rows.clone()
    }
}

#[async_trait]
impl CatalogClient for FakeCluster {
    async fn query(
        &self,
        endpoint: &CatalogEndpoint,
        sql: &str,
    ) -> Result<Vec<CatalogRow>> {
        let mut state = self.state.lock().unwrap();
        let serving = match endpoint.host.as_str() {
            MASTER_HOST => !state.master_down,
            STANDBY_HOST => state.promoted,
            _ => false,
        };
        if !serving {
            return Err(DiscoveryError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }

        match sql {
            SEGMENT_CONFIGURATION_QUERY => Ok(state.rows.clone()),
            REPLICATION_QUERY => {
                if !state.standby_registered() || state.standby_down {
                    return Ok(vec![]);
                }
                if !state.standby_streaming {
                    // first look finds the standby still catching up
                    state.standby_streaming = true;
                    return Ok(vec![]);
                }
                Ok(vec![vec![
                    "12345".to_string(),
                    "streaming".to_string(),
                    "sync".to_string(),
                ]])
            }
            PING_QUERY => Ok(vec![vec!["1".to_string()]]),
            FTS_PROBE_QUERY => {
                state.apply_fault_probe();
                Ok(vec![vec!["t".to_string()]])
            }
            DATA_SEGMENT_COUNT_QUERY => {
                let count = state.rows.iter().filter(|r| r[1] != "-1").count();
                Ok(vec![vec![count.to_string()]])
            }
            EXPANSION_STATUS_QUERY => Ok(state.status_rows()),
            update if update.starts_with("UPDATE gpexpand.status_detail SET rank=") => {
                let rest = &update["UPDATE gpexpand.status_detail SET rank=".len()..];
                let (rank, filter) = rest.split_once(' ').unwrap_or((rest, ""));
                let table = filter
                    .trim_start_matches("WHERE fq_name='")
                    .trim_end_matches('\'')
                    .replace("''", "'");
                let rank = rank.parse::<i32>().unwrap_or_default();
                if let Some(entry) = state.schedule.get_mut(&table) {
                    entry.0 = rank;
                }
                Ok(vec![])
            }
            other => Err(DiscoveryError::QueryFailed {
                endpoint: endpoint.to_string(),
                exit_code: 1,
                stderr: format!("unexpected query: {other}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn execute(
        &self,
        command: &ShellCommand,
        target: &Target,
    ) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(format!("{}: {}", target, command.line));
        let tokens: Vec<&str> = command.line.split_whitespace().collect();

        let output = match tokens.as_slice() {
            ["gpinitstandby", "-ra"] => {
                state.rows.retain(|r| !(r[1] == "-1" && r[2] == "m"));
                state.standby_streaming = false;
                ok("")
            }
            ["gpinitstandby", "-a", "-s", host, "-P", port, "-F", dir] => {
                let dbid = state
                    .rows
                    .iter()
                    .filter_map(|r| r[0].parse::<i32>().ok())
                    .max()
                    .unwrap_or_default()
                    + 1;
                let port = port.parse::<u16>().unwrap_or(MASTER_PORT);
                state.rows.push(row(dbid, -1, "m", host, port, &unquote(dir)));
                state.standby_streaming = false;
                state.standby_down = false;
                ok("Successfully created standby master")
            }
            ["pg_ctl", "stop", "-m", "immediate", "-D", _] => {
                if *target != Target::remote(STANDBY_HOST) {
                    state.master_down = true;
                } else if state.promoted {
                    state.promoted = false;
                } else {
                    state.standby_down = true;
                }
                ok("server stopped")
            }
            ["rm", "-rf", _] => ok(""),
            ["gpactivatestandby", "-a", "-d", dir] => {
                let dir = unquote(dir);
                state.rows.retain(|r| !(r[1] == "-1" && r[6] != dir));
                for r in state.rows.iter_mut().filter(|r| r[6] == dir) {
                    r[2] = "p".to_string();
                    r[3] = "p".to_string();
                }
                if *target == Target::remote(MASTER_HOST) {
                    state.master_down = false;
                } else {
                    state.promoted = true;
                }
                ok("Standby master activated")
            }
            ["gpexpand", "-D", _, "-i", file] => {
                let text = std::fs::read_to_string(unquote(file))?;
                let plan = ExpansionPlan::parse_inputfile(&text)?;
                for spec in plan.segments {
                    let role = spec.role.code().to_string();
                    state.rows.push(row(
                        spec.dbid,
                        spec.content_id,
                        &role,
                        &spec.host,
                        spec.port,
                        &spec.data_dir.display().to_string(),
                    ));
                }
                let tables = std::mem::take(&mut state.pending_tables);
                for table in tables {
                    state.schedule.insert(table, (2, None));
                }
                ok("Initialization of the system expansion complete.")
            }
            ["gpexpand", "-D", _, ..] => {
                state.redistribute();
                ok("EXPANSION COMPLETED SUCCESSFULLY")
            }
            ["head", "-1", file] => {
                let file = unquote(file);
                let data_dir = file.trim_end_matches("/postmaster.pid");
                match state.pid_of(data_dir) {
                    Some(pid) if !state.killed.contains(&pid) => ok(&format!("{pid}\n")),
                    _ => failed("head: cannot open file: No such file or directory", 1),
                }
            }
            ["kill", "-0", pid] => {
                let pid = pid.parse::<u32>().unwrap_or_default();
                if state.killed.contains(&pid) {
                    failed("kill: No such process", 1)
                } else {
                    ok("")
                }
            }
            ["kill", "-s", _, pid] => {
                let pid = pid.parse::<u32>().unwrap_or_default();
                if state.killed.insert(pid) {
                    ok("")
                } else {
                    failed("kill: No such process", 1)
                }
            }
            ["pkill", "postgres", "||", "true"] => {
                let host = target.host().to_string();
                let pids: Vec<u32> = state
                    .rows
                    .iter()
                    .filter(|r| r[4] == host)
                    .filter_map(|r| r[0].parse::<u32>().ok())
                    .map(|dbid| 4000 + dbid)
                    .collect();
                state.killed.extend(pids);
                if host == MASTER_HOST {
                    state.master_down = true;
                }
                ok("")
            }
            _ => failed(&format!("command not found: {}", command.line), 127),
        };
        Ok(output)
    }
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(30), Duration::from_millis(50))
}

pub fn policies() -> PollPolicies {
    PollPolicies {
        process: fast_policy(),
        catalog: fast_policy(),
        resync: fast_policy(),
        connection: fast_policy(),
    }
}

pub fn cluster_config() -> ClusterConfig {
    ClusterConfig {
        master_host: MASTER_HOST.to_string(),
        master_port: MASTER_PORT,
        database: DATABASE.to_string(),
        ..Default::default()
    }
}

pub fn master_endpoint() -> CatalogEndpoint {
    CatalogEndpoint::new(MASTER_HOST, MASTER_PORT, DATABASE)
}

pub fn orchestrator(fake: &Arc<FakeCluster>) -> FailoverOrchestrator<FakeCluster, FakeCluster> {
    FailoverOrchestrator::new(
        TopologyDiscovery::new(fake.clone(), master_endpoint()),
        AdminActions::new(fake.clone(), cluster_config()),
        policies(),
    )
}

pub fn coordinator(
    fake: &Arc<FakeCluster>,
    working_dir: &std::path::Path,
) -> ExpansionCoordinator<FakeCluster, FakeCluster> {
    ExpansionCoordinator::new(
        fake.clone(),
        AdminActions::new(fake.clone(), cluster_config()),
        master_endpoint(),
        working_dir.to_path_buf(),
    )
}

pub fn processes(fake: &Arc<FakeCluster>) -> ProcessController<FakeCluster> {
    ProcessController::new(fake.clone(), fast_policy(), ProcessConfig::default())
}
