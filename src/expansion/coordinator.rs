use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use chrono::NaiveDateTime;
use tracing::debug;
use tracing::info;

use super::check_rank_order;
use super::inputfile_name;
use super::parse_catalog_timestamp;
use super::ExpansionPlan;
use super::RankStart;
use super::RankedTable;
use crate::constants::DATA_SEGMENT_COUNT_QUERY;
use crate::constants::EXPANSION_STATUS_QUERY;
use crate::AdminAction;
use crate::AdminActions;
use crate::CatalogClient;
use crate::CatalogEndpoint;
use crate::CommandOutput;
use crate::DiscoveryError;
use crate::RedistributeBound;
use crate::RemoteExecutor;
use crate::Result;
use crate::ShellCommand;
use crate::StateMismatchError;
use crate::Target;

/// Runs expansion phases from the master host and checks their effect on
/// the catalog.
pub struct ExpansionCoordinator<E: RemoteExecutor, C: CatalogClient> {
    catalog: Arc<C>,
    admin: AdminActions<E>,
    endpoint: CatalogEndpoint,
    working_dir: PathBuf,
}

impl<E: RemoteExecutor, C: CatalogClient> ExpansionCoordinator<E, C> {
    pub fn new(
        catalog: Arc<C>,
        admin: AdminActions<E>,
        endpoint: CatalogEndpoint,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            admin,
            endpoint,
            working_dir,
        }
    }

    /// Same coordinator reading a different database
    pub fn with_database(
        mut self,
        database: &str,
    ) -> Self {
        self.endpoint.database = database.to_string();
        self
    }

    pub async fn data_segment_count(&self) -> Result<usize> {
        let rows = self.catalog.query(&self.endpoint, DATA_SEGMENT_COUNT_QUERY).await?;
        let cell = rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| DiscoveryError::Malformed {
                row: String::new(),
                reason: "segment count query returned no rows".to_string(),
            })?;
        cell.trim().parse::<usize>().map_err(|e| {
            DiscoveryError::Malformed {
                row: cell.clone(),
                reason: format!("segment count: {e}"),
            }
            .into()
        })
    }

    /// Validates `plan` and writes its inputfile into the working directory.
    pub async fn write_inputfile(
        &self,
        plan: &ExpansionPlan,
        at: NaiveDateTime,
    ) -> Result<PathBuf> {
        plan.validate()?;
        tokio::fs::create_dir_all(&self.working_dir).await?;
        let path = self.working_dir.join(inputfile_name(at));
        tokio::fs::write(&path, plan.render_inputfile()).await?;
        info!(path = %path.display(), segments = plan.requested_segments(), "wrote inputfile");
        Ok(path)
    }

    /// Writes the inputfile and runs the initialization phase.
    pub async fn initialize(
        &self,
        plan: &ExpansionPlan,
    ) -> Result<PathBuf> {
        let inputfile = self.write_inputfile(plan, Local::now().naive_local()).await?;
        self.admin
            .run(
                &AdminAction::ExpandInitialize {
                    inputfile: inputfile.clone(),
                    database: self.endpoint.database.clone(),
                },
                &Target::Local,
            )
            .await?;
        Ok(inputfile)
    }

    pub fn redistribute_command(
        &self,
        bound: RedistributeBound,
    ) -> ShellCommand {
        self.admin.command(&AdminAction::Redistribute {
            database: self.endpoint.database.clone(),
            bound,
        })
    }

    /// Runs the redistribution phase to completion (or to its bound).
    pub async fn redistribute(
        &self,
        bound: RedistributeBound,
    ) -> Result<CommandOutput> {
        self.admin
            .run(
                &AdminAction::Redistribute {
                    database: self.endpoint.database.clone(),
                    bound,
                },
                &Target::Local,
            )
            .await
    }

    /// One-shot check that exactly `added` data segments appeared.
    pub async fn verify_segment_delta(
        &self,
        before: usize,
        added: usize,
    ) -> Result<usize> {
        let after = self.data_segment_count().await?;
        if after != before + added {
            return Err(StateMismatchError {
                check: "segment count after expansion".to_string(),
                expected: format!("{} data segments ({before} + {added})", before + added),
                observed: vec![after.to_string()],
            }
            .into());
        }
        Ok(after)
    }

    /// Initializes `plan` and checks the data segment count grew by the
    /// number of instances it requested.
    pub async fn expand_and_verify(
        &self,
        plan: &ExpansionPlan,
    ) -> Result<usize> {
        let before = self.data_segment_count().await?;
        self.initialize(plan).await?;
        self.verify_segment_delta(before, plan.requested_segments()).await
    }

    pub async fn assign_ranks(
        &self,
        tables: &[RankedTable],
    ) -> Result<()> {
        for ranked in tables {
            let sql = format!(
                "UPDATE gpexpand.status_detail SET rank={} WHERE fq_name='{}'",
                ranked.rank,
                ranked.table.replace('\'', "''")
            );
            debug!(table = %ranked.table, rank = ranked.rank, "assigning rank");
            self.catalog.query(&self.endpoint, &sql).await?;
        }
        Ok(())
    }

    /// Rank and start time of every table in the expansion schedule;
    /// `None` for tables not started yet.
    pub async fn rank_starts(&self) -> Result<Vec<(i32, Option<NaiveDateTime>)>> {
        let rows = self.catalog.query(&self.endpoint, EXPANSION_STATUS_QUERY).await?;
        rows.iter()
            .map(|row| -> Result<(i32, Option<NaiveDateTime>)> {
                let malformed = |reason: String| DiscoveryError::Malformed {
                    row: row.join("|"),
                    reason,
                };
                let rank: i32 = row
                    .first()
                    .ok_or_else(|| malformed("empty row".to_string()))?
                    .trim()
                    .parse::<i32>()
                    .map_err(|e| malformed(format!("rank: {e}")))?;
                let started = match row.get(1).map(|v| v.trim()) {
                    None | Some("") => None,
                    Some(value) => Some(parse_catalog_timestamp(value)?),
                };
                Ok((rank, started))
            })
            .collect()
    }

    /// Checks that every rank in `ranks` started, in rank order.
    pub async fn verify_rank_order(
        &self,
        ranks: &[i32],
    ) -> Result<()> {
        let observed = self.rank_starts().await?;
        let mut starts = Vec::new();
        let mut missing = Vec::new();

        for rank in ranks {
            let rows: Vec<_> = observed.iter().filter(|(r, _)| r == rank).collect();
            if rows.is_empty() {
                missing.push(format!("rank {rank}: no table"));
            }
            for (r, started) in rows {
                match started {
                    Some(started) => starts.push(RankStart {
                        rank: *r,
                        started: *started,
                    }),
                    None => missing.push(format!("rank {rank}: not started")),
                }
            }
        }

        if !missing.is_empty() {
            return Err(StateMismatchError {
                check: "expansion rank schedule".to_string(),
                expected: format!("started tables for ranks {ranks:?}"),
                observed: missing,
            }
            .into());
        }
        check_rank_order(&starts)
    }
}
