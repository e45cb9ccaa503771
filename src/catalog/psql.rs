use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tracing::trace;

use super::CatalogClient;
use super::CatalogEndpoint;
use super::CatalogRow;
use crate::shell_quote;
use crate::DiscoveryError;
use crate::RemoteExecutor;
use crate::Result;
use crate::ShellCommand;
use crate::Target;

/// psql exits with 2 when the connection to the server went bad
const PSQL_CONNECTION_EXIT_CODE: i32 = 2;
const FIELD_SEPARATOR: char = '|';

/// Catalog reads through the `psql` client in unaligned, tuples-only mode.
pub struct PsqlCatalog<E: RemoteExecutor> {
    executor: Arc<E>,
    psql: String,
}

impl<E: RemoteExecutor> PsqlCatalog<E> {
    pub fn new(
        executor: Arc<E>,
        psql: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            psql: psql.into(),
        }
    }

    pub(crate) fn command(
        &self,
        endpoint: &CatalogEndpoint,
        sql: &str,
    ) -> ShellCommand {
        ShellCommand::new(
            "psql",
            format!(
                "{} -X -A -t -q -F '{}' -h {} -p {} -d {} -c {}",
                self.psql,
                FIELD_SEPARATOR,
                shell_quote(&endpoint.host),
                endpoint.port,
                shell_quote(&endpoint.database),
                shell_quote(sql)
            ),
        )
    }
}

/// Splits unaligned psql output into rows. Blank lines are dropped.
pub fn parse_rows(stdout: &str) -> Vec<CatalogRow> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(|line| line.split(FIELD_SEPARATOR).map(str::to_string).collect())
        .collect()
}

#[async_trait]
impl<E: RemoteExecutor> CatalogClient for PsqlCatalog<E> {
    async fn query(
        &self,
        endpoint: &CatalogEndpoint,
        sql: &str,
    ) -> Result<Vec<CatalogRow>> {
        let command = self.command(endpoint, sql);
        trace!(%endpoint, sql, "catalog query");

        let output = self.executor.execute(&command, &Target::Local).await?;
        match output.exit_code {
            0 => {
                let rows = parse_rows(&output.stdout);
                debug!(%endpoint, rows = rows.len(), "catalog query returned");
                Ok(rows)
            }
            PSQL_CONNECTION_EXIT_CODE => Err(DiscoveryError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: output.stderr.trim().to_string(),
            }
            .into()),
            exit_code => Err(DiscoveryError::QueryFailed {
                endpoint: endpoint.to_string(),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into()),
        }
    }
}
