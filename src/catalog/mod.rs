//! Read access to the cluster catalog.
//!
//! The transport is a collaborator behind [`CatalogClient`]; the shipped
//! implementation shells out to `psql` through a [`RemoteExecutor`].
//!
//! [`RemoteExecutor`]: crate::RemoteExecutor

mod psql;
pub use psql::*;

#[cfg(test)]
mod catalog_test;

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::poll_until;
use crate::PollPolicy;
use crate::Result;
use crate::Verdict;

/// One catalog row, each column as text
pub type CatalogRow = Vec<String>;

/// A single instance that can answer catalog queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogEndpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl CatalogEndpoint {
    pub fn new(
        host: &str,
        port: u16,
        database: &str,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
        }
    }
}

impl fmt::Display for CatalogEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync + 'static {
    /// Runs `sql` against `endpoint` and returns all rows.
    ///
    /// An instance that refuses the connection yields
    /// `DiscoveryError::Unreachable`; a query error yields
    /// `DiscoveryError::QueryFailed`.
    async fn query(
        &self,
        endpoint: &CatalogEndpoint,
        sql: &str,
    ) -> Result<Vec<CatalogRow>>;
}

/// Interprets the first column of a boolean query result.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "t" | "true" | "1" | "yes" | "y"
    )
}

/// Polls a single-value boolean query until it returns `expected`.
pub async fn await_boolean<C: CatalogClient>(
    catalog: &C,
    endpoint: &CatalogEndpoint,
    sql: &str,
    expected: bool,
    policy: &PollPolicy,
) -> Result<()> {
    let what = format!("`{sql}` on {endpoint} returns {expected}");
    poll_until(&what, policy, || async move {
        let rows = catalog.query(endpoint, sql).await?;
        let observed = rows.first().and_then(|row| row.first()).map(|v| v.trim().to_string());
        debug!(%endpoint, ?observed, "boolean query");
        match observed {
            Some(value) if is_truthy(&value) == expected => Ok(Verdict::Satisfied(())),
            Some(value) => Ok(Verdict::Pending(format!("returned {value}"))),
            None => Ok(Verdict::Pending("returned no rows".to_string())),
        }
    })
    .await
}
