use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::Cluster;
use crate::constants::PING_QUERY;
use crate::constants::REPLICATION_QUERY;
use crate::constants::SEGMENT_CONFIGURATION_QUERY;
use crate::poll_until;
use crate::CatalogClient;
use crate::CatalogEndpoint;
use crate::CatalogRow;
use crate::PollPolicy;
use crate::Result;
use crate::Verdict;

/// Reads cluster snapshots from the catalog.
pub struct TopologyDiscovery<C: CatalogClient> {
    catalog: Arc<C>,
    endpoint: CatalogEndpoint,
}

impl<C: CatalogClient> TopologyDiscovery<C> {
    pub fn new(
        catalog: Arc<C>,
        endpoint: CatalogEndpoint,
    ) -> Self {
        Self { catalog, endpoint }
    }

    pub fn endpoint(&self) -> &CatalogEndpoint {
        &self.endpoint
    }

    pub fn catalog(&self) -> Arc<C> {
        self.catalog.clone()
    }

    /// Snapshot from the configured master.
    pub async fn snapshot(&self) -> Result<Cluster> {
        self.snapshot_at(&self.endpoint).await
    }

    /// Snapshot from an explicit instance, e.g. a freshly promoted standby.
    pub async fn snapshot_at(
        &self,
        endpoint: &CatalogEndpoint,
    ) -> Result<Cluster> {
        let rows = self.catalog.query(endpoint, SEGMENT_CONFIGURATION_QUERY).await?;
        let cluster = Cluster::from_rows(&rows)?;
        debug!(%endpoint, segments = cluster.len(), "discovered topology");
        Ok(cluster)
    }

    pub async fn replication_rows(
        &self,
        endpoint: &CatalogEndpoint,
    ) -> Result<Vec<CatalogRow>> {
        self.catalog.query(endpoint, REPLICATION_QUERY).await
    }

    /// Waits until the configured endpoint accepts a trivial query.
    pub async fn await_reachable(
        &self,
        policy: &PollPolicy,
    ) -> Result<()> {
        let what = format!("{} accepts connections", self.endpoint);
        poll_until(&what, policy, || async move {
            self.catalog.query(&self.endpoint, PING_QUERY).await?;
            Ok(Verdict::Satisfied(()))
        })
        .await?;
        info!(endpoint = %self.endpoint, "catalog reachable");
        Ok(())
    }
}
