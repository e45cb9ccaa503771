use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::validate_directory;
use crate::catalog::CatalogEndpoint;
use crate::Error;
use crate::Result;

/// Cluster entry point and filesystem layout
///
/// # Defaults
/// Field-level defaults use helper functions prefixed with `default_`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Host of the current master
    ///
    /// Default: `localhost`
    #[serde(default = "default_master_host")]
    pub master_host: String,

    /// Port the master accepts connections on
    ///
    /// Default: 5432
    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Data directory of the master instance
    #[serde(default = "default_master_data_dir")]
    pub master_data_dir: PathBuf,

    /// Database used for catalog reads
    ///
    /// Default: `postgres`
    #[serde(default = "default_database")]
    pub database: String,

    /// Installation root. When set, remote commands source
    /// `<gphome>/greenplum_path.sh` before running.
    #[serde(default)]
    pub gphome: PathBuf,

    /// Directory for generated files (expansion inputfiles)
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Log files output directory
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// SQL client binary used for catalog reads
    #[serde(default = "default_psql")]
    pub psql: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_host: default_master_host(),
            master_port: default_master_port(),
            master_data_dir: default_master_data_dir(),
            database: default_database(),
            gphome: PathBuf::new(),
            working_dir: default_working_dir(),
            log_dir: default_log_dir(),
            psql: default_psql(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.master_host.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "master_host cannot be empty".into(),
            )));
        }

        if self.master_port == 0 {
            return Err(Error::Config(ConfigError::Message(
                "master_port must be a non-zero port".into(),
            )));
        }

        if self.master_data_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "master_data_dir cannot be empty".into(),
            )));
        }

        if self.database.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "database cannot be empty".into(),
            )));
        }

        if self.psql.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "psql binary cannot be empty".into(),
            )));
        }

        validate_directory(&self.working_dir, "working_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;

        Ok(())
    }

    /// Catalog endpoint of the configured master
    pub fn master_endpoint(&self) -> CatalogEndpoint {
        CatalogEndpoint::new(&self.master_host, self.master_port, &self.database)
    }
}

fn default_master_host() -> String {
    "localhost".to_string()
}
fn default_master_port() -> u16 {
    5432
}
fn default_master_data_dir() -> PathBuf {
    PathBuf::from("/data/master/gpseg-1")
}
fn default_database() -> String {
    "postgres".to_string()
}
fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp/ha-harness")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/ha-harness/logs")
}
fn default_psql() -> String {
    "psql".to_string()
}
