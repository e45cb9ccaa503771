// -
// Catalog queries

/// Full segment configuration, one row per instance
pub const SEGMENT_CONFIGURATION_QUERY: &str = "SELECT dbid, content, role, preferred_role, hostname, port, datadir, status FROM gp_segment_configuration ORDER BY dbid";

/// Number of columns returned by [`SEGMENT_CONFIGURATION_QUERY`]
pub(crate) const SEGMENT_CONFIGURATION_COLUMNS: usize = 8;

/// Replication streams served by the current master
pub const REPLICATION_QUERY: &str = "SELECT pid, state, sync_state FROM pg_stat_replication";

pub const PING_QUERY: &str = "SELECT 1";

/// Asks the fault prober to scan all segments now
pub const FTS_PROBE_QUERY: &str = "SELECT gp_request_fts_probe_scan()";

pub const DATA_SEGMENT_COUNT_QUERY: &str =
    "SELECT count(*) FROM gp_segment_configuration WHERE -1 < content";

/// Per-table expansion progress
pub const EXPANSION_STATUS_QUERY: &str =
    "SELECT rank, expansion_started FROM gpexpand.status_detail ORDER BY rank";

// -
// Process control

/// Inside a segment data directory
pub const POSTMASTER_PID_FILE: &str = "postmaster.pid";

/// Base delay between pid file read attempts, multiplied by the attempt number
pub(crate) const PID_FILE_RETRY_STEP_MS: u64 = 100;

/// Process name matched when every instance on a host is killed
pub const POSTMASTER_PROCESS_NAME: &str = "postgres";

// -
// Expansion

pub const INPUTFILE_PREFIX: &str = "gpexpand_inputfile_";
pub(crate) const INPUTFILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub(crate) const INPUTFILE_FIELDS: usize = 7;
