//! Fixtures shared by the unit tests: catalog rows for a small mirrored
//! cluster and canned command outputs.

use std::path::PathBuf;

use crate::CatalogEndpoint;
use crate::CatalogRow;
use crate::CommandOutput;
use crate::Segment;
use crate::SegmentRole;

pub(crate) const MASTER_HOST: &str = "mdw";
pub(crate) const STANDBY_HOST: &str = "smdw";
pub(crate) const MASTER_PORT: u16 = 5432;
pub(crate) const STANDBY_DBID: i32 = 6;

#[allow(clippy::too_many_arguments)]
pub(crate) fn row(
    dbid: i32,
    content: i32,
    role: &str,
    preferred_role: &str,
    host: &str,
    port: u16,
    data_dir: &str,
    status: &str,
) -> CatalogRow {
    vec![
        dbid.to_string(),
        content.to_string(),
        role.to_string(),
        preferred_role.to_string(),
        host.to_string(),
        port.to_string(),
        data_dir.to_string(),
        status.to_string(),
    ]
}

/// Master plus two contents, each with a primary and a mirror
pub(crate) fn mirrored_cluster_rows() -> Vec<CatalogRow> {
    vec![
        row(1, -1, "p", "p", MASTER_HOST, MASTER_PORT, "/data/master/gpseg-1", "u"),
        row(2, 0, "p", "p", "sdw1", 6000, "/data/primary/gpseg0", "u"),
        row(3, 1, "p", "p", "sdw2", 6000, "/data/primary/gpseg1", "u"),
        row(4, 0, "m", "m", "sdw2", 7000, "/data/mirror/gpseg0", "u"),
        row(5, 1, "m", "m", "sdw1", 7000, "/data/mirror/gpseg1", "u"),
    ]
}

pub(crate) fn standby_row() -> CatalogRow {
    row(
        STANDBY_DBID,
        -1,
        "m",
        "m",
        STANDBY_HOST,
        MASTER_PORT,
        "/data/standby/gpseg-1",
        "u",
    )
}

pub(crate) fn with_standby(mut rows: Vec<CatalogRow>) -> Vec<CatalogRow> {
    rows.push(standby_row());
    rows
}

/// Catalog as read from the standby after it took over
pub(crate) fn promoted_standby_rows() -> Vec<CatalogRow> {
    let mut rows: Vec<CatalogRow> = mirrored_cluster_rows()
        .into_iter()
        .filter(|r| r[1] != "-1")
        .collect();
    rows.push(row(
        STANDBY_DBID,
        -1,
        "p",
        "p",
        STANDBY_HOST,
        MASTER_PORT,
        "/data/standby/gpseg-1",
        "u",
    ));
    rows
}

pub(crate) fn segment(
    dbid: i32,
    content_id: i32,
    role: SegmentRole,
    host: &str,
    port: u16,
) -> Segment {
    Segment {
        dbid,
        content_id,
        role,
        preferred_role: role,
        host: host.to_string(),
        port,
        data_dir: PathBuf::from(format!("/data/gpseg{content_id}")),
        is_up: true,
    }
}

pub(crate) fn master_endpoint() -> CatalogEndpoint {
    CatalogEndpoint::new(MASTER_HOST, MASTER_PORT, "postgres")
}

pub(crate) fn standby_endpoint() -> CatalogEndpoint {
    CatalogEndpoint::new(STANDBY_HOST, MASTER_PORT, "postgres")
}

pub(crate) fn output(
    stdout: &str,
    stderr: &str,
    exit_code: i32,
) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

pub(crate) fn ok(stdout: &str) -> CommandOutput {
    output(stdout, "", 0)
}
