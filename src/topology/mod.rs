//! Cluster topology as read from the segment configuration catalog.
//!
//! A [`Cluster`] is an immutable snapshot. Nothing caches one across
//! actions; every check re-reads the catalog.

mod discovery;
mod printer;
pub use discovery::*;
pub use printer::*;


use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::constants::SEGMENT_CONFIGURATION_COLUMNS;
use crate::CatalogEndpoint;
use crate::CatalogRow;
use crate::DiscoveryError;
use crate::Result;
use crate::StateMismatchError;

/// Content id shared by the master and the standby
pub const MASTER_CONTENT_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentRole {
    Master,
    Standby,
    Primary,
    Mirror,
}

impl SegmentRole {
    /// Maps a catalog `(content, role)` pair onto a role.
    pub fn from_catalog(
        content_id: i32,
        code: &str,
    ) -> Option<Self> {
        match (content_id == MASTER_CONTENT_ID, code.trim()) {
            (true, "p") => Some(SegmentRole::Master),
            (true, "m") => Some(SegmentRole::Standby),
            (false, "p") => Some(SegmentRole::Primary),
            (false, "m") => Some(SegmentRole::Mirror),
            _ => None,
        }
    }

    /// Catalog role code
    pub fn code(&self) -> char {
        match self {
            SegmentRole::Master | SegmentRole::Primary => 'p',
            SegmentRole::Standby | SegmentRole::Mirror => 'm',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SegmentRole::Master => "master",
            SegmentRole::Standby => "standby",
            SegmentRole::Primary => "primary",
            SegmentRole::Mirror => "mirror",
        }
    }
}

impl fmt::Display for SegmentRole {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured lookup key for a segment of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentSelector {
    Master,
    Standby,
    Primary,
    Mirror,
}

impl SegmentSelector {
    pub fn role(&self) -> SegmentRole {
        match self {
            SegmentSelector::Master => SegmentRole::Master,
            SegmentSelector::Standby => SegmentRole::Standby,
            SegmentSelector::Primary => SegmentRole::Primary,
            SegmentSelector::Mirror => SegmentRole::Mirror,
        }
    }
}

impl std::str::FromStr for SegmentSelector {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" => Ok(SegmentSelector::Master),
            "standby" => Ok(SegmentSelector::Standby),
            "primary" => Ok(SegmentSelector::Primary),
            "mirror" => Ok(SegmentSelector::Mirror),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown segment kind `{other}`"
            ))),
        }
    }
}

/// One database instance as recorded in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub dbid: i32,
    pub content_id: i32,
    pub role: SegmentRole,
    pub preferred_role: SegmentRole,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub is_up: bool,
}

impl Segment {
    /// Builds a segment from a row of `SEGMENT_CONFIGURATION_QUERY`.
    pub fn from_row(row: &CatalogRow) -> Result<Self> {
        let malformed = |reason: String| DiscoveryError::Malformed {
            row: row.join("|"),
            reason,
        };

        if row.len() != SEGMENT_CONFIGURATION_COLUMNS {
            return Err(malformed(format!(
                "expected {} columns, found {}",
                SEGMENT_CONFIGURATION_COLUMNS,
                row.len()
            ))
            .into());
        }

        let dbid = row[0]
            .trim()
            .parse::<i32>()
            .map_err(|e| malformed(format!("dbid: {e}")))?;
        let content_id = row[1]
            .trim()
            .parse::<i32>()
            .map_err(|e| malformed(format!("content: {e}")))?;
        let role = SegmentRole::from_catalog(content_id, &row[2])
            .ok_or_else(|| malformed(format!("unknown role `{}`", row[2])))?;
        let preferred_role = SegmentRole::from_catalog(content_id, &row[3])
            .ok_or_else(|| malformed(format!("unknown preferred role `{}`", row[3])))?;
        let port = row[5]
            .trim()
            .parse::<u16>()
            .map_err(|e| malformed(format!("port: {e}")))?;
        let is_up = match row[7].trim() {
            "u" => true,
            "d" => false,
            other => return Err(malformed(format!("unknown status `{other}`")).into()),
        };

        Ok(Segment {
            dbid,
            content_id,
            role,
            preferred_role,
            host: row[4].trim().to_string(),
            port,
            data_dir: PathBuf::from(row[6].trim()),
            is_up,
        })
    }

    pub fn endpoint(
        &self,
        database: &str,
    ) -> CatalogEndpoint {
        CatalogEndpoint::new(&self.host, self.port, database)
    }

    pub fn is_data_segment(&self) -> bool {
        self.content_id > MASTER_CONTENT_ID
    }

    /// Acting in the role it was configured for
    pub fn in_preferred_role(&self) -> bool {
        self.role == self.preferred_role
    }
}

impl fmt::Display for Segment {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "dbid={} content={} role={} preferred={} {}:{} {} {}",
            self.dbid,
            self.content_id,
            self.role.code(),
            self.preferred_role.code(),
            self.host,
            self.port,
            self.data_dir.display(),
            if self.is_up { "u" } else { "d" }
        )
    }
}

/// Immutable view of every instance in the cluster, ordered by dbid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    segments: Vec<Segment>,
}

impl Cluster {
    /// Rejects duplicate dbids; the result is sorted by dbid.
    pub fn from_segments(mut segments: Vec<Segment>) -> Result<Self> {
        segments.sort_by_key(|s| s.dbid);
        if let Some(pair) = segments.windows(2).find(|w| w[0].dbid == w[1].dbid) {
            return Err(DiscoveryError::Malformed {
                row: pair[1].to_string(),
                reason: format!("duplicate dbid {}", pair[1].dbid),
            }
            .into());
        }
        Ok(Self { segments })
    }

    pub fn from_rows(rows: &[CatalogRow]) -> Result<Self> {
        let segments = rows.iter().map(Segment::from_row).collect::<Result<Vec<_>>>()?;
        Self::from_segments(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments_with(
        &self,
        role: SegmentRole,
    ) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| s.role == role)
    }

    pub fn master(&self) -> Option<&Segment> {
        self.segments_with(SegmentRole::Master).next()
    }

    pub fn standby(&self) -> Option<&Segment> {
        self.segments_with(SegmentRole::Standby).next()
    }

    pub fn primaries(&self) -> Vec<&Segment> {
        self.segments_with(SegmentRole::Primary).collect()
    }

    pub fn mirrors(&self) -> Vec<&Segment> {
        self.segments_with(SegmentRole::Mirror).collect()
    }

    /// Every instance with `content >= 0`
    pub fn data_segments(&self) -> Vec<&Segment> {
        self.segments.iter().filter(|s| s.is_data_segment()).collect()
    }

    pub fn by_dbid(
        &self,
        dbid: i32,
    ) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&dbid, |s| s.dbid)
            .ok()
            .map(|i| &self.segments[i])
    }

    /// The acting primary and mirror for `content_id`
    pub fn pair(
        &self,
        content_id: i32,
    ) -> (Option<&Segment>, Option<&Segment>) {
        let of = |role| {
            self.segments
                .iter()
                .find(|s| s.content_id == content_id && s.role == role)
        };
        (of(SegmentRole::Primary), of(SegmentRole::Mirror))
    }

    /// First segment (lowest dbid) of the selected kind
    pub fn select(
        &self,
        selector: SegmentSelector,
    ) -> Option<&Segment> {
        self.segments_with(selector.role()).next()
    }

    pub fn mirroring_enabled(&self) -> bool {
        self.segments_with(SegmentRole::Mirror).next().is_some()
    }

    /// Segments rendered one per line, for error reports
    pub fn describe_rows(&self) -> Vec<String> {
        self.segments.iter().map(Segment::to_string).collect()
    }

    /// Verifies the structural invariants of a healthy catalog:
    /// exactly one master, at most one standby, exactly one acting primary
    /// per data content, and when mirroring is enabled exactly one mirror
    /// per data content.
    pub fn check_invariants(&self) -> Result<()> {
        let mut violations = Vec::new();

        let masters = self.segments_with(SegmentRole::Master).count();
        if masters != 1 {
            violations.push(format!("{masters} master rows"));
        }
        let standbys = self.segments_with(SegmentRole::Standby).count();
        if standbys > 1 {
            violations.push(format!("{standbys} standby rows"));
        }

        let mirroring = self.mirroring_enabled();
        let mut contents: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
        for segment in self.data_segments() {
            let entry = contents.entry(segment.content_id).or_default();
            match segment.role {
                SegmentRole::Primary => entry.0 += 1,
                SegmentRole::Mirror => entry.1 += 1,
                _ => {}
            }
        }
        for (content, (primaries, mirrors)) in contents {
            if primaries != 1 {
                violations.push(format!("content {content}: {primaries} acting primaries"));
            }
            if mirroring && mirrors != 1 {
                violations.push(format!("content {content}: {mirrors} mirrors"));
            }
        }

        if violations.is_empty() {
            return Ok(());
        }
        Err(StateMismatchError {
            check: format!("cluster invariants ({})", violations.join("; ")),
            expected: "one master, at most one standby, one primary (and mirror) per content"
                .to_string(),
            observed: self.describe_rows(),
        }
        .into())
    }
}
