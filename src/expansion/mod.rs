//! Cluster expansion: the inputfile describing new segments, and the checks
//! run after initialization and redistribution.

mod coordinator;
pub use coordinator::*;


use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::NaiveDateTime;

use crate::constants::INPUTFILE_FIELDS;
use crate::constants::INPUTFILE_PREFIX;
use crate::constants::INPUTFILE_TIMESTAMP_FORMAT;
use crate::Error;
use crate::RankOrderError;
use crate::Result;
use crate::SegmentRole;

/// One new instance, as a line of the inputfile:
/// `host:address:port:datadir:dbid:contentId:role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSegmentSpec {
    pub host: String,
    pub address: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub dbid: i32,
    pub content_id: i32,
    pub role: SegmentRole,
}

impl NewSegmentSpec {
    pub fn parse_line(line: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidInput(format!("inputfile line `{line}`: {reason}"));

        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() != INPUTFILE_FIELDS {
            return Err(invalid(format!(
                "expected {} fields, found {}",
                INPUTFILE_FIELDS,
                fields.len()
            )));
        }

        let port = fields[2]
            .parse::<u16>()
            .map_err(|e| invalid(format!("port: {e}")))?;
        let dbid = fields[4]
            .parse::<i32>()
            .map_err(|e| invalid(format!("dbid: {e}")))?;
        let content_id = fields[5]
            .parse::<i32>()
            .map_err(|e| invalid(format!("content: {e}")))?;
        if content_id < 0 {
            return Err(invalid(format!("content {content_id} is not a data segment")));
        }
        let role = SegmentRole::from_catalog(content_id, fields[6])
            .ok_or_else(|| invalid(format!("unknown role `{}`", fields[6])))?;

        Ok(Self {
            host: fields[0].to_string(),
            address: fields[1].to_string(),
            port,
            data_dir: PathBuf::from(fields[3]),
            dbid,
            content_id,
            role,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.host,
            self.address,
            self.port,
            self.data_dir.display(),
            self.dbid,
            self.content_id,
            self.role.code()
        )
    }
}

impl fmt::Display for NewSegmentSpec {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// A table whose redistribution priority is pinned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedTable {
    /// Fully qualified name, e.g. `public.expansionranktest8`
    pub table: String,
    pub rank: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionPlan {
    pub segments: Vec<NewSegmentSpec>,
    pub ranked_tables: Vec<RankedTable>,
}

impl ExpansionPlan {
    /// Parses inputfile text; blank lines are ignored.
    pub fn parse_inputfile(text: &str) -> Result<Self> {
        let segments = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(NewSegmentSpec::parse_line)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            segments,
            ranked_tables: Vec::new(),
        })
    }

    pub fn render_inputfile(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&segment.to_line());
            out.push('\n');
        }
        out
    }

    pub fn with_ranked_tables(
        mut self,
        tables: Vec<RankedTable>,
    ) -> Self {
        self.ranked_tables = tables;
        self
    }

    /// Number of instances the plan adds
    pub fn requested_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::InvalidInput("expansion plan has no segments".to_string()));
        }

        let mut dbids = HashSet::new();
        for segment in &self.segments {
            if !dbids.insert(segment.dbid) {
                return Err(Error::InvalidInput(format!("duplicate dbid {}", segment.dbid)));
            }
            if segment.content_id < 0 {
                return Err(Error::InvalidInput(format!(
                    "dbid {} has negative content {}",
                    segment.dbid, segment.content_id
                )));
            }
        }

        let with_mirrors = self.segments.iter().any(|s| s.role == SegmentRole::Mirror);
        if with_mirrors {
            let mut per_content: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
            for segment in &self.segments {
                let entry = per_content.entry(segment.content_id).or_default();
                match segment.role {
                    SegmentRole::Primary => entry.0 += 1,
                    _ => entry.1 += 1,
                }
            }
            let unbalanced = per_content
                .iter()
                .find(|(_, counts)| counts.0 != 1 || counts.1 != 1);
            if let Some((content, (primaries, mirrors))) = unbalanced {
                return Err(Error::InvalidInput(format!(
                    "content {content} has {primaries} primaries and {mirrors} mirrors"
                )));
            }
        }

        let mut tables = HashSet::new();
        for ranked in &self.ranked_tables {
            if !tables.insert(ranked.table.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "table {} ranked twice",
                    ranked.table
                )));
            }
        }
        Ok(())
    }
}

/// `gpexpand_inputfile_<YYYYmmdd_HHMMSS>`
pub fn inputfile_name(at: NaiveDateTime) -> String {
    format!("{}{}", INPUTFILE_PREFIX, at.format(INPUTFILE_TIMESTAMP_FORMAT))
}

/// When redistribution of a ranked table began
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankStart {
    pub rank: i32,
    pub started: NaiveDateTime,
}

/// Lower ranks must start no later than any higher rank. Ties are allowed.
pub fn check_rank_order(starts: &[RankStart]) -> Result<()> {
    let mut sorted: Vec<&RankStart> = starts.iter().collect();
    sorted.sort_by_key(|s| (s.rank, s.started));

    // latest start among strictly lower ranks seen so far
    let mut latest_lower: Option<&RankStart> = None;
    let mut group_latest: Option<&RankStart> = None;

    for start in sorted {
        if let Some(group) = group_latest {
            if group.rank != start.rank {
                latest_lower = match latest_lower {
                    Some(prev) if prev.started >= group.started => Some(prev),
                    _ => Some(group),
                };
            }
        }
        if let Some(earlier) = latest_lower {
            if start.started < earlier.started {
                return Err(RankOrderError {
                    earlier_rank: earlier.rank,
                    earlier_started: earlier.started.to_string(),
                    later_rank: start.rank,
                    later_started: start.started.to_string(),
                }
                .into());
            }
        }
        group_latest = Some(start);
    }
    Ok(())
}

/// Parses a catalog timestamp, with or without fractional seconds and zone.
/// Zoned values are normalized to UTC.
pub fn parse_catalog_timestamp(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ts);
    }
    DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z")
        .map(|ts| ts.naive_utc())
        .map_err(|e| Error::InvalidInput(format!("timestamp `{value}`: {e}")))
}
