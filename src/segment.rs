//! Log segments: naming, discovery and rotation predicates.
//!
//! Segments are named `audit-<seq>-<created>.jsonl`. The sequence number is
//! strictly increasing, so sorting by it reconstructs chronological order.
//! The segment with the highest sequence is active; every other one is sealed
//! and never written again.

use crate::config::RotationPeriod;
use crate::error::{AuditError, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const PREFIX: &str = "audit-";
const EXTENSION: &str = ".jsonl";
const CREATED_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq: u64,
    pub created: DateTime<Utc>,
    pub path: PathBuf,
}

impl Segment {
    pub fn file_name(seq: u64, created: DateTime<Utc>) -> String {
        format!(
            "{}{:08}-{}{}",
            PREFIX,
            seq,
            created.format(CREATED_FORMAT),
            EXTENSION
        )
    }

    /// Recognize a segment file by name. Anything else in the directory is ignored.
    pub fn parse(path: &Path) -> Option<Segment> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
        let (seq, created) = stem.split_once('-')?;
        let seq = seq.parse().ok()?;
        let created = NaiveDateTime::parse_from_str(created, CREATED_FORMAT)
            .ok()?
            .and_utc();
        Some(Segment {
            seq,
            created,
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> Result<u64> {
        std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| AuditError::fs(&self.path, e))
    }
}

/// All segments in `dir`, oldest first. A missing directory has no segments.
pub fn list_segments(dir: &Path) -> Result<Vec<Segment>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| AuditError::fs(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(segment) = Segment::parse(entry.path()) {
            segments.push(segment);
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

/// Create the next segment. Fails rather than reuse an existing file.
pub fn create_segment(dir: &Path, seq: u64, created: DateTime<Utc>) -> Result<(Segment, File)> {
    // The name only carries whole seconds.
    let created = created.with_nanosecond(0).unwrap_or(created);
    let path = dir.join(Segment::file_name(seq, created));
    let file = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&path)
        .map_err(|e| AuditError::durability(&path, e))?;
    sync_dir(dir);
    Ok((Segment { seq, created, path }, file))
}

/// Make a new directory entry durable before events land in it.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Whether the configured period has elapsed since `created`.
pub fn period_elapsed(period: RotationPeriod, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match period {
        RotationPeriod::None => false,
        RotationPeriod::Daily => created.date_naive() != now.date_naive(),
        RotationPeriod::Weekly => {
            let (a, b) = (created.iso_week(), now.iso_week());
            (a.year(), a.week()) != (b.year(), b.week())
        }
    }
}

/// Whether appending `incoming` bytes would push the segment past `limit`.
///
/// An empty segment always accepts the event so a single oversized line
/// cannot cause endless rotation.
pub fn size_exceeded(limit: u64, current: u64, incoming: u64) -> bool {
    limit != 0 && current > 0 && current + incoming > limit
}
