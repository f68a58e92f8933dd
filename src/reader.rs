//! Read side of the audit log: run listing, run detail, filtering, export.
//!
//! The reader keeps no state between calls; every query rescans the segments.
//! Because segments are append-only it can run alongside a writer and simply
//! sees a prefix of the log.

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::journal::{self, AuditEvent, EventKind, EventType, RunStatus, RunSummary, RunType};
use crate::segment::{self, Segment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Header and summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub run_id: Uuid,
    pub run_type: RunType,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub app_version: String,
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_target_id: Option<Uuid>,
    pub summary: RunSummary,
    /// No RUN_END was found and no live writer owns the run.
    #[serde(default)]
    pub interrupted: bool,
    pub event_count: usize,
}

impl RunInfo {
    fn from_start(event: &AuditEvent) -> Option<Self> {
        let EventKind::RunStart {
            run_type,
            app_version,
            machine_id,
            undo_target_id,
        } = &event.kind
        else {
            return None;
        };
        Some(Self {
            run_id: event.run_id,
            run_type: *run_type,
            status: RunStatus::InProgress,
            start_time: event.timestamp,
            end_time: None,
            app_version: app_version.clone(),
            machine_id: machine_id.clone(),
            undo_target_id: *undo_target_id,
            summary: RunSummary::default(),
            interrupted: false,
            event_count: 1,
        })
    }

    /// Fold one more event of this run into the header.
    fn observe(&mut self, event: &AuditEvent) {
        self.event_count += 1;
        match &event.kind {
            EventKind::RunEnd {
                final_status,
                summary,
            } => {
                self.status = *final_status;
                self.summary = *summary;
                self.end_time = Some(event.timestamp);
            }
            EventKind::Move { .. } => self.summary.moved += 1,
            EventKind::DuplicateDetected { .. } => self.summary.duplicates += 1,
            EventKind::RouteToReview { .. } => self.summary.routed_review += 1,
            EventKind::Skip { .. } => self.summary.skipped += 1,
            EventKind::Error { .. } => self.summary.errors += 1,
            EventKind::RunStart { .. } => {}
        }
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}

/// Event-type filter; an empty set matches everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    pub fn types(event_types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: event_types.into_iter().collect(),
        }
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event.event_type())
    }
}

/// Standalone export of a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunExport {
    pub run: RunInfo,
    pub events: Vec<AuditEvent>,
}

pub struct AuditReader {
    dir: PathBuf,
}

impl AuditReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.log_directory.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every event across all retained segments, in append order.
    pub fn load_events(&self) -> Result<Vec<AuditEvent>> {
        let segments = segment::list_segments(&self.dir)?;
        Ok(read_segments(&segments)?.into_iter().flatten().collect())
    }

    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let events = self.load_events()?;
        Ok(self.build_runs(&events))
    }

    pub fn get_run_by_id(&self, run_id: Uuid) -> Result<RunInfo> {
        self.list_runs()?
            .into_iter()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| AuditError::NotFound(format!("run {}", run_id)))
    }

    /// All events of a run in original append order.
    pub fn get_run(&self, run_id: Uuid) -> Result<Vec<AuditEvent>> {
        let events: Vec<AuditEvent> = self
            .load_events()?
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect();
        if events.is_empty() {
            return Err(AuditError::NotFound(format!("run {}", run_id)));
        }
        Ok(events)
    }

    pub fn filter_events(&self, run_id: Uuid, filter: &EventFilter) -> Result<Vec<AuditEvent>> {
        Ok(self
            .get_run(run_id)?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }

    pub fn get_latest_run(&self) -> Result<RunInfo> {
        self.list_runs()?
            .pop()
            .ok_or_else(|| AuditError::NotFound("no runs".to_string()))
    }

    /// Resolve a full run id or a unique prefix of one.
    pub fn resolve_run_id(&self, id: &str) -> Result<Uuid> {
        if let Ok(full) = Uuid::parse_str(id) {
            return Ok(full);
        }
        let needle = id.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(AuditError::NotFound("empty run id".to_string()));
        }
        let matches: Vec<Uuid> = self
            .list_runs()?
            .into_iter()
            .map(|r| r.run_id)
            .filter(|r| r.to_string().starts_with(&needle))
            .collect();
        match matches.as_slice() {
            [one] => Ok(*one),
            [] => Err(AuditError::NotFound(format!("run {}", id))),
            _ => Err(AuditError::NotFound(format!(
                "run prefix {} is ambiguous ({} matches)",
                id,
                matches.len()
            ))),
        }
    }

    /// Write the run header and its events to `out` as one JSON document.
    pub fn export_run(&self, run_id: Uuid, out: &Path) -> Result<()> {
        let export = RunExport {
            run: self.get_run_by_id(run_id)?,
            events: self.get_run(run_id)?,
        };
        let parent = match out.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| AuditError::fs(parent, e))?;
        serde_json::to_writer_pretty(&mut tmp, &export)?;
        tmp.write_all(b"\n").map_err(|e| AuditError::fs(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| AuditError::fs(out, e))?;
        tmp.persist(out).map_err(|e| AuditError::fs(out, e.error))?;
        tracing::info!(run_id = %run_id, out = %out.display(), "exported run");
        Ok(())
    }

    /// Group events into runs, ordered by start time.
    fn build_runs(&self, events: &[AuditEvent]) -> Vec<RunInfo> {
        let mut order: Vec<Uuid> = Vec::new();
        let mut runs: HashMap<Uuid, RunInfo> = HashMap::new();
        for event in events {
            if let Some(run) = runs.get_mut(&event.run_id) {
                run.observe(event);
            } else if let Some(run) = RunInfo::from_start(event) {
                order.push(run.run_id);
                runs.insert(run.run_id, run);
            } else {
                tracing::debug!(run_id = %event.run_id, "event without a RUN_START, ignoring");
            }
        }

        let live = crate::lock::active_run(&self.dir);
        let mut listed: Vec<RunInfo> = order
            .into_iter()
            .filter_map(|id| runs.remove(&id))
            .map(|mut run| {
                if run.status == RunStatus::InProgress && live != Some(run.run_id) {
                    run.status = RunStatus::Failed;
                    run.interrupted = true;
                }
                run
            })
            .collect();
        listed.sort_by_key(|r| r.start_time);
        listed
    }
}

/// Parse one segment.
///
/// A final line with no trailing newline is a torn write and is skipped.
/// Any other unparseable line is an error.
pub fn read_segment(path: &Path) -> Result<Vec<AuditEvent>> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        // Pruned between listing and reading.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AuditError::fs(path, e)),
    };
    let torn_tail = content.last().is_some_and(|b| *b != b'\n');
    let lines: Vec<(usize, &[u8])> = content
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.trim_ascii().is_empty())
        .collect();
    let last = lines.len().saturating_sub(1);
    let mut events = Vec::with_capacity(lines.len());
    for (idx, (line_no, line)) in lines.into_iter().enumerate() {
        match journal::decode_line(line) {
            Ok(event) => events.push(event),
            Err(e) if torn_tail && idx == last => {
                tracing::warn!(
                    segment = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping torn final audit line"
                );
            }
            Err(source) => {
                return Err(AuditError::Parse {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    source,
                });
            }
        }
    }
    Ok(events)
}

#[cfg(feature = "parallel")]
fn read_segments(segments: &[Segment]) -> Result<Vec<Vec<AuditEvent>>> {
    use rayon::prelude::*;
    segments.par_iter().map(|s| read_segment(&s.path)).collect()
}

#[cfg(not(feature = "parallel"))]
fn read_segments(segments: &[Segment]) -> Result<Vec<Vec<AuditEvent>>> {
    segments.iter().map(|s| read_segment(&s.path)).collect()
}
