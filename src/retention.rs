//! Retention pruning of sealed segments.
//!
//! Pruning works at run granularity: a sealed segment is deleted only when
//! every run with an event in it has expired, so a run is never left with a
//! missing head or tail. A run expires when its newest event is older than
//! `min_retention_days` and it falls outside either `retention_days` or the
//! `retention_runs` most recent runs. The floor always wins.

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::journal::EventKind;
use crate::reader::read_segment;
use crate::segment;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
}

#[derive(Debug)]
struct RunAge {
    started: Option<DateTime<Utc>>,
    newest: DateTime<Utc>,
}

pub fn prune(config: &AuditConfig, now: DateTime<Utc>) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if config.retention_days == 0 && config.retention_runs == 0 {
        return Ok(report);
    }

    let segments = segment::list_segments(&config.log_directory)?;
    // The newest segment is active and never pruned.
    let Some((_active, sealed)) = segments.split_last() else {
        return Ok(report);
    };
    let sealed: HashSet<&PathBuf> = sealed.iter().map(|s| &s.path).collect();

    let mut runs: HashMap<Uuid, RunAge> = HashMap::new();
    let mut touching: Vec<(&PathBuf, DateTime<Utc>, HashSet<Uuid>)> = Vec::new();
    for seg in &segments {
        let mut ids = HashSet::new();
        for event in read_segment(&seg.path)? {
            ids.insert(event.run_id);
            let age = runs.entry(event.run_id).or_insert(RunAge {
                started: None,
                newest: event.timestamp,
            });
            age.newest = age.newest.max(event.timestamp);
            if let EventKind::RunStart { .. } = event.kind {
                age.started = Some(event.timestamp);
            }
        }
        touching.push((&seg.path, seg.created, ids));
    }

    let mut recent: Vec<(&Uuid, &RunAge)> = runs.iter().collect();
    recent.sort_by_key(|(_, age)| std::cmp::Reverse(age.started.unwrap_or(age.newest)));
    let protected: HashSet<Uuid> = if config.retention_runs > 0 {
        recent
            .iter()
            .take(config.retention_runs as usize)
            .map(|(id, _)| **id)
            .collect()
    } else {
        HashSet::new()
    };

    let floor = Duration::days(i64::from(config.min_retention_days));
    let max_age = Duration::days(i64::from(config.retention_days));
    let expired = |newest: DateTime<Utc>, protected_run: bool| {
        let age = now - newest;
        if age < floor {
            return false;
        }
        let by_age = config.retention_days > 0 && age >= max_age;
        let by_count = config.retention_runs > 0 && !protected_run;
        by_age || by_count
    };

    for (path, created, ids) in touching {
        if !sealed.contains(path) {
            continue;
        }
        let removable = if ids.is_empty() {
            expired(created, false)
        } else {
            ids.iter()
                .all(|id| expired(runs[id].newest, protected.contains(id)))
        };
        if removable {
            std::fs::remove_file(path).map_err(|e| AuditError::fs(path, e))?;
            tracing::info!(segment = %path.display(), "removed expired audit segment");
            report.removed.push(path.clone());
        } else {
            report.kept += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{self, AuditEvent, ReasonCode, RunType, status};
    use std::io::Write;

    fn write_run(dir: &std::path::Path, seq: u64, at: DateTime<Utc>) -> (PathBuf, Uuid) {
        let (seg, mut file) = segment::create_segment(dir, seq, at).unwrap();
        let run_id = Uuid::new_v4();
        let kinds = vec![
            EventKind::RunStart {
                run_type: RunType::Organize,
                app_version: "0.1.0".into(),
                machine_id: "host".into(),
                undo_target_id: None,
            },
            EventKind::Skip {
                source_path: "/in/a".into(),
                reason_code: ReasonCode::Unclassified,
            },
        ];
        for kind in kinds {
            let mut event = AuditEvent::new(run_id, status::STARTED, kind);
            event.timestamp = at;
            file.write_all(journal::encode_line(&event).unwrap().as_bytes())
                .unwrap();
        }
        (seg.path, run_id)
    }

    #[test]
    fn floor_protects_young_runs() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let (old, _) = write_run(dir.path(), 1, now - Duration::days(30));
        let (young, _) = write_run(dir.path(), 2, now - Duration::days(3));
        let (_active, _) = write_run(dir.path(), 3, now);

        let mut config = AuditConfig::new(dir.path());
        config.retention_days = 1;
        config.min_retention_days = 14;
        let report = prune(&config, now).unwrap();
        assert_eq!(report.removed, vec![old]);
        assert!(young.exists());
    }

    #[test]
    fn run_count_retention_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let (a, _) = write_run(dir.path(), 1, now - Duration::days(40));
        let (b, _) = write_run(dir.path(), 2, now - Duration::days(30));
        let (c, _) = write_run(dir.path(), 3, now - Duration::days(20));

        let mut config = AuditConfig::new(dir.path());
        config.retention_days = 0;
        config.retention_runs = 2;
        config.min_retention_days = 0;
        let report = prune(&config, now).unwrap();
        assert_eq!(report.removed, vec![a]);
        assert!(b.exists());
        assert!(c.exists());
    }

    #[test]
    fn active_segment_is_never_removed() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let (only, _) = write_run(dir.path(), 1, now - Duration::days(400));
        let mut config = AuditConfig::new(dir.path());
        config.retention_days = 1;
        config.min_retention_days = 0;
        let report = prune(&config, now).unwrap();
        assert!(report.removed.is_empty());
        assert!(only.exists());
    }

    #[test]
    fn run_spanning_segments_keeps_its_head() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let (head, run_id) = write_run(dir.path(), 1, now - Duration::days(60));
        // Tail of the same run lands in the next segment and is recent.
        let (seg, mut file) = segment::create_segment(dir.path(), 2, now).unwrap();
        let tail = AuditEvent::new(
            run_id,
            status::SKIPPED,
            EventKind::Skip {
                source_path: "/in/b".into(),
                reason_code: ReasonCode::Unclassified,
            },
        );
        file.write_all(journal::encode_line(&tail).unwrap().as_bytes())
            .unwrap();
        write_run(dir.path(), 3, now);

        let mut config = AuditConfig::new(dir.path());
        config.retention_days = 30;
        config.min_retention_days = 0;
        let report = prune(&config, now).unwrap();
        assert!(report.removed.is_empty());
        assert!(head.exists());
        assert!(seg.path.exists());
    }
}
