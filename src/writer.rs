//! Durable, rotation-aware audit journal plus run bookkeeping.
//!
//! Every record call appends one line and flushes it to disk before
//! returning. Callers must not touch the filesystem for a file until the
//! matching record call has returned `Ok`.

use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::identity::FileIdentity;
use crate::journal::{
    self, AuditEvent, ErrorDetails, EventKind, ReasonCode, RunStatus, RunSummary, RunType, status,
};
use crate::lock::WriterLock;
use crate::segment::{self, Segment};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// An open run. Returned by `start_run`, consumed by `end_run`.
#[derive(Debug)]
pub struct RunHandle {
    id: Uuid,
    run_type: RunType,
    started_at: DateTime<Utc>,
    summary: RunSummary,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn set_total_files(&mut self, total: u64) {
        self.summary.total_files = total;
    }
}

/// Anything that can durably append audit events.
///
/// Implementors provide `append`; the record calls build the event, append
/// it, and only then update the run's counters.
pub trait AuditRecorder {
    fn append(&mut self, event: AuditEvent) -> Result<()>;

    /// Called once a run is durably started or ended.
    fn run_changed(&mut self, _active: Option<Uuid>) {}

    fn start_run(&mut self, app_version: &str, machine_id: &str) -> Result<RunHandle> {
        self.begin(RunType::Organize, app_version, machine_id, None)
    }

    fn start_undo_run(
        &mut self,
        app_version: &str,
        machine_id: &str,
        target: Uuid,
    ) -> Result<RunHandle> {
        self.begin(RunType::Undo, app_version, machine_id, Some(target))
    }

    #[doc(hidden)]
    fn begin(
        &mut self,
        run_type: RunType,
        app_version: &str,
        machine_id: &str,
        undo_target_id: Option<Uuid>,
    ) -> Result<RunHandle> {
        let event = AuditEvent::new(
            Uuid::new_v4(),
            status::STARTED,
            EventKind::RunStart {
                run_type,
                app_version: app_version.to_string(),
                machine_id: machine_id.to_string(),
                undo_target_id,
            },
        );
        let handle = RunHandle {
            id: event.run_id,
            run_type,
            started_at: event.timestamp,
            summary: RunSummary::default(),
        };
        self.append(event)?;
        self.run_changed(Some(handle.id));
        tracing::info!(run_id = %handle.id, ?run_type, "run started");
        Ok(handle)
    }

    fn record_move(
        &mut self,
        run: &mut RunHandle,
        source: &Path,
        destination: &Path,
        identity: &FileIdentity,
    ) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::PENDING,
            EventKind::Move {
                source_path: source.to_path_buf(),
                destination_path: destination.to_path_buf(),
                file_identity: identity.clone(),
            },
        ))?;
        run.summary.moved += 1;
        Ok(())
    }

    /// Record a file moved back by an undo run.
    fn record_restore(
        &mut self,
        run: &mut RunHandle,
        from: &Path,
        to: &Path,
        identity: &FileIdentity,
    ) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::RESTORED,
            EventKind::Move {
                source_path: from.to_path_buf(),
                destination_path: to.to_path_buf(),
                file_identity: identity.clone(),
            },
        ))?;
        run.summary.moved += 1;
        Ok(())
    }

    fn record_duplicate(
        &mut self,
        run: &mut RunHandle,
        source: &Path,
        predicted_destination: &Path,
        actual_destination: &Path,
        reason: ReasonCode,
        identity: Option<&FileIdentity>,
    ) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::PENDING,
            EventKind::DuplicateDetected {
                source_path: source.to_path_buf(),
                predicted_destination: predicted_destination.to_path_buf(),
                destination_path: actual_destination.to_path_buf(),
                reason_code: reason,
                file_identity: identity.cloned(),
            },
        ))?;
        run.summary.duplicates += 1;
        Ok(())
    }

    fn record_route_to_review(
        &mut self,
        run: &mut RunHandle,
        source: &Path,
        destination: &Path,
        reason: ReasonCode,
        identity: Option<&FileIdentity>,
    ) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::PENDING,
            EventKind::RouteToReview {
                source_path: source.to_path_buf(),
                destination_path: destination.to_path_buf(),
                reason_code: reason,
                file_identity: identity.cloned(),
            },
        ))?;
        run.summary.routed_review += 1;
        Ok(())
    }

    fn record_skip(&mut self, run: &mut RunHandle, source: &Path, reason: ReasonCode) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::SKIPPED,
            EventKind::Skip {
                source_path: source.to_path_buf(),
                reason_code: reason,
            },
        ))?;
        run.summary.skipped += 1;
        Ok(())
    }

    fn record_error(
        &mut self,
        run: &mut RunHandle,
        source: &Path,
        error_type: &str,
        message: &str,
        operation: &str,
    ) -> Result<()> {
        self.append(AuditEvent::new(
            run.id,
            status::ERROR,
            EventKind::Error {
                source_path: source.to_path_buf(),
                error_details: ErrorDetails {
                    error_type: error_type.to_string(),
                    error_message: message.to_string(),
                },
                operation: operation.to_string(),
            },
        ))?;
        run.summary.errors += 1;
        Ok(())
    }

    /// Finalize the run. `InProgress` is not a terminal state and is written as `Failed`.
    fn end_run(&mut self, run: RunHandle, final_status: RunStatus) -> Result<RunSummary> {
        let final_status = match final_status {
            RunStatus::InProgress => {
                tracing::warn!(run_id = %run.id, "run ended without a terminal status");
                RunStatus::Failed
            }
            other => other,
        };
        self.append(AuditEvent::new(
            run.id,
            final_status.as_str(),
            EventKind::RunEnd {
                final_status,
                summary: run.summary,
            },
        ))?;
        self.run_changed(None);
        tracing::info!(
            run_id = %run.id,
            status = final_status.as_str(),
            moved = run.summary.moved,
            errors = run.summary.errors,
            "run ended"
        );
        Ok(run.summary)
    }
}

struct ActiveSegment {
    segment: Segment,
    file: File,
    len: u64,
}

/// Append-only writer over a directory of JSONL segments.
///
/// Holds the directory lock for its whole lifetime so runs from different
/// writers never interleave.
pub struct AuditWriter {
    config: AuditConfig,
    active: ActiveSegment,
    lock: WriterLock,
}

impl AuditWriter {
    /// Validate the configuration, take the lock, prune, and open the active segment.
    pub fn open(config: AuditConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.log_directory.clone();
        std::fs::create_dir_all(&dir).map_err(|e| AuditError::fs(&dir, e))?;
        let lock = WriterLock::acquire(&dir)?;

        match crate::retention::prune(&config, Utc::now()) {
            Ok(report) if !report.removed.is_empty() => {
                tracing::info!(removed = report.removed.len(), "pruned audit segments");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "audit retention pass failed"),
        }

        let active = match segment::list_segments(&dir)?.pop() {
            Some(last) => Self::reopen(&dir, last)?,
            None => Self::create_next(&dir, 1)?,
        };
        tracing::debug!(segment = %active.segment.path.display(), "audit writer opened");
        Ok(Self {
            config,
            active,
            lock,
        })
    }

    /// Resume appending to `last`, unless a crash left a torn line at its tail.
    fn reopen(dir: &Path, last: Segment) -> Result<ActiveSegment> {
        let len = last.len()?;
        if len > 0 && !ends_with_newline(&last.path)? {
            tracing::warn!(segment = %last.path.display(), "sealing segment with a torn final line");
            return Self::create_next(dir, last.seq + 1);
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&last.path)
            .map_err(|e| AuditError::durability(&last.path, e))?;
        Ok(ActiveSegment {
            segment: last,
            file,
            len,
        })
    }

    fn create_next(dir: &Path, seq: u64) -> Result<ActiveSegment> {
        let (segment, file) = segment::create_segment(dir, seq, Utc::now())?;
        Ok(ActiveSegment {
            segment,
            file,
            len: 0,
        })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn active_segment(&self) -> &Path {
        &self.active.segment.path
    }

    /// Seal the active segment and start the next one.
    pub fn rotate(&mut self) -> Result<()> {
        let sealed = &self.active.segment.path;
        self.active
            .file
            .sync_all()
            .map_err(|e| AuditError::durability(sealed, e))?;
        let next = Self::create_next(&self.config.log_directory, self.active.segment.seq + 1)?;
        tracing::info!(
            sealed = %sealed.display(),
            size = %bytesize::ByteSize::b(self.active.len),
            next = %next.segment.path.display(),
            "rotated audit segment"
        );
        self.active = next;
        Ok(())
    }

    /// Run the retention pass now. The active segment is never touched.
    pub fn prune(&mut self) -> Result<crate::retention::PruneReport> {
        crate::retention::prune(&self.config, Utc::now())
    }

    fn rotate_if_needed(&mut self, incoming: u64, now: DateTime<Utc>) -> Result<()> {
        let by_size = segment::size_exceeded(
            self.config.rotation_size_bytes,
            self.active.len,
            incoming,
        );
        let by_period = self.active.len > 0
            && segment::period_elapsed(
                self.config.rotation_period,
                self.active.segment.created,
                now,
            );
        if by_size || by_period {
            self.rotate()?;
        }
        Ok(())
    }
}

impl AuditRecorder for AuditWriter {
    fn append(&mut self, event: AuditEvent) -> Result<()> {
        let line = journal::encode_line(&event)?;
        self.rotate_if_needed(line.len() as u64, event.timestamp)?;

        let path = &self.active.segment.path;
        let previous = self.active.len;
        let written = self
            .active
            .file
            .write_all(line.as_bytes())
            .and_then(|_| self.active.file.sync_data());
        if let Err(e) = written {
            // Leave no partial line behind.
            if let Err(trunc) = self.active.file.set_len(previous) {
                tracing::warn!(segment = %path.display(), error = %trunc, "failed to trim partial audit line");
            }
            return Err(AuditError::durability(path, e));
        }
        self.active.len += line.len() as u64;
        tracing::debug!(
            run_id = %event.run_id,
            event_type = %event.event_type(),
            segment = %path.display(),
            "appended audit event"
        );
        Ok(())
    }

    fn run_changed(&mut self, active: Option<Uuid>) {
        if let Err(e) = self.lock.set_active_run(active) {
            tracing::warn!(error = %e, "failed to update audit lock");
        }
    }
}

fn ends_with_newline(path: &Path) -> Result<bool> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = File::open(path).map_err(|e| AuditError::fs(path, e))?;
    file.seek(SeekFrom::End(-1))
        .map_err(|e| AuditError::fs(path, e))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)
        .map_err(|e| AuditError::fs(path, e))?;
    Ok(last[0] == b'\n')
}

/// Host name used as the machine id when the caller has none.
pub fn default_machine_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}
