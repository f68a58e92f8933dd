//! Reverse replay of a recorded run.
//!
//! An undo resolves its target run, collects the reversible events (MOVE,
//! DUPLICATE_DETECTED, ROUTE_TO_REVIEW) in reverse order, re-verifies each
//! destination against the identity captured before the original move, and
//! only then moves the file back. Every decision is itself audited under a
//! new UNDO run. A preview runs the exact same decision logic with no side
//! effects.
//!
//! Undo is best-effort per file: a skip or failure is reported and the engine
//! moves on to the next event.

use crate::error::{AuditError, Result};
use crate::fsops;
use crate::identity::{FileIdentity, capture_identity};
use crate::journal::{AuditEvent, EventKind, EventType, ReasonCode, RunStatus, RunType};
use crate::reader::{AuditReader, RunInfo};
use crate::resolve::{PathMapping, remap};
use crate::writer::{AuditRecorder, RunHandle, default_machine_id};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Why a file was left in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    IdentityMismatch,
    DestinationMissing,
    SourceAlreadyExists,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::IdentityMismatch => "identity_mismatch",
            SkipReason::DestinationMissing => "destination_missing",
            SkipReason::SourceAlreadyExists => "source_already_exists",
        }
    }
}

impl From<SkipReason> for ReasonCode {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::IdentityMismatch => ReasonCode::IdentityMismatch,
            SkipReason::DestinationMissing => ReasonCode::DestinationMissing,
            SkipReason::SourceAlreadyExists => ReasonCode::SourceAlreadyExists,
        }
    }
}

/// Outcome of comparing the file at the destination with the recorded identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Match,
    Mismatch,
    Missing,
    /// The event carried no identity; only existence was checked.
    Unverified,
    /// The destination could not be read.
    Unreadable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Verify,
    Restore,
    Skip,
    Error,
}

/// Observation of undo progress. Carries no control over the undo itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoProgress {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub current: usize,
    pub total: usize,
    pub verify_status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetails {
    pub source_path: PathBuf,
    pub message: String,
    /// Machine-readable cause, e.g. `permission_denied` or `audit_write_failed`.
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipDetails {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoResult {
    pub undo_run_id: Uuid,
    pub target_run_id: Uuid,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_events: usize,
    pub failures: Vec<FailureDetails>,
    pub skips: Vec<SkipDetails>,
    /// False when some decision or the RUN_END could not be recorded.
    pub audit_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoCandidate {
    pub event_type: EventType,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub will_restore: bool,
    pub verify_status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoPreview {
    pub target_run_id: Uuid,
    pub total_events: usize,
    pub candidates: Vec<UndoCandidate>,
}

impl UndoPreview {
    pub fn will_restore_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.will_restore).count()
    }
}

/// Which run to reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoTarget {
    /// The most recent ORGANIZE run.
    Latest,
    Run(Uuid),
}

/// One reversible event after path remapping.
#[derive(Debug)]
struct Reversal {
    event_type: EventType,
    /// Where the file originally lived and should return to.
    source: PathBuf,
    /// Where the original run put it.
    dest: PathBuf,
    identity: Option<FileIdentity>,
}

enum Outcome {
    /// Safe to move back; carries the identity of the file at the destination.
    Restore(FileIdentity),
    Skip(SkipReason),
    Unreadable(AuditError),
}

struct Decision {
    verify: VerifyStatus,
    outcome: Outcome,
}

/// Filesystem view used when deciding a reversal.
///
/// A real undo decides against the disk as it stands after the newer
/// restores. A preview moves nothing, so it layers the restores it has
/// already decided over the disk: their destinations read as empty and their
/// sources as holding the restored file.
#[derive(Debug, Default)]
struct Overlay {
    vacated: HashSet<PathBuf>,
    occupied: HashMap<PathBuf, FileIdentity>,
}

impl Overlay {
    fn identity(&self, path: &Path) -> Result<FileIdentity> {
        if let Some(identity) = self.occupied.get(path) {
            return Ok(identity.clone());
        }
        if self.vacated.contains(path) {
            return Err(AuditError::NotFound(format!("file {}", path.display())));
        }
        capture_identity(path)
    }

    fn exists(&self, path: &Path) -> bool {
        if self.occupied.contains_key(path) {
            return true;
        }
        !self.vacated.contains(path) && path.symlink_metadata().is_ok()
    }

    fn restore(&mut self, reversal: &Reversal, identity: &FileIdentity) {
        self.occupied.remove(&reversal.dest);
        self.vacated.insert(reversal.dest.clone());
        self.vacated.remove(&reversal.source);
        self.occupied.insert(reversal.source.clone(), identity.clone());
    }
}

pub struct UndoEngine<'a> {
    reader: &'a AuditReader,
    mappings: Vec<PathMapping>,
    app_version: String,
    machine_id: String,
}

impl<'a> UndoEngine<'a> {
    pub fn new(reader: &'a AuditReader, mappings: Vec<PathMapping>) -> Self {
        Self {
            reader,
            mappings,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            machine_id: default_machine_id(),
        }
    }

    /// Override the app version and machine id written on the undo run.
    pub fn with_origin(mut self, app_version: impl Into<String>, machine_id: impl Into<String>) -> Self {
        self.app_version = app_version.into();
        self.machine_id = machine_id.into();
        self
    }

    pub fn resolve_target(&self, target: UndoTarget) -> Result<RunInfo> {
        let info = match target {
            UndoTarget::Run(id) => self.reader.get_run_by_id(id)?,
            UndoTarget::Latest => self
                .reader
                .list_runs()?
                .into_iter()
                .rev()
                .find(|r| r.run_type == RunType::Organize)
                .ok_or_else(|| AuditError::NotFound("no runs".to_string()))?,
        };
        if info.status == RunStatus::InProgress {
            return Err(AuditError::RunInProgress(info.run_id.to_string()));
        }
        Ok(info)
    }

    pub fn undo_latest(
        &self,
        recorder: &mut dyn AuditRecorder,
        progress: &mut dyn FnMut(&UndoProgress),
    ) -> Result<UndoResult> {
        self.execute(UndoTarget::Latest, recorder, progress)
    }

    pub fn undo_run(
        &self,
        run_id: Uuid,
        recorder: &mut dyn AuditRecorder,
        progress: &mut dyn FnMut(&UndoProgress),
    ) -> Result<UndoResult> {
        self.execute(UndoTarget::Run(run_id), recorder, progress)
    }

    /// Decide every reversal exactly as an undo would, without touching anything.
    pub fn preview_undo(&self, target: UndoTarget) -> Result<UndoPreview> {
        let info = self.resolve_target(target)?;
        let reversals = self.enumerate(info.run_id)?;
        let mut overlay = Overlay::default();
        let candidates = reversals
            .iter()
            .map(|r| {
                let decision = decide(r, &overlay);
                let (will_restore, reason) = match &decision.outcome {
                    Outcome::Restore(identity) => {
                        overlay.restore(r, identity);
                        (true, None)
                    }
                    Outcome::Skip(reason) => (false, Some(reason.as_str().to_string())),
                    Outcome::Unreadable(e) => (false, Some(e.to_string())),
                };
                UndoCandidate {
                    event_type: r.event_type,
                    source_path: r.source.clone(),
                    dest_path: r.dest.clone(),
                    will_restore,
                    verify_status: decision.verify,
                    reason,
                }
            })
            .collect();
        Ok(UndoPreview {
            target_run_id: info.run_id,
            total_events: reversals.len(),
            candidates,
        })
    }

    fn execute(
        &self,
        target: UndoTarget,
        recorder: &mut dyn AuditRecorder,
        progress: &mut dyn FnMut(&UndoProgress),
    ) -> Result<UndoResult> {
        let info = self.resolve_target(target)?;
        let reversals = self.enumerate(info.run_id)?;
        let total = reversals.len();

        let mut run = recorder.start_undo_run(&self.app_version, &self.machine_id, info.run_id)?;
        run.set_total_files(total as u64);
        tracing::info!(target_run = %info.run_id, undo_run = %run.id(), total, "undo started");

        let mut result = UndoResult {
            undo_run_id: run.id(),
            target_run_id: info.run_id,
            restored: 0,
            skipped: 0,
            failed: 0,
            total_events: total,
            failures: Vec::new(),
            skips: Vec::new(),
            audit_complete: true,
        };
        let mut durability_lost = false;
        let disk = Overlay::default();

        for (idx, reversal) in reversals.iter().enumerate() {
            let decision = decide(reversal, &disk);
            let event = |kind: ProgressKind, reason: Option<String>| UndoProgress {
                kind,
                source_path: reversal.source.clone(),
                dest_path: reversal.dest.clone(),
                current: idx + 1,
                total,
                verify_status: decision.verify,
                reason,
            };
            progress(&event(ProgressKind::Verify, None));

            match &decision.outcome {
                Outcome::Skip(reason) => {
                    tracing::debug!(dest = %reversal.dest.display(), reason = reason.as_str(), "undo skip");
                    if let Err(e) = recorder.record_skip(&mut run, &reversal.source, (*reason).into()) {
                        tracing::warn!(error = %e, "failed to record undo skip");
                        durability_lost |= e.is_durability();
                        result.audit_complete = false;
                    }
                    result.skipped += 1;
                    result.skips.push(SkipDetails {
                        source_path: reversal.source.clone(),
                        dest_path: reversal.dest.clone(),
                        reason: *reason,
                    });
                    progress(&event(ProgressKind::Skip, Some(reason.as_str().to_string())));
                }
                Outcome::Unreadable(e) => {
                    let failure = FailureDetails {
                        source_path: reversal.source.clone(),
                        message: e.to_string(),
                        reason: "verify_failed".to_string(),
                    };
                    record_failure(recorder, &mut run, &failure, &mut result);
                    progress(&event(ProgressKind::Error, Some(failure.reason.clone())));
                    result.failures.push(failure);
                    result.failed += 1;
                }
                Outcome::Restore(identity) => {
                    // Audit before move; an unrecorded restore never happens.
                    if let Err(e) =
                        recorder.record_restore(&mut run, &reversal.dest, &reversal.source, identity)
                    {
                        durability_lost |= e.is_durability();
                        result.audit_complete = false;
                        let failure = FailureDetails {
                            source_path: reversal.source.clone(),
                            message: e.to_string(),
                            reason: "audit_write_failed".to_string(),
                        };
                        progress(&event(ProgressKind::Error, Some(failure.reason.clone())));
                        result.failures.push(failure);
                        result.failed += 1;
                        continue;
                    }
                    match fsops::mv(&reversal.dest, &reversal.source) {
                        Ok(_) => {
                            result.restored += 1;
                            tracing::debug!(source = %reversal.source.display(), "restored");
                            progress(&event(ProgressKind::Restore, None));
                        }
                        Err(e) => {
                            let failure = FailureDetails {
                                source_path: reversal.source.clone(),
                                message: e.to_string(),
                                reason: fsops::error_kind_name(&e).to_string(),
                            };
                            record_failure(recorder, &mut run, &failure, &mut result);
                            progress(&event(ProgressKind::Error, Some(failure.reason.clone())));
                            result.failures.push(failure);
                            result.failed += 1;
                        }
                    }
                }
            }
        }

        let status = if durability_lost {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        if let Err(e) = recorder.end_run(run, status) {
            tracing::warn!(error = %e, "failed to record end of undo run");
            result.audit_complete = false;
        }
        tracing::info!(
            restored = result.restored,
            skipped = result.skipped,
            failed = result.failed,
            "undo finished"
        );
        Ok(result)
    }

    /// Reversible events of `run_id`, newest first, with paths remapped.
    fn enumerate(&self, run_id: Uuid) -> Result<Vec<Reversal>> {
        let events = self.reader.get_run(run_id)?;
        Ok(events
            .iter()
            .rev()
            .filter_map(|e| self.reversal(e))
            .collect())
    }

    fn reversal(&self, event: &AuditEvent) -> Option<Reversal> {
        let (source, dest, identity) = match &event.kind {
            EventKind::Move {
                source_path,
                destination_path,
                file_identity,
            } => (source_path, destination_path, Some(file_identity.clone())),
            EventKind::DuplicateDetected {
                source_path,
                destination_path,
                file_identity,
                ..
            }
            | EventKind::RouteToReview {
                source_path,
                destination_path,
                file_identity,
                ..
            } => (source_path, destination_path, file_identity.clone()),
            EventKind::RunStart { .. }
            | EventKind::RunEnd { .. }
            | EventKind::Skip { .. }
            | EventKind::Error { .. } => return None,
        };
        Some(Reversal {
            event_type: event.event_type(),
            source: remap(source, &self.mappings),
            dest: remap(dest, &self.mappings),
            identity,
        })
    }
}

fn record_failure(
    recorder: &mut dyn AuditRecorder,
    run: &mut RunHandle,
    failure: &FailureDetails,
    result: &mut UndoResult,
) {
    if let Err(e) = recorder.record_error(
        run,
        &failure.source_path,
        &failure.reason,
        &failure.message,
        "restore",
    ) {
        tracing::warn!(error = %e, "failed to record undo failure");
        result.audit_complete = false;
    }
}

/// The safety check shared by preview and undo.
fn decide(reversal: &Reversal, view: &Overlay) -> Decision {
    let current = match view.identity(&reversal.dest) {
        Ok(identity) => identity,
        Err(AuditError::NotFound(_)) => {
            return Decision {
                verify: VerifyStatus::Missing,
                outcome: Outcome::Skip(SkipReason::DestinationMissing),
            };
        }
        Err(e) => {
            return Decision {
                verify: VerifyStatus::Unreadable,
                outcome: Outcome::Unreadable(e),
            };
        }
    };

    let verify = match &reversal.identity {
        Some(expected) if *expected == current => VerifyStatus::Match,
        Some(_) => VerifyStatus::Mismatch,
        None => VerifyStatus::Unverified,
    };
    let outcome = if let (VerifyStatus::Mismatch, Some(expected)) = (verify, &reversal.identity) {
        let mismatch = AuditError::IdentityMismatch {
            path: reversal.dest.clone(),
            expected: expected.to_string(),
            actual: current.to_string(),
        };
        tracing::warn!(error = %mismatch, "file changed since it was organized");
        Outcome::Skip(SkipReason::IdentityMismatch)
    } else if view.exists(&reversal.source) {
        Outcome::Skip(SkipReason::SourceAlreadyExists)
    } else {
        Outcome::Restore(current)
    };
    Decision { verify, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::writer::AuditWriter;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        log: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("files");
        fs::create_dir_all(&root).unwrap();
        let log = dir.path().join("log");
        Fixture {
            _dir: dir,
            root,
            log,
        }
    }

    /// Record and perform a move the way the organizer does.
    fn organize(writer: &mut AuditWriter, moves: &[(PathBuf, PathBuf)]) -> Uuid {
        let mut run = writer.start_run("0.1.0", "host").unwrap();
        for (src, dst) in moves {
            let identity = capture_identity(src).unwrap();
            writer.record_move(&mut run, src, dst, &identity).unwrap();
            fsops::mv(src, dst).unwrap();
        }
        let id = run.id();
        writer.end_run(run, RunStatus::Completed).unwrap();
        id
    }

    #[test]
    fn restores_in_reverse_order_and_audits_itself() {
        let fx = fixture();
        let a = fx.root.join("a.pdf");
        let b = fx.root.join("b.pdf");
        fs::write(&a, "A").unwrap();
        fs::write(&b, "B").unwrap();
        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let target = organize(
            &mut writer,
            &[
                (a.clone(), fx.root.join("dest/a.pdf")),
                (b.clone(), fx.root.join("dest/b.pdf")),
            ],
        );

        let reader = AuditReader::new(&fx.log);
        let engine = UndoEngine::new(&reader, vec![]);
        let mut seen = Vec::new();
        let result = engine
            .undo_latest(&mut writer, &mut |p| {
                if p.kind == ProgressKind::Restore {
                    seen.push(p.source_path.clone());
                }
            })
            .unwrap();

        assert_eq!(result.restored, 2);
        assert_eq!(result.target_run_id, target);
        assert_eq!(seen, vec![b.clone(), a.clone()]);
        assert!(a.exists() && b.exists());

        let undo_run = reader.get_run_by_id(result.undo_run_id).unwrap();
        assert_eq!(undo_run.run_type, RunType::Undo);
        assert_eq!(undo_run.undo_target_id, Some(target));
        assert_eq!(undo_run.status, RunStatus::Completed);
        assert_eq!(undo_run.summary.moved, 2);
    }

    #[test]
    fn preview_follows_swapped_files() {
        let fx = fixture();
        let a = fx.root.join("a.pdf");
        let b = fx.root.join("b.pdf");
        let tmp = fx.root.join("a.pdf.swap");
        fs::write(&a, "A").unwrap();
        fs::write(&b, "B").unwrap();
        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let target = organize(
            &mut writer,
            &[
                (a.clone(), tmp.clone()),
                (b.clone(), a.clone()),
                (tmp.clone(), b.clone()),
            ],
        );
        assert_eq!(fs::read_to_string(&a).unwrap(), "B");

        let reader = AuditReader::new(&fx.log);
        let engine = UndoEngine::new(&reader, vec![]);
        let preview = engine.preview_undo(UndoTarget::Run(target)).unwrap();
        assert!(preview.candidates.iter().all(|c| c.will_restore));
        assert!(
            preview
                .candidates
                .iter()
                .all(|c| c.verify_status == VerifyStatus::Match)
        );

        let result = engine.undo_run(target, &mut writer, &mut |_| {}).unwrap();
        assert_eq!(result.restored, preview.will_restore_count());
        assert_eq!(result.restored, 3);
        assert_eq!(fs::read_to_string(&a).unwrap(), "A");
        assert_eq!(fs::read_to_string(&b).unwrap(), "B");
        assert!(!tmp.exists());
    }

    #[test]
    fn existing_source_is_not_clobbered() {
        let fx = fixture();
        let a = fx.root.join("a.pdf");
        fs::write(&a, "A").unwrap();
        let dest = fx.root.join("dest/a.pdf");
        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let target = organize(&mut writer, &[(a.clone(), dest.clone())]);
        fs::write(&a, "someone else").unwrap();

        let reader = AuditReader::new(&fx.log);
        let result = UndoEngine::new(&reader, vec![])
            .undo_run(target, &mut writer, &mut |_| {})
            .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skips[0].reason, SkipReason::SourceAlreadyExists);
        assert_eq!(fs::read_to_string(&a).unwrap(), "someone else");
        assert!(dest.exists());
    }

    #[test]
    fn missing_destination_is_skipped() {
        let fx = fixture();
        let a = fx.root.join("a.pdf");
        fs::write(&a, "A").unwrap();
        let dest = fx.root.join("dest/a.pdf");
        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let target = organize(&mut writer, &[(a.clone(), dest.clone())]);
        fs::remove_file(&dest).unwrap();

        let reader = AuditReader::new(&fx.log);
        let engine = UndoEngine::new(&reader, vec![]);
        let preview = engine.preview_undo(UndoTarget::Run(target)).unwrap();
        assert_eq!(preview.candidates[0].verify_status, VerifyStatus::Missing);
        assert!(!preview.candidates[0].will_restore);

        let result = engine.undo_run(target, &mut writer, &mut |_| {}).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.skips[0].reason, SkipReason::DestinationMissing);
    }

    #[test]
    fn unknown_run_is_not_found() {
        let fx = fixture();
        let reader = AuditReader::new(&fx.log);
        let engine = UndoEngine::new(&reader, vec![]);
        assert!(matches!(
            engine.preview_undo(UndoTarget::Run(Uuid::new_v4())),
            Err(AuditError::NotFound(_))
        ));
        assert!(matches!(
            engine.preview_undo(UndoTarget::Latest),
            Err(AuditError::NotFound(_))
        ));
    }

    #[test]
    fn in_progress_target_is_refused() {
        let fx = fixture();
        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let run = writer.start_run("0.1.0", "host").unwrap();
        let reader = AuditReader::new(&fx.log);
        let err = UndoEngine::new(&reader, vec![])
            .preview_undo(UndoTarget::Run(run.id()))
            .unwrap_err();
        assert!(matches!(err, AuditError::RunInProgress(_)));
    }

    #[test]
    fn route_to_review_without_identity_is_unverified() {
        let fx = fixture();
        let src = fx.root.join("scan.jpg");
        let dest = fx.root.join("review/scan.jpg");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, "img").unwrap();

        let mut writer = AuditWriter::open(AuditConfig::new(&fx.log)).unwrap();
        let mut run = writer.start_run("0.1.0", "host").unwrap();
        writer
            .record_route_to_review(&mut run, &src, &dest, ReasonCode::Unclassified, None)
            .unwrap();
        writer
            .record_skip(&mut run, &fx.root.join("other"), ReasonCode::ParseError)
            .unwrap();
        let target = run.id();
        writer.end_run(run, RunStatus::Completed).unwrap();

        let reader = AuditReader::new(&fx.log);
        let engine = UndoEngine::new(&reader, vec![]);
        let preview = engine.preview_undo(UndoTarget::Run(target)).unwrap();
        assert_eq!(preview.total_events, 1);
        assert_eq!(preview.candidates[0].verify_status, VerifyStatus::Unverified);
        assert!(preview.candidates[0].will_restore);

        let result = engine.undo_run(target, &mut writer, &mut |_| {}).unwrap();
        assert_eq!(result.restored, 1);
        assert!(src.exists());
    }
}
