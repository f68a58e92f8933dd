//! Reference organizing pipeline: executes a manifest of planned actions.
//!
//! Each file's decision is appended to the audit log before the file is
//! touched. A durability failure stops the run on the spot; nothing after the
//! failed record is moved.

use crate::error::{AuditError, Result};
use crate::fsops;
use crate::identity::{FileIdentity, capture_identity};
use crate::journal::{ReasonCode, RunStatus, RunSummary};
use crate::model::{Plan, PlannedAction};
use crate::writer::{AuditRecorder, RunHandle, default_machine_id};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Moved { final_dst: PathBuf, bytes_copied: u64 },
    Skipped { reason: String },
    Failed { error_type: String, message: String },
    /// Not attempted because the run was aborted.
    NotAttempted,
    /// Dry run only.
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub index: usize,
    pub action: &'static str,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeReport {
    /// None for a dry run.
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub actions: Vec<ActionReport>,
    /// The durability failure that aborted the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl OrganizeReport {
    pub fn moved(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, ActionOutcome::Moved { .. }))
            .count()
    }
}

pub struct Organizer {
    app_version: String,
    machine_id: String,
}

impl Default for Organizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Organizer {
    pub fn new() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            machine_id: default_machine_id(),
        }
    }

    pub fn with_origin(mut self, app_version: impl Into<String>, machine_id: impl Into<String>) -> Self {
        self.app_version = app_version.into();
        self.machine_id = machine_id.into();
        self
    }

    /// Execute `plan` under a new ORGANIZE run.
    ///
    /// Returns `Err` only when the run could not be started. A run aborted by
    /// a durability failure comes back as a report with status FAILED.
    pub fn run(
        &self,
        plan: &Plan,
        recorder: &mut dyn AuditRecorder,
        progress: &mut dyn FnMut(&ActionReport),
    ) -> Result<OrganizeReport> {
        let mut run = recorder.start_run(&self.app_version, &self.machine_id)?;
        run.set_total_files(plan.actions.len() as u64);
        let run_id = run.id();
        let mut reports = Vec::with_capacity(plan.actions.len());
        let mut aborted = None;

        for (index, action) in plan.actions.iter().enumerate() {
            let outcome = if aborted.is_some() {
                ActionOutcome::NotAttempted
            } else {
                match perform(recorder, &mut run, action) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(run_id = %run_id, source = %action.source().display(), error = %e, "audit write failed, aborting run");
                        aborted = Some(e.to_string());
                        ActionOutcome::NotAttempted
                    }
                }
            };
            let report = ActionReport {
                index,
                action: action.kind(),
                source: action.source().to_path_buf(),
                destination: action.destination().map(Path::to_path_buf),
                outcome,
            };
            progress(&report);
            reports.push(report);
        }

        let status = if aborted.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let partial = *run.summary();
        let summary = match recorder.end_run(run, status) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "failed to record end of run");
                if aborted.is_none() {
                    aborted = Some(e.to_string());
                }
                partial
            }
        };
        Ok(OrganizeReport {
            run_id: Some(run_id),
            status: if aborted.is_some() {
                RunStatus::Failed
            } else {
                status
            },
            summary,
            actions: reports,
            aborted,
        })
    }

    /// Dry run: report every action as planned. Records nothing, moves nothing.
    pub fn preview(&self, plan: &Plan, progress: &mut dyn FnMut(&ActionReport)) -> OrganizeReport {
        let actions = plan
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                let report = ActionReport {
                    index,
                    action: action.kind(),
                    source: action.source().to_path_buf(),
                    destination: action.destination().map(Path::to_path_buf),
                    outcome: ActionOutcome::Planned,
                };
                progress(&report);
                report
            })
            .collect();
        OrganizeReport {
            run_id: None,
            status: RunStatus::Completed,
            summary: RunSummary {
                total_files: plan.actions.len() as u64,
                ..RunSummary::default()
            },
            actions,
            aborted: None,
        }
    }
}

/// Record one action and, once the record is durable, carry it out.
///
/// `Err` means the audit log could not be written and the run must stop.
fn perform(
    recorder: &mut dyn AuditRecorder,
    run: &mut RunHandle,
    action: &PlannedAction,
) -> Result<ActionOutcome> {
    if let PlannedAction::Skip { source, reason } = action {
        recorder.record_skip(run, source, ReasonCode::from_label(reason))?;
        return Ok(ActionOutcome::Skipped {
            reason: reason.clone(),
        });
    }
    let source = action.source();
    let Some(destination) = action.destination() else {
        return Ok(ActionOutcome::NotAttempted);
    };

    let identity = match capture_identity(source) {
        Ok(identity) => identity,
        Err(e) => return record_error(recorder, run, source, &e, "capture_identity"),
    };
    if destination.symlink_metadata().is_ok() {
        recorder.record_skip(run, source, ReasonCode::DestinationExists)?;
        return Ok(ActionOutcome::Skipped {
            reason: ReasonCode::DestinationExists.to_string(),
        });
    }

    record_intent(recorder, run, action, &identity)?;

    match fsops::mv(source, destination) {
        Ok(op) => {
            tracing::debug!(source = %source.display(), destination = %op.final_dst.display(), "moved");
            Ok(ActionOutcome::Moved {
                final_dst: op.final_dst,
                bytes_copied: op.bytes_copied,
            })
        }
        Err(e) => {
            let error_type = fsops::error_kind_name(&e);
            recorder.record_error(run, source, error_type, &e.to_string(), "move")?;
            Ok(ActionOutcome::Failed {
                error_type: error_type.to_string(),
                message: e.to_string(),
            })
        }
    }
}

fn record_intent(
    recorder: &mut dyn AuditRecorder,
    run: &mut RunHandle,
    action: &PlannedAction,
    identity: &FileIdentity,
) -> Result<()> {
    match action {
        PlannedAction::Move {
            source,
            destination,
        } => recorder.record_move(run, source, destination, identity),
        PlannedAction::Duplicate {
            source,
            predicted_destination,
            actual_destination,
            reason,
        } => recorder.record_duplicate(
            run,
            source,
            predicted_destination,
            actual_destination,
            ReasonCode::from_label(reason),
            Some(identity),
        ),
        PlannedAction::RouteToReview {
            source,
            destination,
            reason,
        } => recorder.record_route_to_review(
            run,
            source,
            destination,
            ReasonCode::from_label(reason),
            Some(identity),
        ),
        PlannedAction::Skip { source, reason } => {
            recorder.record_skip(run, source, ReasonCode::from_label(reason))
        }
    }
}

fn record_error(
    recorder: &mut dyn AuditRecorder,
    run: &mut RunHandle,
    source: &Path,
    error: &AuditError,
    operation: &str,
) -> Result<ActionOutcome> {
    let error_type = match error {
        AuditError::NotFound(_) => "not_found",
        AuditError::Filesystem { source: io, .. } => fsops::error_kind_name(io),
        _ => "io_error",
    };
    let message = error.to_string();
    recorder.record_error(run, source, error_type, &message, operation)?;
    Ok(ActionOutcome::Failed {
        error_type: error_type.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::journal::EventType;
    use crate::reader::AuditReader;
    use crate::writer::AuditWriter;
    use std::fs;

    fn plan(actions: Vec<PlannedAction>) -> Plan {
        Plan {
            root: None,
            actions,
        }
    }

    #[test]
    fn moves_and_skips_are_audited_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        fs::write(inbox.join("a.pdf"), "a").unwrap();
        fs::write(inbox.join("b.txt"), "b").unwrap();
        let log = dir.path().join("log");

        let mut writer = AuditWriter::open(AuditConfig::new(&log)).unwrap();
        let report = Organizer::new()
            .run(
                &plan(vec![
                    PlannedAction::Move {
                        source: inbox.join("a.pdf"),
                        destination: dir.path().join("out/2024/a.pdf"),
                    },
                    PlannedAction::Skip {
                        source: inbox.join("b.txt"),
                        reason: "unclassified".into(),
                    },
                ]),
                &mut writer,
                &mut |_| {},
            )
            .unwrap();
        drop(writer);

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.moved(), 1);
        assert_eq!(report.summary.total_files, 2);
        assert!(dir.path().join("out/2024/a.pdf").exists());
        assert!(inbox.join("b.txt").exists());

        let events = AuditReader::new(&log)
            .get_run(report.run_id.unwrap())
            .unwrap();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![
                EventType::RunStart,
                EventType::Move,
                EventType::Skip,
                EventType::RunEnd
            ]
        );
    }

    #[test]
    fn existing_destination_is_skipped_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        let dst = dir.path().join("taken.pdf");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();

        let mut writer = AuditWriter::open(AuditConfig::new(dir.path().join("log"))).unwrap();
        let report = Organizer::new()
            .run(
                &plan(vec![PlannedAction::Move {
                    source: src.clone(),
                    destination: dst.clone(),
                }]),
                &mut writer,
                &mut |_| {},
            )
            .unwrap();
        assert_eq!(
            report.actions[0].outcome,
            ActionOutcome::Skipped {
                reason: "destination_exists".into()
            }
        );
        assert_eq!(fs::read_to_string(&dst).unwrap(), "old");
        assert!(src.exists());
    }

    #[test]
    fn missing_source_is_an_error_event_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present");
        fs::write(&present, "x").unwrap();

        let mut writer = AuditWriter::open(AuditConfig::new(dir.path().join("log"))).unwrap();
        let report = Organizer::new()
            .run(
                &plan(vec![
                    PlannedAction::Move {
                        source: dir.path().join("ghost"),
                        destination: dir.path().join("out/ghost"),
                    },
                    PlannedAction::Move {
                        source: present.clone(),
                        destination: dir.path().join("out/present"),
                    },
                ]),
                &mut writer,
                &mut |_| {},
            )
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.moved, 1);
        assert!(matches!(
            &report.actions[0].outcome,
            ActionOutcome::Failed { error_type, .. } if error_type == "not_found"
        ));
    }

    #[test]
    fn preview_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        fs::write(&src, "a").unwrap();

        let report = Organizer::new().preview(
            &plan(vec![PlannedAction::Move {
                source: src.clone(),
                destination: dir.path().join("b"),
            }]),
            &mut |_| {},
        );
        assert!(report.run_id.is_none());
        assert_eq!(report.summary.total_files, 1);
        assert_eq!(report.actions[0].outcome, ActionOutcome::Planned);
        assert!(src.exists());
        assert!(!dir.path().join("b").exists());
    }
}
