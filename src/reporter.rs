use crate::events::Event;
use crate::journal::{AuditEvent, EventKind};
use crate::organize::ActionOutcome;
use crate::reader::RunInfo;
use crate::undo::ProgressKind;

/// Reporter turns command events into human lines or JSON lines.
pub struct Reporter {
    json_mode: bool,
    #[cfg(feature = "cli")]
    bar: Option<indicatif::ProgressBar>,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            #[cfg(feature = "cli")]
            bar: None,
        }
    }

    pub fn record(&mut self, event: Event) {
        if self.json_mode {
            // Emit JSON line to stdout
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else {
            self.show(&event);
        }
    }

    fn show(&mut self, event: &Event) {
        self.track(event);

        if let Some(line) = human_line(event) {
            self.print(line);
        }
    }

    #[cfg(feature = "cli")]
    fn print(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    #[cfg(not(feature = "cli"))]
    fn print(&self, line: String) {
        println!("{}", line);
    }

    #[cfg(feature = "cli")]
    fn track(&mut self, event: &Event) {
        match event {
            Event::UndoStarted { total, .. } if *total > 0 => {
                let bar = indicatif::ProgressBar::new(*total as u64);
                if let Ok(style) = indicatif::ProgressStyle::with_template(
                    "{bar:40} {pos}/{len} {wide_msg}",
                ) {
                    bar.set_style(style);
                }
                self.bar = Some(bar);
            }
            Event::UndoStep { progress } if progress.kind != ProgressKind::Verify => {
                if let Some(bar) = &self.bar {
                    bar.set_position(progress.current as u64);
                    bar.set_message(progress.source_path.display().to_string());
                }
            }
            Event::UndoFinished { .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
            }
            _ => {}
        }
    }

    #[cfg(not(feature = "cli"))]
    fn track(&mut self, _event: &Event) {}
}

fn human_line(event: &Event) -> Option<String> {
    let line = match event {
        Event::PlanLoaded { actions, dry_run } => format!(
            "{} {} action(s)",
            if *dry_run { "would execute" } else { "executing" },
            actions
        ),
        Event::Action(report) => {
            let target = report
                .destination
                .as_ref()
                .map(|d| format!(" -> {}", d.display()))
                .unwrap_or_default();
            let status = match &report.outcome {
                ActionOutcome::Moved { .. } => "moved".to_string(),
                ActionOutcome::Skipped { reason } => format!("skipped ({})", reason),
                ActionOutcome::Failed { error_type, .. } => format!("failed ({})", error_type),
                ActionOutcome::NotAttempted => "not attempted".to_string(),
                ActionOutcome::Planned => "planned".to_string(),
            };
            format!(
                "{:<16} {}{}  {}",
                report.action,
                report.source.display(),
                target,
                status
            )
        }
        Event::OrganizeFinished {
            run_id,
            status,
            summary,
            aborted,
        } => {
            let mut line = match run_id {
                Some(id) => format!("run {} {}", id, status.as_str()),
                None => "dry run".to_string(),
            };
            line.push_str(&format!(
                ": {} moved, {} skipped, {} to review, {} duplicates, {} errors",
                summary.moved,
                summary.skipped,
                summary.routed_review,
                summary.duplicates,
                summary.errors
            ));
            if let Some(reason) = aborted {
                line.push_str(&format!("\naborted: {}", reason));
            }
            line
        }
        Event::UndoStarted {
            target_run_id,
            total,
        } => format!("undoing run {} ({} event(s))", target_run_id, total),
        Event::UndoStep { progress } => match progress.kind {
            ProgressKind::Verify | ProgressKind::Restore => return None,
            ProgressKind::Skip | ProgressKind::Error => format!(
                "[{}/{}] {} {}: {}",
                progress.current,
                progress.total,
                if progress.kind == ProgressKind::Skip {
                    "skip"
                } else {
                    "error"
                },
                progress.dest_path.display(),
                progress.reason.as_deref().unwrap_or("unknown")
            ),
        },
        Event::UndoFinished { result } => {
            let mut line = format!(
                "undo run {}: {} restored, {} skipped, {} failed",
                result.undo_run_id, result.restored, result.skipped, result.failed
            );
            if !result.audit_complete {
                line.push_str("\nwarning: undo audit trail is incomplete");
            }
            line
        }
        Event::PreviewCandidate { candidate } => format!(
            "{:<20} {} -> {}  {}",
            candidate.event_type.as_str(),
            candidate.dest_path.display(),
            candidate.source_path.display(),
            if candidate.will_restore {
                "restore".to_string()
            } else {
                format!("skip ({})", candidate.reason.as_deref().unwrap_or("unknown"))
            }
        ),
        Event::PreviewFinished {
            target_run_id,
            total,
            will_restore,
        } => format!(
            "run {}: {} of {} would be restored",
            target_run_id, will_restore, total
        ),
        Event::Run { run } => run_line(run),
    };
    Some(line)
}

/// One-line listing of a run.
pub fn run_line(run: &RunInfo) -> String {
    let duration = run
        .duration()
        .map(|d| humantime::format_duration(std::time::Duration::from_secs(d.as_secs())).to_string())
        .unwrap_or_else(|| "-".to_string());
    let status = if run.interrupted {
        format!("{} (interrupted)", run.status.as_str())
    } else {
        run.status.as_str().to_string()
    };
    format!(
        "{}  {:<8} {:<24} {}  {:>8}  moved={} skipped={} errors={}",
        run.run_id,
        run.run_type.as_str(),
        status,
        run.start_time.format("%Y-%m-%d %H:%M:%S"),
        duration,
        run.summary.moved,
        run.summary.skipped,
        run.summary.errors
    )
}

pub fn event_line(event: &AuditEvent) -> String {
    let paths = match (event.source_path(), event.destination_path()) {
        (Some(src), Some(dst)) => format!("{} -> {}", src.display(), dst.display()),
        (Some(src), None) => src.display().to_string(),
        _ => String::new(),
    };
    let detail = match &event.kind {
        EventKind::DuplicateDetected { reason_code, .. }
        | EventKind::RouteToReview { reason_code, .. }
        | EventKind::Skip { reason_code, .. } => format!(" ({})", reason_code),
        EventKind::Error { error_details, .. } => format!(
            " ({}: {})",
            error_details.error_type, error_details.error_message
        ),
        _ => String::new(),
    };
    format!(
        "{}  {:<18} {:<9} {}{}",
        event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        event.event_type().as_str(),
        event.status,
        paths,
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{RunStatus, RunSummary};
    use crate::organize::ActionReport;

    #[test]
    fn action_lines_show_outcome() {
        let moved = Event::Action(ActionReport {
            index: 0,
            action: "move",
            source: "/in/a".into(),
            destination: Some("/out/a".into()),
            outcome: ActionOutcome::Moved {
                final_dst: "/out/a".into(),
                bytes_copied: 0,
            },
        });
        let line = human_line(&moved).unwrap();
        assert!(line.contains("/in/a -> /out/a"));
        assert!(line.ends_with("moved"));

        let skipped = Event::Action(ActionReport {
            index: 1,
            action: "skip",
            source: "/in/b".into(),
            destination: None,
            outcome: ActionOutcome::Skipped {
                reason: "unclassified".into(),
            },
        });
        assert!(human_line(&skipped).unwrap().ends_with("skipped (unclassified)"));
    }

    #[test]
    fn json_event_is_tagged() {
        let event = Event::OrganizeFinished {
            run_id: None,
            status: RunStatus::Completed,
            summary: RunSummary::default(),
            aborted: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "organize_finished");
        assert_eq!(value["status"], "COMPLETED");
        assert!(value.get("aborted").is_none());
    }
}
