use crate::journal::{RunStatus, RunSummary};
use crate::organize::ActionReport;
use crate::reader::RunInfo;
use crate::undo::{UndoCandidate, UndoProgress, UndoResult};
use serde::Serialize;
use uuid::Uuid;

/// Structured event emitted by a command for its caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PlanLoaded {
        actions: usize,
        dry_run: bool,
    },
    Action(ActionReport),
    OrganizeFinished {
        run_id: Option<Uuid>,
        status: RunStatus,
        summary: RunSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        aborted: Option<String>,
    },
    UndoStarted {
        target_run_id: Uuid,
        total: usize,
    },
    UndoStep {
        progress: UndoProgress,
    },
    UndoFinished {
        result: UndoResult,
    },
    PreviewCandidate {
        candidate: UndoCandidate,
    },
    PreviewFinished {
        target_run_id: Uuid,
        total: usize,
        will_restore: usize,
    },
    Run {
        run: RunInfo,
    },
}
