use crate::identity::FileIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Status labels written on events.
pub mod status {
    pub const STARTED: &str = "started";
    /// Intent recorded; the filesystem action follows only after the append succeeds.
    pub const PENDING: &str = "pending";
    pub const RESTORED: &str = "restored";
    pub const SKIPPED: &str = "skipped";
    pub const ERROR: &str = "error";
}

/// Kind of run bracketed by RUN_START / RUN_END.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Organize,
    Undo,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Organize => "ORGANIZE",
            RunType::Undo => "UNDO",
        }
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "IN_PROGRESS",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Per-run counters written on RUN_END.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_files: u64,
    pub moved: u64,
    pub skipped: u64,
    pub routed_review: u64,
    pub duplicates: u64,
    pub errors: u64,
}

/// Categorical cause attached to skips, duplicates and review routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Unclassified,
    ParseError,
    InvalidDate,
    DuplicateRenamed,
    DestinationExists,
    IdentityMismatch,
    DestinationMissing,
    SourceAlreadyExists,
    #[serde(untagged)]
    Other(String),
}

impl ReasonCode {
    pub fn as_str(&self) -> &str {
        match self {
            ReasonCode::Unclassified => "unclassified",
            ReasonCode::ParseError => "parse_error",
            ReasonCode::InvalidDate => "invalid_date",
            ReasonCode::DuplicateRenamed => "duplicate_renamed",
            ReasonCode::DestinationExists => "destination_exists",
            ReasonCode::IdentityMismatch => "identity_mismatch",
            ReasonCode::DestinationMissing => "destination_missing",
            ReasonCode::SourceAlreadyExists => "source_already_exists",
            ReasonCode::Other(code) => code,
        }
    }

    /// Map a free-form label onto a known code, keeping unknown labels verbatim.
    pub fn from_label(label: &str) -> Self {
        match label {
            "unclassified" => ReasonCode::Unclassified,
            "parse_error" => ReasonCode::ParseError,
            "invalid_date" => ReasonCode::InvalidDate,
            "duplicate_renamed" => ReasonCode::DuplicateRenamed,
            "destination_exists" => ReasonCode::DestinationExists,
            "identity_mismatch" => ReasonCode::IdentityMismatch,
            "destination_missing" => ReasonCode::DestinationMissing,
            "source_already_exists" => ReasonCode::SourceAlreadyExists,
            other => ReasonCode::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub error_type: String,
    pub error_message: String,
}

/// Variant payload of an event, tagged by `eventType` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "eventType",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EventKind {
    RunStart {
        run_type: RunType,
        app_version: String,
        machine_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        undo_target_id: Option<Uuid>,
    },
    RunEnd {
        final_status: RunStatus,
        summary: RunSummary,
    },
    /// Identity is taken from the source before the move, never from the destination.
    Move {
        source_path: PathBuf,
        destination_path: PathBuf,
        file_identity: FileIdentity,
    },
    DuplicateDetected {
        source_path: PathBuf,
        predicted_destination: PathBuf,
        /// Where the file actually went.
        destination_path: PathBuf,
        reason_code: ReasonCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_identity: Option<FileIdentity>,
    },
    RouteToReview {
        source_path: PathBuf,
        destination_path: PathBuf,
        reason_code: ReasonCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_identity: Option<FileIdentity>,
    },
    Skip {
        source_path: PathBuf,
        reason_code: ReasonCode,
    },
    Error {
        source_path: PathBuf,
        error_details: ErrorDetails,
        operation: String,
    },
}

/// Tag-only view of [`EventKind`], used for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunStart,
    RunEnd,
    Move,
    DuplicateDetected,
    RouteToReview,
    Skip,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunStart => "RUN_START",
            EventType::RunEnd => "RUN_END",
            EventType::Move => "MOVE",
            EventType::DuplicateDetected => "DUPLICATE_DETECTED",
            EventType::RouteToReview => "ROUTE_TO_REVIEW",
            EventType::Skip => "SKIP",
            EventType::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "RUN_START" => Ok(EventType::RunStart),
            "RUN_END" => Ok(EventType::RunEnd),
            "MOVE" => Ok(EventType::Move),
            "DUPLICATE_DETECTED" | "DUPLICATE" => Ok(EventType::DuplicateDetected),
            "ROUTE_TO_REVIEW" | "REVIEW" => Ok(EventType::RouteToReview),
            "SKIP" => Ok(EventType::Skip),
            "ERROR" => Ok(EventType::Error),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

/// A single immutable audit record (one NDJSON line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// Free-form outcome label, see [`status`].
    pub status: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AuditEvent {
    pub fn new(run_id: Uuid, status: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            status: status.into(),
            kind,
        }
    }

    pub fn event_type(&self) -> EventType {
        match &self.kind {
            EventKind::RunStart { .. } => EventType::RunStart,
            EventKind::RunEnd { .. } => EventType::RunEnd,
            EventKind::Move { .. } => EventType::Move,
            EventKind::DuplicateDetected { .. } => EventType::DuplicateDetected,
            EventKind::RouteToReview { .. } => EventType::RouteToReview,
            EventKind::Skip { .. } => EventType::Skip,
            EventKind::Error { .. } => EventType::Error,
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        match &self.kind {
            EventKind::Move { source_path, .. }
            | EventKind::DuplicateDetected { source_path, .. }
            | EventKind::RouteToReview { source_path, .. }
            | EventKind::Skip { source_path, .. }
            | EventKind::Error { source_path, .. } => Some(source_path),
            EventKind::RunStart { .. } | EventKind::RunEnd { .. } => None,
        }
    }

    pub fn destination_path(&self) -> Option<&Path> {
        match &self.kind {
            EventKind::Move {
                destination_path, ..
            }
            | EventKind::DuplicateDetected {
                destination_path, ..
            }
            | EventKind::RouteToReview {
                destination_path, ..
            } => Some(destination_path),
            _ => None,
        }
    }
}

/// Serialize an event as one newline-terminated line.
pub fn encode_line(event: &AuditEvent) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line. Takes raw bytes so a line cut inside a UTF-8 sequence is
/// an ordinary parse error.
pub fn decode_line(line: &[u8]) -> serde_json::Result<AuditEvent> {
    serde_json::from_slice(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> FileIdentity {
        FileIdentity {
            content_hash: "ab".repeat(32),
            size: 42,
        }
    }

    #[test]
    fn move_event_wire_shape() {
        let run_id = Uuid::new_v4();
        let event = AuditEvent::new(
            run_id,
            status::PENDING,
            EventKind::Move {
                source_path: "/in/a.pdf".into(),
                destination_path: "/out/a.pdf".into(),
                file_identity: identity(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "MOVE");
        assert_eq!(value["runId"], json!(run_id.to_string()));
        assert_eq!(value["sourcePath"], "/in/a.pdf");
        assert_eq!(value["destinationPath"], "/out/a.pdf");
        assert_eq!(value["fileIdentity"]["size"], 42);
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn run_start_omits_destination_and_target() {
        let event = AuditEvent::new(
            Uuid::new_v4(),
            status::STARTED,
            EventKind::RunStart {
                run_type: RunType::Organize,
                app_version: "0.1.0".into(),
                machine_id: "host".into(),
                undo_target_id: None,
            },
        );
        let line = encode_line(&event).unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line.contains("destinationPath"));
        assert!(!line.contains("undoTargetId"));
        assert_eq!(decode_line(line.trim_end().as_bytes()).unwrap(), event);
    }

    #[test]
    fn unknown_reason_code_survives() {
        let raw = json!({
            "timestamp": "2026-01-02T03:04:05Z",
            "runId": Uuid::nil(),
            "status": "skipped",
            "eventType": "SKIP",
            "sourcePath": "/in/x",
            "reasonCode": "too_large"
        });
        let event: AuditEvent = serde_json::from_value(raw).unwrap();
        match event.kind {
            EventKind::Skip { reason_code, .. } => {
                assert_eq!(reason_code, ReasonCode::Other("too_large".into()))
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn event_type_parses_cli_spellings() {
        assert_eq!("move".parse::<EventType>().unwrap(), EventType::Move);
        assert_eq!(
            "route-to-review".parse::<EventType>().unwrap(),
            EventType::RouteToReview
        );
        assert!("rename".parse::<EventType>().is_err());
    }
}
