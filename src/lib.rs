//! Audit trail and verified undo for a file organizer.
//!
//! Every file decision is appended to a rotating JSONL log and flushed before
//! the file is touched. Recorded runs can be listed, exported and reversed;
//! undo re-checks each file's content hash before moving it back.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fsops;
pub mod identity;
pub mod journal;
pub mod lock;
pub mod model;
pub mod organize;
pub mod reader;
pub mod reporter;
pub mod resolve;
pub mod retention;
pub mod segment;
pub mod undo;
pub mod writer;

pub use config::{AuditConfig, RotationPeriod};
pub use error::{AuditError, Result};
pub use identity::{FileIdentity, capture_identity};
pub use journal::{AuditEvent, EventKind, EventType, ReasonCode, RunStatus, RunSummary, RunType};
pub use reader::{AuditReader, EventFilter, RunInfo};
pub use resolve::PathMapping;
pub use undo::{UndoEngine, UndoPreview, UndoResult, UndoTarget};
pub use writer::{AuditRecorder, AuditWriter, RunHandle};
