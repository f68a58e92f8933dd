/// Process exit codes.
pub mod exit {
    use crate::error::AuditError;

    pub const SUCCESS: i32 = 0;
    pub const OPERATIONAL_FAILURE: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    /// The run could not be durably recorded and was aborted.
    pub const RUN_FAILED: i32 = 3;
    /// Undo finished but some files could not be restored.
    pub const UNDO_PARTIAL: i32 = 4;

    /// Exit code for an error that escaped a command.
    pub fn for_error(err: &anyhow::Error) -> i32 {
        match err.chain().find_map(|c| c.downcast_ref::<AuditError>()) {
            Some(AuditError::NotFound(_)) => NOT_FOUND,
            Some(e) if e.is_durability() => RUN_FAILED,
            _ => OPERATIONAL_FAILURE,
        }
    }

}
