use std::io;
use std::path::{Path, PathBuf};

/// Result of a relocation.
#[derive(Debug)]
pub struct OpResult {
    pub final_dst: PathBuf,
    /// Bytes copied when the move had to fall back to copy+delete.
    pub bytes_copied: u64,
}

/// Move a file, creating missing parent directories of `dst`.
///
/// Never overwrites: an existing `dst` is an `AlreadyExists` error. Falls back
/// to copy+delete when source and destination are on different devices.
pub fn mv(src: &Path, dst: &Path) -> io::Result<OpResult> {
    if dst.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination already exists: {}", dst.display()),
        ));
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(OpResult {
            final_dst: dst.to_path_buf(),
            bytes_copied: 0,
        }),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(src = %src.display(), dst = %dst.display(), "cross-device move, copying");
            let options = fs_extra::file::CopyOptions::new();
            let bytes = fs_extra::file::move_file(src, dst, &options).map_err(io::Error::other)?;
            Ok(OpResult {
                final_dst: dst.to_path_buf(),
                bytes_copied: bytes,
            })
        }
        Err(e) => Err(e),
    }
}

/// Stable machine-readable name for an I/O failure.
pub fn error_kind_name(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::NotFound => "not_found",
        io::ErrorKind::PermissionDenied => "permission_denied",
        io::ErrorKind::AlreadyExists => "already_exists",
        io::ErrorKind::CrossesDevices => "cross_device",
        io::ErrorKind::StorageFull => "storage_full",
        io::ErrorKind::ReadOnlyFilesystem => "read_only_filesystem",
        io::ErrorKind::IsADirectory => "is_a_directory",
        _ => "io_error",
    }
}
