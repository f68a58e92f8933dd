//! Exclusive writer lock over a log directory.
//!
//! The lock file holds the owner's pid on its first line and, while a run is
//! open, that run's id on the second line.

use crate::error::{AuditError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LOCK_FILE: &str = "audit.lock";

/// Exclusive append access to a log directory, released on drop.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    file: File,
}

impl WriterLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match Self::create(&path) {
            Err(AuditError::Locked { .. }) if is_stale(&path) => {
                tracing::warn!(lock = %path.display(), "removing stale audit lock");
                std::fs::remove_file(&path).map_err(|e| AuditError::fs(&path, e))?;
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AuditError::Locked {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(AuditError::fs(path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| AuditError::fs(path, e))?;
        file.sync_all().map_err(|e| AuditError::fs(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Advertise the run currently open under this lock.
    pub fn set_active_run(&mut self, run: Option<Uuid>) -> Result<()> {
        let mut content = format!("{}\n", std::process::id());
        if let Some(run) = run {
            content.push_str(&format!("{}\n", run));
        }
        let path = &self.path;
        self.file.set_len(0).map_err(|e| AuditError::fs(path, e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| AuditError::fs(path, e))?;
        self.file
            .write_all(content.as_bytes())
            .map_err(|e| AuditError::fs(path, e))?;
        Ok(())
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release audit lock");
        }
    }
}

/// The run advertised by a live writer on `dir`, if any.
pub fn active_run(dir: &Path) -> Option<Uuid> {
    let path = dir.join(LOCK_FILE);
    if is_stale(&path) {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    content.lines().nth(1)?.trim().parse().ok()
}

fn is_stale(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    match content.lines().next().unwrap_or("").trim().parse::<u32>() {
        Ok(pid) => !pid_alive(pid),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let first = WriterLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
        let err = WriterLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, AuditError::Locked { .. }));
        drop(first);
        assert!(!dir.path().join(LOCK_FILE).exists());
        WriterLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn advertises_active_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = WriterLock::acquire(dir.path()).unwrap();
        assert_eq!(active_run(dir.path()), None);
        let run = Uuid::new_v4();
        lock.set_active_run(Some(run)).unwrap();
        assert_eq!(active_run(dir.path()), Some(run));
        lock.set_active_run(None).unwrap();
        assert_eq!(active_run(dir.path()), None);
        drop(lock);
        assert_eq!(active_run(dir.path()), None);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        // Far above any default pid_max.
        std::fs::write(dir.path().join(LOCK_FILE), "4294967\n").unwrap();
        assert!(is_stale(&dir.path().join(LOCK_FILE)));
        WriterLock::acquire(dir.path()).unwrap();
    }
}
