//! Single-instance lock backed by a PID file.
//!
//! Acquisition is a single non-blocking attempt. A lock file whose recorded
//! holder is no longer alive is stale and gets reclaimed. The returned
//! [`InstanceLock`] removes the file when released or dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::IntakeError;

/// Answers whether a process id currently exists.
pub trait ProcessLiveness {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness probe against the OS process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLiveness;

impl ProcessLiveness for OsLiveness {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // Signal 0 only checks for existence and permission.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // No cheap probe here; never reclaim.
        true
    }
}

/// A held instance lock. The lock file is removed on release or drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl InstanceLock {
    /// Takes the lock at `path` for the current process.
    pub fn acquire(path: &Path, liveness: &impl ProcessLiveness) -> Result<Self, IntakeError> {
        Self::acquire_as(path, std::process::id(), liveness)
    }

    /// Takes the lock at `path` on behalf of `pid`.
    pub fn acquire_as(
        path: &Path,
        pid: u32,
        liveness: &impl ProcessLiveness,
    ) -> Result<Self, IntakeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Two rounds: the second one follows a stale-lock removal.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(pid.to_string().as_bytes())?;
                    file.sync_all()?;
                    info!(pid, path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    match read_holder(path)? {
                        Some(holder) if holder != pid && liveness.is_alive(holder) => {
                            return Err(IntakeError::LockHeld { pid: holder });
                        }
                        holder => {
                            warn!(?holder, path = %path.display(), "removing stale lock");
                            remove_if_exists(path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Someone else won the race for the reclaimed file.
        match read_holder(path)? {
            Some(holder) => Err(IntakeError::LockHeld { pid: holder }),
            None => Err(IntakeError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "lock file contended",
            ))),
        }
    }

    #[cfg(test)]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Deletes the lock file if it still names this holder. Dropping the
    /// handle does the same, but swallows the error.
    pub fn release(mut self) -> Result<(), IntakeError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), IntakeError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match read_holder(&self.path)? {
            Some(holder) if holder == self.pid => {
                remove_if_exists(&self.path)?;
                debug!(pid = self.pid, "lock released");
            }
            other => {
                warn!(?other, pid = self.pid, "lock file no longer ours, leaving it");
            }
        }
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, path = %self.path.display(), "failed to release lock");
        }
    }
}

// `None` when the file is missing or does not hold a PID.
fn read_holder(path: &Path) -> Result<Option<u32>, IntakeError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct FakeLiveness(HashSet<u32>);

    impl FakeLiveness {
        fn alive(pids: &[u32]) -> Self {
            Self(pids.iter().copied().collect())
        }
    }

    impl ProcessLiveness for FakeLiveness {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn lock_path(tmp: &TempDir) -> PathBuf {
        tmp.path().join("srintake.lock")
    }

    #[test]
    fn acquire_writes_own_pid() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        let lock = InstanceLock::acquire_as(&path, 100, &FakeLiveness::alive(&[])).unwrap();
        assert_eq!(lock.pid(), 100);
        assert_eq!(fs::read_to_string(&path).unwrap(), "100");
    }

    #[test]
    fn live_holder_blocks_without_touching_file() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        fs::write(&path, "200").unwrap();

        let err = InstanceLock::acquire_as(&path, 100, &FakeLiveness::alive(&[200])).unwrap_err();
        assert!(matches!(err, IntakeError::LockHeld { pid: 200 }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "200");
    }

    #[test]
    fn stale_holder_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        fs::write(&path, "200").unwrap();

        let lock = InstanceLock::acquire_as(&path, 100, &FakeLiveness::alive(&[])).unwrap();
        assert_eq!(lock.pid(), 100);
        assert_eq!(fs::read_to_string(&path).unwrap(), "100");
    }

    #[test]
    fn garbage_lock_content_is_stale() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        fs::write(&path, "not-a-pid\n").unwrap();

        let _lock = InstanceLock::acquire_as(&path, 100, &FakeLiveness::alive(&[])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "100");
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        let liveness = FakeLiveness::alive(&[100, 101]);

        let _first = InstanceLock::acquire_as(&path, 100, &liveness).unwrap();
        let err = InstanceLock::acquire_as(&path, 101, &liveness).unwrap_err();
        assert!(matches!(err, IntakeError::LockHeld { pid: 100 }));
    }

    #[test]
    fn release_and_drop_remove_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        let liveness = FakeLiveness::alive(&[]);

        let lock = InstanceLock::acquire_as(&path, 100, &liveness).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());

        {
            let _lock = InstanceLock::acquire_as(&path, 100, &liveness).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn release_leaves_foreign_lock_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(&tmp);
        let lock = InstanceLock::acquire_as(&path, 100, &FakeLiveness::alive(&[])).unwrap();

        fs::write(&path, "300").unwrap();
        lock.release().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "300");
    }

    #[cfg(unix)]
    #[test]
    fn os_liveness_sees_current_process() {
        assert!(OsLiveness.is_alive(std::process::id()));
        assert!(!OsLiveness.is_alive(0));
    }
}
