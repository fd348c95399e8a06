//! Crash/Concurrent-Access Guard
//!
//! A random session id is written to a lock file at startup. The background
//! tick re-reads it; if another process overwrote the id, two engines are
//! pointed at the same storage directory and this one closes itself before
//! it can corrupt shared state. This is a best-effort detector, not a
//! distributed lock.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{io_at, Result};

/// Lock file name inside the data directory
pub(crate) const LOCK_FILE: &str = "LOCK";

/// Holder of this session's claim on the storage directory
pub(crate) struct SessionGuard {
    path: PathBuf,
    id: u64,
}

impl SessionGuard {
    /// Claim the directory by overwriting the lock file with a fresh
    /// random session id
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let id: u64 = rand::random();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(io_at(&path))?;
        file.write_all(&id.to_be_bytes()).map_err(io_at(&path))?;
        file.sync_all().map_err(io_at(&path))?;
        Ok(Self { path, id })
    }

    /// Re-read the lock file and check our id is still in place
    pub fn still_owned(&self) -> Result<bool> {
        let data = fs::read(&self.path).map_err(io_at(&self.path))?;
        if data.len() != 8 {
            return Ok(false);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data);
        Ok(u64::from_be_bytes(raw) == self.id)
    }

    pub fn session_id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_session_id() {
        let tmp = TempDir::new().unwrap();
        let guard = SessionGuard::acquire(tmp.path()).unwrap();

        let data = fs::read(tmp.path().join(LOCK_FILE)).unwrap();
        assert_eq!(data.len(), 8);
        assert_eq!(u64::from_be_bytes(data.try_into().unwrap()), guard.session_id());
        assert!(guard.still_owned().unwrap());
    }

    #[test]
    fn test_takeover_is_detected() {
        let tmp = TempDir::new().unwrap();
        let first = SessionGuard::acquire(tmp.path()).unwrap();
        let second = SessionGuard::acquire(tmp.path()).unwrap();

        assert!(!first.still_owned().unwrap());
        assert!(second.still_owned().unwrap());
    }
}
