//! Error taxonomy for lock operations.
//!
//! Busy conditions (`WouldBlock`, `Timeout`) are recoverable and kept apart from
//! programmer errors (`NotLocked`) and OS/filesystem failures (`Io`), so callers can
//! branch on the kind instead of parsing messages.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// Non-blocking acquisition found the lock held elsewhere.
    #[error("couldn't lock {}: already held", path.display())]
    WouldBlock { path: PathBuf },

    /// Bounded acquisition ran out of time.
    #[error("couldn't lock {} within {:?}", path.display(), waited)]
    Timeout { path: PathBuf, waited: Duration },

    /// `release()` on a handle that is not locked.
    #[error("release of unlocked lock {}", path.display())]
    NotLocked { path: PathBuf },

    /// The path cannot name a lock file (no file-name component).
    #[error("invalid lock path {}", path.display())]
    InvalidPath { path: PathBuf },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        LockError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True for `WouldBlock` and `Timeout`: the lock exists and someone else holds it.
    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::WouldBlock { .. } | LockError::Timeout { .. })
    }

    /// Path the failed operation was targeting.
    pub fn path(&self) -> &std::path::Path {
        match self {
            LockError::WouldBlock { path }
            | LockError::Timeout { path, .. }
            | LockError::NotLocked { path }
            | LockError::InvalidPath { path }
            | LockError::Io { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_kinds_are_distinguishable_from_io() {
        let p = PathBuf::from("/tmp/x.lock");
        assert!(LockError::WouldBlock { path: p.clone() }.is_busy());
        assert!(LockError::Timeout {
            path: p.clone(),
            waited: Duration::from_millis(10)
        }
        .is_busy());
        assert!(!LockError::NotLocked { path: p.clone() }.is_busy());

        let e = LockError::io(
            "open lock file",
            &p,
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!e.is_busy());
        assert_eq!(e.path(), p.as_path());
        assert!(e.to_string().starts_with("open lock file /tmp/x.lock"));
    }
}
