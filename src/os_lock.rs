//! OS advisory lock layer.
//!
//! Cross-platform (fs2) exclusive advisory locks: `flock(2)` on Unix,
//! `LockFileEx` on Windows. The OS drops the lock when the descriptor is closed
//! or the owning process dies, with or without an explicit unlock.
//!
//! Whether two descriptors of the same process conflict is platform-dependent;
//! `handle` serializes same-process threads before they get here.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

use crate::error::{LockError, Result};

/// Open the lock file, creating it if absent. Contents are never read or truncated.
pub(crate) fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| LockError::io("open lock file", path, e))
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Take the exclusive advisory lock on `file`.
///
/// `blocking = true` waits for the lock and only returns `Ok(true)` or an error.
/// `blocking = false` makes one attempt: `Ok(false)` means someone else holds it.
pub(crate) fn try_lock(file: &File, blocking: bool) -> io::Result<bool> {
    if blocking {
        // Called through the trait: std's inherent File locking methods shadow fs2's names.
        FileExt::lock_exclusive(file)?;
        return Ok(true);
    }
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn unlock(file: &File) -> io::Result<()> {
    FileExt::unlock(file)
}
