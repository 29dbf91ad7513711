//! Lock handles: in-process gate + OS advisory lock.
//!
//! A `LockHandle` is `UNLOCKED` or `LOCKED`. Acquisition passes two gates in order:
//! 1. the process-local gate shared by every handle for the same key (threads);
//! 2. the OS advisory lock on the lock file (processes).
//!
//! One deadline covers both phases. If phase 2 fails, phase 1 is undone before
//! the error is returned, so a failed acquire never leaves a half-held lock.
//!
//! The gate is not tied to a thread: any thread may release a lock another thread
//! acquired. It is also not reentrant: acquiring again on a `LOCKED` key from the same
//! thread with `Timeout::Forever` blocks forever; bounded timeouts fail as usual.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{LockError, Result};
use crate::metrics;
use crate::os_lock;
use crate::registry::LockKey;
use crate::timeout::{Deadline, Timeout};

/// State shared by all handles of one key within a registry.
pub(crate) struct SharedLock {
    key: LockKey,
    /// `true` while some handle in this process is past phase 1.
    gate: Mutex<bool>,
    gate_cv: Condvar,
    /// Open lock file; `Some` exactly while `LOCKED`.
    file: Mutex<Option<File>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Guarded values are plain flags/slots, valid even after a panic elsewhere.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedLock {
    pub(crate) fn new(key: LockKey) -> Self {
        Self {
            key,
            gate: Mutex::new(false),
            gate_cv: Condvar::new(),
            file: Mutex::new(None),
        }
    }

    fn path(&self) -> &Path {
        self.key.as_path()
    }

    fn busy(&self, deadline: &Deadline) -> LockError {
        match deadline {
            Deadline::At(..) => {
                metrics::record_timeout();
                LockError::Timeout {
                    path: self.path().to_path_buf(),
                    waited: deadline.budget(),
                }
            }
            _ => {
                metrics::record_would_block();
                LockError::WouldBlock {
                    path: self.path().to_path_buf(),
                }
            }
        }
    }

    /// Phase 1. Returns whether the gate was contended.
    fn enter_gate(&self, deadline: &Deadline) -> Result<bool> {
        let mut held = relock(&self.gate);
        if !*held {
            *held = true;
            return Ok(false);
        }
        trace!("locket: {} held in-process, waiting", self.key);
        held = match deadline.remaining() {
            None => self
                .gate_cv
                .wait_while(held, |h| *h)
                .unwrap_or_else(PoisonError::into_inner),
            Some(r) if r.is_zero() => return Err(self.busy(deadline)),
            Some(r) => {
                self.gate_cv
                    .wait_timeout_while(held, r, |h| *h)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        if *held {
            return Err(self.busy(deadline));
        }
        *held = true;
        Ok(true)
    }

    fn leave_gate(&self) {
        *relock(&self.gate) = false;
        self.gate_cv.notify_one();
    }

    /// Phase 2. Caller holds the gate. Returns whether the OS lock was contended.
    fn lock_os(&self, deadline: &Deadline, retry_period: Duration) -> Result<bool> {
        let file = os_lock::open_lock_file(self.path())?;
        let io_err = |e: std::io::Error| LockError::io("lock", self.path(), e);

        let mut contended = false;
        if !os_lock::try_lock(&file, false).map_err(io_err)? {
            contended = true;
            if deadline.remaining().is_none() {
                trace!("locket: {} held by another process, blocking", self.key);
                os_lock::try_lock(&file, true).map_err(io_err)?;
            } else {
                loop {
                    let remaining = deadline.remaining().unwrap_or_default();
                    if remaining.is_zero() {
                        return Err(self.busy(deadline));
                    }
                    trace!(
                        "locket: {} held by another process, retry in {:?}",
                        self.key,
                        remaining.min(retry_period)
                    );
                    std::thread::sleep(remaining.min(retry_period));
                    if os_lock::try_lock(&file, false).map_err(io_err)? {
                        break;
                    }
                }
            }
        }
        *relock(&self.file) = Some(file);
        Ok(contended)
    }

    fn acquire(&self, timeout: Timeout, retry_period: Duration) -> Result<()> {
        let started = Instant::now();
        let deadline = timeout.deadline();

        let gate_contended = match self.enter_gate(&deadline) {
            Ok(c) => c,
            Err(e) => {
                metrics::record_contended();
                return Err(e);
            }
        };
        let os_contended = match self.lock_os(&deadline, retry_period) {
            Ok(c) => c,
            Err(e) => {
                self.leave_gate();
                if e.is_busy() {
                    metrics::record_contended();
                }
                return Err(e);
            }
        };

        if gate_contended || os_contended {
            metrics::record_contended();
        }
        metrics::record_acquired();
        debug!(
            "locket: acquired {} in {:?} (timeout {})",
            self.key,
            started.elapsed(),
            timeout
        );
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let file = relock(&self.file)
            .take()
            .ok_or_else(|| LockError::NotLocked {
                path: self.path().to_path_buf(),
            })?;
        let unlocked = os_lock::unlock(&file);
        // Closing the descriptor drops the advisory lock even if unlock failed.
        drop(file);
        self.leave_gate();
        metrics::record_released();
        debug!("locket: released {}", self.key);
        unlocked.map_err(|e| LockError::io("unlock", self.path(), e))
    }

    fn is_locked(&self) -> bool {
        relock(&self.file).is_some()
    }
}

/// Caller-facing lock for one path.
///
/// Cloning is cheap; clones (and any other handle for the same key from the same
/// registry) share the lock state.
#[derive(Clone)]
pub struct LockHandle {
    shared: Arc<SharedLock>,
    timeout: Timeout,
    retry_period: Duration,
}

impl LockHandle {
    pub(crate) fn new(shared: Arc<SharedLock>, timeout: Timeout, retry_period: Duration) -> Self {
        Self {
            shared,
            timeout,
            retry_period,
        }
    }

    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period.max(Duration::from_millis(1));
        self
    }

    pub fn key(&self) -> &LockKey {
        &self.shared.key
    }

    pub fn path(&self) -> &Path {
        self.shared.path()
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Whether both handles coordinate through the same in-process gate.
    pub fn shares_gate_with(&self, other: &LockHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Acquire using the handle's timeout.
    pub fn acquire(&self) -> Result<()> {
        self.acquire_with(self.timeout)
    }

    /// Acquire with an explicit timeout, shared across the in-process and OS phases.
    ///
    /// Fails with `WouldBlock` (non-blocking) or `Timeout` (bounded) when the lock stays
    /// held, and with `Io` when the lock file cannot be opened or locked.
    pub fn acquire_with(&self, timeout: impl Into<Timeout>) -> Result<()> {
        self.shared.acquire(timeout.into(), self.retry_period)
    }

    /// Release the OS lock, then the in-process gate. Any thread may call this.
    ///
    /// Fails with `NotLocked` if the key is not currently locked.
    pub fn release(&self) -> Result<()> {
        self.shared.release()
    }

    /// Informational; may be stale by the time the caller looks at it.
    pub fn is_locked(&self) -> bool {
        self.shared.is_locked()
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&self) -> Result<LockGuard<'_>> {
        self.lock_with(self.timeout)
    }

    pub fn lock_with(&self, timeout: impl Into<Timeout>) -> Result<LockGuard<'_>> {
        self.acquire_with(timeout)?;
        Ok(LockGuard { handle: self })
    }

    /// Run `f` while holding the lock. The lock is released on every exit path,
    /// including a panic inside `f`.
    ///
    /// If `f` completes but the release fails (e.g. another thread already released the
    /// lock, or unlocking the file errors), the release error is returned and the value
    /// produced by `f` is dropped.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let guard = self.lock()?;
        let out = f();
        guard.release()?;
        Ok(out)
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.shared.key)
            .field("timeout", &self.timeout)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped acquisition. Released on drop; use `release` to observe errors.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    handle: &'a LockHandle,
}

impl<'a> LockGuard<'a> {
    pub fn handle(&self) -> &'a LockHandle {
        self.handle
    }

    pub fn release(self) -> Result<()> {
        let handle = self.handle;
        std::mem::forget(self);
        handle.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release() {
            warn!("locket: release on guard drop failed: {}", e);
        }
    }
}
