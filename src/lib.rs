//! locket — named locks anchored to filesystem paths.
//!
//! A lock serializes threads of one process (in-process gate) and unrelated
//! processes (OS advisory lock on the lock file). All handles for the same
//! canonical path within a process share one gate through the registry.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let lock = locket::lock_file("/tmp/build.lock", Duration::from_secs(5))?;
//! lock.with_lock(|| {
//!     // exclusive section
//! })?;
//! # Ok::<(), locket::LockError>(())
//! ```
//!
//! The OS lock dies with the process or its descriptor, so a crashed holder never
//! leaves the path locked. Behavior across `fork` is undefined.

pub mod config;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod registry;
pub mod timeout;

mod os_lock;

pub use config::LockConfig;
pub use error::{LockError, Result};
pub use handle::{LockGuard, LockHandle};
pub use registry::{lock_file, LockKey, LockRegistry};
pub use timeout::Timeout;
