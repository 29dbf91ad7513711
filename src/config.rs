//! Centralized configuration for lock registries.
//!
//! Tunables are collected here instead of being scattered as env lookups:
//! - LOCKET_RETRY_MS      — poll period for timed OS-level acquisition (default 50).
//! - LOCKET_TIMEOUT_SECS  — default timeout for handles from `get_or_create`
//!   ("none"/unset = block forever, 0 = non-blocking, N = seconds).
//! - LOCKET_CREATE_DIRS   — create missing parent directories of lock paths (default off).
//!
//! The global registry reads the environment once, on first use.
//! Explicit registries take a `LockConfig` built with the `with_*` setters.

use std::fmt;
use std::time::Duration;

use crate::timeout::Timeout;

pub const DEFAULT_RETRY_MS: u64 = 50;

#[derive(Clone, Debug)]
pub struct LockConfig {
    /// Sleep between non-blocking OS lock attempts while a timed acquire waits.
    /// Env: LOCKET_RETRY_MS (default 50)
    pub retry_period: Duration,

    /// Timeout used by handles obtained without an explicit one.
    /// Env: LOCKET_TIMEOUT_SECS (default: forever)
    pub default_timeout: Timeout,

    /// Create the parent directory chain of a lock path on registration.
    /// Env: LOCKET_CREATE_DIRS = 0|1|true|false (default false)
    pub create_parent_dirs: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_period: Duration::from_millis(DEFAULT_RETRY_MS),
            default_timeout: Timeout::Forever,
            create_parent_dirs: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl LockConfig {
    /// Load configuration from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("LOCKET_RETRY_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                // 0 would turn the timed wait into a busy spin
                cfg.retry_period = Duration::from_millis(n.max(1));
            }
        }

        if let Ok(v) = std::env::var("LOCKET_TIMEOUT_SECS") {
            if let Some(t) = Timeout::parse(&v) {
                cfg.default_timeout = t;
            }
        }

        if let Ok(v) = std::env::var("LOCKET_CREATE_DIRS") {
            cfg.create_parent_dirs = env_flag(&v);
        }

        cfg
    }

    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period.max(Duration::from_millis(1));
        self
    }

    pub fn with_default_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.default_timeout = timeout.into();
        self
    }

    pub fn with_create_parent_dirs(mut self, on: bool) -> Self {
        self.create_parent_dirs = on;
        self
    }
}

impl fmt::Display for LockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LockConfig {{ retry_period: {:?}, default_timeout: {}, create_parent_dirs: {} }}",
            self.retry_period, self.default_timeout, self.create_parent_dirs,
        )
    }
}
