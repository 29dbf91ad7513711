//! Acquisition timeout policy.
//!
//! Three explicit cases instead of a numeric sentinel:
//! - `Forever`     — block until the lock is available;
//! - `NonBlocking` — one attempt, fail fast;
//! - `After(d)`    — keep trying for at most `d` of wall-clock time.
//!
//! A `Deadline` is fixed once per `acquire` and shared by the in-process and OS phases.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Forever,
    NonBlocking,
    After(Duration),
}

impl Timeout {
    /// Seconds as floating point, `None` meaning "no timeout".
    /// Zero, negative and NaN values are treated as non-blocking; values too large
    /// for a `Duration` (including infinity) mean forever.
    pub fn from_secs(secs: Option<f64>) -> Self {
        match secs {
            None => Timeout::Forever,
            Some(s) if s.is_nan() || s <= 0.0 => Timeout::NonBlocking,
            Some(s) => match Duration::try_from_secs_f64(s) {
                Ok(d) if d.is_zero() => Timeout::NonBlocking,
                Ok(d) => Timeout::After(d),
                Err(_) => Timeout::Forever,
            },
        }
    }

    /// Parse "none"/"" (Forever) or a number of seconds.
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        if t.is_empty() || t.eq_ignore_ascii_case("none") {
            return Some(Timeout::Forever);
        }
        t.parse::<f64>().ok().map(|v| Timeout::from_secs(Some(v)))
    }

    pub(crate) fn deadline(self) -> Deadline {
        match self {
            Timeout::Forever => Deadline::Never,
            Timeout::NonBlocking => Deadline::Now,
            Timeout::After(d) => match Instant::now().checked_add(d) {
                Some(at) => Deadline::At(at, d),
                None => Deadline::Never,
            },
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        match d {
            None => Timeout::Forever,
            Some(d) if d.is_zero() => Timeout::NonBlocking,
            Some(d) => Timeout::After(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::from(Some(d))
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Forever => write!(f, "forever"),
            Timeout::NonBlocking => write!(f, "non-blocking"),
            Timeout::After(d) => write!(f, "{:?}", d),
        }
    }
}

/// Point in time after which acquisition gives up.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Deadline {
    Never,
    Now,
    /// Absolute instant plus the original budget (for error reporting).
    At(Instant, Duration),
}

impl Deadline {
    /// Time left, `None` for `Never`. `Now` and expired deadlines yield zero.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        match self {
            Deadline::Never => None,
            Deadline::Now => Some(Duration::ZERO),
            Deadline::At(at, _) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    pub(crate) fn budget(&self) -> Duration {
        match self {
            Deadline::Never | Deadline::Now => Duration::ZERO,
            Deadline::At(_, d) => *d,
        }
    }
}
