//! Injected wall clock.
//!
//! Deadlines are compared against this clock rather than `Utc::now()` so
//! expiry and retry timing can be driven deterministically in tests.

use chrono::{DateTime, SubsecRound, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock, truncated to whole milliseconds.
///
/// The SQLite store keeps millisecond timestamps, so a record built from this
/// clock reads back exactly as it was written.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}
