//! Injectable time source. Everything that needs "now" takes a `Clock` so
//! tests can pin the instant instead of racing the wall clock.

use chrono::{DateTime, FixedOffset, Offset, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a single instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock(pub DateTime<Utc>);

impl Clock for FrozenClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Build the operational timezone from the configured offset. Out-of-range
/// values fall back to UTC; config validation rejects them before this point.
pub fn operational_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}
