//! Injectable time source.

use chrono::{DateTime, Local, Utc};

/// Wall clock used for token expiry, sighting timestamps and day rollover.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Today's local calendar day as `YYYY-MM-DD`.
    fn today(&self) -> String;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }
}
