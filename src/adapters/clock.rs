use crate::ports::clock::Clock;
use chrono::{DateTime, Utc};

/// Wall clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
