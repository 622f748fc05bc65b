use chrono::{DateTime, Utc};

/// Source of the current time
///
/// Injected so that expiration logic can be tested deterministically.
#[mockall::automock]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
