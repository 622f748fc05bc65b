use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Structured log sink
///
/// Fire-and-forget: implementations must not fail or block the caller.
#[mockall::automock]
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: Fields);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Key-value pairs attached to a log line
pub type Fields = Vec<(&'static str, LogValue)>;

/// Value of a structured log field
#[derive(Clone, Debug, PartialEq)]
pub enum LogValue {
    Str(String),
    Int(i64),
    UInt(u128),
    Bool(bool),
    Uuid(Uuid),
    Time(DateTime<Utc>),
    None,
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Str(value) => write!(f, "{value:?}"),
            LogValue::Int(value) => write!(f, "{value}"),
            LogValue::UInt(value) => write!(f, "{value}"),
            LogValue::Bool(value) => write!(f, "{value}"),
            LogValue::Uuid(value) => write!(f, "{value}"),
            LogValue::Time(value) => write!(f, "{}", value.to_rfc3339()),
            LogValue::None => f.write_str("none"),
        }
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for LogValue {
    fn from(value: u64) -> Self {
        Self::UInt(value.into())
    }
}

impl From<u128> for LogValue {
    fn from(value: u128) -> Self {
        Self::UInt(value)
    }
}

impl From<usize> for LogValue {
    fn from(value: usize) -> Self {
        Self::UInt(value as u128)
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Uuid> for LogValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for LogValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl<T: Into<LogValue>> From<Option<T>> for LogValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(LogValue::None)
    }
}

/// Build [`Fields`] from `"key" => value` pairs
///
/// ```ignore
/// log.log(Level::Info, "batch expired", fields! { "batch_id" => batch.batch_id });
/// ```
#[macro_export]
macro_rules! fields {
    ($($key:literal => $value:expr),* $(,)?) => {
        vec![$(($key, $crate::ports::log::LogValue::from($value))),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use speculoos::prelude::*;

    #[test]
    fn test_fields_macro() {
        let user_id = Uuid::new_v4();
        let fields: Fields = crate::fields! {
            "user_id" => user_id,
            "amount" => 7u64,
            "reason" => "manual",
            "expires_at" => Option::<DateTime<Utc>>::None,
        };

        assert_that!(fields).is_equal_to(vec![
            ("user_id", LogValue::Uuid(user_id)),
            ("amount", LogValue::UInt(7)),
            ("reason", LogValue::Str("manual".to_string())),
            ("expires_at", LogValue::None),
        ]);
    }

    #[test]
    fn test_display() {
        assert_that!(LogValue::from("a b").to_string()).is_equal_to("\"a b\"".to_string());
        assert_that!(LogValue::from(-3i64).to_string()).is_equal_to("-3".to_string());
    }
}
