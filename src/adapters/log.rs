use crate::ports::log::{Fields, Level, LogSink, LogValue};
use std::fmt;

/// Forwards log lines to the global `tracing` subscriber
///
/// `tracing` needs field names at compile time, so the dynamic fields are rendered as a single
/// `fields` value in `key=value` form.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: Level, message: &str, fields: Fields) {
        let fields = KeyValues(&fields);
        match level {
            Level::Debug => tracing::debug!(fields = %fields, "{message}"),
            Level::Info => tracing::info!(fields = %fields, "{message}"),
            Level::Warn => tracing::warn!(fields = %fields, "{message}"),
            Level::Error => tracing::error!(fields = %fields, "{message}"),
        }
    }
}

struct KeyValues<'a>(&'a [(&'static str, LogValue)]);

impl fmt::Display for KeyValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}
