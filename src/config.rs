use std::time::Duration;

use anyhow::{bail, Context};
use config::{builder::DefaultState, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::ledger::RetryPolicy;

/// Service settings
///
/// Read from `config/default.toml` when present, then from `LEDGER__<SECTION>__<KEY>`
/// environment variables. Missing keys fall back to their defaults.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub sweeper: SweeperConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between two expiration sweeps
    pub interval_secs: u64,
    /// Rows handled per sweep transaction
    pub page_limit: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            page_limit: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_backoff_ms: policy.base_backoff.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config: Self = builder
            .build()?
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sweeper.interval_secs == 0 {
            bail!("sweeper.interval_secs must be positive");
        }
        if self.sweeper.page_limit == 0 {
            bail!("sweeper.page_limit must be positive");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be positive");
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_backoff: Duration::from_millis(self.retry.base_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use rstest::*;
    use speculoos::prelude::*;

    fn from_toml(toml: &str) -> anyhow::Result<Config> {
        Config::build(config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = from_toml("")?;

        assert_that!(config).is_equal_to(Config::default());
        assert_that!(config.retry_policy()).is_equal_to(RetryPolicy::default());
        assert_that!(config.sweep_interval()).is_equal_to(Duration::from_secs(60));

        Ok(())
    }

    #[test]
    fn test_partial_override() -> anyhow::Result<()> {
        let config = from_toml(
            r#"
            [sweeper]
            page_limit = 10

            [log]
            json = true
            "#,
        )?;

        assert_that!(config.sweeper.page_limit).is_equal_to(10);
        assert_that!(config.sweeper.interval_secs).is_equal_to(60);
        assert_that!(config.log.json).is_true();
        assert_that!(config.log.level.as_str()).is_equal_to("info");

        Ok(())
    }

    #[rstest]
    #[case("[sweeper]\ninterval_secs = 0")]
    #[case("[sweeper]\npage_limit = 0")]
    #[case("[retry]\nmax_attempts = 0")]
    #[case("[retry]\nmax_attempts = \"many\"")]
    fn test_invalid(#[case] toml: &str) {
        assert_that!(from_toml(toml)).is_err();
    }
}
