//! Process configuration from `HOMEFLOW_*` environment variables.
//!
//! Absent variables fall back to defaults; present but unparsable values are
//! an error so a typo never silently runs with a default.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use homeflow_ai::ValidatorConfig;
use homeflow_events::FilterConfig;

use crate::ai::AiBackendConfig;
use crate::batch::BatchConfig;
use crate::metrics::MetricsConfig;
use crate::stream::{PublisherConfig, RetryPolicy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}': {message}")]
    Invalid {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("{var}: {message}")]
    OutOfRange { var: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub metrics: MetricsConfig,
    pub publisher: PublisherConfig,
    pub batch: BatchConfig,
    pub ai: AiBackendConfig,
    pub validator: ValidatorConfig,
    pub context_lookback: chrono::Duration,
    pub redis_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            metrics: MetricsConfig::default(),
            publisher: PublisherConfig::default(),
            batch: BatchConfig::default(),
            ai: AiBackendConfig::default(),
            validator: ValidatorConfig::default(),
            context_lookback: chrono::Duration::hours(168),
            redis_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let mut filter = defaults.filter;
        filter.cooldown = Duration::from_millis(env.parse("HOMEFLOW_FILTER_COOLDOWN_MS", 1000u64)?);
        filter.cache_capacity = env.positive("HOMEFLOW_FILTER_CACHE_CAPACITY", 10_000usize)?;

        let metrics = MetricsConfig {
            window: Duration::from_secs(env.positive("HOMEFLOW_METRICS_WINDOW_SECS", 60u64)?),
            shards: env.positive("HOMEFLOW_METRICS_SHARDS", 16usize)?,
        };

        let retry = RetryPolicy::new(
            env.parse("HOMEFLOW_PUBLISH_MAX_RETRIES", 3u32)?,
            Duration::from_millis(env.parse("HOMEFLOW_PUBLISH_BASE_DELAY_MS", 200u64)?),
        );
        let publisher = PublisherConfig {
            topic: env.string("HOMEFLOW_STREAM_TOPIC", "homeflow.events"),
            partitions: env.positive("HOMEFLOW_STREAM_PARTITIONS", 12u32)?,
            workers: env.positive("HOMEFLOW_PUBLISH_WORKERS", 4usize)?,
            queue_capacity: env.positive("HOMEFLOW_PUBLISH_QUEUE_CAPACITY", 10_000usize)?,
            retry,
            ..defaults.publisher
        };

        let batch = BatchConfig {
            interval: Duration::from_secs(env.positive("HOMEFLOW_BATCH_INTERVAL_SECS", 21_600u64)?),
            max_concurrent: env.positive("HOMEFLOW_BATCH_MAX_CONCURRENT", 3usize)?,
            sub_batch_size: env.positive("HOMEFLOW_BATCH_SUB_BATCH_SIZE", 100usize)?,
            workers: env.positive("HOMEFLOW_BATCH_WORKERS", 8usize)?,
            ..defaults.batch
        };

        let ai = AiBackendConfig {
            timeout: Duration::from_millis(env.positive("HOMEFLOW_AI_TIMEOUT_MS", 30_000u64)?),
            local_url: env.optional("HOMEFLOW_AI_LOCAL_URL"),
            cloud_url: env.optional("HOMEFLOW_AI_CLOUD_URL"),
            cloud_api_key: env.optional("HOMEFLOW_AI_CLOUD_API_KEY"),
            model: env.string("HOMEFLOW_AI_MODEL", "llama3"),
        };
        if ai.local_url.is_none() && ai.cloud_url.is_none() {
            tracing::warn!("no AI backend configured; suggestion batches will produce nothing");
        }

        let threshold: f64 = env.parse("HOMEFLOW_PERFORMANCE_THRESHOLD", 50.0)?;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::OutOfRange {
                var: "HOMEFLOW_PERFORMANCE_THRESHOLD",
                message: format!("must be a positive number, got {threshold}"),
            });
        }
        let validator = defaults.validator.with_performance_threshold(threshold);

        let lookback_hours: i64 = env.positive("HOMEFLOW_CONTEXT_LOOKBACK_HOURS", 168i64)?;

        Ok(Self {
            filter,
            metrics,
            publisher,
            batch,
            ai,
            validator,
            context_lookback: chrono::Duration::hours(lookback_hours),
            redis_url: env.optional("REDIS_URL"),
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &'static str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| {
            tracing::debug!(var, default, "using default");
            default.to_string()
        })
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Debug,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => {
                tracing::debug!(var, default = ?default, "using default");
                Ok(default)
            }
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Debug + PartialOrd + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(var, default)?;
        if value <= T::default() {
            return Err(ConfigError::OutOfRange {
                var,
                message: format!("must be greater than zero, got {value:?}"),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.filter.cooldown, Duration::from_millis(1000));
        assert_eq!(cfg.metrics.window, Duration::from_secs(60));
        assert_eq!(cfg.publisher.partitions, 12);
        assert_eq!(cfg.publisher.topic, "homeflow.events");
        assert_eq!(cfg.publisher.retry.max_retries, 3);
        assert_eq!(cfg.publisher.queue_capacity, 10_000);
        assert_eq!(cfg.batch.interval, Duration::from_secs(6 * 3600));
        assert_eq!(cfg.batch.max_concurrent, 3);
        assert_eq!(cfg.batch.sub_batch_size, 100);
        assert_eq!(cfg.ai.model, "llama3");
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = from(&[
            ("HOMEFLOW_BATCH_MAX_CONCURRENT", "5"),
            ("HOMEFLOW_AI_LOCAL_URL", "http://localhost:11434"),
            ("HOMEFLOW_PERFORMANCE_THRESHOLD", "80.5"),
            ("REDIS_URL", "redis://cache:6379"),
        ])
        .unwrap();
        assert_eq!(cfg.batch.max_concurrent, 5);
        assert_eq!(cfg.ai.local_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(cfg.validator.performance_threshold, 80.5);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn garbage_is_rejected_not_defaulted() {
        let err = from(&[("HOMEFLOW_METRICS_SHARDS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "HOMEFLOW_METRICS_SHARDS", .. }));

        let err = from(&[("HOMEFLOW_BATCH_MAX_CONCURRENT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }
}
