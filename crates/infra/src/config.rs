//! Process configuration, read from environment variables.
//!
//! Every setting has a default so a bare `cargo run` starts an in-memory
//! pipeline. Persistent mode additionally needs a database URL and a
//! consumer name that survives restarts. Invalid values are rejected at
//! startup instead of being silently replaced.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::workers::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// All runtime settings of the API and worker processes.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Use Postgres + Redis instead of in-memory backends.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,

    pub topic: String,
    pub dlq_topic: String,
    pub consumer_group: String,
    /// Must survive restarts: un-acked entries stay pending under this name.
    pub consumer_name: String,
    pub partitions: u32,
    /// Entries pending longer than this under another consumer are reclaimed.
    pub claim_idle: Duration,

    pub violation_threshold: f64,
    pub prediction_ttl: Duration,

    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
    /// Forward undecodable messages to the DLQ instead of dropping them.
    pub dlq_unparseable: bool,

    pub bind_addr: SocketAddr,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379/1".to_string(),
            topic: "moderation".to_string(),
            dlq_topic: "moderation_dlq".to_string(),
            consumer_group: "moderation-workers".to_string(),
            consumer_name: LOCAL_CONSUMER.to_string(),
            partitions: 4,
            claim_idle: Duration::from_secs(60),
            violation_threshold: 0.5,
            prediction_ttl: Duration::from_secs(3600),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            poll_interval: Duration::from_millis(250),
            dlq_unparseable: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

const LOCAL_CONSUMER: &str = "worker-local";

impl PipelineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
            None => defaults.use_persistent_stores,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        // Persistent workers need a name that is the same after a restart.
        let consumer_name = match (get("MODERATION_CONSUMER_NAME"), get("HOSTNAME")) {
            (Some(name), _) => name,
            (None, Some(host)) => format!("worker-{host}"),
            (None, None) if use_persistent_stores => {
                return Err(ConfigError::Missing("MODERATION_CONSUMER_NAME"));
            }
            (None, None) => defaults.consumer_name,
        };

        let partitions = match get("MODERATION_PARTITIONS") {
            Some(v) => parse_num::<u32>("MODERATION_PARTITIONS", &v)?,
            None => defaults.partitions,
        };
        if partitions == 0 {
            return Err(ConfigError::invalid("MODERATION_PARTITIONS", "must be at least 1"));
        }

        let violation_threshold = match get("VIOLATION_THRESHOLD") {
            Some(v) => parse_num::<f64>("VIOLATION_THRESHOLD", &v)?,
            None => defaults.violation_threshold,
        };
        if !(0.0..=1.0).contains(&violation_threshold) {
            return Err(ConfigError::invalid(
                "VIOLATION_THRESHOLD",
                format!("must be within [0, 1], got {violation_threshold}"),
            ));
        }

        let prediction_ttl = match get("PREDICTION_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_num::<u64>("PREDICTION_TTL_SECS", &v)?),
            None => defaults.prediction_ttl,
        };
        if prediction_ttl.is_zero() {
            return Err(ConfigError::invalid("PREDICTION_TTL_SECS", "must be positive"));
        }

        let poll_interval = match get("WORKER_POLL_MS") {
            Some(v) => Duration::from_millis(parse_num("WORKER_POLL_MS", &v)?),
            None => defaults.poll_interval,
        };
        if poll_interval.is_zero() {
            return Err(ConfigError::invalid("WORKER_POLL_MS", "must be positive"));
        }

        let claim_idle = match get("MODERATION_CLAIM_IDLE_MS") {
            Some(v) => Duration::from_millis(parse_num("MODERATION_CLAIM_IDLE_MS", &v)?),
            None => defaults.claim_idle,
        };
        if claim_idle.is_zero() {
            return Err(ConfigError::invalid("MODERATION_CLAIM_IDLE_MS", "must be positive"));
        }

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => v
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", e.to_string()))?,
            None => defaults.bind_addr,
        };

        Ok(Self {
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            topic: get("MODERATION_TOPIC").unwrap_or(defaults.topic),
            dlq_topic: get("MODERATION_DLQ_TOPIC").unwrap_or(defaults.dlq_topic),
            consumer_group: get("MODERATION_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_name,
            partitions,
            claim_idle,
            violation_threshold,
            prediction_ttl,
            max_retries: match get("WORKER_MAX_RETRIES") {
                Some(v) => parse_num("WORKER_MAX_RETRIES", &v)?,
                None => defaults.max_retries,
            },
            retry_base_delay: match get("WORKER_RETRY_BASE_MS") {
                Some(v) => Duration::from_millis(parse_num("WORKER_RETRY_BASE_MS", &v)?),
                None => defaults.retry_base_delay,
            },
            poll_interval,
            dlq_unparseable: match get("DLQ_UNPARSEABLE") {
                Some(v) => parse_bool("DLQ_UNPARSEABLE", &v)?,
                None => defaults.dlq_unparseable,
            },
            bind_addr,
        })
    }

    /// Retry policy for transient worker failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay,
            self.retry_base_delay.saturating_mul(50),
        )
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("expected a boolean, got {other:?}"))),
    }
}

fn parse_num<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = load(&[]).unwrap();
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.redis_url, "redis://localhost:6379/1");
        assert_eq!(cfg.topic, "moderation");
        assert_eq!(cfg.dlq_topic, "moderation_dlq");
        assert_eq!(cfg.consumer_group, "moderation-workers");
        assert_eq!(cfg.consumer_name, "worker-local");
        assert_eq!(cfg.claim_idle, Duration::from_secs(60));
        assert_eq!(cfg.partitions, 4);
        assert_eq!(cfg.violation_threshold, 0.5);
        assert_eq!(cfg.prediction_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.max_retries, 3);
        assert!(!cfg.dlq_unparseable);
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("VIOLATION_THRESHOLD", "0.7"),
            ("PREDICTION_TTL_SECS", "60"),
            ("WORKER_MAX_RETRIES", "0"),
            ("DLQ_UNPARSEABLE", "true"),
            ("MODERATION_TOPIC", "mod-test"),
        ])
        .unwrap();
        assert_eq!(cfg.violation_threshold, 0.7);
        assert_eq!(cfg.prediction_ttl, Duration::from_secs(60));
        assert_eq!(cfg.max_retries, 0);
        assert!(cfg.dlq_unparseable);
        assert_eq!(cfg.topic, "mod-test");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            load(&[("VIOLATION_THRESHOLD", "1.5")]),
            Err(ConfigError::Invalid { key: "VIOLATION_THRESHOLD", .. })
        ));
        assert!(matches!(
            load(&[("MODERATION_PARTITIONS", "0")]),
            Err(ConfigError::Invalid { key: "MODERATION_PARTITIONS", .. })
        ));
        assert!(matches!(
            load(&[("WORKER_MAX_RETRIES", "many")]),
            Err(ConfigError::Invalid { key: "WORKER_MAX_RETRIES", .. })
        ));
        assert!(matches!(
            load(&[("DLQ_UNPARSEABLE", "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            load(&[("WORKER_POLL_MS", "0")]),
            Err(ConfigError::Invalid { key: "WORKER_POLL_MS", .. })
        ));
        assert!(matches!(
            load(&[("MODERATION_CLAIM_IDLE_MS", "0")]),
            Err(ConfigError::Invalid { key: "MODERATION_CLAIM_IDLE_MS", .. })
        ));
    }

    #[test]
    fn huge_retry_base_does_not_overflow() {
        let cfg = load(&[("WORKER_RETRY_BASE_MS", &u64::MAX.to_string())]).unwrap();
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_delay, Duration::MAX);
        assert!(policy.delay_for_retry(3) >= cfg.retry_base_delay);
    }

    #[test]
    fn consumer_name_is_stable_across_restarts() {
        let first = load(&[("HOSTNAME", "mod-7f9c")]).unwrap();
        let second = load(&[("HOSTNAME", "mod-7f9c")]).unwrap();
        assert_eq!(first.consumer_name, "worker-mod-7f9c");
        assert_eq!(first.consumer_name, second.consumer_name);

        let explicit = load(&[("HOSTNAME", "mod-7f9c"), ("MODERATION_CONSUMER_NAME", "w1")]).unwrap();
        assert_eq!(explicit.consumer_name, "w1");
    }

    #[test]
    fn persistent_mode_requires_a_consumer_name() {
        assert_eq!(
            load(&[
                ("USE_PERSISTENT_STORES", "true"),
                ("DATABASE_URL", "postgres://localhost/admod"),
            ]),
            Err(ConfigError::Missing("MODERATION_CONSUMER_NAME"))
        );
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        assert_eq!(
            load(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
        let cfg = load(&[
            ("USE_PERSISTENT_STORES", "1"),
            ("DATABASE_URL", "postgres://localhost/admod"),
            ("HOSTNAME", "mod-1"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
    }
}
