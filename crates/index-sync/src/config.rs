use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// What a create/delete does when another create/delete of the same index
/// name is already in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Wait for the running transition, then evaluate against its outcome.
    #[default]
    Block,
    /// Fail immediately with `IndexBusy`.
    FailFast,
}

/// Tuning for an [`IndexSynchronizer`](crate::IndexSynchronizer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum documents per bulk request.
    pub batch_size: usize,
    /// Maximum bulk requests in flight for one `bulk_upsert` call.
    pub max_concurrent_batches: usize,
    /// Deadline applied to every transport call.
    pub request_timeout_ms: u64,
    pub transition_policy: TransitionPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            transition_policy: TransitionPolicy::Block,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transition_policy = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.batch_size == 0 {
            return Err(IndexError::Config("batch_size must be at least 1".into()));
        }
        if self.max_concurrent_batches == 0 {
            return Err(IndexError::Config(
                "max_concurrent_batches must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(IndexError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Defaults overridden by `INDEX_SYNC_BATCH_SIZE`,
    /// `INDEX_SYNC_MAX_CONCURRENT_BATCHES`, `INDEX_SYNC_REQUEST_TIMEOUT_MS`
    /// and `INDEX_SYNC_TRANSITION_POLICY` (`block` or `fail_fast`).
    pub fn from_env() -> IndexResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> IndexResult<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup("INDEX_SYNC_BATCH_SIZE") {
            config.batch_size = parse_var("INDEX_SYNC_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("INDEX_SYNC_MAX_CONCURRENT_BATCHES") {
            config.max_concurrent_batches = parse_var("INDEX_SYNC_MAX_CONCURRENT_BATCHES", &value)?;
        }
        if let Some(value) = lookup("INDEX_SYNC_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_var("INDEX_SYNC_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("INDEX_SYNC_TRANSITION_POLICY") {
            config.transition_policy = match value.trim() {
                "block" => TransitionPolicy::Block,
                "fail_fast" => TransitionPolicy::FailFast,
                other => {
                    return Err(IndexError::Config(format!(
                        "INDEX_SYNC_TRANSITION_POLICY: unknown policy `{other}`"
                    )))
                }
            };
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> IndexResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IndexError::Config(format!("{key}: cannot parse `{value}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_concurrent_batches, 4);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.transition_policy, TransitionPolicy::Block);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("INDEX_SYNC_BATCH_SIZE", "100"),
            ("INDEX_SYNC_MAX_CONCURRENT_BATCHES", " 2 "),
            ("INDEX_SYNC_REQUEST_TIMEOUT_MS", "250"),
            ("INDEX_SYNC_TRANSITION_POLICY", "fail_fast"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_concurrent_batches, 2);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.transition_policy, TransitionPolicy::FailFast);
    }

    #[test]
    fn env_errors() {
        let err = SyncConfig::from_lookup(lookup(&[("INDEX_SYNC_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("INDEX_SYNC_BATCH_SIZE"));

        let err = SyncConfig::from_lookup(lookup(&[("INDEX_SYNC_BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err.kind(), "config");

        assert!(SyncConfig::from_lookup(lookup(&[("INDEX_SYNC_TRANSITION_POLICY", "yolo")])).is_err());
    }

    #[test]
    fn deserialize_partial() {
        let config: SyncConfig = serde_json::from_str(r#"{"batch_size": 50}"#).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_concurrent_batches, DEFAULT_MAX_CONCURRENT_BATCHES);

        let config: SyncConfig =
            serde_json::from_str(r#"{"transition_policy": "fail_fast"}"#).unwrap();
        assert_eq!(config.transition_policy, TransitionPolicy::FailFast);
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .batch_size(10)
            .max_concurrent_batches(1)
            .request_timeout(Duration::from_millis(75))
            .transition_policy(TransitionPolicy::FailFast);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.request_timeout_ms, 75);
    }
}
