use std::time::Duration;

use serde::Deserialize;

/// How a batch picks the arguments used for its bulk fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArgsStrategy {
    /// The first queued request's args parameterize the whole batch, which keeps it at
    /// a single bulk fetch. Every call to the same field within one request is then
    /// expected to pass equivalent args.
    #[default]
    FirstRequest,
    /// One bulk fetch per distinct canonical args within the batch.
    GroupByArgs,
}

/// Pagination defaults of [`DefaultArgsTransformer`](crate::args::DefaultArgsTransformer),
/// installed with [`Services::with_pagination`](crate::services::Services::with_pagination).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct PaginationConfig {
    pub default_limit: i64,
    /// `None` leaves `limit: -1` unbounded.
    pub max_limit: Option<i64>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: None,
        }
    }
}

impl PaginationConfig {
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

/// Per-request batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct LoaderConfig {
    pub batch_delay_ms: u64,
    pub args_strategy: ArgsStrategy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: 1,
            args_strategy: ArgsStrategy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.batch_delay(), Duration::from_millis(1));
        assert_eq!(config.args_strategy, ArgsStrategy::FirstRequest);

        let pagination = PaginationConfig::default();
        assert_eq!(pagination.default_limit, 100);
        assert_eq!(pagination.max_limit, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = LoaderConfig::from_json(serde_json::json!({
            "argsStrategy": "groupByArgs"
        }))
        .unwrap();

        assert_eq!(config.args_strategy, ArgsStrategy::GroupByArgs);
        assert_eq!(config.batch_delay_ms, 1);

        let pagination = PaginationConfig::from_json(serde_json::json!({ "maxLimit": 50 })).unwrap();
        assert_eq!(pagination.default_limit, 100);
        assert_eq!(pagination.max_limit, Some(50));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = LoaderConfig::from_json(serde_json::json!({
            "pagination": { "maxLimit": 50 }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("unknown field `pagination`"));

        assert!(PaginationConfig::from_json(serde_json::json!({ "max": 5 })).is_err());
    }
}
