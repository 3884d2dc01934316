use crate::engine::error::{Result, TaskflowError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Engine-wide settings for a [`TaskSystem`](crate::TaskSystem)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSystemConfig {
    /// Retry delay used when a retry strategy has no `interval`
    #[serde(default = "default_retry_interval_ms")]
    pub default_retry_interval_ms: u64,
    /// Message attached to NODE_SKIP when a node has no `skipMessage`
    #[serde(default = "default_skip_message")]
    pub default_skip_message: String,
    /// Whole-task deadline for definitions without a `timeout`
    #[serde(default)]
    pub default_task_timeout_ms: Option<u64>,
    /// Node deadline for nodes without a `timeout`
    #[serde(default)]
    pub default_node_timeout_ms: Option<u64>,
    /// Client timeout of the built-in `http` adapter
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_skip_message() -> String {
    "condition not met".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for TaskSystemConfig {
    fn default() -> Self {
        Self {
            default_retry_interval_ms: default_retry_interval_ms(),
            default_skip_message: default_skip_message(),
            default_task_timeout_ms: None,
            default_node_timeout_ms: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl TaskSystemConfig {
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(TaskflowError::from_serde)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json_str = fs::read_to_string(path).map_err(TaskflowError::from_io)?;
        Self::from_json(&json_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TaskSystemConfig::from_json("{}").unwrap();
        assert_eq!(config, TaskSystemConfig::default());
        assert_eq!(config.default_retry_interval_ms, 1000);
        assert_eq!(config.default_skip_message, "condition not met");
        assert!(config.default_task_timeout_ms.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = TaskSystemConfig::from_json(
            r#"{"defaultRetryIntervalMs": 250, "defaultTaskTimeoutMs": 60000, "httpTimeoutSecs": 5}"#,
        )
        .unwrap();
        assert_eq!(config.default_retry_interval_ms, 250);
        assert_eq!(config.default_task_timeout_ms, Some(60000));
        assert_eq!(config.http_timeout_secs, 5);
    }

    #[test]
    fn test_missing_file() {
        let result = TaskSystemConfig::from_file("/nonexistent/taskflow.json");
        assert!(matches!(result, Err(TaskflowError::Io(_))));
    }
}
