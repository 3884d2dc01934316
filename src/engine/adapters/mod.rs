use crate::engine::error::{ErrorInfo, Result, TaskflowError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub mod manager;
pub use manager::{AdapterManager, NotFoundAdapter};

pub mod command;
pub use command::CommandAdapter;

pub mod device;
pub use device::{DeviceAdapter, DeviceBridge};

pub mod http;
pub use http::HttpAdapter;

// Built-in adapters registered by every task system
pub mod builtins {
    use super::*;
    use crate::engine::config::TaskSystemConfig;
    use std::sync::Arc;

    pub const DEVICE_ADAPTER: &str = "device";
    pub const HTTP_ADAPTER: &str = "http";
    pub const COMMAND_ADAPTER: &str = "command";

    pub fn get_all_adapters(config: &TaskSystemConfig) -> Vec<Arc<dyn Adapter>> {
        vec![
            Arc::new(DeviceAdapter::new()),
            Arc::new(HttpAdapter::new(config.http_timeout_secs)),
            Arc::new(CommandAdapter::new()),
        ]
    }
}

/// What an adapter sees of the run invoking it
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub request_id: String,
    pub task_key: String,
    pub node_key: String,
    /// Snapshot of the run context at invocation time
    pub values: Map<String, Value>,
    /// Fired when the node times out or the run is cancelled
    pub cancellation: CancellationToken,
}

impl AdapterContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Capability provider for atomic nodes
///
/// Implementations perform the real side effect (device command, HTTP call,
/// local process) and should stop promptly once `ctx.cancellation` fires.
/// The executor may call `execute` more than once for a node when the node
/// retries, so side effects should be idempotent.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Node kind this adapter serves
    fn adapter_type(&self) -> &str;

    async fn execute(&self, args: Value, ctx: &AdapterContext) -> Result<Value>;
}

/// Raw `{success, error}` reply for adapters that speak JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AdapterReply {
    pub fn ok(value: Value) -> Self {
        Self {
            success: Some(value),
            error: None,
        }
    }

    pub fn err(error: ErrorInfo) -> Self {
        Self {
            success: None,
            error: Some(error),
        }
    }

    /// Parse a raw JSON reply; values without `success`/`error` count as success
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(ref map) if map.contains_key("success") || map.contains_key("error") => {
                serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::ok(value))
            }
            other => Self::ok(other),
        }
    }

    /// An `error` field always means failure, even next to a `success` value
    pub fn into_result(self) -> Result<Value> {
        match (self.success, self.error) {
            (_, Some(error)) => Err(TaskflowError::Adapter(error)),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_with_error_is_failure() {
        let reply = AdapterReply::from_value(json!({
            "success": {"opened": true},
            "error": {"code": "LOCK_JAMMED", "message": "jammed", "retryable": true}
        }));
        match reply.into_result() {
            Err(TaskflowError::Adapter(info)) => {
                assert_eq!(info.code, "LOCK_JAMMED");
                assert!(info.retryable);
            }
            other => panic!("expected adapter error, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_success() {
        let reply = AdapterReply::from_value(json!({"success": {"code": "123"}}));
        assert_eq!(reply.into_result().unwrap(), json!({"code": "123"}));
    }

    #[test]
    fn test_plain_value_is_success() {
        let reply = AdapterReply::from_value(json!({"code": "123"}));
        assert_eq!(reply.into_result().unwrap(), json!({"code": "123"}));

        let empty = AdapterReply::default();
        assert_eq!(empty.into_result().unwrap(), Value::Null);
    }
}
