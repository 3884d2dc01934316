use crate::engine::adapters::{Adapter, AdapterContext, AdapterReply};
use crate::engine::error::{Result, TaskflowError, codes};
use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};
use std::sync::Arc;

/// Transport to paired hardware (locker controller, scanner, printer)
///
/// Implemented by the host's device pairing layer. Replies may use the
/// `{success, error}` shape; an `error` field is treated as a failure.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn call(&self, command: &str, params: Value, ctx: &AdapterContext) -> Result<Value>;
}

/// Generic external device call
///
/// Arguments: `{"command": "<name>", "params": {...}}`.
pub struct DeviceAdapter {
    bridge: Option<Arc<dyn DeviceBridge>>,
}

impl Default for DeviceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAdapter {
    /// An adapter with no paired device; every call fails with `DEVICE_UNAVAILABLE`
    pub fn new() -> Self {
        Self { bridge: None }
    }

    pub fn with_bridge(bridge: Arc<dyn DeviceBridge>) -> Self {
        Self {
            bridge: Some(bridge),
        }
    }
}

#[async_trait]
impl Adapter for DeviceAdapter {
    fn adapter_type(&self) -> &str {
        super::builtins::DEVICE_ADAPTER
    }

    async fn execute(&self, args: Value, ctx: &AdapterContext) -> Result<Value> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TaskflowError::Deserialization("Device call requires a 'command' string".to_string())
            })?
            .to_string();
        let params = args.get("params").cloned().unwrap_or_else(|| json!({}));

        let bridge = self.bridge.as_ref().ok_or_else(|| {
            TaskflowError::adapter(
                codes::DEVICE_UNAVAILABLE,
                format!("No device bridge available for command {command}"),
                true,
            )
        })?;

        debug!(
            "Device command {} for node {} ({})",
            command, ctx.node_key, ctx.request_id
        );

        tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                Err(TaskflowError::Cancelled(format!("Device command {command} cancelled")))
            }
            reply = bridge.call(&command, params, ctx) => {
                AdapterReply::from_value(reply?).into_result()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct LockerBridge;

    #[async_trait]
    impl DeviceBridge for LockerBridge {
        async fn call(&self, command: &str, params: Value, _ctx: &AdapterContext) -> Result<Value> {
            match command {
                "open" => Ok(json!({"success": {"opened": params["slot"]}})),
                "jam" => Ok(json!({"error": {"code": "LOCK_JAMMED", "message": "jammed", "retryable": true}})),
                _ => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }
            }
        }
    }

    fn ctx() -> AdapterContext {
        AdapterContext {
            request_id: "req-1".to_string(),
            task_key: "pickup".to_string(),
            node_key: "open".to_string(),
            values: Map::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_without_bridge() {
        let adapter = DeviceAdapter::new();
        let error = adapter
            .execute(json!({"command": "open"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(error.code(), "DEVICE_UNAVAILABLE");
        assert!(error.retryable());
    }

    #[tokio::test]
    async fn test_missing_command() {
        let adapter = DeviceAdapter::with_bridge(Arc::new(LockerBridge));
        let error = adapter.execute(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(error, TaskflowError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_success_and_error_replies() {
        let adapter = DeviceAdapter::with_bridge(Arc::new(LockerBridge));
        let opened = adapter
            .execute(json!({"command": "open", "params": {"slot": 4}}), &ctx())
            .await
            .unwrap();
        assert_eq!(opened, json!({"opened": 4}));

        let jammed = adapter
            .execute(json!({"command": "jam"}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(jammed.code(), "LOCK_JAMMED");
    }

    #[tokio::test]
    async fn test_cancellation() {
        let adapter = DeviceAdapter::with_bridge(Arc::new(LockerBridge));
        let ctx = ctx();
        ctx.cancellation.cancel();
        let error = adapter
            .execute(json!({"command": "hang"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(error, TaskflowError::Cancelled(_)));
    }
}
