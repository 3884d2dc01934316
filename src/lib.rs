/*!
# Taskflow-rs

A streaming task orchestration engine for point-of-sale terminals: checkout,
locker pickup and device maintenance flows described as JSON node trees and
executed against pluggable hardware and service adapters.

## Overview

A task is a tree of nodes. **Flow** nodes run their children strictly in
order, feeding each child's output into the next. **Atomic** nodes call an
adapter (a locker controller, a payment backend, a local program). Every
state transition of a run is reported as a `ProgressData` event on a stream,
so a UI can render progress while the run is still going.

## Key Components

* **TaskSystem**: Registers task definitions and adapters and starts runs
* **AdapterManager**: Resolves adapter types to implementations
* **StreamTaskExecutor**: Executes node trees and emits progress events
* **TaskDefinition**: Declarative task tree with timeouts and error strategies
* **ScriptEvaluator**: JSONLogic conditions and argument/result transforms

## Built-in Adapters

* **device**: Calls a paired device through a host-supplied `DeviceBridge`
* **http**: Calls a backend service over HTTP
* **command**: Runs a local program

## Usage Example

```rust,no_run
use futures::StreamExt;
use serde_json::json;
use taskflow_rs::{TaskDefinition, TaskSystem, new_request_id};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let definition = TaskDefinition::from_json(r#"
    {
        "key": "price_check",
        "timeout": 5000,
        "rootNode": {
            "key": "root",
            "kind": "flow",
            "children": [
                {
                    "key": "lookup",
                    "kind": "http",
                    "argsTransform": {
                        "url": { "cat": ["https://pricing.local/items/", { "var": "input.sku" }] }
                    },
                    "strategy": { "errorStrategy": "retry", "retry": { "times": 2, "interval": 500 } }
                }
            ]
        }
    }
    "#)?;

    let system = TaskSystem::new();
    system.register_task(definition)?;

    let mut progress = system
        .task("price_check")
        .run(&new_request_id(), json!({ "sku": "A-100" }));

    while let Some(event) = progress.next().await {
        println!("{:?} {} {}%", event.progress_type, event.node_key, event.progress);
    }

    Ok(())
}
```

## Custom Adapters

```rust,no_run
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use taskflow_rs::{Adapter, AdapterContext, Result, TaskSystem, TaskflowError};

struct ReceiptPrinter;

#[async_trait]
impl Adapter for ReceiptPrinter {
    fn adapter_type(&self) -> &str {
        "printer"
    }

    async fn execute(&self, args: Value, ctx: &AdapterContext) -> Result<Value> {
        let lines = args
            .get("lines")
            .and_then(Value::as_array)
            .ok_or_else(|| TaskflowError::adapter("PRINT_ERROR", "lines are required", false))?;

        if ctx.is_cancelled() {
            return Err(TaskflowError::Cancelled("print aborted".to_string()));
        }

        Ok(json!({ "printed": lines.len() }))
    }
}

fn main() {
    let system = TaskSystem::new();
    system.register_adapter(Arc::new(ReceiptPrinter));
}
```
*/

pub mod engine;

pub use engine::adapters::{
    Adapter, AdapterContext, AdapterManager, AdapterReply, CommandAdapter, DeviceAdapter,
    DeviceBridge, HttpAdapter,
};
pub use engine::error::{ErrorInfo, Result, TaskflowError};
pub use engine::{
    ErrorStrategy, JsonLogicEvaluator, NodeKind, NodeStrategy, ProgressData, ProgressStream,
    ProgressType, RetryConfig, ScriptEvaluator, StreamTaskExecutor, TaskDefinition,
    TaskExecutionContext, TaskHandle, TaskNode, TaskState, TaskSystem, TaskSystemConfig,
    new_request_id,
};
