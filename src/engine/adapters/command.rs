use crate::engine::adapters::{Adapter, AdapterContext};
use crate::engine::error::{Result, TaskflowError, codes};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;

#[derive(Debug, Deserialize)]
struct CommandArgs {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Runs a local program on the terminal
///
/// Arguments: `{"program": "...", "args": [...], "cwd": "...", "env": {...}}`.
/// The result is `{"code", "stdout", "stderr"}`; a non-zero exit code fails
/// with `COMMAND_FAILED`. The child process is killed when the node is cancelled.
#[derive(Default)]
pub struct CommandAdapter;

impl CommandAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for CommandAdapter {
    fn adapter_type(&self) -> &str {
        super::builtins::COMMAND_ADAPTER
    }

    async fn execute(&self, args: Value, ctx: &AdapterContext) -> Result<Value> {
        let request: CommandArgs = serde_json::from_value(args).map_err(TaskflowError::from_serde)?;

        let mut cmd = tokio::process::Command::new(&request.program);
        cmd.args(&request.args);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(
            "Running {} for node {} ({})",
            request.program, ctx.node_key, ctx.request_id
        );

        let output = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                return Err(TaskflowError::Cancelled(format!("Command {} cancelled", request.program)));
            }
            output = cmd.output() => output.map_err(TaskflowError::from_io)?,
        };

        let code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(TaskflowError::adapter(
                codes::COMMAND_FAILED,
                format!(
                    "{} exited with {}: {}",
                    request.program,
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                ),
                false,
            ));
        }

        Ok(json!({
            "code": code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}
