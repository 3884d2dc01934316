//! # Stream Task Executor
//!
//! Walks a [`TaskDefinition`]'s node tree and reports every state transition
//! as a [`ProgressData`] event. Each run is a single spawned task:
//!
//! - Siblings in a flow run strictly one after another, each receiving the
//!   previous sibling's output as its input payload.
//! - The whole run races the task deadline and the cancellation signal; the
//!   losing branch is dropped, so nothing is emitted after the final event.
//! - Each node races its own deadline. A [`TerminalLatch`] guarantees that a
//!   node execution reports at most one of `NODE_COMPLETE`, `NODE_ERROR` or
//!   `NODE_SKIP`.
//! - Failures of atomic nodes are retried, skipped or compensated according
//!   to the node's strategy and never escape as errors.

use crate::engine::adapters::{AdapterContext, AdapterManager};
use crate::engine::config::TaskSystemConfig;
use crate::engine::context::{TaskExecutionContext, TaskState};
use crate::engine::error::{ErrorInfo, Result, TaskflowError, codes};
use crate::engine::node::{ErrorStrategy, NodeKind, TaskNode};
use crate::engine::progress::{ProgressData, ProgressStream, ProgressType};
use crate::engine::script::ScriptEvaluator;
use crate::engine::task::TaskDefinition;
use crate::engine::utils::is_truthy;
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Starts runs of task definitions and hands back their progress streams
pub struct StreamTaskExecutor {
    adapters: Arc<AdapterManager>,
    scripts: Arc<dyn ScriptEvaluator>,
    config: Arc<TaskSystemConfig>,
}

impl StreamTaskExecutor {
    pub fn new(
        adapters: Arc<AdapterManager>,
        scripts: Arc<dyn ScriptEvaluator>,
        config: Arc<TaskSystemConfig>,
    ) -> Self {
        Self {
            adapters,
            scripts,
            config,
        }
    }

    /// Start a run of `definition`
    ///
    /// The run executes on a spawned Tokio task. Outside a Tokio runtime the
    /// stream yields a single `RUNTIME_UNAVAILABLE` error event instead.
    /// The returned stream ends after the final event.
    pub fn execute(
        &self,
        definition: Arc<TaskDefinition>,
        request_id: &str,
        initial_context: Map<String, Value>,
    ) -> ProgressStream {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start task {} ({}): {}", definition.key, request_id, e);
                let event = ProgressData::runtime_unavailable(
                    request_id,
                    &definition.key,
                    initial_context,
                    e.to_string(),
                );
                return ProgressStream::from_events(request_id, vec![event]);
            }
        };

        let total_nodes = definition.count_nodes();
        let ctx = TaskExecutionContext::new(
            request_id,
            definition.key.as_str(),
            initial_context,
            total_nodes,
        );
        let cancellation = ctx.cancellation().clone();
        let (sender, receiver) = mpsc::unbounded_channel();

        let run = Run {
            definition,
            ctx,
            sender,
            consumer_gone: false,
            adapters: Arc::clone(&self.adapters),
            scripts: Arc::clone(&self.scripts),
            config: Arc::clone(&self.config),
        };
        runtime.spawn(run.drive());

        ProgressStream::new(request_id, receiver, cancellation)
    }
}

/// One-shot flag deciding which party reports a node's terminal event
#[derive(Clone, Default)]
pub(crate) struct TerminalLatch(Arc<AtomicBool>);

impl TerminalLatch {
    /// Returns `true` only for the first caller
    pub(crate) fn close(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a node ended, as seen by its parent flow
#[derive(Debug)]
enum NodeOutcome {
    Completed(Value),
    /// Condition evaluated false
    Skipped,
    /// Failed, then resolved by skip or compensation
    Handled,
    /// Failed without resolution
    Failed,
    /// Attempts exhausted; the error strategy has not been applied yet
    Unresolved(ErrorInfo),
    /// The run was cancelled while the node was running
    Cancelled,
}

/// Where a node sits in the tree
#[derive(Clone, Copy)]
struct NodeScope<'a> {
    parent: Option<(&'a TaskNode, usize)>,
    /// Compensation nodes neither retry nor compensate
    compensating: bool,
}

impl<'a> NodeScope<'a> {
    fn root() -> Self {
        Self {
            parent: None,
            compensating: false,
        }
    }

    fn child_of(parent: &'a TaskNode, parent_index: usize) -> Self {
        Self {
            parent: Some((parent, parent_index)),
            compensating: false,
        }
    }

    /// Sibling named `key` and its preorder index
    fn sibling(&self, key: &str) -> Option<(&'a TaskNode, usize)> {
        let (parent, parent_index) = self.parent?;
        parent
            .children
            .iter()
            .zip(parent.child_indices(parent_index))
            .find(|(child, _)| child.key == key)
    }
}

enum RunEnd {
    Finished,
    TimedOut(u64),
    Cancelled,
}

struct Run {
    definition: Arc<TaskDefinition>,
    ctx: TaskExecutionContext,
    sender: mpsc::UnboundedSender<ProgressData>,
    consumer_gone: bool,
    adapters: Arc<AdapterManager>,
    scripts: Arc<dyn ScriptEvaluator>,
    config: Arc<TaskSystemConfig>,
}

impl Run {
    async fn drive(mut self) {
        let definition = Arc::clone(&self.definition);
        let root = &definition.root_node;
        let cancellation = self.ctx.cancellation().clone();

        info!(
            "Starting task {} ({}) with {} nodes",
            definition.key,
            self.ctx.request_id,
            self.ctx.total_nodes()
        );

        let init = self.event(ProgressType::TaskInit, &root.key, 0);
        self.send(init);
        self.ctx.transition(TaskState::Running);

        let deadline = definition.timeout.or(self.config.default_task_timeout_ms);
        let input = self.ctx.snapshot();

        let end = {
            let execution = self.execute_node(root, NodeScope::root(), 0, input);
            let task_deadline = async {
                match deadline {
                    Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => RunEnd::Cancelled,
                _ = task_deadline => RunEnd::TimedOut(deadline.unwrap_or_default()),
                _ = execution => RunEnd::Finished,
            }
        };

        let last_index = self.ctx.total_nodes().saturating_sub(1);
        self.ctx.finish_progress();
        match end {
            RunEnd::Finished => {
                let state = if self.ctx.has_error() {
                    TaskState::PartialFailed
                } else {
                    TaskState::Completed
                };
                self.ctx.transition(state);
                info!(
                    "Task {} ({}) finished with {:?}",
                    definition.key, self.ctx.request_id, state
                );
                let complete = self.event(ProgressType::TaskComplete, &root.key, last_index);
                self.send(complete);
            }
            RunEnd::TimedOut(ms) => {
                self.ctx.transition(TaskState::Cancelled);
                warn!(
                    "Task {} ({}) timed out after {}ms",
                    definition.key, self.ctx.request_id, ms
                );
                let error = ErrorInfo::from(&TaskflowError::TaskTimeout(format!(
                    "Task {} did not finish within {ms}ms",
                    definition.key
                )));
                let complete = self
                    .event(ProgressType::TaskComplete, &root.key, last_index)
                    .with_state(TaskState::PartialFailed)
                    .with_error(error);
                self.send(complete);
            }
            RunEnd::Cancelled => {
                self.ctx.transition(TaskState::Cancelled);
                info!("Task {} ({}) cancelled", definition.key, self.ctx.request_id);
                let error = ErrorInfo::from(&TaskflowError::Cancelled(format!(
                    "Task {} was cancelled",
                    definition.key
                )));
                let complete = self
                    .event(ProgressType::TaskComplete, &root.key, last_index)
                    .with_error(error);
                self.send(complete);
            }
        }

        // Releases adapters still waiting on the signal
        cancellation.cancel();
    }

    fn event(&self, progress_type: ProgressType, node_key: &str, node_index: usize) -> ProgressData {
        ProgressData {
            request_id: self.ctx.request_id.clone(),
            task_key: self.ctx.task_key.clone(),
            node_key: node_key.to_string(),
            progress_type,
            state: self.ctx.state(),
            node_index,
            total_nodes: self.ctx.total_nodes(),
            progress: self.ctx.last_progress(),
            timestamp: Utc::now(),
            context: self.ctx.snapshot(),
            payload: None,
            error: None,
        }
    }

    fn send(&mut self, event: ProgressData) {
        if self.sender.send(event).is_err() && !self.consumer_gone {
            self.consumer_gone = true;
            debug!(
                "Progress consumer for {} dropped, cancelling run",
                self.ctx.request_id
            );
            self.ctx.cancellation().cancel();
        }
    }

    fn execute_node<'a>(
        &'a mut self,
        node: &'a TaskNode,
        scope: NodeScope<'a>,
        index: usize,
        input: Value,
    ) -> BoxFuture<'a, NodeOutcome> {
        async move {
            let start = self.event(ProgressType::NodeStart, &node.key, index);
            self.send(start);

            let latch = TerminalLatch::default();
            let attempt = self.ctx.cancellation().child_token();
            let deadline = node.timeout.or(self.config.default_node_timeout_ms);

            let outcome = match deadline {
                Some(ms) => {
                    let run = self.run_node(node, scope, index, input, &attempt, &latch);
                    match tokio::time::timeout(Duration::from_millis(ms), run).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            attempt.cancel();
                            warn!("Node {} timed out after {}ms", node.key, ms);
                            let error = ErrorInfo::new(
                                codes::NODE_TIMEOUT,
                                format!("Node {} did not finish within {ms}ms", node.key),
                                node.strategy.is_retry(),
                            );
                            self.fail_node(node, index, error, &latch);
                            NodeOutcome::Failed
                        }
                    }
                }
                None => {
                    self.run_node(node, scope, index, input, &attempt, &latch)
                        .await
                }
            };

            attempt.cancel();

            // Compensation runs outside the failed node's deadline
            match outcome {
                NodeOutcome::Unresolved(error) => {
                    self.resolve_failure(node, scope, index, error).await
                }
                other => other,
            }
        }
        .boxed()
    }

    async fn run_node(
        &mut self,
        node: &TaskNode,
        scope: NodeScope<'_>,
        index: usize,
        input: Value,
        attempt: &CancellationToken,
        latch: &TerminalLatch,
    ) -> NodeOutcome {
        if let Some(condition) = &node.strategy.condition {
            let passed = self.check_condition(node, condition, &input).await;
            let check = self
                .event(ProgressType::ConditionCheck, &node.key, index)
                .with_payload(json!({ "result": passed }));
            self.send(check);

            if !passed {
                let message = node
                    .strategy
                    .skip_message
                    .clone()
                    .unwrap_or_else(|| self.config.default_skip_message.clone());
                debug!("Skipping node {} - {}", node.key, message);
                if latch.close() {
                    let skip = self
                        .event(ProgressType::NodeSkip, &node.key, index)
                        .with_payload(json!({
                            "reason": codes::CONDITION_NOT_MET,
                            "message": message,
                        }));
                    self.send(skip);
                }
                return NodeOutcome::Skipped;
            }
        }

        let args = match &node.args_transform {
            Some(script) => match self.scripts.evaluate(script, &input, self.ctx.values()).await {
                Ok(args) => args,
                Err(e) => {
                    error!("Argument transform of node {} failed: {}", node.key, e);
                    let error = ErrorInfo::new(
                        codes::NODE_EXEC_ERROR,
                        format!("Argument transform of node {} failed: {e}", node.key),
                        false,
                    );
                    self.fail_node(node, index, error, latch);
                    return NodeOutcome::Failed;
                }
            },
            None => input,
        };

        match &node.kind {
            NodeKind::Flow => self.run_flow(node, index, args, latch).await,
            NodeKind::Atomic(adapter_type) => {
                self.run_atomic(node, adapter_type, scope, index, args, attempt, latch)
                    .await
            }
        }
    }

    async fn check_condition(&self, node: &TaskNode, condition: &Value, input: &Value) -> bool {
        match self.scripts.evaluate(condition, input, self.ctx.values()).await {
            Ok(result) => is_truthy(&result),
            Err(e) => {
                warn!(
                    "Condition of node {} failed, treating as false: {}",
                    node.key, e
                );
                false
            }
        }
    }

    async fn run_flow(
        &mut self,
        node: &TaskNode,
        index: usize,
        input: Value,
        latch: &TerminalLatch,
    ) -> NodeOutcome {
        let mut payload = input;
        let mut failed = 0;

        for (child, child_index) in node.children.iter().zip(node.child_indices(index)) {
            if node.is_compensation_target(&child.key) {
                continue;
            }

            let scope = NodeScope::child_of(node, index);
            match self
                .execute_node(child, scope, child_index, payload.clone())
                .await
            {
                NodeOutcome::Completed(output) => payload = output,
                NodeOutcome::Failed | NodeOutcome::Unresolved(_) => failed += 1,
                NodeOutcome::Skipped | NodeOutcome::Handled => {}
                NodeOutcome::Cancelled => return NodeOutcome::Cancelled,
            }
        }

        if failed > 0 {
            let error = ErrorInfo::new(
                codes::NODE_EXEC_ERROR,
                format!("{failed} child node(s) of {} failed", node.key),
                false,
            );
            self.fail_node(node, index, error, latch);
            return NodeOutcome::Failed;
        }

        match self.transform_result(node, payload).await {
            Ok(output) => self.complete_node(node, index, output, latch),
            Err(e) => {
                let error = ErrorInfo::new(codes::NODE_EXEC_ERROR, e.to_string(), false);
                self.fail_node(node, index, error, latch);
                NodeOutcome::Failed
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_atomic(
        &mut self,
        node: &TaskNode,
        adapter_type: &str,
        scope: NodeScope<'_>,
        index: usize,
        args: Value,
        attempt: &CancellationToken,
        latch: &TerminalLatch,
    ) -> NodeOutcome {
        let max_retries = if scope.compensating {
            0
        } else {
            node.strategy.max_retries()
        };
        let mut retry_count = 0;

        loop {
            let adapter = self.adapters.get(adapter_type);
            let adapter_ctx = AdapterContext {
                request_id: self.ctx.request_id.clone(),
                task_key: self.ctx.task_key.clone(),
                node_key: node.key.clone(),
                values: self.ctx.values().clone(),
                cancellation: attempt.clone(),
            };

            let result = match adapter.execute(args.clone(), &adapter_ctx).await {
                Ok(raw) => {
                    let step = self
                        .event(ProgressType::NodeProgress, &node.key, index)
                        .with_payload(json!({
                            "step": "atom_execute_complete",
                            "result": raw,
                        }));
                    self.send(step);
                    self.transform_result(node, raw).await
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(output) => return self.complete_node(node, index, output, latch),
                Err(e) => e,
            };

            if self.ctx.cancellation().is_cancelled() {
                return NodeOutcome::Cancelled;
            }

            let info = normalize_atom_error(&node.key, error);

            if node.strategy.is_retry() && retry_count < max_retries {
                retry_count += 1;
                warn!(
                    "Node {} failed ({}), retry {}/{}",
                    node.key, info.code, retry_count, max_retries
                );
                let retry_event = self
                    .event(ProgressType::NodeRetry, &node.key, index)
                    .with_payload(json!({
                        "retryCount": retry_count,
                        "maxRetries": max_retries,
                    }))
                    .with_error(info);
                self.send(retry_event);

                let retry = node.strategy.retry.clone().unwrap_or_default();
                if !retry
                    .sleep(retry_count, self.config.default_retry_interval_ms, attempt)
                    .await
                {
                    return NodeOutcome::Cancelled;
                }
                continue;
            }

            let info = info.with_retry_count(retry_count);
            error!("Node {} failed: {}", node.key, info);
            self.fail_node(node, index, info.clone(), latch);

            if scope.compensating {
                return NodeOutcome::Handled;
            }
            return NodeOutcome::Unresolved(info);
        }
    }

    /// Apply the node's error strategy once its attempts are exhausted
    async fn resolve_failure(
        &mut self,
        node: &TaskNode,
        scope: NodeScope<'_>,
        index: usize,
        error: ErrorInfo,
    ) -> NodeOutcome {
        if node.strategy.error_strategy == ErrorStrategy::Compensate {
            let target = node
                .strategy
                .compensation_node
                .as_deref()
                .and_then(|key| scope.sibling(key));

            match target {
                Some((compensation, compensation_index)) => {
                    info!(
                        "Compensating node {} with {}",
                        node.key, compensation.key
                    );
                    let announce = self
                        .event(ProgressType::Compensation, &node.key, index)
                        .with_payload(json!({ "compensationNode": compensation.key }))
                        .with_error(error.clone());
                    self.send(announce);

                    let input = json!({
                        "error": error,
                        "context": self.ctx.values(),
                    });
                    let compensation_scope = NodeScope {
                        parent: scope.parent,
                        compensating: true,
                    };
                    if let NodeOutcome::Cancelled = self
                        .execute_node(compensation, compensation_scope, compensation_index, input)
                        .await
                    {
                        return NodeOutcome::Cancelled;
                    }
                }
                None => {
                    warn!(
                        "Compensation node {:?} of {} not found, skipping",
                        node.strategy.compensation_node, node.key
                    );
                }
            }
        }

        self.ctx.increment_counter();
        NodeOutcome::Handled
    }

    async fn transform_result(&self, node: &TaskNode, raw: Value) -> Result<Value> {
        match &node.result_transform {
            Some(script) => self.scripts.evaluate(script, &raw, self.ctx.values()).await,
            None => Ok(raw),
        }
    }

    fn complete_node(
        &mut self,
        node: &TaskNode,
        index: usize,
        output: Value,
        latch: &TerminalLatch,
    ) -> NodeOutcome {
        if latch.is_closed() {
            return NodeOutcome::Failed;
        }

        self.ctx.insert(node.key.clone(), output.clone());
        self.ctx.increment_counter();
        self.ctx.progress_for(index);

        if latch.close() {
            debug!("Node {} completed", node.key);
            let complete = self
                .event(ProgressType::NodeComplete, &node.key, index)
                .with_payload(output.clone());
            self.send(complete);
        }
        NodeOutcome::Completed(output)
    }

    fn fail_node(&mut self, node: &TaskNode, index: usize, error: ErrorInfo, latch: &TerminalLatch) {
        if !latch.close() {
            return;
        }
        self.ctx.mark_error();
        let failed = self
            .event(ProgressType::NodeError, &node.key, index)
            .with_state(TaskState::PartialFailed)
            .with_error(error);
        self.send(failed);
    }
}

/// Normalize an adapter or result-transform failure into the reported error
fn normalize_atom_error(node_key: &str, error: TaskflowError) -> ErrorInfo {
    match error {
        TaskflowError::Adapter(_)
        | TaskflowError::AdapterNotFound(_)
        | TaskflowError::Http { .. }
        | TaskflowError::Cancelled(_) => ErrorInfo::from(error),
        other => ErrorInfo::from(TaskflowError::atom_execution(
            format!("Node {node_key} failed: {other}"),
            Some(other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_latch_is_one_shot() {
        let latch = TerminalLatch::default();
        let other = latch.clone();
        assert!(!latch.is_closed());
        assert!(latch.close());
        assert!(!other.close());
        assert!(other.is_closed());
    }

    #[test]
    fn test_normalize_keeps_adapter_codes() {
        let info = normalize_atom_error("open", TaskflowError::adapter("LOCK_JAMMED", "jammed", true));
        assert_eq!(info.code, "LOCK_JAMMED");
        assert!(info.retryable);

        let info = normalize_atom_error("open", TaskflowError::AdapterNotFound("lock".to_string()));
        assert_eq!(info.code, codes::ADAPTER_NOT_FOUND);
    }

    #[test]
    fn test_normalize_wraps_other_errors() {
        let info = normalize_atom_error("scan", TaskflowError::Io("broken pipe".to_string()));
        assert_eq!(info.code, codes::ATOM_EXEC_ERROR);
        assert!(info.retryable);
        assert!(info.message.contains("scan"));

        let info = normalize_atom_error("scan", TaskflowError::Script("bad".to_string()));
        assert_eq!(info.code, codes::ATOM_EXEC_ERROR);
        assert!(!info.retryable);
    }

    #[test]
    fn test_sibling_lookup() {
        let parent = TaskNode::flow(
            "root",
            vec![
                TaskNode::flow("prep", vec![TaskNode::atomic("scan", "device")]),
                TaskNode::atomic("charge", "http"),
                TaskNode::atomic("refund", "http"),
            ],
        );
        let scope = NodeScope::child_of(&parent, 0);
        let (node, index) = scope.sibling("refund").unwrap();
        assert_eq!(node.key, "refund");
        assert_eq!(index, 4);
        assert!(scope.sibling("scan").is_none());
        assert!(NodeScope::root().sibling("refund").is_none());
    }
}
