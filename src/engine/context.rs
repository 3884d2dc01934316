use crate::engine::utils::get_nested_value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Init,
    Running,
    Completed,
    PartialFailed,
    Cancelled,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Init => 0,
            TaskState::Running => 1,
            TaskState::Completed | TaskState::PartialFailed | TaskState::Cancelled => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Per-run mutable state, owned by the run that created it
#[derive(Debug)]
pub struct TaskExecutionContext {
    pub request_id: String,
    pub task_key: String,
    /// Node outputs keyed by node key, seeded with the caller's initial context
    values: Map<String, Value>,
    node_counter: usize,
    total_nodes: usize,
    has_error: bool,
    state: TaskState,
    last_progress: u8,
    cancellation: CancellationToken,
}

impl TaskExecutionContext {
    pub fn new(
        request_id: impl Into<String>,
        task_key: impl Into<String>,
        initial: Map<String, Value>,
        total_nodes: usize,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            task_key: task_key.into(),
            values: initial,
            node_counter: 0,
            total_nodes,
            has_error: false,
            state: TaskState::Init,
            last_progress: 0,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Read a value by dot path, e.g. `"scan.code"`
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        self.values
            .get(head)
            .and_then(|value| get_nested_value(value, rest))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Snapshot of the context map for events and adapters
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn node_counter(&self) -> usize {
        self.node_counter
    }

    pub fn increment_counter(&mut self) -> usize {
        self.node_counter += 1;
        self.node_counter
    }

    pub fn total_nodes(&self) -> usize {
        self.total_nodes
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn mark_error(&mut self) {
        self.has_error = true;
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move the run state forward; backward or terminal-to-terminal moves are ignored
    pub fn transition(&mut self, next: TaskState) -> bool {
        if next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    /// Progress for a node at `node_index`, never lower than what was already reported
    pub fn progress_for(&mut self, node_index: usize) -> u8 {
        let total = self.total_nodes.max(1);
        let raw = ((node_index + 1) as f64 / total as f64 * 100.0).round();
        let progress = raw.clamp(0.0, 100.0) as u8;
        self.last_progress = self.last_progress.max(progress);
        self.last_progress
    }

    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }

    pub fn finish_progress(&mut self) -> u8 {
        self.last_progress = 100;
        self.last_progress
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(total: usize) -> TaskExecutionContext {
        TaskExecutionContext::new("req-1", "pickup", Map::new(), total)
    }

    #[test]
    fn test_state_only_moves_forward() {
        let mut ctx = context(1);
        assert_eq!(ctx.state(), TaskState::Init);
        assert!(ctx.transition(TaskState::Running));
        assert!(!ctx.transition(TaskState::Init));
        assert!(ctx.transition(TaskState::Cancelled));
        assert!(!ctx.transition(TaskState::Completed));
        assert_eq!(ctx.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut ctx = context(4);
        assert_eq!(ctx.progress_for(1), 50);
        assert_eq!(ctx.progress_for(0), 50);
        assert_eq!(ctx.progress_for(3), 100);
        assert_eq!(ctx.progress_for(2), 100);
    }

    #[test]
    fn test_progress_rounds() {
        let mut ctx = context(3);
        assert_eq!(ctx.progress_for(0), 33);
        assert_eq!(ctx.progress_for(1), 67);
    }

    #[test]
    fn test_values_and_paths() {
        let mut ctx = context(2);
        ctx.insert("scan", json!({"code": "ABC-123"}));
        assert_eq!(ctx.get("scan.code"), Some(&json!("ABC-123")));
        assert_eq!(ctx.get("scan"), Some(&json!({"code": "ABC-123"})));
        assert!(ctx.get("missing").is_none());
        assert_eq!(ctx.snapshot(), json!({"scan": {"code": "ABC-123"}}));
    }

    #[test]
    fn test_counter() {
        let mut ctx = context(2);
        assert_eq!(ctx.increment_counter(), 1);
        assert_eq!(ctx.increment_counter(), 2);
        assert_eq!(ctx.node_counter(), 2);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskState::PartialFailed).unwrap(),
            "\"PARTIAL_FAILED\""
        );
    }
}
