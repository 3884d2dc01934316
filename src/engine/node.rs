use crate::engine::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind name of composite nodes
pub const FLOW_KIND: &str = "flow";

/// What a node does: run its children in order, or call an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Flow,
    /// Adapter-backed step, keyed by adapter type
    Atomic(String),
}

impl NodeKind {
    pub fn is_flow(&self) -> bool {
        matches!(self, NodeKind::Flow)
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Flow => FLOW_KIND,
            NodeKind::Atomic(adapter_type) => adapter_type,
        }
    }
}

impl From<String> for NodeKind {
    fn from(kind: String) -> Self {
        if kind == FLOW_KIND {
            NodeKind::Flow
        } else {
            NodeKind::Atomic(kind)
        }
    }
}

impl From<&str> for NodeKind {
    fn from(kind: &str) -> Self {
        NodeKind::from(kind.to_string())
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Flow => FLOW_KIND.to_string(),
            NodeKind::Atomic(adapter_type) => adapter_type,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure policy of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    /// Ignore the failure and continue
    #[default]
    Skip,
    /// Re-attempt up to `retry.times` with a delay
    Retry,
    /// Run a sibling node as rollback
    Compensate,
    /// Anything else; resolved like `Skip`
    #[serde(other)]
    Unknown,
}

/// Per-node strategy block: error policy plus the optional run condition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStrategy {
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Key of the sibling node executed when this node fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_node: Option<String>,
    /// Script evaluated before the node runs; falsy means skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_message: Option<String>,
}

impl NodeStrategy {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn retry(times: u32, interval_ms: u64) -> Self {
        Self {
            error_strategy: ErrorStrategy::Retry,
            retry: Some(RetryConfig::new(times, interval_ms)),
            ..Self::default()
        }
    }

    pub fn compensate(node_key: impl Into<String>) -> Self {
        Self {
            error_strategy: ErrorStrategy::Compensate,
            compensation_node: Some(node_key.into()),
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_skip_message(mut self, message: impl Into<String>) -> Self {
        self.skip_message = Some(message.into());
        self
    }

    pub fn is_retry(&self) -> bool {
        self.error_strategy == ErrorStrategy::Retry
    }

    /// Number of retries allowed, zero unless the strategy is `retry`
    pub fn max_retries(&self) -> u32 {
        match (&self.error_strategy, &self.retry) {
            (ErrorStrategy::Retry, Some(retry)) => retry.times,
            _ => 0,
        }
    }
}

/// A step in a task tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub key: String,
    pub kind: NodeKind,
    /// Node deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub strategy: NodeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_transform: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_transform: Option<Value>,
    /// Ordered children of a flow node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    pub fn flow(key: impl Into<String>, children: Vec<TaskNode>) -> Self {
        Self {
            key: key.into(),
            kind: NodeKind::Flow,
            timeout: None,
            strategy: NodeStrategy::default(),
            args_transform: None,
            result_transform: None,
            children,
        }
    }

    pub fn atomic(key: impl Into<String>, adapter_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: NodeKind::from(adapter_type.into()),
            timeout: None,
            strategy: NodeStrategy::default(),
            args_transform: None,
            result_transform: None,
            children: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_strategy(mut self, strategy: NodeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_args_transform(mut self, script: Value) -> Self {
        self.args_transform = Some(script);
        self
    }

    pub fn with_result_transform(mut self, script: Value) -> Self {
        self.result_transform = Some(script);
        self
    }

    /// Size of the subtree rooted here: a flow counts itself plus its children
    pub fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(TaskNode::count_nodes).sum::<usize>()
    }

    /// Preorder indices of the children, given this node's own index
    pub fn child_indices(&self, index: usize) -> Vec<usize> {
        let mut offset = index + 1;
        self.children
            .iter()
            .map(|child| {
                let child_index = offset;
                offset += child.count_nodes();
                child_index
            })
            .collect()
    }

    /// Children that only run as another sibling's compensation
    pub fn is_compensation_target(&self, key: &str) -> bool {
        self.children
            .iter()
            .any(|child| {
                child.strategy.error_strategy == ErrorStrategy::Compensate
                    && child.strategy.compensation_node.as_deref() == Some(key)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_nodes() {
        let tree = TaskNode::flow(
            "root",
            vec![
                TaskNode::atomic("scan", "device"),
                TaskNode::flow(
                    "drawer",
                    vec![
                        TaskNode::atomic("open", "device"),
                        TaskNode::atomic("close", "device"),
                    ],
                ),
            ],
        );
        assert_eq!(tree.count_nodes(), 5);
        assert_eq!(tree.child_indices(0), vec![1, 2]);
        assert_eq!(tree.children[1].child_indices(2), vec![3, 4]);
    }

    #[test]
    fn test_node_from_json() {
        let node: TaskNode = serde_json::from_value(json!({
            "key": "pay",
            "kind": "http",
            "timeout": 5000,
            "strategy": {
                "errorStrategy": "retry",
                "retry": {"times": 2, "interval": 10},
                "condition": {"var": "context.amount"},
                "skipMessage": "nothing to pay"
            },
            "argsTransform": {"var": "input"}
        }))
        .unwrap();

        assert_eq!(node.kind, NodeKind::Atomic("http".to_string()));
        assert_eq!(node.timeout, Some(5000));
        assert!(node.strategy.is_retry());
        assert_eq!(node.strategy.max_retries(), 2);
        assert_eq!(node.strategy.skip_message.as_deref(), Some("nothing to pay"));
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_unknown_strategy_deserializes() {
        let strategy: NodeStrategy =
            serde_json::from_value(json!({"errorStrategy": "escalate"})).unwrap();
        assert_eq!(strategy.error_strategy, ErrorStrategy::Unknown);
        assert_eq!(strategy.max_retries(), 0);
    }

    #[test]
    fn test_flow_kind_round_trip() {
        let kind: NodeKind = serde_json::from_value(json!("flow")).unwrap();
        assert!(kind.is_flow());
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("flow"));
    }

    #[test]
    fn test_compensation_target() {
        let tree = TaskNode::flow(
            "root",
            vec![
                TaskNode::atomic("charge", "http")
                    .with_strategy(NodeStrategy::compensate("refund")),
                TaskNode::atomic("refund", "http"),
            ],
        );
        assert!(tree.is_compensation_target("refund"));
        assert!(!tree.is_compensation_target("charge"));
    }

    #[test]
    fn test_compensation_node_ignored_without_compensate_strategy() {
        let strategy = NodeStrategy {
            compensation_node: Some("refund".to_string()),
            ..NodeStrategy::skip()
        };
        let tree = TaskNode::flow(
            "root",
            vec![
                TaskNode::atomic("charge", "http").with_strategy(strategy),
                TaskNode::atomic("refund", "http"),
            ],
        );
        assert!(!tree.is_compensation_target("refund"));
    }
}
