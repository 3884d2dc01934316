use crate::engine::error::{Result, TaskflowError};
use crate::engine::node::{ErrorStrategy, TaskNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Immutable workflow template registered with the task system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub key: String,
    pub root_node: TaskNode,
    /// Whole-task deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TaskDefinition {
    pub fn new(key: impl Into<String>, root_node: TaskNode) -> Self {
        Self {
            key: key.into(),
            root_node,
            timeout: None,
            enabled: true,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Load a definition from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(TaskflowError::from_serde)
    }

    /// Load a definition from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json_str = fs::read_to_string(path).map_err(TaskflowError::from_io)?;
        Self::from_json(&json_str)
    }

    /// Total number of nodes in the tree
    pub fn count_nodes(&self) -> usize {
        self.root_node.count_nodes()
    }

    /// Validate the definition before it is registered
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(TaskflowError::Definition(
                "Task key cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        validate_node(&self.key, &self.root_node, &mut seen)
    }
}

fn validate_node<'a>(
    task_key: &str,
    node: &'a TaskNode,
    seen: &mut HashSet<&'a str>,
) -> Result<()> {
    if node.key.is_empty() {
        return Err(TaskflowError::Definition(format!(
            "Task {task_key} contains a node with an empty key"
        )));
    }

    if !seen.insert(node.key.as_str()) {
        return Err(TaskflowError::Definition(format!(
            "Task {task_key} has duplicate node key '{}'",
            node.key
        )));
    }

    if !node.kind.is_flow() && !node.children.is_empty() {
        return Err(TaskflowError::Definition(format!(
            "Node '{}' of kind '{}' cannot have children",
            node.key, node.kind
        )));
    }

    for child in &node.children {
        if child.strategy.error_strategy == ErrorStrategy::Compensate {
            let target = child.strategy.compensation_node.as_deref().ok_or_else(|| {
                TaskflowError::Definition(format!(
                    "Node '{}' uses compensate without a compensationNode",
                    child.key
                ))
            })?;

            if target == child.key {
                return Err(TaskflowError::Definition(format!(
                    "Node '{}' cannot compensate itself",
                    child.key
                )));
            }

            if !node.children.iter().any(|sibling| sibling.key == target) {
                return Err(TaskflowError::Definition(format!(
                    "Compensation node '{target}' of '{}' is not a sibling",
                    child.key
                )));
            }
        }

        validate_node(task_key, child, seen)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::NodeStrategy;

    #[test]
    fn test_from_json() {
        let definition = TaskDefinition::from_json(
            r#"{
                "key": "pickup",
                "timeout": 30000,
                "rootNode": {
                    "key": "root",
                    "kind": "flow",
                    "children": [
                        {"key": "scan", "kind": "device"},
                        {"key": "open", "kind": "device", "timeout": 2000}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(definition.key, "pickup");
        assert!(definition.enabled);
        assert_eq!(definition.timeout, Some(30000));
        assert_eq!(definition.count_nodes(), 3);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_invalid_json() {
        let result = TaskDefinition::from_json(r#"{"key": "broken"}"#);
        assert!(matches!(result, Err(TaskflowError::Deserialization(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let definition = TaskDefinition::new(
            "dup",
            TaskNode::flow(
                "root",
                vec![
                    TaskNode::atomic("scan", "device"),
                    TaskNode::atomic("scan", "device"),
                ],
            ),
        );
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_children_on_atomic() {
        let mut node = TaskNode::atomic("scan", "device");
        node.children.push(TaskNode::atomic("inner", "device"));
        let definition = TaskDefinition::new("bad", node);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_validate_compensation_target() {
        let missing = TaskDefinition::new(
            "missing",
            TaskNode::flow(
                "root",
                vec![TaskNode::atomic("charge", "http")
                    .with_strategy(NodeStrategy::compensate("refund"))],
            ),
        );
        assert!(missing.validate().is_err());

        let ok = TaskDefinition::new(
            "ok",
            TaskNode::flow(
                "root",
                vec![
                    TaskNode::atomic("charge", "http")
                        .with_strategy(NodeStrategy::compensate("refund")),
                    TaskNode::atomic("refund", "http"),
                ],
            ),
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_key() {
        let definition = TaskDefinition::new("", TaskNode::atomic("scan", "device"));
        assert!(definition.validate().is_err());
    }
}
