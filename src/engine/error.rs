use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes reported in [`ErrorInfo::code`].
pub mod codes {
    pub const ADAPTER_NOT_FOUND: &str = "ADAPTER_NOT_FOUND";
    pub const TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
    pub const NODE_EXEC_ERROR: &str = "NODE_EXEC_ERROR";
    pub const ATOM_EXEC_ERROR: &str = "ATOM_EXEC_ERROR";
    pub const NODE_TIMEOUT: &str = "NODE_TIMEOUT";
    pub const TASK_TIMEOUT: &str = "TASK_TIMEOUT";
    pub const CONDITION_NOT_MET: &str = "CONDITION_NOT_MET";
    pub const TASK_CANCELLED: &str = "TASK_CANCELLED";
    pub const SCRIPT_ERROR: &str = "SCRIPT_ERROR";
    pub const DEFINITION_ERROR: &str = "DEFINITION_ERROR";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const DESERIALIZATION_ERROR: &str = "DESERIALIZATION_ERROR";
    pub const DEVICE_UNAVAILABLE: &str = "DEVICE_UNAVAILABLE";
    pub const COMMAND_FAILED: &str = "COMMAND_FAILED";
    pub const RUNTIME_UNAVAILABLE: &str = "RUNTIME_UNAVAILABLE";
}

/// Main error type for the task engine
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum TaskflowError {
    /// No adapter is registered for a node kind
    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    /// No task definition is registered under a key
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A node failed outside its adapter call (argument transform, failed children)
    #[error("Node execution error: {0}")]
    NodeExecution(String),

    /// Errors raised while running an atomic node
    #[error("Atom execution error: {context}")]
    AtomExecution {
        context: String,
        #[source]
        #[serde(skip)]
        source: Option<Box<TaskflowError>>,
    },

    #[error("Node timeout: {0}")]
    NodeTimeout(String),

    #[error("Task timeout: {0}")]
    TaskTimeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Condition or transform script evaluation errors
    #[error("Script evaluation error: {0}")]
    Script(String),

    /// Invalid task definitions
    #[error("Definition error: {0}")]
    Definition(String),

    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Structured error reported by an adapter with its own code
    #[error("{0}")]
    Adapter(ErrorInfo),
}

impl TaskflowError {
    /// Creates a new atom execution error with context
    pub fn atom_execution<S: Into<String>>(context: S, source: Option<TaskflowError>) -> Self {
        TaskflowError::AtomExecution {
            context: context.into(),
            source: source.map(Box::new),
        }
    }

    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        TaskflowError::Http {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for an adapter-specific error
    pub fn adapter<C: Into<String>, M: Into<String>>(code: C, message: M, retryable: bool) -> Self {
        TaskflowError::Adapter(ErrorInfo::new(code, message, retryable))
    }

    pub fn from_io(err: std::io::Error) -> Self {
        TaskflowError::Io(err.to_string())
    }

    pub fn from_serde(err: serde_json::Error) -> Self {
        TaskflowError::Deserialization(err.to_string())
    }

    /// The taxonomy code reported to progress consumers
    pub fn code(&self) -> &str {
        match self {
            TaskflowError::AdapterNotFound(_) => codes::ADAPTER_NOT_FOUND,
            TaskflowError::TaskNotFound(_) => codes::TASK_NOT_FOUND,
            TaskflowError::NodeExecution(_) => codes::NODE_EXEC_ERROR,
            TaskflowError::AtomExecution { .. } => codes::ATOM_EXEC_ERROR,
            TaskflowError::NodeTimeout(_) => codes::NODE_TIMEOUT,
            TaskflowError::TaskTimeout(_) => codes::TASK_TIMEOUT,
            TaskflowError::Cancelled(_) => codes::TASK_CANCELLED,
            TaskflowError::Script(_) => codes::SCRIPT_ERROR,
            TaskflowError::Definition(_) => codes::DEFINITION_ERROR,
            TaskflowError::Http { .. } => codes::HTTP_ERROR,
            TaskflowError::Io(_) => codes::IO_ERROR,
            TaskflowError::Deserialization(_) => codes::DESERIALIZATION_ERROR,
            TaskflowError::Adapter(info) => &info.code,
        }
    }

    /// Determines if this error is worth retrying
    ///
    /// This is an observability hint only. The executor decides whether to retry
    /// from the node's configured strategy.
    pub fn retryable(&self) -> bool {
        match self {
            TaskflowError::Http { status, .. } => {
                // 0 means connection error
                *status >= 500 || *status == 429 || *status == 408 || *status == 0
            }
            TaskflowError::NodeTimeout(_) => true,
            TaskflowError::TaskTimeout(_) => true,
            TaskflowError::Io(_) => true,
            TaskflowError::AtomExecution { source, .. } => {
                source.as_ref().map(|e| e.retryable()).unwrap_or(false)
            }
            TaskflowError::Adapter(info) => info.retryable,

            TaskflowError::AdapterNotFound(_) => false,
            TaskflowError::TaskNotFound(_) => false,
            TaskflowError::NodeExecution(_) => false,
            TaskflowError::Cancelled(_) => false,
            TaskflowError::Script(_) => false,
            TaskflowError::Definition(_) => false,
            TaskflowError::Deserialization(_) => false,
        }
    }
}

/// Type alias for Result with TaskflowError
pub type Result<T> = std::result::Result<T, TaskflowError>;

/// Structured error carried by progress events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Error code (e.g. "NODE_TIMEOUT", "ADAPTER_NOT_FOUND" or an adapter-specific code)
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Whether the failure is likely transient
    #[serde(default)]
    pub retryable: bool,

    /// Number of retries attempted before this error became final
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
            retry_count: None,
        }
    }

    /// Record how many retries preceded this error
    pub fn with_retry_count(mut self, count: u32) -> Self {
        if count > 0 {
            self.retry_count = Some(count);
        }
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&TaskflowError> for ErrorInfo {
    fn from(error: &TaskflowError) -> Self {
        match error {
            TaskflowError::Adapter(info) => info.clone(),
            other => ErrorInfo::new(other.code(), other.to_string(), other.retryable()),
        }
    }
}

impl From<TaskflowError> for ErrorInfo {
    fn from(error: TaskflowError) -> Self {
        match error {
            TaskflowError::Adapter(info) => info,
            other => ErrorInfo::from(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TaskflowError::http(500, "Internal Server Error").retryable());
        assert!(TaskflowError::http(503, "Service Unavailable").retryable());
        assert!(TaskflowError::http(429, "Too Many Requests").retryable());
        assert!(TaskflowError::http(0, "Connection Error").retryable());
        assert!(TaskflowError::NodeTimeout("scan".to_string()).retryable());
        assert!(TaskflowError::Io("Broken pipe".to_string()).retryable());
        assert!(TaskflowError::adapter("DRAWER_BUSY", "busy", true).retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!TaskflowError::http(400, "Bad Request").retryable());
        assert!(!TaskflowError::http(404, "Not Found").retryable());
        assert!(!TaskflowError::AdapterNotFound("camera".to_string()).retryable());
        assert!(!TaskflowError::Script("bad logic".to_string()).retryable());
        assert!(!TaskflowError::Definition("empty key".to_string()).retryable());
        assert!(!TaskflowError::Cancelled("stop".to_string()).retryable());
    }

    #[test]
    fn test_atom_execution_error_retryability() {
        let retryable = TaskflowError::atom_execution(
            "device call failed",
            Some(TaskflowError::http(502, "Bad Gateway")),
        );
        let non_retryable = TaskflowError::atom_execution(
            "bad arguments",
            Some(TaskflowError::Deserialization("expected object".to_string())),
        );
        let no_source = TaskflowError::atom_execution("unknown failure", None);

        assert!(retryable.retryable());
        assert!(!non_retryable.retryable());
        assert!(!no_source.retryable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            TaskflowError::AdapterNotFound("x".to_string()).code(),
            codes::ADAPTER_NOT_FOUND
        );
        assert_eq!(
            TaskflowError::atom_execution("x", None).code(),
            codes::ATOM_EXEC_ERROR
        );
        assert_eq!(
            TaskflowError::adapter("LOCK_JAMMED", "jammed", false).code(),
            "LOCK_JAMMED"
        );
    }

    #[test]
    fn test_error_info_from_error() {
        let info = ErrorInfo::from(&TaskflowError::TaskTimeout("checkout".to_string()));
        assert_eq!(info.code, codes::TASK_TIMEOUT);
        assert!(info.retryable);
        assert!(info.message.contains("checkout"));

        let adapter = ErrorInfo::from(TaskflowError::adapter("NO_PAPER", "out of paper", false));
        assert_eq!(adapter.code, "NO_PAPER");
        assert_eq!(adapter.message, "out of paper");
        assert!(!adapter.retryable);
    }

    #[test]
    fn test_error_info_serialization() {
        let info = ErrorInfo::new(codes::NODE_TIMEOUT, "slow", true).with_retry_count(2);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["code"], "NODE_TIMEOUT");
        assert_eq!(value["retryable"], true);
        assert_eq!(value["retryCount"], 2);

        let plain = serde_json::to_value(ErrorInfo::new("X", "y", false)).unwrap();
        assert!(plain.get("retryCount").is_none());
    }
}
