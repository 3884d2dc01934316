/*!
# Engine Module

The task system: definition registry, adapter registry and the stream
executor that runs definitions.

## Key Components

* **TaskSystem**: Facade owning the registries and starting runs
* **AdapterManager**: Registry of capability providers for atomic nodes
* **StreamTaskExecutor**: Walks a definition's node tree and emits progress events
* **TaskDefinition / TaskNode**: Declarative task trees loaded from JSON
* **ProgressStream**: Per-run stream of `ProgressData` events
*/

pub mod adapters;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod node;
pub mod progress;
pub mod retry;
pub mod script;
pub mod task;
pub mod utils;

pub use adapters::{Adapter, AdapterContext, AdapterManager, AdapterReply};
pub use config::TaskSystemConfig;
pub use context::{TaskExecutionContext, TaskState};
pub use executor::StreamTaskExecutor;
pub use node::{ErrorStrategy, NodeKind, NodeStrategy, TaskNode};
pub use progress::{ProgressData, ProgressStream, ProgressType};
pub use retry::RetryConfig;
pub use script::{JsonLogicEvaluator, ScriptEvaluator};
pub use task::TaskDefinition;

use error::Result;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Generate a fresh, time-ordered request id
pub fn new_request_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Entry point for registering tasks and adapters and starting runs
///
/// Built-in adapters (`device`, `http`, `command`) are registered at
/// construction; registering an adapter with the same type replaces them.
pub struct TaskSystem {
    tasks: RwLock<HashMap<String, Arc<TaskDefinition>>>,
    adapters: Arc<AdapterManager>,
    executor: StreamTaskExecutor,
    config: Arc<TaskSystemConfig>,
}

impl Default for TaskSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSystem {
    pub fn new() -> Self {
        Self::with_config(TaskSystemConfig::default())
    }

    pub fn with_config(config: TaskSystemConfig) -> Self {
        Self::with_evaluator(config, Arc::new(JsonLogicEvaluator::new()))
    }

    /// Create a task system evaluating conditions and transforms with `evaluator`
    pub fn with_evaluator(config: TaskSystemConfig, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        let config = Arc::new(config);
        let adapters = Arc::new(AdapterManager::new());
        for adapter in adapters::builtins::get_all_adapters(&config) {
            adapters.register(adapter);
        }

        let executor =
            StreamTaskExecutor::new(Arc::clone(&adapters), evaluator, Arc::clone(&config));

        Self {
            tasks: RwLock::new(HashMap::new()),
            adapters,
            executor,
            config,
        }
    }

    /// Register a task definition, replacing any with the same key
    ///
    /// Disabled definitions are dropped silently. Invalid definitions are
    /// rejected with a `DEFINITION_ERROR`.
    pub fn register_task(&self, definition: TaskDefinition) -> Result<()> {
        if !definition.enabled {
            debug!("Ignoring disabled task {}", definition.key);
            return Ok(());
        }

        definition.validate()?;

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let key = definition.key.clone();
        if tasks.insert(key.clone(), Arc::new(definition)).is_some() {
            warn!("Task {} re-registered, previous definition replaced", key);
        } else {
            info!("Registered task {}", key);
        }
        Ok(())
    }

    /// Register several definitions, returning how many were accepted
    pub fn register_tasks<I>(&self, definitions: I) -> usize
    where
        I: IntoIterator<Item = TaskDefinition>,
    {
        let mut registered = 0;
        for definition in definitions {
            let key = definition.key.clone();
            let enabled = definition.enabled;
            match self.register_task(definition) {
                Ok(()) if enabled => registered += 1,
                Ok(()) => {}
                Err(e) => error!("Failed to register task {}: {}", key, e),
            }
        }
        registered
    }

    pub fn unregister_task(&self, key: &str) -> Option<Arc<TaskDefinition>> {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn clear_tasks(&self) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn has_task(&self, key: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Registered task keys, sorted
    pub fn task_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn register_adapter(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.register(adapter);
    }

    pub fn adapters(&self) -> &AdapterManager {
        &self.adapters
    }

    pub fn config(&self) -> &TaskSystemConfig {
        &self.config
    }

    pub fn executor(&self) -> &StreamTaskExecutor {
        &self.executor
    }

    /// Handle to the task registered under `key`
    ///
    /// The lookup happens when the handle runs, so a handle to an unknown key
    /// is valid and its runs report `TASK_NOT_FOUND`.
    pub fn task(&self, key: impl Into<String>) -> TaskHandle<'_> {
        TaskHandle {
            system: self,
            key: key.into(),
        }
    }

    fn definition(&self, key: &str) -> Option<Arc<TaskDefinition>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// A task key bound to the system that runs it
pub struct TaskHandle<'a> {
    system: &'a TaskSystem,
    key: String,
}

impl TaskHandle<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn definition(&self) -> Option<Arc<TaskDefinition>> {
        self.system.definition(&self.key)
    }

    /// Start a run and return its progress stream
    ///
    /// `initial_context` seeds the run context and is the root node's input.
    /// An object is used as is, `null` means empty, and any other value is
    /// stored under `"input"`. Must be called within a Tokio runtime.
    pub fn run(&self, request_id: &str, initial_context: Value) -> ProgressStream {
        let initial = match initial_context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };

        match self.definition() {
            Some(definition) => self.system.executor.execute(definition, request_id, initial),
            None => {
                warn!("Task {} not found for request {}", self.key, request_id);
                let event = ProgressData::task_not_found(request_id, &self.key, initial);
                ProgressStream::from_events(request_id, vec![event])
            }
        }
    }
}
