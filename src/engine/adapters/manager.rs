use crate::engine::adapters::{Adapter, AdapterContext};
use crate::engine::error::{Result, TaskflowError};
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of adapters by type
///
/// Lookups never fail: unknown types resolve to a [`NotFoundAdapter`].
/// Registering a type twice replaces the earlier adapter.
#[derive(Default)]
pub struct AdapterManager {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let adapter_type = adapter.adapter_type().to_string();
        let previous = self
            .adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(adapter_type.clone(), adapter);

        if previous.is_some() {
            debug!("Replaced adapter for type {adapter_type}");
        } else {
            debug!("Registered adapter for type {adapter_type}");
        }
    }

    pub fn get(&self, adapter_type: &str) -> Arc<dyn Adapter> {
        match self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(adapter_type)
        {
            Some(adapter) => Arc::clone(adapter),
            None => {
                warn!("No adapter registered for type {adapter_type}");
                Arc::new(NotFoundAdapter::new(adapter_type))
            }
        }
    }

    pub fn contains(&self, adapter_type: &str) -> bool {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(adapter_type)
    }

    pub fn adapter_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Stand-in for an unregistered adapter type; always fails with `ADAPTER_NOT_FOUND`
pub struct NotFoundAdapter {
    adapter_type: String,
}

impl NotFoundAdapter {
    pub fn new(adapter_type: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
        }
    }
}

#[async_trait]
impl Adapter for NotFoundAdapter {
    fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    async fn execute(&self, _args: Value, _ctx: &AdapterContext) -> Result<Value> {
        Err(TaskflowError::AdapterNotFound(self.adapter_type.clone()))
    }
}
