//! # Script Evaluation Module
//!
//! Node conditions and argument/result transforms are scripts evaluated by a
//! [`ScriptEvaluator`]. The engine only depends on the trait; the default
//! [`JsonLogicEvaluator`] runs JSONLogic expressions through DataLogic v4 and
//! caches compiled logic per distinct script.
//!
//! Scripts see a single data object:
//!
//! ```json
//! { "input": <payload or adapter result>, "context": <run context map> }
//! ```

use crate::engine::error::{Result, TaskflowError};
use async_trait::async_trait;
use datalogic_rs::{CompiledLogic, DataLogic};
use log::debug;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Sandboxed evaluation of condition and transform scripts
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    /// Evaluate `script` against `input` and the run context
    async fn evaluate(
        &self,
        script: &Value,
        input: &Value,
        context: &Map<String, Value>,
    ) -> Result<Value>;
}

/// Build the data object scripts are evaluated against
pub fn script_data(input: &Value, context: &Map<String, Value>) -> Value {
    json!({
        "input": input,
        "context": context,
    })
}

/// JSONLogic evaluator backed by DataLogic
pub struct JsonLogicEvaluator {
    datalogic: Arc<DataLogic>,
    logic_cache: RwLock<HashMap<String, Arc<CompiledLogic>>>,
}

impl Default for JsonLogicEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLogicEvaluator {
    pub fn new() -> Self {
        Self {
            datalogic: Arc::new(DataLogic::with_preserve_structure()),
            logic_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get a reference to the DataLogic instance
    pub fn datalogic(&self) -> &Arc<DataLogic> {
        &self.datalogic
    }

    /// Number of distinct scripts compiled so far
    pub fn cached_scripts(&self) -> usize {
        self.logic_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn compiled(&self, script: &Value) -> Result<Arc<CompiledLogic>> {
        let cache_key = script.to_string();

        if let Some(compiled) = self
            .logic_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
        {
            return Ok(Arc::clone(compiled));
        }

        debug!("Compiling script: {cache_key}");
        let compiled = self
            .datalogic
            .compile(script)
            .map_err(|e| TaskflowError::Script(format!("Failed to compile logic: {e}")))?;

        self.logic_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, Arc::clone(&compiled));

        Ok(compiled)
    }

    /// Evaluate synchronously; simple values evaluate to themselves
    pub fn evaluate_sync(
        &self,
        script: &Value,
        input: &Value,
        context: &Map<String, Value>,
    ) -> Result<Value> {
        if !script.is_object() && !script.is_array() {
            return Ok(script.clone());
        }

        let compiled = self.compiled(script)?;
        let data = Arc::new(script_data(input, context));
        self.datalogic
            .evaluate(&compiled, data)
            .map_err(|e| TaskflowError::Script(format!("Failed to evaluate logic: {e}")))
    }
}

#[async_trait]
impl ScriptEvaluator for JsonLogicEvaluator {
    async fn evaluate(
        &self,
        script: &Value,
        input: &Value,
        context: &Map<String, Value>,
    ) -> Result<Value> {
        self.evaluate_sync(script, input, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("scan".to_string(), json!({"code": "LOCKER-7"}));
        ctx
    }

    #[tokio::test]
    async fn test_var_lookup() {
        let evaluator = JsonLogicEvaluator::new();
        let result = evaluator
            .evaluate(&json!({"var": "context.scan.code"}), &json!({}), &context())
            .await
            .unwrap();
        assert_eq!(result, json!("LOCKER-7"));
    }

    #[tokio::test]
    async fn test_condition_on_input() {
        let evaluator = JsonLogicEvaluator::new();
        let result = evaluator
            .evaluate(
                &json!({">": [{"var": "input.amount"}, 10]}),
                &json!({"amount": 25}),
                &Map::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, json!(true));
    }

    #[tokio::test]
    async fn test_literal_scripts_are_identity() {
        let evaluator = JsonLogicEvaluator::new();
        let result = evaluator
            .evaluate(&json!(false), &json!({"a": 1}), &Map::new())
            .await
            .unwrap();
        assert_eq!(result, json!(false));
        assert_eq!(evaluator.cached_scripts(), 0);
    }

    #[tokio::test]
    async fn test_compiled_logic_is_cached() {
        let evaluator = JsonLogicEvaluator::new();
        let script = json!({"var": "input.x"});
        for x in 0..3 {
            let result = evaluator
                .evaluate(&script, &json!({"x": x}), &Map::new())
                .await
                .unwrap();
            assert_eq!(result, json!(x));
        }
        assert_eq!(evaluator.cached_scripts(), 1);
    }

    #[tokio::test]
    async fn test_structure_is_preserved() {
        let evaluator = JsonLogicEvaluator::new();
        let result = evaluator
            .evaluate(&json!({"compartment": "A1"}), &json!({}), &Map::new())
            .await
            .unwrap();
        assert_eq!(result, json!({"compartment": "A1"}));
    }
}
