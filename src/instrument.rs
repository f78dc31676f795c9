//! Instrument abstractions for the sequence engine.
//!
//! The engine never owns instrument hardware. It borrows opaque references to
//! externally-managed instruments through the [`Instrument`] trait and calls
//! them through a narrow surface:
//!
//! - a live **parameter map** the executor temporarily overwrites for the
//!   duration of one task (scoped override: save old, install new, run,
//!   always restore),
//! - an async **`invoke`** entry point that runs one named function and
//!   returns its result, or an error the engine treats as task failure
//!   without interpreting the payload.
//!
//! Discovery of the available function names and parameter schemas is the
//! responsibility of the external driver-loading layer; the engine consumes
//! them opaquely.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`: a running executor task calls
//! `invoke` while observers on other tasks may snapshot parameters. The
//! parameter map lives behind a `std::sync::Mutex` with short, non-await
//! critical sections.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A live instrument borrowed by the sequence engine.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Stable instrument name, used as the persisted target reference.
    fn name(&self) -> &str;

    /// Snapshot of the instrument's current parameter map.
    fn parameters(&self) -> HashMap<String, Value>;

    /// Replace the instrument's parameter map wholesale.
    ///
    /// Used by the executor for the scoped per-task override and the
    /// subsequent restore.
    fn replace_parameters(&self, parameters: HashMap<String, Value>);

    /// Run one named function against the current parameter map.
    ///
    /// Any returned error is treated as a task failure by the executor. The
    /// engine applies no timeout; a misbehaving driver can block its
    /// executor indefinitely.
    async fn invoke(&self, function: &str) -> Result<Value>;
}

/// Name-keyed collection of live instruments.
///
/// The registry is the resolver used during sequence deserialization: stored
/// target names are looked up here, and a missing name resolves to `None`
/// rather than failing the load.
#[derive(Default, Clone)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, Arc<dyn Instrument>>,
}

impl InstrumentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument under its own name, replacing any previous
    /// registration with the same name.
    pub fn register(&mut self, instrument: Arc<dyn Instrument>) {
        self.instruments
            .insert(instrument.name().to_string(), instrument);
    }

    /// Resolve a stored target name to a live instrument, if present.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Instrument>> {
        self.instruments.get(name).cloned()
    }

    /// Names of all registered instruments.
    pub fn names(&self) -> Vec<String> {
        self.instruments.keys().cloned().collect()
    }

    /// Number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

type MockBehavior = dyn Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync;

/// Mock instrument for tests and headless demos.
///
/// Functions are registered as closures over the parameter map in effect at
/// call time, so tests can observe the executor's scoped parameter override.
/// Every invocation is recorded.
pub struct MockInstrument {
    name: String,
    parameters: Mutex<HashMap<String, Value>>,
    functions: HashMap<String, Arc<MockBehavior>>,
    invocations: Mutex<Vec<String>>,
}

impl MockInstrument {
    /// Create a mock with an empty parameter map and no functions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Mutex::new(HashMap::new()),
            functions: HashMap::new(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Seed the initial parameter map.
    pub fn with_parameter(self, key: &str, value: Value) -> Self {
        if let Ok(mut params) = self.parameters.lock() {
            params.insert(key.to_string(), value);
        }
        self
    }

    /// Register a function returning a fixed value.
    pub fn with_function(mut self, function: &str, result: Value) -> Self {
        self.functions
            .insert(function.to_string(), Arc::new(move |_| Ok(result.clone())));
        self
    }

    /// Register a function computed from the parameters in effect at call time.
    pub fn with_function_fn(
        mut self,
        function: &str,
        behavior: impl Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.functions
            .insert(function.to_string(), Arc::new(behavior));
        self
    }

    /// Register a function that always fails with the given message.
    pub fn with_failing_function(mut self, function: &str, message: &str) -> Self {
        let message = message.to_string();
        self.functions.insert(
            function.to_string(),
            Arc::new(move |_| Err(anyhow::anyhow!(message.clone()))),
        );
        self
    }

    /// Function names invoked so far, in call order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Instrument for MockInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> HashMap<String, Value> {
        self.parameters
            .lock()
            .map(|params| params.clone())
            .unwrap_or_default()
    }

    fn replace_parameters(&self, parameters: HashMap<String, Value>) {
        if let Ok(mut params) = self.parameters.lock() {
            *params = parameters;
        }
    }

    async fn invoke(&self, function: &str) -> Result<Value> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(function.to_string());
        }
        let behavior = self
            .functions
            .get(function)
            .ok_or_else(|| anyhow::anyhow!("unknown function '{}' on '{}'", function, self.name))?;
        behavior(&self.parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_fixed_function() {
        let mock = MockInstrument::new("laser").with_function("measure", json!(42));
        assert_eq!(mock.invoke("measure").await.unwrap(), json!(42));
        assert_eq!(mock.invocations(), vec!["measure".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_unknown_function_fails() {
        let mock = MockInstrument::new("laser");
        assert!(mock.invoke("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_reads_live_parameters() {
        let mock = MockInstrument::new("stage").with_function_fn("position", |params| {
            Ok(params.get("axis").cloned().unwrap_or(Value::Null))
        });
        mock.replace_parameters(HashMap::from([("axis".to_string(), json!("x"))]));
        assert_eq!(mock.invoke("position").await.unwrap(), json!("x"));
    }

    #[test]
    fn test_registry_resolves_by_name() {
        let mut registry = InstrumentRegistry::new();
        registry.register(Arc::new(MockInstrument::new("power_meter")));

        assert!(registry.get("power_meter").is_some());
        assert!(registry.get("absent").is_none());
        assert_eq!(registry.len(), 1);
    }
}
