//! Method table for a worker.
//!
//! Methods are async functions from a deserializable argument to a
//! serializable result. Failures of any kind (bad arguments, an `Err` from
//! the method, an unserializable result) are reduced to a message string,
//! which is all that crosses the channel.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Boxed future produced by a registered method.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

pub(crate) type Method = Arc<dyn Fn(Value) -> MethodFuture + Send + Sync>;

/// Named async methods a [`Dispatcher`](crate::Dispatcher) can invoke.
///
/// Registering a name twice replaces the earlier method.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed method.
    ///
    /// The request's `data` is deserialized into `A` before `method` runs;
    /// if that fails the caller gets `invalid arguments for <name>: ...`.
    /// An `Err(e)` from the method reaches the caller as `e.to_string()`.
    pub fn register<A, R, E, F, Fut>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
        E: Display + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();

        let method: Method = Arc::new(move |data: Value| -> MethodFuture {
            let args = match serde_json::from_value::<A>(data) {
                Ok(args) => args,
                Err(e) => {
                    let message = format!("invalid arguments for {}: {}", label, e);
                    return Box::pin(async move { Err::<Value, _>(message) });
                }
            };

            let call = method(args);
            Box::pin(async move {
                let result = call.await.map_err(|e| e.to_string())?;
                serde_json::to_value(result).map_err(|e| format!("failed to serialize result: {}", e))
            })
        });

        self.methods.insert(name, method);
        self
    }

    /// Registers a method that works on raw JSON.
    pub fn register_value<E, F, Fut>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        E: Display + 'static,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        let method: Method = Arc::new(move |data: Value| -> MethodFuture {
            let call = method(data);
            Box::pin(async move { call.await.map_err(|e| e.to_string()) })
        });

        self.methods.insert(name.into(), method);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Method> {
        self.methods.get(name).cloned()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.method_names())
            .finish()
    }
}
