//! Execution bindings: outcomes, the host handler contract, and the
//! name-keyed method registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use ludari_core::Context;
use ludari_lens::Lens;

/// Error type produced by executions; anything the host's closures throw.
pub type ExecutionError = Box<dyn std::error::Error + Send + Sync>;

/// What an execution produced.
pub type ExecutionResult = std::result::Result<JobOutcome, ExecutionError>;

/// Return value of a job execution.
#[derive(Debug)]
pub enum JobOutcome {
    /// A serializable value, persisted verbatim when truthy.
    Value(Value),
    /// "The execution's result is its lens": the pipeline persists the
    /// frames the execution captured.
    Frames,
    /// No return value; the lens frames stand in when any were captured.
    None,
}

/// An inline execution: a boxed async closure registered by job name.
pub type InlineHandler =
    Arc<dyn Fn(Context, Arc<Lens>) -> BoxFuture<'static, ExecutionResult> + Send + Sync>;

/// Host contract for `method`-type jobs: named dispatch onto host code.
///
/// Implementations must restrict dispatch to an explicit allow-list and
/// refuse reserved identifiers; [`HandlerRegistry`] is the in-tree
/// implementation of that discipline.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the named method. The method name is the job name.
    async fn execute_method(
        &self,
        method: &str,
        context: Context,
        lens: Arc<Lens>,
    ) -> ExecutionResult;

    /// Whether the named method is dispatchable.
    fn has_method(&self, _method: &str) -> bool {
        false
    }

    /// The dispatchable method names.
    fn available_methods(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Identifiers that may never be registered or dispatched, in either naming
/// convention plus the Rust keywords a confused host might reach for.
const RESERVED_METHOD_NAMES: &[&str] = &[
    "constructor",
    "execute_method",
    "executeMethod",
    "has_method",
    "hasMethod",
    "available_methods",
    "getAvailableMethods",
    "self",
    "super",
    "crate",
    "drop",
    "new",
];

fn check_method_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("method name must not be empty".into());
    }
    if name.starts_with('_') {
        return Err(format!("method name '{name}' is private"));
    }
    if RESERVED_METHOD_NAMES.contains(&name) {
        return Err(format!("method name '{name}' is reserved"));
    }
    Ok(())
}

/// Table-driven [`Handler`]: registration inserts `(name, callable)`,
/// dispatch is a lookup gated by the registered allow-list.
#[derive(Default)]
pub struct HandlerRegistry {
    methods: RwLock<HashMap<String, InlineHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Replaces any prior registration under the same
    /// name; refuses reserved and private-looking names.
    pub fn register<F>(&self, name: &str, f: F) -> std::result::Result<(), String>
    where
        F: Fn(Context, Arc<Lens>) -> BoxFuture<'static, ExecutionResult>
            + Send
            + Sync
            + 'static,
    {
        check_method_name(name)?;
        self.methods
            .write()
            .expect("handler registry poisoned")
            .insert(name.to_string(), Arc::new(f));
        debug!(method = %name, "method registered");
        Ok(())
    }

    /// Remove a method. Silent no-op when the name is not registered.
    pub fn unregister(&self, name: &str) {
        self.methods
            .write()
            .expect("handler registry poisoned")
            .remove(name);
    }
}

#[async_trait]
impl Handler for HandlerRegistry {
    async fn execute_method(
        &self,
        method: &str,
        context: Context,
        lens: Arc<Lens>,
    ) -> ExecutionResult {
        // dispatch-time check as well: a registry restored from elsewhere
        // must not smuggle a reserved name through
        check_method_name(method).map_err(ExecutionError::from)?;
        let callable = self
            .methods
            .read()
            .expect("handler registry poisoned")
            .get(method)
            .cloned();
        match callable {
            Some(f) => f(context, lens).await,
            None => Err(format!("method '{method}' is not registered").into()),
        }
    }

    fn has_method(&self, method: &str) -> bool {
        check_method_name(method).is_ok()
            && self
                .methods
                .read()
                .expect("handler registry poisoned")
                .contains_key(method)
    }

    fn available_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .methods
            .read()
            .expect("handler registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
