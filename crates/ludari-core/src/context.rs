//! Execution-context helpers.
//!
//! A job's context is a free-form JSON map. The engine recognises three
//! keys: `distributed` (opt into lock-guarded cross-replica exclusion),
//! `ttl` (lock time-to-live in seconds), and `runOnce` (disable the job
//! after a successful firing). Everything else is passed through to the
//! execution untouched.

use serde_json::Value;

/// Key/value map handed to every execution.
pub type Context = serde_json::Map<String, Value>;

/// Context key: lock-guarded cross-replica exclusion.
pub const CTX_DISTRIBUTED: &str = "distributed";
/// Context key: distributed-lock TTL in seconds.
pub const CTX_TTL: &str = "ttl";
/// Context key: disable the job after one successful firing.
pub const CTX_RUN_ONCE: &str = "runOnce";

/// Default lock TTL in seconds when `ttl` is absent.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;

/// JSON truthiness: null, `false`, `0`, and `""` are falsy; arrays and
/// objects (even empty ones) are truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// True when `key` is present in the context and truthy. Absent is false.
pub fn ctx_flag(ctx: &Context, key: &str) -> bool {
    ctx.get(key).map(is_truthy).unwrap_or(false)
}

/// Lock TTL in seconds from the `ttl` key, defaulting to 30.
pub fn ctx_ttl_secs(ctx: &Context) -> u64 {
    ctx.get(CTX_TTL)
        .and_then(Value::as_u64)
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_LOCK_TTL_SECS)
}

/// Merge `dynamic` over `base`; dynamic entries win on overlap.
pub fn merge_context(base: &Context, dynamic: &Context) -> Context {
    let mut merged = base.clone();
    for (k, v) in dynamic {
        merged.insert(k.clone(), v.clone());
    }
    merged
}
