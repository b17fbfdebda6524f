//! Sandboxed execution of caller-supplied JavaScript.
//!
//! Injected source is compiled on every invocation inside a fresh Boa
//! context running on a blocking worker. Nothing is parsed or validated when
//! an imposter is created.
//!
//! - `sandbox` - the [`Sandbox`] executor (predicate and response roles)
//! - `host` - host objects visible to scripts (`process.env`, logger, callback)
//! - `convert` - JSON <-> JS value conversion

mod convert;
mod host;
mod sandbox;

pub use sandbox::{ResponseExecution, Sandbox};

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Which hook an injected function is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRole {
    Predicate,
    Response,
}

impl ScriptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptRole::Predicate => "predicate",
            ScriptRole::Response => "response",
        }
    }
}

/// Resource limits applied to every invocation.
#[derive(Debug, Clone, Copy)]
pub struct ScriptLimits {
    pub loop_iterations: u64,
    pub recursion: usize,
    /// Upper bound on one invocation, including waiting for the callback.
    pub timeout: Option<Duration>,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            loop_iterations: 100_000_000,
            recursion: 400,
            timeout: None,
        }
    }
}

/// Anything that went wrong inside injected code. Never escapes a request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InjectionFault {
    #[error("injected source failed to compile: {0}")]
    Compile(String),
    #[error("injected source is not a function (got {0})")]
    NotCallable(String),
    #[error("injected function threw: {0}")]
    Thrown(String),
    #[error("injected function finished without invoking its callback")]
    NeverCompleted,
    #[error("injected function did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("injected function produced an unusable response: {0}")]
    InvalidResponse(String),
    #[error("sandbox setup failed: {0}")]
    Host(String),
    #[error("sandbox worker crashed: {0}")]
    WorkerCrashed(String),
}

impl InjectionFault {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InjectionFault::Compile(_) => "compile",
            InjectionFault::NotCallable(_) => "not_callable",
            InjectionFault::Thrown(_) => "thrown",
            InjectionFault::NeverCompleted => "never_completed",
            InjectionFault::TimedOut(_) => "timeout",
            InjectionFault::InvalidResponse(_) => "invalid_response",
            InjectionFault::Host(_) => "host",
            InjectionFault::WorkerCrashed(_) => "crashed",
        }
    }
}

/// Truthiness of a value returned by an injected predicate.
///
/// `null` (and `undefined`, which converts to null), `false`, `0`, NaN and the
/// empty string are false. Everything else, including empty arrays and
/// objects, is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
