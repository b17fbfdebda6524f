//! Type definitions for imposter management.
//!
//! The creation envelope (`ImposterConfig`, `StubDefinition`) keeps the raw
//! JSON the caller sent so it can be echoed back verbatim. Matching and
//! response generation work on the compiled forms (`Predicate`, `ResponseSpec`).

use crate::model::{BodyMode, Response};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Creation envelope
// ============================================================================

/// Imposter configuration as posted to `/imposters`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub record_requests: bool,
    /// Partial response merged over protocol defaults for every response,
    /// and returned as is when no stub matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<Value>,
    /// PEM private key (https)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// PEM certificate chain (https)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    /// Payload encoding (tcp)
    #[serde(default)]
    pub mode: BodyMode,
    /// Bind address, defaults to the server's host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,
}

fn default_protocol() -> String {
    "http".to_string()
}

/// A stub exactly as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StubDefinition {
    #[serde(default)]
    pub predicates: Vec<Value>,
    #[serde(default)]
    pub responses: Vec<Value>,
}

// ============================================================================
// Compiled predicates
// ============================================================================

/// Built-in comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DeepEquals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
}

impl Operator {
    pub const ALL: [Operator; 7] = [
        Operator::Equals,
        Operator::DeepEquals,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Matches,
        Operator::Exists,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::DeepEquals => "deepEquals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::Exists => "exists",
        }
    }
}

/// Options modifying a built-in comparison.
#[derive(Debug, Clone, Default)]
pub struct PredicateOptions {
    /// Applies to values and object keys. Defaults to false.
    pub case_sensitive: bool,
    /// Stripped from actual values before comparison.
    pub except: Option<Regex>,
}

/// A compiled predicate.
#[derive(Debug, Clone)]
pub enum Predicate {
    Operator {
        operator: Operator,
        fields: Map<String, Value>,
        options: PredicateOptions,
    },
    Not(Box<Predicate>),
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
    /// Injected JavaScript, compiled only when evaluated.
    Inject(String),
}

// ============================================================================
// Compiled responses
// ============================================================================

/// A compiled response entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSpec {
    /// Literal response, already merged over the imposter defaults.
    Is(Response),
    /// Injected JavaScript producing a partial response.
    Inject(String),
}

// ============================================================================
// Error Types
// ============================================================================

/// Imposter-related errors
#[derive(Debug, thiserror::Error)]
pub enum ImposterError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Imposter not found on port {0}")]
    NotFound(u16),
    #[error("Failed to bind port {0}: {1}")]
    BindError(u16, String),
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    #[error("Stub index {0} out of bounds")]
    StubIndexOutOfBounds(usize),
    #[error("Invalid imposter definition: {0}")]
    InvalidDefinition(String),
    #[error("https imposters need a key and certificate: {0}")]
    MissingTlsMaterial(String),
    #[error("Invalid TLS material: {0}")]
    Tls(String),
    #[error("JavaScript injection is not allowed unless the server runs with injection enabled")]
    InjectionDisabled,
}

impl ImposterError {
    /// Mountebank-style error code for admin responses.
    pub fn code(&self) -> &'static str {
        match self {
            ImposterError::PortInUse(_) | ImposterError::BindError(..) => "resource conflict",
            ImposterError::NotFound(_) | ImposterError::StubIndexOutOfBounds(_) => "no such resource",
            ImposterError::InvalidProtocol(_) => "invalid protocol",
            ImposterError::InvalidDefinition(_) => "bad data",
            ImposterError::MissingTlsMaterial(_) | ImposterError::Tls(_) => "bad data",
            ImposterError::InjectionDisabled => "invalid injection",
        }
    }
}
