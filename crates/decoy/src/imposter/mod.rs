//! Imposter management.
//!
//! An imposter is a fake server on one port. It owns an ordered list of stubs
//! (predicates plus rotating responses) and a state bag shared by the injected
//! responses of that imposter.
//!
//! - `types`: creation envelope, compiled predicate/response forms, errors
//! - `predicates`: predicate parsing and evaluation
//! - `response`: literal and injected responses, partial merge
//! - `store`: stub ordering, response cursors, serialized state access
//! - `core`: the `Imposter` itself
//! - `manager`: `ImposterManager`, the registry of running imposters

mod core;
mod manager;
mod predicates;
mod response;
mod store;
mod types;

#[cfg(test)]
mod tests;

pub use core::{stub_uses_injection, uses_injection, Imposter};
pub use manager::{ImposterManager, ManagerSettings};
pub use predicates::{parse_predicate, parse_predicates, predicate_matches, stub_matches};
pub use response::{fault_response, merge_partial, INJECT_ERROR_HEADER, TCP_FAULT_PAYLOAD};
pub use store::{Resolution, StubStore};
pub use types::{
    ImposterConfig, ImposterError, Operator, Predicate, PredicateOptions, ResponseSpec,
    StubDefinition,
};
