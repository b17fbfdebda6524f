//! Decoy: programmable imposters (HTTP, HTTPS, TCP) whose stubs can be
//! written as injected JavaScript predicates and responses.

pub mod admin_api;
pub mod config;
pub mod imposter;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod protocols;
pub mod scripting;
