//! Admin REST API for imposter management.
//!
//! Mountebank-compatible endpoints for:
//! - Creating, replacing, deleting and listing imposters
//! - Managing stubs within imposters
//! - Clearing recorded requests
//! - Health, config and metrics
//!
//! The API listens on a configurable port (default: 2525).

mod handlers;
mod router;
mod server;
pub(crate) mod types;

pub use handlers::imposters::ImpostersEnvelope;
pub use server::AdminApiServer;
