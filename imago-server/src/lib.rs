//! # imago-server
//!
//! HTTP layer of the imago IIIF Image API v3 server: routing, the request
//! dispatch pipeline, the info/blob/special endpoints and the cache admin
//! API, on top of `imago-core`.

/// Request handlers
pub mod handlers;

/// Configuration, state, errors, byte-range helpers
pub mod infra;

/// Router assembly
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::config::Config;
pub use infra::errors::{AppError, AppResult};
pub use routes::create_app;
