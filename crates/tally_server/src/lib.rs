//! TALLY HTTP Server
//!
//! JSON API over the aggregation engine: inline aggregation, background
//! jobs and read-only schema lookups.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;

pub use api::{AppState, router};
pub use config::ServerConfig;
pub use error::ApiError;
