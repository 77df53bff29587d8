//! HTTP API handlers for simak-ingest
//!
//! Authentication happens upstream; the caller's identity arrives in the
//! `x-user-id` and `x-user-role` headers.

pub mod health;
pub mod imports;
pub mod upload;

pub use health::health_routes;
pub use imports::import_routes;
pub use upload::upload_routes;
