// HTTP API routes
//
// This module contains the HTTP route handlers for the public API.

pub mod common;
pub mod workflows;

// Re-export common types
pub use common::{ApiError, ErrorResponse};
