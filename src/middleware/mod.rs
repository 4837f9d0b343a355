//! Middleware for the orchestrator API.

pub mod auth;

pub use auth::InternalAuth;
