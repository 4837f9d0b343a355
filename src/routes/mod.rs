//! HTTP routes for the orchestrator.
//!
//! Routes are organized by functionality:
//! - `health`: Health check and build info (public)
//! - `sign`: Sign intents and persistence retries
//! - `approvals`: The user approval boundary
//! - `accounts`: Active account, imports and removals
//! - `sites`: Connected-site permissions
//! - `sessions`: Remote session and QR relay events
//! - `multisig`: Safe import, signatures and execution

pub mod accounts;
pub mod approvals;
pub mod health;
pub mod multisig;
pub mod sessions;
pub mod sign;
pub mod sites;

pub use health::{build_info, health};

use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::error::KeyringResult;

/// Map an orchestrator result onto a JSON response, logging failures.
pub(crate) fn respond<T: Serialize>(result: KeyringResult<T>, context: &str) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!(error = %e, "{context} failed");
            } else {
                tracing::warn!(error = %e, code = e.error_code(), "{context} failed");
            }
            e.error_response()
        }
    }
}

/// Register every route group.
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(sign::configure)
        .configure(approvals::configure)
        .configure(accounts::configure)
        .configure(sites::configure)
        .configure(sessions::configure)
        .configure(multisig::configure);
}
