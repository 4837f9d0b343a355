//! Health check and build info endpoints.
//!
//! Both are public (no internal token required).

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::orchestrator::Orchestrator;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Requests queued or pending approval.
    pub pending_approvals: usize,
    pub audit_seq: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
    /// Hex public key the audit log entries are signed with.
    pub audit_key: String,
}

/// GET /health
#[tracing::instrument(skip(orchestrator))]
pub async fn health(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        pending_approvals: orchestrator.pending_approvals(),
        audit_seq: orchestrator.audit_logger().current_seq(),
    })
}

/// GET /build-info
///
/// Returns build metadata for deployment verification.
#[tracing::instrument(skip(orchestrator))]
pub async fn build_info(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(BuildInfoResponse {
        service: "keyring-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
        audit_key: orchestrator.audit_logger().verifying_key_hex(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}
