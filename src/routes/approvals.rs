//! Approval boundary endpoints used by the wallet UI.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::{ApprovalId, ApprovalRequest};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentApprovalResponse {
    pub approval: Option<ApprovalRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettleResponse {
    /// `false` when the request had already settled.
    pub settled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectAllResponse {
    pub rejected: usize,
}

const DEFAULT_REJECT_REASON: &str = "User rejected the request";

/// GET /approvals/current
#[tracing::instrument(skip(orchestrator))]
pub async fn current(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(CurrentApprovalResponse {
        approval: orchestrator.current_approval(),
    })
}

/// POST /approvals/{id}/resolve
#[tracing::instrument(skip(orchestrator, request))]
pub async fn resolve(
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<ApprovalId>,
    request: web::Json<ResolveRequest>,
) -> HttpResponse {
    let settled = orchestrator.resolve_approval(id.into_inner(), request.into_inner().result);
    HttpResponse::Ok().json(SettleResponse { settled })
}

/// POST /approvals/{id}/reject
#[tracing::instrument(skip(orchestrator, request))]
pub async fn reject(
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<ApprovalId>,
    request: Option<web::Json<RejectRequest>>,
) -> HttpResponse {
    let reason = request
        .and_then(|r| r.into_inner().reason)
        .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
    let settled = orchestrator.reject_approval(id.into_inner(), &reason);
    HttpResponse::Ok().json(SettleResponse { settled })
}

/// POST /approvals/reject-all
#[tracing::instrument(skip(orchestrator, request))]
pub async fn reject_all(
    orchestrator: web::Data<Orchestrator>,
    request: Option<web::Json<RejectRequest>>,
) -> HttpResponse {
    let reason = request
        .and_then(|r| r.into_inner().reason)
        .unwrap_or_else(|| DEFAULT_REJECT_REASON.to_string());
    let rejected = orchestrator.reject_all_approvals(&reason);
    HttpResponse::Ok().json(RejectAllResponse { rejected })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/approvals")
            .route("/current", web::get().to(current))
            .route("/reject-all", web::post().to(reject_all))
            .route("/{id}/resolve", web::post().to(resolve))
            .route("/{id}/reject", web::post().to(reject)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::test_orchestrator;
    use actix_web::{App, test};

    #[actix_rt::test]
    async fn test_no_current_approval() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_orchestrator()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/approvals/current").to_request();
        let body: CurrentApprovalResponse = test::call_and_read_body_json(&app, req).await;
        assert!(body.approval.is_none());
    }

    #[actix_rt::test]
    async fn test_settling_unknown_request_is_noop() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_orchestrator()))
                .configure(configure),
        )
        .await;

        let uri = format!("/approvals/{}/reject", uuid::Uuid::new_v4());
        let req = test::TestRequest::post()
            .uri(&uri)
            .set_json(serde_json::json!({ "reason": "no" }))
            .to_request();
        let body: SettleResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!body.settled);

        let req = test::TestRequest::post().uri("/approvals/reject-all").to_request();
        let body: RejectAllResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.rejected, 0);
    }
}
