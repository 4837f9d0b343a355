//! Sign intent endpoints.

use actix_web::{HttpResponse, web};
use serde::Serialize;
use serde_json::Value;

use super::respond;
use crate::approval::ApprovalId;
use crate::orchestrator::{Orchestrator, SignIntent};

#[derive(Serialize)]
pub struct SignResponse {
    pub result: Value,
}

/// POST /sign
///
/// Runs the intent through the approval boundary and answers once it settles.
#[tracing::instrument(skip(orchestrator, intent), fields(origin = %intent.origin, from = %intent.from))]
pub async fn sign(
    orchestrator: web::Data<Orchestrator>,
    intent: web::Json<SignIntent>,
) -> HttpResponse {
    let result = orchestrator
        .submit_sign_intent(intent.into_inner())
        .await
        .map(|result| SignResponse { result });
    respond(result, "Sign intent")
}

/// POST /sign/{request_id}/retry
///
/// Re-run the durable save of a signature that was produced but not saved.
#[tracing::instrument(skip(orchestrator))]
pub async fn retry_persistence(
    orchestrator: web::Data<Orchestrator>,
    request_id: web::Path<ApprovalId>,
) -> HttpResponse {
    let result = orchestrator
        .retry_persistence(request_id.into_inner())
        .await
        .map(|result| SignResponse { result });
    respond(result, "Persistence retry")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/sign", web::post().to(sign)).route(
        "/sign/{request_id}/retry",
        web::post().to(retry_persistence),
    );
}
