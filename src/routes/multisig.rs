//! Multisig endpoints.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use super::respond;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSafeRequest {
    pub safe_address: String,
    pub network_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeRequest {
    pub safe_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub tx_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutableResponse {
    pub executable: bool,
}

/// POST /multisig/import
#[tracing::instrument(skip(orchestrator, request), fields(safe_address = %request.safe_address))]
pub async fn import(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<ImportSafeRequest>,
) -> HttpResponse {
    respond(
        orchestrator.import_safe(&request.safe_address, request.network_id),
        "Safe import",
    )
}

/// GET /multisig/{safe_address}
///
/// The in-progress transaction with its collected signatures.
#[tracing::instrument(skip(orchestrator))]
pub async fn signatures(
    orchestrator: web::Data<Orchestrator>,
    safe_address: web::Path<String>,
) -> HttpResponse {
    respond(
        orchestrator.multisig_signatures(&safe_address),
        "Multisig lookup",
    )
}

/// POST /multisig/executable
#[tracing::instrument(skip(orchestrator, request), fields(safe_address = %request.safe_address))]
pub async fn executable(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<SafeRequest>,
) -> HttpResponse {
    let result = orchestrator
        .check_multisig_executable(&request.safe_address)
        .await
        .map(|executable| ExecutableResponse { executable });
    respond(result, "Multisig threshold check")
}

/// POST /multisig/execute
#[tracing::instrument(skip(orchestrator, request), fields(safe_address = %request.safe_address))]
pub async fn execute(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<SafeRequest>,
) -> HttpResponse {
    let result = orchestrator
        .execute_multisig(&request.safe_address)
        .await
        .map(|tx_hash| ExecuteResponse { tx_hash });
    respond(result, "Multisig execution")
}

/// POST /multisig/clear
#[tracing::instrument(skip(orchestrator, request), fields(safe_address = %request.safe_address))]
pub async fn clear(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<SafeRequest>,
) -> HttpResponse {
    let result = orchestrator
        .clear_multisig(&request.safe_address)
        .map(|cleared| serde_json::json!({ "cleared": cleared }));
    respond(result, "Multisig clear")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/multisig")
            .route("/import", web::post().to(import))
            .route("/executable", web::post().to(executable))
            .route("/execute", web::post().to(execute))
            .route("/clear", web::post().to(clear))
            .route("/{safe_address}", web::get().to(signatures)),
    );
}
