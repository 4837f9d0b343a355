//! Remote session and QR relay endpoints.
//!
//! The relay bridge forwards peer notifications to `/sessions/remote/event`;
//! the wallet UI drives pairing, resends and QR scans.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use super::respond;
use crate::approval::ApprovalId;
use crate::keyring::KeyringId;
use crate::orchestrator::Orchestrator;
use crate::session::{QrStatus, SessionEvent, SessionStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccountRef {
    pub address: String,
    pub brand_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEventRequest {
    pub address: String,
    pub brand_name: String,
    pub event: SessionEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    pub address: String,
    pub brand_name: String,
    #[serde(default)]
    pub reset_connect: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub brand_name: String,
    #[serde(default)]
    pub stash_id: Option<KeyringId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRemoteRequest {
    pub stash_id: KeyringId,
    pub topic: uuid::Uuid,
    pub address: String,
    pub chain_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
pub struct QrSyncRequest {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrScanRequest {
    pub request_id: ApprovalId,
    /// Scanned signature frame. Absent when the camera was only opened.
    #[serde(default)]
    pub scanned: Option<String>,
    /// Camera or decode failure reported by the UI.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QrStatusResponse {
    pub status: QrStatus,
}

/// POST /sessions/remote/pair
#[tracing::instrument(skip(orchestrator, request), fields(brand = %request.brand_name))]
pub async fn pair(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<PairRequest>,
) -> HttpResponse {
    respond(
        orchestrator
            .init_remote_session(&request.brand_name, request.stash_id)
            .await,
        "Remote pairing",
    )
}

/// POST /sessions/remote/import
#[tracing::instrument(skip(orchestrator, request), fields(stash_id = request.stash_id))]
pub async fn import(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<ImportRemoteRequest>,
) -> HttpResponse {
    respond(
        orchestrator.import_remote_account(
            request.stash_id,
            request.topic,
            &request.address,
            request.chain_id,
        ),
        "Remote account import",
    )
}

/// POST /sessions/remote/event
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address, brand = %request.brand_name))]
pub async fn remote_event(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<RemoteEventRequest>,
) -> HttpResponse {
    let RemoteEventRequest {
        address,
        brand_name,
        event,
    } = request.into_inner();
    let result = orchestrator
        .handle_session_event(&address, &brand_name, event)
        .await
        .map(|status| SessionStatusResponse { status });
    respond(result, "Remote session event")
}

/// POST /sessions/remote/status
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn remote_status(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<RemoteAccountRef>,
) -> HttpResponse {
    respond(
        orchestrator.remote_session_status(&request.address, &request.brand_name),
        "Remote session status",
    )
}

/// POST /sessions/remote/resend
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn resend(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<RemoteAccountRef>,
) -> HttpResponse {
    let result = orchestrator
        .resend_remote_session(&request.address, &request.brand_name)
        .await
        .map(|status| SessionStatusResponse { status });
    respond(result, "Remote session resend")
}

/// POST /sessions/remote/kill
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn kill(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<KillRequest>,
) -> HttpResponse {
    let result = orchestrator
        .kill_remote_session(&request.address, &request.brand_name, request.reset_connect)
        .await
        .map(|()| serde_json::json!({ "closed": true }));
    respond(result, "Remote session kill")
}

/// POST /sessions/qr/sync
#[tracing::instrument(skip(orchestrator, request))]
pub async fn qr_sync(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<QrSyncRequest>,
) -> HttpResponse {
    respond(orchestrator.submit_qr_sync(&request.payload), "QR sync")
}

/// POST /sessions/qr/scan
///
/// Reports a scan error, submits a scanned frame, or marks the camera open.
#[tracing::instrument(skip(orchestrator, request), fields(request_id = %request.request_id))]
pub async fn qr_scan(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<QrScanRequest>,
) -> HttpResponse {
    let QrScanRequest {
        request_id,
        scanned,
        error,
    } = request.into_inner();
    let result = match (error, scanned) {
        (Some(message), _) => orchestrator.report_qr_scan_error(request_id, &message),
        (None, Some(scanned)) => orchestrator.submit_qr_signature(request_id, &scanned),
        (None, None) => orchestrator.begin_qr_scan(request_id),
    };
    respond(result.map(|status| QrStatusResponse { status }), "QR scan")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("/remote/pair", web::post().to(pair))
            .route("/remote/import", web::post().to(import))
            .route("/remote/event", web::post().to(remote_event))
            .route("/remote/status", web::post().to(remote_status))
            .route("/remote/resend", web::post().to(resend))
            .route("/remote/kill", web::post().to(kill))
            .route("/qr/sync", web::post().to(qr_sync))
            .route("/qr/scan", web::post().to(qr_scan)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::test_orchestrator;
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;

    #[actix_rt::test]
    async fn test_pair_then_import_connects_session() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_orchestrator()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions/remote/pair")
            .set_json(json!({ "brandName": "MetaMask" }))
            .to_request();
        let pairing: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(pairing["uri"].as_str().unwrap().starts_with("wc:"));

        let req = test::TestRequest::post()
            .uri("/sessions/remote/import")
            .set_json(json!({
                "stashId": pairing["stashId"],
                "topic": pairing["topic"],
                "address": "0x2222222222222222222222222222222222222222",
                "chainId": 1,
            }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post()
            .uri("/sessions/remote/status")
            .set_json(json!({
                "address": "0x2222222222222222222222222222222222222222",
                "brandName": "MetaMask",
            }))
            .to_request();
        let info: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(info["status"], "CONNECTED");
    }

    #[actix_rt::test]
    async fn test_qr_scan_without_relay_is_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_orchestrator()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/sessions/qr/scan")
            .set_json(json!({ "requestId": uuid::Uuid::new_v4() }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
