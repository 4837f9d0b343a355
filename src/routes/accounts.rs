//! Account and keyring management endpoints.

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use super::respond;
use crate::keyring::{KeyringId, KeyringType, SoftwareKind};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRequest {
    pub address: String,
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    #[serde(default)]
    pub brand_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct SoftwareRequest {
    pub kind: SoftwareKind,
    /// Encrypted vault produced by the signing capability.
    pub vault: String,
    pub accounts: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareConnectRequest {
    pub brand_name: String,
    #[serde(default)]
    pub hd_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HardwareAccountsRequest {
    pub accounts: Vec<String>,
}

/// GET /accounts
#[tracing::instrument(skip(orchestrator))]
pub async fn list(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    respond(orchestrator.accounts(), "List accounts")
}

/// GET /accounts/current
#[tracing::instrument(skip(orchestrator))]
pub async fn current(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    HttpResponse::Ok().json(orchestrator.current_account())
}

/// POST /accounts/change
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn change(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<AccountRequest>,
) -> HttpResponse {
    respond(
        orchestrator.change_account(
            &request.address,
            request.keyring_type,
            request.brand_name.as_deref(),
        ),
        "Account change",
    )
}

/// POST /accounts/remove
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn remove(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<AccountRequest>,
) -> HttpResponse {
    let result = orchestrator
        .remove_address(
            &request.address,
            request.keyring_type,
            request.brand_name.as_deref(),
        )
        .await
        .map(|()| serde_json::json!({ "removed": true }));
    respond(result, "Account removal")
}

/// POST /accounts/watch
#[tracing::instrument(skip(orchestrator, request), fields(address = %request.address))]
pub async fn watch(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<WatchRequest>,
) -> HttpResponse {
    respond(
        orchestrator.import_watch_address(&request.address),
        "Watch import",
    )
}

/// POST /keyrings/software
#[tracing::instrument(skip(orchestrator, request))]
pub async fn stash_software(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<SoftwareRequest>,
) -> HttpResponse {
    respond(
        orchestrator.stash_software_keyring(request.kind, &request.vault, &request.accounts),
        "Software keyring stash",
    )
}

/// POST /keyrings/hardware
#[tracing::instrument(skip(orchestrator, request), fields(brand = %request.brand_name))]
pub async fn connect_hardware(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<HardwareConnectRequest>,
) -> HttpResponse {
    let result = orchestrator
        .connect_hardware(&request.brand_name, request.hd_path.as_deref())
        .await
        .map(|stash_id| serde_json::json!({ "stashId": stash_id }));
    respond(result, "Hardware connect")
}

/// POST /keyrings/{id}/accounts
#[tracing::instrument(skip(orchestrator, request))]
pub async fn add_hardware_accounts(
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<KeyringId>,
    request: web::Json<HardwareAccountsRequest>,
) -> HttpResponse {
    respond(
        orchestrator.add_hardware_accounts(id.into_inner(), &request.accounts),
        "Hardware account import",
    )
}

/// POST /keyrings/{id}/promote
#[tracing::instrument(skip(orchestrator))]
pub async fn promote(
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<KeyringId>,
) -> HttpResponse {
    respond(orchestrator.promote_keyring(id.into_inner()), "Keyring promote")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/accounts")
            .route("", web::get().to(list))
            .route("/current", web::get().to(current))
            .route("/change", web::post().to(change))
            .route("/remove", web::post().to(remove))
            .route("/watch", web::post().to(watch)),
    )
    .service(
        web::scope("/keyrings")
            .route("/software", web::post().to(stash_software))
            .route("/hardware", web::post().to(connect_hardware))
            .route("/{id}/accounts", web::post().to(add_hardware_accounts))
            .route("/{id}/promote", web::post().to(promote)),
    );
}
