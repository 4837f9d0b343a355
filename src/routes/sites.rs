//! Connected-site endpoints.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use super::respond;
use crate::orchestrator::Orchestrator;
use crate::permission::{ConnectedSite, SitePatch};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub origin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub origin: String,
    #[serde(flatten)]
    pub patch: SitePatch,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub origin: String,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct OriginRequest {
    pub origin: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemovedResponse {
    pub removed: usize,
}

/// GET /sites/recent
#[tracing::instrument(skip(orchestrator))]
pub async fn recent(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    respond(orchestrator.list_recent_sites(), "List recent sites")
}

/// GET /sites/chain/{chain_id}
#[tracing::instrument(skip(orchestrator))]
pub async fn by_chain(
    orchestrator: web::Data<Orchestrator>,
    chain_id: web::Path<u64>,
) -> HttpResponse {
    respond(
        orchestrator.sites_by_chain(chain_id.into_inner()),
        "List sites by chain",
    )
}

/// GET /sites/prefer-metamask
#[tracing::instrument(skip(orchestrator))]
pub async fn prefer_metamask(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    respond(
        orchestrator.prefer_metamask_sites(),
        "List MetaMask-preferring sites",
    )
}

/// POST /sites/prefer-metamask/remove
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn remove_prefer_metamask(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<OriginRequest>,
) -> HttpResponse {
    let result = orchestrator
        .remove_prefer_metamask(&request.origin)
        .map(|changed| ChangedResponse { changed });
    respond(result, "Remove MetaMask preference")
}

/// POST /sites/reorder
#[tracing::instrument(skip(orchestrator, sites))]
pub async fn reorder(
    orchestrator: web::Data<Orchestrator>,
    sites: web::Json<Vec<ConnectedSite>>,
) -> HttpResponse {
    let result = orchestrator
        .reorder_sites(sites.into_inner())
        .map(|()| ChangedResponse { changed: true });
    respond(result, "Reorder sites")
}

/// POST /sites/connect
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn connect(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<ConnectRequest>,
) -> HttpResponse {
    let result = orchestrator
        .connect_site(&request.origin, &request.name, &request.icon, request.chain_id)
        .map(|()| ChangedResponse { changed: true });
    respond(result, "Connect site")
}

/// POST /sites/update
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn update(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<UpdateRequest>,
) -> HttpResponse {
    respond(
        orchestrator.update_site(&request.origin, &request.patch),
        "Update site",
    )
}

/// POST /sites/pin
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn pin(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<PinRequest>,
) -> HttpResponse {
    let result = orchestrator
        .pin_site(&request.origin, request.order)
        .map(|changed| ChangedResponse { changed });
    respond(result, "Pin site")
}

/// POST /sites/unpin
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn unpin(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<OriginRequest>,
) -> HttpResponse {
    let result = orchestrator
        .unpin_site(&request.origin)
        .map(|changed| ChangedResponse { changed });
    respond(result, "Unpin site")
}

/// POST /sites/remove
#[tracing::instrument(skip(orchestrator, request), fields(origin = %request.origin))]
pub async fn remove(
    orchestrator: web::Data<Orchestrator>,
    request: web::Json<OriginRequest>,
) -> HttpResponse {
    let result = orchestrator
        .remove_site(&request.origin)
        .map(|changed| ChangedResponse { changed });
    respond(result, "Remove site")
}

/// POST /sites/remove-all
///
/// Disconnects every unpinned site.
#[tracing::instrument(skip(orchestrator))]
pub async fn remove_all(orchestrator: web::Data<Orchestrator>) -> HttpResponse {
    let result = orchestrator
        .remove_all_recent_sites()
        .map(|removed| RemovedResponse { removed });
    respond(result, "Remove recent sites")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sites")
            .route("/recent", web::get().to(recent))
            .route("/chain/{chain_id}", web::get().to(by_chain))
            .route("/prefer-metamask", web::get().to(prefer_metamask))
            .route(
                "/prefer-metamask/remove",
                web::post().to(remove_prefer_metamask),
            )
            .route("/reorder", web::post().to(reorder))
            .route("/connect", web::post().to(connect))
            .route("/update", web::post().to(update))
            .route("/pin", web::post().to(pin))
            .route("/unpin", web::post().to(unpin))
            .route("/remove", web::post().to(remove))
            .route("/remove-all", web::post().to(remove_all)),
    );
}
