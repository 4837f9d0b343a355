//! Keyring Orchestrator
//!
//! Serves the wallet's inbound boundary over HTTP: sign intents, the
//! approval boundary, connected sites, remote sessions, QR relays and
//! multisig aggregation.
//!
//! ## Outbound adapters
//!
//! - `KEYRING_SIGNER_URL`: signing capability for software and hardware accounts
//! - relay bridges for remote sessions (per account, default `KEYRING_DEFAULT_BRIDGE`)
//! - `SAFE_SERVICE_URL`: Safe transaction service for multisig accounts

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use keyring_service::{
    config::Settings,
    keyring::{HttpSignerCapability, SignerCapability},
    middleware::InternalAuth,
    orchestrator::{Backends, Orchestrator},
    routes,
    session::{HttpBridgeTransport, HttpSafeService, SafeContract, UnconfiguredSafeService},
    storage::Storage,
    telemetry,
};
use tracing_actix_web::TracingLogger;

fn build_backends(settings: &Settings) -> anyhow::Result<Backends> {
    let signer: Option<Arc<dyn SignerCapability>> = match settings.signer_url() {
        Some(url) => Some(Arc::new(
            HttpSignerCapability::new(url, settings.request_timeout())
                .context("Failed to create signer client")?,
        )),
        None => {
            tracing::warn!("KEYRING_SIGNER_URL not set; software and hardware accounts cannot sign");
            None
        }
    };

    let safe: Arc<dyn SafeContract> = match settings.safe_service_url() {
        Some(url) => Arc::new(HttpSafeService::new(url).context("Failed to create Safe client")?),
        None => Arc::new(UnconfiguredSafeService),
    };

    Ok(Backends {
        software: signer.clone(),
        hardware: signer,
        transport: Arc::new(HttpBridgeTransport::new().context("Failed to create bridge client")?),
        safe,
    })
}

fn build_orchestrator(settings: &Settings) -> anyhow::Result<Orchestrator> {
    let storage = Storage::open(settings.db_path()).context("Failed to open storage database")?;
    let backends = build_backends(settings)?;
    let orchestrator =
        Orchestrator::new(storage, settings, backends).context("Failed to create orchestrator")?;
    orchestrator
        .init()
        .context("Failed to load connected sites")?;
    Ok(orchestrator)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();
    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let orchestrator = match build_orchestrator(&settings) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Failed to start orchestrator");
            std::process::exit(1);
        }
    };

    let addr = settings.socket_addr();
    tracing::info!(
        addr = %addr,
        auth_required = settings.internal_token_required(),
        permission_capacity = settings.permission_capacity(),
        safe_service = settings.safe_service_url().is_some(),
        "Starting Keyring Orchestrator"
    );

    let body_limit = settings.body_limit_bytes();
    let auth = InternalAuth::new(&settings);
    let settings_data = web::Data::new(settings);
    let orchestrator_data = web::Data::new(orchestrator);

    HttpServer::new(move || {
        App::new()
            // Request tracing
            .wrap(TracingLogger::default())
            // Default headers
            .wrap(middleware::DefaultHeaders::new().add(("X-Service", "keyring-orchestrator")))
            .wrap(auth.clone())
            .app_data(web::JsonConfig::default().limit(body_limit))
            // Shared state
            .app_data(settings_data.clone())
            .app_data(orchestrator_data.clone())
            .configure(routes::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    telemetry::shutdown_tracing();

    Ok(())
}
