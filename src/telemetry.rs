//! Tracing subscriber setup.
//!
//! Console output is always installed; `KEYRING_LOG_FORMAT=json` switches it
//! to JSON lines. With the `otel` feature, spans are also exported over
//! OTLP/HTTP to `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4318`).
//! Approval and backend spans carry the request id, so one sign request can be
//! followed from intent to `SignFinished`.

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "keyring_service=info,actix_web=info";

fn json_output() -> bool {
    std::env::var("KEYRING_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = if json_output() {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    let registry = tracing_subscriber::registry().with(env_filter).with(console);

    #[cfg(feature = "otel")]
    match otel::layer() {
        Ok(export) => registry.with(export).init(),
        Err(e) => {
            registry.init();
            tracing::warn!(error = %e, "OTLP exporter unavailable, span export disabled");
        }
    }

    #[cfg(not(feature = "otel"))]
    registry.init();
}

/// Flush spans still buffered for export.
pub fn shutdown_tracing() {
    #[cfg(feature = "otel")]
    otel::shutdown();
}

#[cfg(feature = "otel")]
mod otel {
    use std::sync::OnceLock;

    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_opentelemetry::OpenTelemetryLayer;
    use tracing_subscriber::{Layer, registry::LookupSpan};

    const SERVICE_NAME: &str = "keyring-service";

    static PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

    pub(super) fn layer<S>() -> Result<Box<dyn Layer<S> + Send + Sync>, String>
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
    {
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4318".to_string());
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| e.to_string())?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                opentelemetry_sdk::Resource::builder()
                    .with_service_name(SERVICE_NAME)
                    .build(),
            )
            .build();
        let tracer = provider.tracer(SERVICE_NAME);

        let _ = PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Ok(OpenTelemetryLayer::new(tracer).boxed())
    }

    pub(super) fn shutdown() {
        if let Some(provider) = PROVIDER.get()
            && let Err(e) = provider.shutdown()
        {
            tracing::error!(error = ?e, "Failed to shut down tracer provider");
        }
    }
}
