//! Service configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before the service starts.
//!
//! ## Environment Variables
//!
//! - `KEYRING_PORT`: HTTP port (default: 5010)
//! - `KEYRING_HOST`: Bind address (default: :: for dual-stack IPv4/IPv6)
//! - `KEYRING_DB_PATH`: Path to ReDB database file
//! - `INTERNAL_SERVICE_TOKEN`: Shared secret for web app authentication
//! - `KEYRING_REQUEST_TIMEOUT_MS`: Outbound HTTP timeout
//! - `KEYRING_BODY_LIMIT_MB`: Maximum JSON body size
//! - `KEYRING_PERMISSION_CAPACITY`: Connected-site cache capacity
//! - `KEYRING_REMOTE_TIMEOUT_MS`: Remote session inactivity timeout (0 disables)
//! - `KEYRING_QR_TIMEOUT_MS`: QR relay wait timeout (0 disables)
//! - `KEYRING_INTERNAL_ORIGIN`: Origin treated as the wallet itself
//! - `KEYRING_DEFAULT_BRIDGE`: Relay bridge used for new remote sessions
//! - `SAFE_SERVICE_URL`: Multisig transaction service base URL
//! - `KEYRING_SIGNER_URL`: Signing capability endpoint for software and hardware accounts
//! - `RUST_LOG`: Log level filter
//! - `KEYRING_LOG_FORMAT`: `json` for JSON log lines (read by `telemetry`)

use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5010;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BODY_LIMIT_MB: usize = 4;
const DEFAULT_PERMISSION_CAPACITY: usize = 1000;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_QR_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_INTERNAL_ORIGIN: &str = "internal://keyring-service";
pub const DEFAULT_BRIDGE: &str = "https://bridge.walletconnect.org";

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Helper to get an optional non-empty env var.
fn env_opt(name: &str) -> Option<String> {
    let value = env_trim(name);
    if value.is_empty() { None } else { Some(value) }
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// Milliseconds to an optional duration, zero meaning "no timeout".
fn optional_timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    port: u16,
    host: IpAddr,
    db_path: PathBuf,
    internal_token: Option<String>,
    internal_token_required: bool,
    request_timeout_ms: u64,
    body_limit_bytes: usize,

    permission_capacity: usize,
    remote_timeout_ms: u64,
    qr_timeout_ms: u64,
    internal_origin: String,
    default_bridge: String,
    safe_service_url: Option<String>,
    signer_url: Option<String>,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let port = env_trim("KEYRING_PORT")
            .parse::<u16>()
            .unwrap_or(DEFAULT_PORT);

        // Default to IPv6 unspecified (::) for dual-stack support.
        let host = env_trim("KEYRING_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        let db_path = env_opt("KEYRING_DB_PATH")
            .map_or_else(|| PathBuf::from("./.data/keyring.redb"), PathBuf::from);

        let internal_token = env_opt("INTERNAL_SERVICE_TOKEN");

        // Determine if token is required based on environment
        let is_production = ["NODE_ENV", "APP_ENV", "RUST_ENV"]
            .iter()
            .any(|name| env_lower(name) == "production");
        let internal_token_required =
            is_production || is_truthy(&env_lower("INTERNAL_SERVICE_TOKEN_REQUIRED"));

        let request_timeout_ms = env_trim("KEYRING_REQUEST_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        let body_limit_mb = env_trim("KEYRING_BODY_LIMIT_MB")
            .parse::<usize>()
            .unwrap_or(DEFAULT_BODY_LIMIT_MB);
        let body_limit_bytes = body_limit_mb.saturating_mul(1024 * 1024);

        let permission_capacity = env_trim("KEYRING_PERMISSION_CAPACITY")
            .parse::<usize>()
            .unwrap_or(DEFAULT_PERMISSION_CAPACITY);

        let remote_timeout_ms = env_trim("KEYRING_REMOTE_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS);

        let qr_timeout_ms = env_trim("KEYRING_QR_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_QR_TIMEOUT_MS);

        let internal_origin = env_opt("KEYRING_INTERNAL_ORIGIN")
            .unwrap_or_else(|| DEFAULT_INTERNAL_ORIGIN.to_string());

        let default_bridge =
            env_opt("KEYRING_DEFAULT_BRIDGE").unwrap_or_else(|| DEFAULT_BRIDGE.to_string());

        Self {
            port,
            host,
            db_path,
            internal_token,
            internal_token_required,
            request_timeout_ms,
            body_limit_bytes,
            permission_capacity,
            remote_timeout_ms,
            qr_timeout_ms,
            internal_origin,
            default_bridge,
            safe_service_url: env_opt("SAFE_SERVICE_URL"),
            signer_url: env_opt("KEYRING_SIGNER_URL"),
        }
    }

    /// Create settings for tests.
    ///
    /// Short remote/QR timeouts keep timeout paths observable without slowing the suite.
    pub fn for_tests() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            db_path: PathBuf::from("./.data/test-keyring.redb"),
            internal_token: None,
            internal_token_required: false,
            request_timeout_ms: 5_000,
            body_limit_bytes: DEFAULT_BODY_LIMIT_MB * 1024 * 1024,
            permission_capacity: 16,
            remote_timeout_ms: 2_000,
            qr_timeout_ms: 2_000,
            internal_origin: DEFAULT_INTERNAL_ORIGIN.to_string(),
            default_bridge: DEFAULT_BRIDGE.to_string(),
            safe_service_url: None,
            signer_url: None,
        }
    }

    /// Override the connected-site cache capacity.
    #[must_use]
    pub fn with_permission_capacity(mut self, capacity: usize) -> Self {
        self.permission_capacity = capacity;
        self
    }

    /// Override the remote session timeout (0 disables).
    #[must_use]
    pub fn with_remote_timeout_ms(mut self, ms: u64) -> Self {
        self.remote_timeout_ms = ms;
        self
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.internal_token_required && self.internal_token.is_none() {
            return Err("INTERNAL_SERVICE_TOKEN is required in production. \
                 Set INTERNAL_SERVICE_TOKEN or INTERNAL_SERVICE_TOKEN_REQUIRED=0."
                .to_string());
        }

        if self.permission_capacity == 0 {
            return Err("KEYRING_PERMISSION_CAPACITY must be greater than zero.".to_string());
        }

        for (name, url) in [
            ("SAFE_SERVICE_URL", &self.safe_service_url),
            ("KEYRING_SIGNER_URL", &self.signer_url),
        ] {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(format!("{name} must be an http(s) URL, got '{url}'."));
            }
        }

        Ok(())
    }

    // Getters

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.internal_token.as_deref()
    }

    pub fn internal_token_required(&self) -> bool {
        self.internal_token_required
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    pub fn permission_capacity(&self) -> usize {
        self.permission_capacity
    }

    /// Inactivity timeout for remote sessions, `None` when disabled.
    pub fn remote_timeout(&self) -> Option<Duration> {
        optional_timeout(self.remote_timeout_ms)
    }

    /// Wait timeout for QR relay signatures, `None` when disabled.
    pub fn qr_timeout(&self) -> Option<Duration> {
        optional_timeout(self.qr_timeout_ms)
    }

    pub fn internal_origin(&self) -> &str {
        &self.internal_origin
    }

    pub fn default_bridge(&self) -> &str {
        &self.default_bridge
    }

    pub fn safe_service_url(&self) -> Option<&str> {
        self.safe_service_url.as_deref()
    }

    pub fn signer_url(&self) -> Option<&str> {
        self.signer_url.as_deref()
    }
}
