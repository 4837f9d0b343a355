//! Relay transport used by remote sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::remote::RelayMessage;
use crate::error::{KeyringError, KeyringResult};

/// HTTP client timeout for relay calls.
const RELAY_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Carries messages between the orchestrator and remote wallets.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open (or reuse) the relay subscription for `topic`. Returns the pairing URI.
    async fn connect(&self, bridge: &str, topic: Uuid) -> KeyringResult<String>;

    /// Push a sign request to the peer.
    async fn send(&self, message: &RelayMessage) -> KeyringResult<()>;

    /// Release the relay subscription.
    async fn close(&self, bridge: &str, topic: Uuid) -> KeyringResult<()>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeResponse {
    uri: String,
}

/// Relay bridge reached over HTTP.
pub struct HttpBridgeTransport {
    http_client: Client,
}

impl HttpBridgeTransport {
    pub fn new() -> KeyringResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(RELAY_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| KeyringError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    async fn post(&self, url: String, body: serde_json::Value) -> KeyringResult<reqwest::Response> {
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyringError::TransportFailure(format!("Failed to reach bridge: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KeyringError::TransportFailure(format!(
                "Bridge returned {status}: {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SessionTransport for HttpBridgeTransport {
    async fn connect(&self, bridge: &str, topic: Uuid) -> KeyringResult<String> {
        let response = self
            .post(format!("{bridge}/subscribe"), json!({ "topic": topic }))
            .await?;
        let body: SubscribeResponse = response.json().await.map_err(|e| {
            KeyringError::Deserialization(format!("Failed to parse bridge response: {e}"))
        })?;
        tracing::debug!(bridge, topic = %topic, "Subscribed to relay topic");
        Ok(body.uri)
    }

    async fn send(&self, message: &RelayMessage) -> KeyringResult<()> {
        self.post(
            format!("{}/publish", message.bridge),
            serde_json::to_value(message)?,
        )
        .await?;
        tracing::debug!(
            topic = %message.topic,
            request_id = %message.request_id,
            "Published sign request to relay"
        );
        Ok(())
    }

    async fn close(&self, bridge: &str, topic: Uuid) -> KeyringResult<()> {
        self.post(format!("{bridge}/unsubscribe"), json!({ "topic": topic }))
            .await?;
        tracing::debug!(bridge, topic = %topic, "Released relay topic");
        Ok(())
    }
}
