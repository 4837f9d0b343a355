//! Access to the on-chain Safe contract and its transaction service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::multisig::MultisigTransaction;
use crate::error::{KeyringError, KeyringResult};

const SAFE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Owner set, threshold, proposal and execution for a Safe.
#[async_trait]
pub trait SafeContract: Send + Sync {
    async fn threshold(&self, safe_address: &str, network_id: u64) -> KeyringResult<usize>;

    async fn owners(&self, safe_address: &str, network_id: u64) -> KeyringResult<Vec<String>>;

    /// Publish a proposal with its first owner signature.
    async fn propose(
        &self,
        tx: &MultisigTransaction,
        sender: &str,
        signature: &str,
    ) -> KeyringResult<()>;

    /// Submit the execution transaction. Returns its hash.
    async fn execute(&self, tx: &MultisigTransaction) -> KeyringResult<String>;
}

#[derive(Deserialize)]
struct SafeInfo {
    threshold: usize,
    owners: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    tx_hash: String,
}

/// Safe transaction service reached over HTTP.
pub struct HttpSafeService {
    http_client: Client,
    base_url: String,
}

impl HttpSafeService {
    pub fn new(base_url: &str) -> KeyringResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(SAFE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| KeyringError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn safe_info(&self, safe_address: &str, network_id: u64) -> KeyringResult<SafeInfo> {
        let response = self
            .http_client
            .get(format!("{}/api/v1/safes/{safe_address}/", self.base_url))
            .query(&[("chainId", network_id)])
            .send()
            .await
            .map_err(|e| KeyringError::TransportFailure(format!("Failed to reach Safe service: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KeyringError::TransportFailure(format!(
                "Safe service returned {status}: {error_text}"
            )));
        }

        response.json().await.map_err(|e| {
            KeyringError::Deserialization(format!("Failed to parse Safe service response: {e}"))
        })
    }

    async fn post(&self, path: String, body: serde_json::Value) -> KeyringResult<reqwest::Response> {
        let response = self
            .http_client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyringError::TransportFailure(format!("Failed to reach Safe service: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KeyringError::TransportFailure(format!(
                "Safe service returned {status}: {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SafeContract for HttpSafeService {
    async fn threshold(&self, safe_address: &str, network_id: u64) -> KeyringResult<usize> {
        Ok(self.safe_info(safe_address, network_id).await?.threshold)
    }

    async fn owners(&self, safe_address: &str, network_id: u64) -> KeyringResult<Vec<String>> {
        let owners = self.safe_info(safe_address, network_id).await?.owners;
        Ok(owners.into_iter().map(|o| o.to_lowercase()).collect())
    }

    async fn propose(
        &self,
        tx: &MultisigTransaction,
        sender: &str,
        signature: &str,
    ) -> KeyringResult<()> {
        self.post(
            format!("/api/v1/safes/{}/multisig-transactions/", tx.safe_address),
            json!({
                "chainId": tx.network_id,
                "safeTxHash": tx.safe_tx_hash,
                "sender": sender,
                "signature": signature,
                "tx": tx.tx,
            }),
        )
        .await?;
        tracing::info!(
            safe_address = %tx.safe_address,
            safe_tx_hash = %tx.safe_tx_hash,
            "Proposed multisig transaction"
        );
        Ok(())
    }

    async fn execute(&self, tx: &MultisigTransaction) -> KeyringResult<String> {
        let response = self
            .post(
                format!("/api/v1/safes/{}/execute/", tx.safe_address),
                json!({
                    "chainId": tx.network_id,
                    "safeTxHash": tx.safe_tx_hash,
                    "signatures": tx.packed_signatures(),
                    "tx": tx.tx,
                }),
            )
            .await?;
        let body: ExecuteResponse = response.json().await.map_err(|e| {
            KeyringError::Deserialization(format!("Failed to parse Safe service response: {e}"))
        })?;
        Ok(body.tx_hash)
    }
}

/// Stand-in used when no Safe service is configured; every call fails.
pub struct UnconfiguredSafeService;

#[async_trait]
impl SafeContract for UnconfiguredSafeService {
    async fn threshold(&self, _safe_address: &str, _network_id: u64) -> KeyringResult<usize> {
        Err(unconfigured())
    }

    async fn owners(&self, _safe_address: &str, _network_id: u64) -> KeyringResult<Vec<String>> {
        Err(unconfigured())
    }

    async fn propose(
        &self,
        _tx: &MultisigTransaction,
        _sender: &str,
        _signature: &str,
    ) -> KeyringResult<()> {
        Err(unconfigured())
    }

    async fn execute(&self, _tx: &MultisigTransaction) -> KeyringResult<String> {
        Err(unconfigured())
    }
}

fn unconfigured() -> KeyringError {
    KeyringError::TransportFailure("SAFE_SERVICE_URL is not configured".to_string())
}
