//! Signing capability seam for locally controlled backends.
//!
//! Software and hardware keyrings never see raw key material or device
//! protocols; they hand an opaque vault or device descriptor to an injected
//! capability that produces the signature.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Account;
use crate::approval::{ApprovalId, ApprovalKind};
use crate::error::{KeyringError, KeyringResult};

/// What the capability needs to locate the signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// Encrypted software vault, opaque to this crate.
    Vault(String),
    /// Hardware device identified by brand and derivation path.
    Device {
        brand_name: String,
        hd_path: Option<String>,
    },
}

/// A single signing job handed to a capability.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub request_id: ApprovalId,
    pub account: Account,
    pub kind: ApprovalKind,
    pub payload: Value,
    pub chain_id: Option<u64>,
    pub material: KeyMaterial,
}

/// Produces signatures for software or hardware accounts.
#[async_trait]
pub trait SignerCapability: Send + Sync {
    /// Sign `request.payload` with the key behind `request.material`.
    async fn sign(&self, request: CapabilityRequest) -> KeyringResult<Value>;

    /// Make a hardware device ready for signing. Software capabilities need nothing.
    async fn unlock(&self, _brand_name: &str) -> KeyringResult<()> {
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignCall<'a> {
    request_id: ApprovalId,
    address: &'a str,
    kind: ApprovalKind,
    payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vault: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<DeviceRef<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRef<'a> {
    brand_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hd_path: Option<&'a str>,
}

#[derive(Deserialize)]
struct SignReply {
    signature: Value,
}

/// Capability served by an external signer over HTTP.
///
/// The signer owns vault decryption and device protocols, and prompts the
/// user before answering.
pub struct HttpSignerCapability {
    http_client: Client,
    base_url: String,
}

impl HttpSignerCapability {
    pub fn new(base_url: &str, timeout: Duration) -> KeyringResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyringError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<T: Serialize + Sync>(&self, path: &str, body: &T) -> KeyringResult<reqwest::Response> {
        let response = self
            .http_client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| KeyringError::TransportFailure(format!("Failed to reach signer: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let reason = response.text().await.unwrap_or_default();
            return Err(KeyringError::rejected(reason));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(KeyringError::TransportFailure(format!(
                "Signer returned {status}: {error_text}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SignerCapability for HttpSignerCapability {
    async fn sign(&self, request: CapabilityRequest) -> KeyringResult<Value> {
        let (vault, device) = match &request.material {
            KeyMaterial::Vault(vault) => (Some(vault.as_str()), None),
            KeyMaterial::Device {
                brand_name,
                hd_path,
            } => (
                None,
                Some(DeviceRef {
                    brand_name,
                    hd_path: hd_path.as_deref(),
                }),
            ),
        };
        let call = SignCall {
            request_id: request.request_id,
            address: &request.account.address,
            kind: request.kind,
            payload: &request.payload,
            chain_id: request.chain_id,
            vault,
            device,
        };

        let reply: SignReply = self.call("/sign", &call).await?.json().await.map_err(|e| {
            KeyringError::Deserialization(format!("Failed to parse signer response: {e}"))
        })?;
        Ok(reply.signature)
    }

    async fn unlock(&self, brand_name: &str) -> KeyringResult<()> {
        self.call("/unlock", &serde_json::json!({ "brandName": brand_name }))
            .await?;
        tracing::info!(brand = brand_name, "Hardware device unlocked");
        Ok(())
    }
}
