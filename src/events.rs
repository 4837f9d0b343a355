//! Observer notifications published by the orchestrator.
//!
//! Subscribers (dApp connections, UI) receive every event in emission order.
//! A lagging subscriber loses the oldest events rather than blocking the
//! publisher.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{KeyringResult, SignStatus};
use crate::session::SessionStatus;

const DEFAULT_CAPACITY: usize = 256;

/// Event published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum WalletEvent {
    /// Accounts exposed to `origin` changed; `None` means every origin.
    #[serde(rename_all = "camelCase")]
    AccountsChanged {
        origin: Option<String>,
        accounts: Vec<String>,
    },
    /// Wallet-internal chain change, always published before `ChainChanged`.
    #[serde(rename_all = "camelCase")]
    InternalChainChanged { origin: String, chain_id: String },
    /// Standard provider chain change.
    #[serde(rename_all = "camelCase")]
    ChainChanged { origin: String, chain_id: String },
    #[serde(rename_all = "camelCase")]
    SessionStatusChanged {
        address: String,
        brand_name: String,
        status: SessionStatus,
    },
    /// A QR display payload is ready for an air-gapped device.
    #[serde(rename_all = "camelCase")]
    QrPayloadReady { request_id: Uuid, payload: String },
    #[serde(rename_all = "camelCase")]
    MultisigTransactionBuilt {
        safe_address: String,
        safe_tx_hash: String,
    },
    #[serde(rename_all = "camelCase")]
    MultisigTransactionConfirmed {
        safe_address: String,
        signer: String,
        confirmations: usize,
    },
    /// A signing request reached a terminal state.
    #[serde(rename_all = "camelCase")]
    SignFinished {
        request_id: Uuid,
        success: bool,
        status: SignStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Broadcast channel of [`WalletEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WalletEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: WalletEvent) {
        tracing::trace!(?event, "Emitting wallet event");
        let _ = self.tx.send(event);
    }

    /// Publish a chain change for `origin`: internal notification first, then the standard one.
    pub fn emit_chain_changed(&self, origin: &str, chain_id: u64) {
        let chain_id = format!("0x{chain_id:x}");
        self.emit(WalletEvent::InternalChainChanged {
            origin: origin.to_string(),
            chain_id: chain_id.clone(),
        });
        self.emit(WalletEvent::ChainChanged {
            origin: origin.to_string(),
            chain_id,
        });
    }

    /// Publish the terminal outcome of a signing request.
    pub fn emit_sign_finished(&self, request_id: Uuid, outcome: &KeyringResult<serde_json::Value>) {
        let event = match outcome {
            Ok(data) => WalletEvent::SignFinished {
                request_id,
                success: true,
                status: SignStatus::Submitted,
                data: Some(data.clone()),
                reason: None,
            },
            Err(e) => WalletEvent::SignFinished {
                request_id,
                success: false,
                status: e.sign_status(),
                data: None,
                reason: Some(e.to_string()),
            },
        };
        self.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_changed_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit_chain_changed("https://app.example", 137);

        assert_eq!(
            rx.recv().await.unwrap(),
            WalletEvent::InternalChainChanged {
                origin: "https://app.example".to_string(),
                chain_id: "0x89".to_string(),
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            WalletEvent::ChainChanged {
                origin: "https://app.example".to_string(),
                chain_id: "0x89".to_string(),
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(WalletEvent::AccountsChanged {
            origin: None,
            accounts: vec![],
        });
    }

    #[test]
    fn test_sign_finished_serialization() {
        let event = WalletEvent::SignFinished {
            request_id: Uuid::nil(),
            success: false,
            status: SignStatus::Rejected,
            data: None,
            reason: Some("User rejected: closed".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "signFinished");
        assert_eq!(json["data"]["status"], "rejected");
        assert!(json["data"].get("data").is_none());
    }
}
