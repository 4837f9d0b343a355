//! QR relay backend: an air-gapped device reached through animated QR frames.
//!
//! A sign request produces a display payload the user scans with the device;
//! the device answers with a frame the user scans back. Only one relay is in
//! flight per instance and every scanned frame must carry its request id.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::approval::{ApprovalId, ApprovalKind, ApprovalOutcome};
use crate::error::{KeyringError, KeyringResult};
use crate::keyring::{Account, KeyringType, normalize_address};

const DEFAULT_BRAND: &str = "Keystone";

/// Progress of the in-flight relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QrStatus {
    /// Display payload shown, waiting for the user to start scanning.
    Sync,
    /// Camera open, waiting for the device's answer.
    Sign,
    Received,
    Done,
}

impl std::fmt::Display for QrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Sign => write!(f, "sign"),
            Self::Received => write!(f, "received"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Payload rendered as QR for the device.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisplayFrame {
    request_id: ApprovalId,
    address: String,
    kind: ApprovalKind,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chain_id: Option<u64>,
}

/// Answer scanned back from the device.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureFrame {
    pub request_id: ApprovalId,
    pub signature: Value,
}

/// Account export scanned from the device when pairing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncFrame {
    fingerprint: String,
    #[serde(default)]
    brand_name: Option<String>,
    accounts: Vec<String>,
}

#[derive(Debug)]
struct QrRelay {
    request_id: ApprovalId,
    status: QrStatus,
    last_error: Option<String>,
    responder: Option<oneshot::Sender<ApprovalOutcome>>,
}

/// Keyring for one paired air-gapped device.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrKeyring {
    device_fingerprint: String,
    brand_name: String,
    accounts: Vec<String>,
    #[serde(skip)]
    relay: Option<QrRelay>,
}

impl QrKeyring {
    pub fn new(device_fingerprint: impl Into<String>, brand_name: impl Into<String>) -> Self {
        Self {
            device_fingerprint: device_fingerprint.into(),
            brand_name: brand_name.into(),
            accounts: Vec::new(),
            relay: None,
        }
    }

    /// Build a keyring from a scanned sync frame (base64 JSON).
    pub fn from_sync(frame: &str) -> KeyringResult<Self> {
        let sync: SyncFrame = decode_frame(frame)?;
        if sync.fingerprint.trim().is_empty() {
            return Err(KeyringError::InvalidInput(
                "sync frame carries no device fingerprint".to_string(),
            ));
        }
        let mut keyring = Self::new(
            sync.fingerprint,
            sync.brand_name.unwrap_or_else(|| DEFAULT_BRAND.to_string()),
        );
        for address in sync.accounts {
            keyring.add_account(&address)?;
        }
        Ok(keyring)
    }

    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }

    pub fn brand_name(&self) -> &str {
        &self.brand_name
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(a.clone(), KeyringType::QrRelay, self.brand_name.clone()))
            .collect()
    }

    pub fn add_account(&mut self, address: &str) -> KeyringResult<()> {
        let address = normalize_address(address)?;
        if !self.accounts.contains(&address) {
            self.accounts.push(address);
        }
        Ok(())
    }

    pub fn remove_account(&mut self, address: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a != address);
        self.accounts.len() != before
    }

    /// Current relay request and its status.
    pub fn status(&self) -> Option<(ApprovalId, QrStatus)> {
        self.relay.as_ref().map(|r| (r.request_id, r.status))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.relay.as_ref().and_then(|r| r.last_error.as_deref())
    }

    /// Start a relay. Returns the display payload and the receiver of the result.
    pub fn request_signature(
        &mut self,
        request_id: ApprovalId,
        address: &str,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<(String, oneshot::Receiver<ApprovalOutcome>)> {
        if let Some(relay) = &self.relay {
            return Err(KeyringError::StateConflict(format!(
                "QR relay busy with request {}",
                relay.request_id
            )));
        }

        let display = encode_frame(&DisplayFrame {
            request_id,
            address: address.to_string(),
            kind,
            payload,
            chain_id,
        })?;

        let (responder, receiver) = oneshot::channel();
        self.relay = Some(QrRelay {
            request_id,
            status: QrStatus::Sync,
            last_error: None,
            responder: Some(responder),
        });
        tracing::info!(request_id = %request_id, device = %self.device_fingerprint, "QR relay started");
        Ok((display, receiver))
    }

    fn relay_for(&mut self, request_id: ApprovalId) -> KeyringResult<&mut QrRelay> {
        let relay = self
            .relay
            .as_mut()
            .ok_or_else(|| KeyringError::NotFound("no QR relay in flight".to_string()))?;
        if relay.request_id != request_id {
            return Err(KeyringError::StateConflict(format!(
                "QR relay is serving request {}, not {request_id}",
                relay.request_id
            )));
        }
        Ok(relay)
    }

    /// User opened the camera to scan the device's answer.
    pub fn begin_scan(&mut self, request_id: ApprovalId) -> KeyringResult<QrStatus> {
        let relay = self.relay_for(request_id)?;
        match relay.status {
            QrStatus::Sync | QrStatus::Sign => {
                relay.status = QrStatus::Sign;
                Ok(relay.status)
            }
            other => Err(KeyringError::StateConflict(format!(
                "cannot scan while QR relay is {other}"
            ))),
        }
    }

    /// Feed a scanned answer frame.
    ///
    /// A frame that fails to decode leaves the relay in `Sign` so the user can
    /// retry; a frame for a different request is rejected without touching state.
    pub fn submit_signature(&mut self, request_id: ApprovalId, scanned: &str) -> KeyringResult<QrStatus> {
        let relay = self.relay_for(request_id)?;
        if relay.status != QrStatus::Sign {
            return Err(KeyringError::StateConflict(format!(
                "QR relay is {}, expected sign",
                relay.status
            )));
        }

        let frame: SignatureFrame = match decode_frame(scanned) {
            Ok(frame) => frame,
            Err(e) => {
                relay.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        if frame.request_id != request_id {
            return Err(KeyringError::StateConflict(format!(
                "scanned signature belongs to request {}",
                frame.request_id
            )));
        }

        relay.status = QrStatus::Received;
        relay.last_error = None;
        if let Some(responder) = relay.responder.take() {
            let _ = responder.send(Ok(frame.signature));
        }
        relay.status = QrStatus::Done;
        tracing::info!(request_id = %request_id, "QR signature received");
        Ok(QrStatus::Done)
    }

    /// Record a camera or decode error reported by the UI; the relay goes back to `Sign`.
    pub fn report_scan_error(&mut self, request_id: ApprovalId, message: &str) -> KeyringResult<QrStatus> {
        let relay = self.relay_for(request_id)?;
        if matches!(relay.status, QrStatus::Received | QrStatus::Done) {
            return Err(KeyringError::StateConflict(format!(
                "QR relay already {}",
                relay.status
            )));
        }
        relay.status = QrStatus::Sign;
        relay.last_error = Some(message.to_string());
        tracing::warn!(request_id = %request_id, error = message, "QR scan error");
        Ok(relay.status)
    }

    /// Drop the relay for `request_id`. Returns `true` if it was in flight.
    pub fn cancel(&mut self, request_id: ApprovalId) -> bool {
        if self.relay.as_ref().is_some_and(|r| r.request_id == request_id) {
            self.relay = None;
            return true;
        }
        false
    }
}

fn encode_frame<T: Serialize>(frame: &T) -> KeyringResult<String> {
    Ok(BASE64.encode(serde_json::to_vec(frame)?))
}

fn decode_frame<T: for<'de> Deserialize<'de>>(frame: &str) -> KeyringResult<T> {
    let bytes = BASE64
        .decode(frame.trim())
        .map_err(|e| KeyringError::InvalidInput(format!("QR frame is not base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| KeyringError::InvalidInput(format!("QR frame is malformed: {e}")))
}

/// Encode an answer frame the way a device would.
pub fn encode_signature_frame(request_id: ApprovalId, signature: Value) -> KeyringResult<String> {
    encode_frame(&SignatureFrame {
        request_id,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const ADDR: &str = "0x1111111111111111111111111111111111111111";

    fn keyring() -> QrKeyring {
        let mut keyring = QrKeyring::new("f00dbabe", DEFAULT_BRAND);
        keyring.add_account(ADDR).unwrap();
        keyring
    }

    fn start(keyring: &mut QrKeyring) -> (ApprovalId, String, oneshot::Receiver<ApprovalOutcome>) {
        let id = Uuid::new_v4();
        let (display, rx) = keyring
            .request_signature(id, ADDR, ApprovalKind::SignText, json!("0x68"), Some(1))
            .unwrap();
        (id, display, rx)
    }

    #[tokio::test]
    async fn test_full_relay() {
        let mut keyring = keyring();
        let (id, display, rx) = start(&mut keyring);

        let shown: DisplayFrame = decode_frame(&display).unwrap();
        assert_eq!(shown.request_id, id);
        assert_eq!(shown.address, ADDR);

        assert_eq!(keyring.begin_scan(id).unwrap(), QrStatus::Sign);
        let frame = encode_signature_frame(id, json!("0xsig")).unwrap();
        assert_eq!(keyring.submit_signature(id, &frame).unwrap(), QrStatus::Done);
        assert_eq!(rx.await.unwrap().unwrap(), json!("0xsig"));
    }

    #[test]
    fn test_custom_kind_reaches_display_frame() {
        let mut keyring = keyring();
        let id = Uuid::new_v4();
        let (display, _rx) = keyring
            .request_signature(id, ADDR, ApprovalKind::Custom, json!({"op": "unlock"}), None)
            .unwrap();

        let shown: DisplayFrame = decode_frame(&display).unwrap();
        assert_eq!(shown.kind, ApprovalKind::Custom);
        assert_eq!(shown.payload, json!({"op": "unlock"}));
        assert!(shown.chain_id.is_none());
    }

    #[test]
    fn test_mismatched_request_leaves_state() {
        let mut keyring = keyring();
        let (id, _, _rx) = start(&mut keyring);
        keyring.begin_scan(id).unwrap();

        let other = Uuid::new_v4();
        let frame = encode_signature_frame(other, json!("0xsig")).unwrap();
        assert!(matches!(
            keyring.submit_signature(other, &frame),
            Err(KeyringError::StateConflict(_))
        ));
        // Right relay id, wrong embedded id.
        assert!(matches!(
            keyring.submit_signature(id, &frame),
            Err(KeyringError::StateConflict(_))
        ));
        assert_eq!(keyring.status(), Some((id, QrStatus::Sign)));
    }

    #[test]
    fn test_decode_failure_stays_in_sign() {
        let mut keyring = keyring();
        let (id, _, _rx) = start(&mut keyring);
        keyring.begin_scan(id).unwrap();

        assert!(matches!(
            keyring.submit_signature(id, "not base64!"),
            Err(KeyringError::InvalidInput(_))
        ));
        assert_eq!(keyring.status(), Some((id, QrStatus::Sign)));
        assert!(keyring.last_error().is_some());
    }

    #[test]
    fn test_scan_required_before_submit() {
        let mut keyring = keyring();
        let (id, _, _rx) = start(&mut keyring);
        let frame = encode_signature_frame(id, json!("0xsig")).unwrap();
        assert!(matches!(
            keyring.submit_signature(id, &frame),
            Err(KeyringError::StateConflict(_))
        ));
    }

    #[test]
    fn test_report_scan_error_returns_to_sign() {
        let mut keyring = keyring();
        let (id, _, _rx) = start(&mut keyring);
        assert_eq!(
            keyring.report_scan_error(id, "camera denied").unwrap(),
            QrStatus::Sign
        );
        assert_eq!(keyring.last_error(), Some("camera denied"));
    }

    #[test]
    fn test_single_relay_in_flight() {
        let mut keyring = keyring();
        let (id, _, _rx) = start(&mut keyring);
        assert!(matches!(
            keyring.request_signature(Uuid::new_v4(), ADDR, ApprovalKind::SignTx, json!({}), None),
            Err(KeyringError::StateConflict(_))
        ));
        assert!(keyring.cancel(id));
        assert!(keyring.status().is_none());
    }

    #[test]
    fn test_from_sync() {
        let frame = BASE64.encode(
            serde_json::to_vec(&json!({
                "fingerprint": "abcd1234",
                "accounts": [ADDR.to_uppercase().replace("0X", "0x")]
            }))
            .unwrap(),
        );
        let keyring = QrKeyring::from_sync(&frame).unwrap();
        assert_eq!(keyring.brand_name(), DEFAULT_BRAND);
        assert_eq!(keyring.accounts()[0].address, ADDR);

        assert!(QrKeyring::from_sync("garbage").is_err());
    }
}
