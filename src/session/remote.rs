//! Remote session backend: a mobile wallet reached over a paired relay.
//!
//! Each (brand, address) pair owns at most one session with a stable relay
//! identity (bridge + topic). A sign request submitted while the peer is not
//! connected is queued as the after-connect continuation and sent once the
//! peer connects on the matching chain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::approval::{ApprovalId, ApprovalKind, ApprovalOutcome};
use crate::error::{KeyringError, KeyringResult};
use crate::keyring::{Account, KeyringType};

/// Status of a remote session as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Waiting,
    Connected,
    Submitted,
    Received,
    Done,
    Rejected,
    AccountError,
    BrandNameError,
    ChainError,
    Disconnected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Connected => write!(f, "connected"),
            Self::Submitted => write!(f, "submitted"),
            Self::Received => write!(f, "received"),
            Self::Done => write!(f, "done"),
            Self::Rejected => write!(f, "rejected"),
            Self::AccountError => write!(f, "account_error"),
            Self::BrandNameError => write!(f, "brand_name_error"),
            Self::ChainError => write!(f, "chain_error"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// An account reachable through a remote wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccount {
    pub address: String,
    pub brand_name: String,
    pub bridge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_brand_name: Option<String>,
}

/// Message pushed to the remote peer over the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub bridge: String,
    pub topic: Uuid,
    pub request_id: ApprovalId,
    pub kind: ApprovalKind,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Notification received from the relay about a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Connected {
        account: String,
        chain_id: u64,
        #[serde(default)]
        brand_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Received { request_id: ApprovalId },
    #[serde(rename_all = "camelCase")]
    Signed {
        request_id: ApprovalId,
        signature: Value,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        #[serde(default)]
        request_id: Option<ApprovalId>,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChainChanged { chain_id: u64 },
    #[serde(rename_all = "camelCase")]
    AccountChanged { account: String },
    Disconnected,
}

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub address: String,
    pub brand_name: String,
    pub bridge: String,
    pub topic: Uuid,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingSign {
    message: RelayMessage,
    responder: oneshot::Sender<ApprovalOutcome>,
}

impl PendingSign {
    fn respond(self, outcome: ApprovalOutcome) {
        // The requester may have been cancelled; nothing to deliver then.
        let _ = self.responder.send(outcome);
    }
}

/// Result of feeding an event or command into a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub changed: bool,
    /// Message that must now be pushed to the peer.
    pub outbound: Option<RelayMessage>,
}

/// One relay session for a (brand, address) pair.
#[derive(Debug)]
pub struct RemoteSession {
    address: String,
    brand_name: String,
    bridge: String,
    topic: Uuid,
    status: SessionStatus,
    connected: bool,
    peer_chain: Option<u64>,
    pending: Option<PendingSign>,
    after_connect: Option<PendingSign>,
    updated_at: DateTime<Utc>,
}

impl RemoteSession {
    pub fn new(address: &str, brand_name: &str, bridge: &str) -> Self {
        Self {
            address: address.to_lowercase(),
            brand_name: brand_name.to_string(),
            bridge: bridge.to_string(),
            topic: Uuid::new_v4(),
            status: SessionStatus::Waiting,
            connected: false,
            peer_chain: None,
            pending: None,
            after_connect: None,
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn topic(&self) -> Uuid {
        self.topic
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            address: self.address.clone(),
            brand_name: self.brand_name.clone(),
            bridge: self.bridge.clone(),
            topic: self.topic,
            status: self.status,
            chain_id: self.peer_chain,
            updated_at: self.updated_at,
        }
    }

    fn transition(&mut self, next: SessionStatus) -> bool {
        self.updated_at = Utc::now();
        if self.status == next {
            return false;
        }
        tracing::info!(
            address = %self.address,
            brand = %self.brand_name,
            from = %self.status,
            to = %next,
            "Remote session transition"
        );
        self.status = next;
        true
    }

    fn update(&mut self, next: SessionStatus, outbound: Option<RelayMessage>) -> SessionUpdate {
        let changed = self.transition(next);
        SessionUpdate {
            status: self.status,
            changed,
            outbound,
        }
    }

    fn holds(&self, request_id: ApprovalId) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.message.request_id == request_id)
    }

    /// Start a sign request. Returns the message to push now, or `None` if it
    /// was queued until the peer connects.
    pub fn begin_sign(
        &mut self,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
        responder: oneshot::Sender<ApprovalOutcome>,
    ) -> KeyringResult<SessionUpdate> {
        if let Some(busy) = self.pending.as_ref().or(self.after_connect.as_ref()) {
            return Err(KeyringError::StateConflict(format!(
                "remote session busy with request {}",
                busy.message.request_id
            )));
        }

        let pending = PendingSign {
            message: RelayMessage {
                bridge: self.bridge.clone(),
                topic: self.topic,
                request_id,
                kind,
                payload,
                chain_id,
            },
            responder,
        };

        if !self.connected {
            self.after_connect = Some(pending);
            return Ok(self.update(SessionStatus::Waiting, None));
        }

        if let (Some(requested), Some(active)) = (chain_id, self.peer_chain)
            && requested != active
        {
            self.transition(SessionStatus::ChainError);
            return Err(chain_mismatch(active, requested));
        }

        let outbound = pending.message.clone();
        self.pending = Some(pending);
        Ok(self.update(SessionStatus::Submitted, Some(outbound)))
    }

    /// Apply a relay notification.
    pub fn apply(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::Connected {
                account,
                chain_id,
                brand_name,
            } => self.on_connected(&account, chain_id, brand_name.as_deref()),
            SessionEvent::Received { request_id } => {
                if self.holds(request_id) {
                    self.update(SessionStatus::Received, None)
                } else {
                    self.ignore("received", request_id)
                }
            }
            SessionEvent::Signed {
                request_id,
                signature,
            } => {
                if !self.holds(request_id) {
                    return self.ignore("signed", request_id);
                }
                if let Some(pending) = self.pending.take() {
                    pending.respond(Ok(signature));
                }
                self.update(SessionStatus::Done, None)
            }
            SessionEvent::Rejected { request_id, reason } => {
                let reason = reason.unwrap_or_else(|| "Rejected by remote signer".to_string());
                match request_id {
                    Some(id) if !self.holds(id) => self.ignore("rejected", id),
                    Some(_) => {
                        if let Some(pending) = self.pending.take() {
                            pending.respond(Err(KeyringError::rejected(reason)));
                        }
                        self.update(SessionStatus::Rejected, None)
                    }
                    None => {
                        // Session-level rejection: the peer refused the connection or request.
                        for pending in [self.pending.take(), self.after_connect.take()]
                            .into_iter()
                            .flatten()
                        {
                            pending.respond(Err(KeyringError::rejected(reason.clone())));
                        }
                        self.connected = false;
                        self.update(SessionStatus::Rejected, None)
                    }
                }
            }
            SessionEvent::ChainChanged { chain_id } => {
                self.peer_chain = Some(chain_id);
                if self.status == SessionStatus::ChainError {
                    self.update(SessionStatus::Connected, None)
                } else {
                    self.update(self.status, None)
                }
            }
            SessionEvent::AccountChanged { account } => {
                if account.to_lowercase() == self.address {
                    self.connected = true;
                    if self.status == SessionStatus::AccountError {
                        return self.update(SessionStatus::Connected, None);
                    }
                    self.update(self.status, None)
                } else {
                    self.connected = false;
                    self.update(SessionStatus::AccountError, None)
                }
            }
            SessionEvent::Disconnected => {
                self.connected = false;
                self.update(SessionStatus::Disconnected, None)
            }
        }
    }

    fn on_connected(&mut self, account: &str, chain_id: u64, brand_name: Option<&str>) -> SessionUpdate {
        if account.to_lowercase() != self.address {
            self.connected = false;
            return self.update(SessionStatus::AccountError, None);
        }
        if let Some(brand) = brand_name
            && brand != self.brand_name
        {
            self.connected = false;
            return self.update(SessionStatus::BrandNameError, None);
        }

        self.connected = true;
        self.peer_chain = Some(chain_id);

        let Some(continuation) = self.after_connect.take() else {
            return self.update(SessionStatus::Connected, None);
        };

        if let Some(requested) = continuation.message.chain_id
            && requested != chain_id
        {
            continuation.respond(Err(chain_mismatch(chain_id, requested)));
            return self.update(SessionStatus::ChainError, None);
        }

        let outbound = continuation.message.clone();
        self.pending = Some(continuation);
        self.update(SessionStatus::Submitted, Some(outbound))
    }

    fn ignore(&self, what: &str, request_id: ApprovalId) -> SessionUpdate {
        tracing::warn!(
            address = %self.address,
            request_id = %request_id,
            event = what,
            "Ignoring event for a request this session does not hold"
        );
        SessionUpdate {
            status: self.status,
            changed: false,
            outbound: None,
        }
    }

    /// Re-send the current request over the same relay identity.
    pub fn resend(&mut self) -> KeyringResult<SessionUpdate> {
        if self.pending.is_none() && self.after_connect.is_none() {
            return Err(KeyringError::StateConflict(
                "remote session has no request to resend".to_string(),
            ));
        }
        let outbound = self.pending.as_ref().map(|p| p.message.clone());
        Ok(self.update(SessionStatus::Waiting, outbound))
    }

    /// Release the session. Pending callbacks are dropped; `reset_connect`
    /// also clears the after-connect continuation.
    pub fn close(&mut self, reset_connect: bool) -> SessionUpdate {
        self.pending = None;
        if reset_connect {
            self.after_connect = None;
        }
        self.connected = false;
        self.update(SessionStatus::Disconnected, None)
    }

    /// Forget a request whose caller went away. Returns `true` if it was held.
    pub fn cancel(&mut self, request_id: ApprovalId) -> bool {
        if self.holds(request_id) {
            self.pending = None;
            return true;
        }
        if self
            .after_connect
            .as_ref()
            .is_some_and(|p| p.message.request_id == request_id)
        {
            self.after_connect = None;
            return true;
        }
        false
    }

    /// Give up on a request after the inactivity timeout.
    pub fn expire(&mut self, request_id: ApprovalId) -> Option<SessionUpdate> {
        self.cancel(request_id)
            .then(|| self.update(SessionStatus::Rejected, None))
    }
}

fn chain_mismatch(active: u64, requested: u64) -> KeyringError {
    KeyringError::StateConflict(format!(
        "remote session is on chain {active} but the request targets chain {requested}"
    ))
}

fn session_key(brand_name: &str, address: &str) -> String {
    format!("{brand_name}-{}", address.to_lowercase())
}

/// Pairing started before the account is known.
#[derive(Debug, Clone)]
struct Pairing {
    brand_name: String,
    bridge: String,
}

/// Keyring for remote-wallet accounts and their live sessions.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RemoteSessionKeyring {
    accounts: Vec<RemoteAccount>,
    #[serde(skip)]
    sessions: HashMap<String, RemoteSession>,
    #[serde(skip)]
    pairings: HashMap<Uuid, Pairing>,
}

/// Everything the orchestrator needs to drive a remote sign request.
#[derive(Debug)]
pub struct RemoteSignStart {
    pub receiver: oneshot::Receiver<ApprovalOutcome>,
    pub update: SessionUpdate,
    /// Relay subscription to open first, for sessions created by this request.
    pub connect: Option<(String, Uuid)>,
}

impl RemoteSessionKeyring {
    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(a.address.clone(), KeyringType::RemoteSession, a.brand_name.clone()))
            .collect()
    }

    pub fn account(&self, address: &str, brand_name: &str) -> Option<&RemoteAccount> {
        self.accounts
            .iter()
            .find(|a| a.address == address && a.brand_name == brand_name)
    }

    /// Add or replace an account.
    pub fn add_account(&mut self, account: RemoteAccount) {
        self.accounts
            .retain(|a| !(a.address == account.address && a.brand_name == account.brand_name));
        self.accounts.push(account);
    }

    /// Remove an account and its session. Returns `true` if an account was removed.
    pub fn remove_account(&mut self, address: &str, brand_name: Option<&str>) -> bool {
        let before = self.accounts.len();
        self.accounts
            .retain(|a| !(a.address == address && brand_name.is_none_or(|b| a.brand_name == b)));
        self.sessions.retain(|_, s| {
            !(s.address == address && brand_name.is_none_or(|b| s.brand_name == b))
        });
        self.accounts.len() != before
    }

    /// Start pairing a new peer. Returns the relay topic to subscribe to.
    pub fn begin_pairing(&mut self, brand_name: &str, bridge: &str) -> Uuid {
        let topic = Uuid::new_v4();
        self.pairings.insert(
            topic,
            Pairing {
                brand_name: brand_name.to_string(),
                bridge: bridge.to_string(),
            },
        );
        topic
    }

    /// Finish a pairing once the peer revealed its account.
    pub fn complete_pairing(
        &mut self,
        topic: Uuid,
        address: &str,
        chain_id: u64,
    ) -> KeyringResult<RemoteAccount> {
        let pairing = self
            .pairings
            .remove(&topic)
            .ok_or_else(|| KeyringError::NotFound(format!("pairing {topic}")))?;

        let account = RemoteAccount {
            address: address.to_string(),
            brand_name: pairing.brand_name.clone(),
            bridge: pairing.bridge.clone(),
            real_brand_name: None,
        };
        self.add_account(account.clone());

        let mut session = RemoteSession::new(address, &pairing.brand_name, &pairing.bridge);
        session.topic = topic;
        session.apply(SessionEvent::Connected {
            account: address.to_string(),
            chain_id,
            brand_name: None,
        });
        self.sessions
            .insert(session_key(&pairing.brand_name, address), session);
        Ok(account)
    }

    pub fn session(&self, address: &str, brand_name: &str) -> Option<&RemoteSession> {
        self.sessions.get(&session_key(brand_name, address))
    }

    fn session_mut(&mut self, address: &str, brand_name: &str) -> KeyringResult<&mut RemoteSession> {
        self.sessions
            .get_mut(&session_key(brand_name, address))
            .ok_or_else(|| KeyringError::NotFound(format!("remote session for {brand_name}-{address}")))
    }

    /// Start a sign request on the account's session, creating it if needed.
    pub fn begin_sign(
        &mut self,
        address: &str,
        brand_name: &str,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<RemoteSignStart> {
        let bridge = self
            .account(address, brand_name)
            .map(|a| a.bridge.clone())
            .ok_or_else(|| KeyringError::NotFound(format!("remote account {brand_name}-{address}")))?;

        let key = session_key(brand_name, address);
        let connect = if self.sessions.contains_key(&key) {
            None
        } else {
            let session = RemoteSession::new(address, brand_name, &bridge);
            let connect = (bridge, session.topic);
            self.sessions.insert(key.clone(), session);
            Some(connect)
        };

        let session = self.session_mut(address, brand_name)?;
        let (responder, receiver) = oneshot::channel();
        let update = session.begin_sign(request_id, kind, payload, chain_id, responder)?;

        Ok(RemoteSignStart {
            receiver,
            update,
            connect,
        })
    }

    pub fn apply(&mut self, address: &str, brand_name: &str, event: SessionEvent) -> KeyringResult<SessionUpdate> {
        Ok(self.session_mut(address, brand_name)?.apply(event))
    }

    pub fn resend(&mut self, address: &str, brand_name: &str) -> KeyringResult<SessionUpdate> {
        self.session_mut(address, brand_name)?.resend()
    }

    /// Close a session. Returns the released relay topic and bridge.
    pub fn close(
        &mut self,
        address: &str,
        brand_name: &str,
        reset_connect: bool,
    ) -> KeyringResult<(SessionUpdate, String, Uuid)> {
        let session = self.session_mut(address, brand_name)?;
        let update = session.close(reset_connect);
        Ok((update, session.bridge.clone(), session.topic))
    }

    /// Locate the session holding `request_id` and cancel it there.
    pub fn cancel(&mut self, request_id: ApprovalId) -> bool {
        self.sessions.values_mut().any(|s| s.cancel(request_id))
    }

    /// Expire `request_id` wherever it is held. Returns the owning account and update.
    pub fn expire(&mut self, request_id: ApprovalId) -> Option<(String, String, SessionUpdate)> {
        self.sessions.values_mut().find_map(|s| {
            s.expire(request_id)
                .map(|u| (s.address.clone(), s.brand_name.clone(), u))
        })
    }

    /// Every live relay subscription, for release when the instance is destroyed.
    pub fn release_all(&mut self) -> Vec<(String, Uuid)> {
        self.sessions
            .drain()
            .map(|(_, s)| (s.bridge, s.topic))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDR: &str = "0x1111111111111111111111111111111111111111";

    fn connected_session(chain_id: u64) -> RemoteSession {
        let mut session = RemoteSession::new(ADDR, "MetaMask", "https://bridge.example");
        session.apply(SessionEvent::Connected {
            account: ADDR.to_string(),
            chain_id,
            brand_name: None,
        });
        session
    }

    fn sign(session: &mut RemoteSession, chain_id: Option<u64>) -> (ApprovalId, KeyringResult<SessionUpdate>, oneshot::Receiver<ApprovalOutcome>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let update = session.begin_sign(id, ApprovalKind::SignTx, json!({"to": ADDR}), chain_id, tx);
        (id, update, rx)
    }

    #[tokio::test]
    async fn test_sign_roundtrip() {
        let mut session = connected_session(1);
        let (id, update, rx) = sign(&mut session, Some(1));
        let update = update.unwrap();
        assert_eq!(update.status, SessionStatus::Submitted);
        assert_eq!(update.outbound.unwrap().request_id, id);

        session.apply(SessionEvent::Received { request_id: id });
        assert_eq!(session.status(), SessionStatus::Received);

        session.apply(SessionEvent::Signed {
            request_id: id,
            signature: json!("0xsig"),
        });
        assert_eq!(session.status(), SessionStatus::Done);
        assert_eq!(rx.await.unwrap().unwrap(), json!("0xsig"));
    }

    #[tokio::test]
    async fn test_after_connect_continuation_fires_on_connect() {
        let mut session = RemoteSession::new(ADDR, "MetaMask", "https://bridge.example");
        let (id, update, _rx) = sign(&mut session, Some(1));
        let update = update.unwrap();
        assert_eq!(update.status, SessionStatus::Waiting);
        assert!(update.outbound.is_none());

        let update = session.apply(SessionEvent::Connected {
            account: ADDR.to_string(),
            chain_id: 1,
            brand_name: Some("MetaMask".to_string()),
        });
        assert_eq!(update.status, SessionStatus::Submitted);
        assert_eq!(update.outbound.map(|m| m.request_id), Some(id));
    }

    #[test]
    fn test_chain_mismatch_raises_chain_error() {
        let mut session = connected_session(1);
        let (_, update, _rx) = sign(&mut session, Some(137));
        assert!(matches!(update, Err(KeyringError::StateConflict(_))));
        assert_eq!(session.status(), SessionStatus::ChainError);

        session.apply(SessionEvent::ChainChanged { chain_id: 137 });
        assert_eq!(session.status(), SessionStatus::Connected);
        let (_, update, _rx) = sign(&mut session, Some(137));
        assert!(update.is_ok());
    }

    #[test]
    fn test_wrong_account_and_brand() {
        let mut session = RemoteSession::new(ADDR, "MetaMask", "https://bridge.example");
        session.apply(SessionEvent::Connected {
            account: "0x2222222222222222222222222222222222222222".to_string(),
            chain_id: 1,
            brand_name: None,
        });
        assert_eq!(session.status(), SessionStatus::AccountError);
        assert!(!session.is_connected());

        session.apply(SessionEvent::Connected {
            account: ADDR.to_string(),
            chain_id: 1,
            brand_name: Some("Rainbow".to_string()),
        });
        assert_eq!(session.status(), SessionStatus::BrandNameError);
    }

    #[test]
    fn test_disconnect_then_resend_keeps_topic() {
        let mut session = connected_session(1);
        let topic = session.topic();
        let (id, update, _rx) = sign(&mut session, None);
        update.unwrap();

        session.apply(SessionEvent::Disconnected);
        assert_eq!(session.status(), SessionStatus::Disconnected);

        let update = session.resend().unwrap();
        assert_eq!(update.status, SessionStatus::Waiting);
        let message = update.outbound.unwrap();
        assert_eq!(message.topic, topic);
        assert_eq!(message.request_id, id);
        assert_eq!(session.topic(), topic);
    }

    #[tokio::test]
    async fn test_close_with_reset_clears_continuation() {
        let mut session = RemoteSession::new(ADDR, "MetaMask", "https://bridge.example");
        let (_, update, rx) = sign(&mut session, None);
        update.unwrap();

        session.close(true);
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(rx.await.is_err());

        let update = session.apply(SessionEvent::Connected {
            account: ADDR.to_string(),
            chain_id: 1,
            brand_name: None,
        });
        assert!(update.outbound.is_none());
        assert_eq!(update.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_stale_signature_ignored() {
        let mut session = connected_session(1);
        let (_, update, _rx) = sign(&mut session, None);
        update.unwrap();

        let update = session.apply(SessionEvent::Signed {
            request_id: Uuid::new_v4(),
            signature: json!("0xstale"),
        });
        assert!(!update.changed);
        assert_eq!(session.status(), SessionStatus::Submitted);
    }

    #[tokio::test]
    async fn test_peer_rejection() {
        let mut session = connected_session(1);
        let (id, update, rx) = sign(&mut session, None);
        update.unwrap();
        session.apply(SessionEvent::Rejected {
            request_id: Some(id),
            reason: None,
        });
        assert_eq!(session.status(), SessionStatus::Rejected);
        assert!(matches!(rx.await.unwrap(), Err(KeyringError::UserRejected(_))));
    }

    #[test]
    fn test_keyring_pairing() {
        let mut keyring = RemoteSessionKeyring::default();
        let topic = keyring.begin_pairing("MetaMask", "https://bridge.example");
        let account = keyring.complete_pairing(topic, ADDR, 1).unwrap();
        assert_eq!(account.brand_name, "MetaMask");

        let session = keyring.session(ADDR, "MetaMask").unwrap();
        assert_eq!(session.topic(), topic);
        assert_eq!(session.status(), SessionStatus::Connected);
        assert!(keyring.complete_pairing(topic, ADDR, 1).is_err());
    }

    #[test]
    fn test_session_event_deserialization() {
        let event: SessionEvent =
            serde_json::from_value(json!({"type": "connected", "account": ADDR, "chainId": 10}))
                .unwrap();
        assert_eq!(
            event,
            SessionEvent::Connected {
                account: ADDR.to_string(),
                chain_id: 10,
                brand_name: None
            }
        );
        let event: SessionEvent = serde_json::from_value(json!({"type": "disconnected"})).unwrap();
        assert_eq!(event, SessionEvent::Disconnected);
    }
}
