//! Orchestrator: the composition root that turns sign intents into signatures.
//!
//! A sign intent is gated on the origin's permission, resolved to the
//! backend instance owning the account and queued as an approval request.
//! Software and hardware accounts sign only after the user resolves the
//! request. Remote, QR and multisig backends are driven while the request is
//! pending, and whichever settles first wins: the backend's result or the
//! user's decision. Durable side effects run after a successful signature;
//! if they fail the signature is retained so the save can be retried without
//! asking the user to sign again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot};

use crate::approval::{ApprovalId, ApprovalKind, ApprovalOutcome, ApprovalQueue, ApprovalRequest};
use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome, AuditRecord};
use crate::config::Settings;
use crate::error::{KeyringError, KeyringResult};
use crate::events::{EventBus, WalletEvent};
use crate::keyring::{
    Account, CapabilityRequest, HardwareKeyring, Keyring, KeyringId, KeyringRegistry, KeyringType,
    SignerCapability, SoftwareKeyring, SoftwareKind, WatchKeyring, normalize_address,
};
use crate::permission::{ConnectedSite, PermissionCache, SitePatch};
use crate::session::{
    MultisigKeyring, MultisigPhase, MultisigTransaction, QrKeyring, QrStatus, RemoteSessionKeyring,
    SafeContract, SessionEvent, SessionInfo, SessionStatus, SessionTransport,
};
use crate::storage::Storage;

/// Outbound collaborators the orchestrator drives.
pub struct Backends {
    /// Signs for software accounts. `None` leaves software accounts unable to sign.
    pub software: Option<Arc<dyn SignerCapability>>,
    /// Signs for hardware accounts and unlocks devices.
    pub hardware: Option<Arc<dyn SignerCapability>>,
    pub transport: Arc<dyn SessionTransport>,
    pub safe: Arc<dyn SafeContract>,
}

/// Safe transaction an owner signature is collected for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigTarget {
    pub safe_address: String,
}

/// A request to sign something with one of the wallet's accounts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignIntent {
    pub origin: String,
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    pub from: String,
    pub kind: ApprovalKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Disambiguates accounts held by several brands of the same backend type.
    #[serde(default)]
    pub brand_name: Option<String>,
    /// Sign the in-progress transaction of this Safe as one of its owners.
    #[serde(default)]
    pub multisig: Option<MultisigTarget>,
}

/// A freshly stashed instance awaiting confirmation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StashedKeyring {
    pub stash_id: KeyringId,
    pub accounts: Vec<Account>,
}

/// Pairing handle returned when a remote session is initiated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePairing {
    pub stash_id: KeyringId,
    pub topic: uuid::Uuid,
    pub uri: String,
}

/// Owner signature bound to a specific proposal.
#[derive(Debug, Clone)]
struct OwnerSignature {
    keyring_id: KeyringId,
    safe_address: String,
    network_id: u64,
    safe_tx_hash: String,
}

/// Side effect still owed for a signature that was already produced.
#[derive(Debug, Clone)]
enum PendingSave {
    OwnerSignature {
        target: OwnerSignature,
        signer: String,
        signature: String,
    },
    Proposal {
        keyring_id: KeyringId,
        safe_address: String,
        /// Replaced proposal for another Safe, stored as `Discarded` so it is not restored.
        discarded: Option<MultisigTransaction>,
    },
}

#[derive(Debug, Clone)]
struct UnsavedResult {
    save: PendingSave,
    value: Value,
}

/// Rejects a request, and releases its backend, if the submitter is dropped before it settles.
struct AbandonGuard<'a> {
    orchestrator: &'a Orchestrator,
    request_id: ApprovalId,
    keyring_id: KeyringId,
    keyring_type: KeyringType,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.orchestrator
                .abandon(self.request_id, self.keyring_id, self.keyring_type);
        }
    }
}

/// Composition root over the registry, permission cache, approval queue and sessions.
pub struct Orchestrator {
    storage: Storage,
    registry: Mutex<KeyringRegistry>,
    permissions: Mutex<PermissionCache>,
    approvals: ApprovalQueue,
    events: EventBus,
    backends: Backends,
    current_account: Mutex<Option<Account>>,
    unsaved: Mutex<HashMap<ApprovalId, UnsavedResult>>,
    audit_logger: AuditLogger,
    remote_timeout: Option<Duration>,
    qr_timeout: Option<Duration>,
    default_bridge: String,
}

impl Orchestrator {
    /// Build the orchestrator and restore persisted keyrings.
    ///
    /// Call [`Orchestrator::init`] before serving requests.
    pub fn new(storage: Storage, settings: &Settings, backends: Backends) -> KeyringResult<Self> {
        let registry = KeyringRegistry::load(storage.clone())?;
        let audit_logger = AuditLogger::new(storage.clone())?;

        Ok(Self {
            permissions: Mutex::new(PermissionCache::new(
                settings.permission_capacity(),
                settings.internal_origin(),
            )),
            storage,
            registry: Mutex::new(registry),
            approvals: ApprovalQueue::new(),
            events: EventBus::default(),
            backends,
            current_account: Mutex::new(None),
            unsaved: Mutex::new(HashMap::new()),
            audit_logger,
            remote_timeout: settings.remote_timeout(),
            qr_timeout: settings.qr_timeout(),
            default_bridge: settings.default_bridge().to_string(),
        })
    }

    /// Load the permission cache from storage. Until this runs every origin is refused.
    pub fn init(&self) -> KeyringResult<()> {
        self.permissions()?.init(self.storage.clone())?;
        self.audit_log(
            AuditEventType::ServiceStart,
            AuditActor::System,
            None,
            AuditOutcome::Success,
            None,
        );
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit_logger
    }

    fn registry(&self) -> KeyringResult<MutexGuard<'_, KeyringRegistry>> {
        self.registry
            .lock()
            .map_err(|_| KeyringError::Internal("Keyring registry lock poisoned".to_string()))
    }

    fn permissions(&self) -> KeyringResult<MutexGuard<'_, PermissionCache>> {
        self.permissions
            .lock()
            .map_err(|_| KeyringError::Internal("Permission cache lock poisoned".to_string()))
    }

    fn unsaved(&self) -> KeyringResult<MutexGuard<'_, HashMap<ApprovalId, UnsavedResult>>> {
        self.unsaved
            .lock()
            .map_err(|_| KeyringError::Internal("Unsaved results lock poisoned".to_string()))
    }

    fn audit_log(
        &self,
        event_type: AuditEventType,
        actor: AuditActor,
        request_id: Option<ApprovalId>,
        outcome: AuditOutcome,
        context: Option<Value>,
    ) {
        let record = AuditRecord {
            event_type,
            actor,
            request_id,
            outcome,
            context,
        };
        if let Err(e) = self.audit_logger.append(record) {
            tracing::error!(error = %e, "Failed to write audit log entry");
        }
    }

    // =========================================================================
    // Sign intents
    // =========================================================================

    /// Run a sign intent to completion and return the backend's result.
    #[tracing::instrument(skip(self, intent), fields(origin = %intent.origin, keyring_type = %intent.keyring_type))]
    pub async fn submit_sign_intent(&self, intent: SignIntent) -> KeyringResult<Value> {
        self.check_permission(&intent.origin)?;
        let address = normalize_address(&intent.from)?;
        if intent.keyring_type == KeyringType::Watch {
            return Err(KeyringError::InvalidInput(format!(
                "{address} is a watch-only address and cannot sign"
            )));
        }

        let (keyring_id, account) = {
            let registry = self.registry()?;
            let id = registry
                .find_persisted(|k| {
                    k.keyring_type() == intent.keyring_type
                        && k.has_account(&address, intent.brand_name.as_deref())
                })
                .ok_or_else(|| {
                    KeyringError::NotFound(format!(
                        "no {} keyring holds {address}",
                        intent.keyring_type
                    ))
                })?;
            let account = registry
                .get(id)?
                .accounts()
                .into_iter()
                .find(|a| {
                    a.address == address
                        && intent.brand_name.as_deref().is_none_or(|b| a.brand_name == b)
                })
                .ok_or_else(|| KeyringError::NotFound(format!("account {address}")))?;
            (id, account)
        };

        let (kind, payload, owner_target) = match &intent.multisig {
            Some(target) => {
                let target = self.owner_signature_target(target, &address).await?;
                let payload = self.owner_signature_payload(&target)?;
                (ApprovalKind::SignTypedData, payload, Some(target))
            }
            None => (intent.kind, intent.payload, None),
        };

        let request = ApprovalRequest::new(
            kind,
            intent.origin.clone(),
            account.clone(),
            payload.clone(),
            intent.chain_id,
        );
        let request_id = request.id;
        let mut handle = self.approvals.submit(request)?;
        let mut guard = AbandonGuard {
            orchestrator: self,
            request_id,
            keyring_id,
            keyring_type: account.keyring_type,
            armed: true,
        };
        self.touch_site(&intent.origin);
        self.audit_log(
            AuditEventType::ApprovalSubmitted,
            AuditActor::Origin {
                origin: intent.origin.clone(),
            },
            Some(request_id),
            AuditOutcome::Pending,
            Some(json!({ "keyringType": account.keyring_type, "kind": kind })),
        );

        let after_approval = account.keyring_type.signs_after_approval();
        if !after_approval && handle.wait_turn().await {
            let drive = self.drive_backend(
                keyring_id,
                &account,
                request_id,
                kind,
                payload.clone(),
                intent.chain_id,
            );
            tokio::select! {
                () = handle.wait_settled() => {
                    tracing::debug!(request_id = %request_id, "Approval settled before the backend finished");
                    self.cancel_backend(keyring_id, account.keyring_type, request_id);
                }
                result = drive => match result {
                    Ok(value) => {
                        self.approvals.resolve(request_id, value);
                    }
                    Err(e) => {
                        self.cancel_backend(keyring_id, account.keyring_type, request_id);
                        self.approvals.reject(request_id, e);
                    }
                },
            }
        }

        let outcome = match handle.outcome().await {
            Ok(_) if after_approval => {
                tracing::debug!(request_id = %request_id, "Approved; signing");
                self.drive_backend(keyring_id, &account, request_id, kind, payload, intent.chain_id)
                    .await
            }
            other => other,
        };
        guard.armed = false;

        let outcome = match outcome {
            Ok(value) => match owner_target {
                Some(target) => {
                    self.save_owner_signature(request_id, target, &account.address, value)
                        .await
                }
                None => Ok(value),
            },
            Err(e) => Err(e),
        };

        self.finish(request_id, &intent.origin, &outcome);
        outcome
    }

    fn abandon(&self, request_id: ApprovalId, keyring_id: KeyringId, keyring_type: KeyringType) {
        if !self
            .approvals
            .reject(request_id, KeyringError::rejected("requester went away"))
        {
            return;
        }
        self.cancel_backend(keyring_id, keyring_type, request_id);
        tracing::warn!(request_id = %request_id, "Requester dropped an unsettled request");
        self.audit_log(
            AuditEventType::ApprovalRejected,
            AuditActor::Orchestrator,
            Some(request_id),
            AuditOutcome::Failure {
                reason: "requester went away".to_string(),
            },
            None,
        );
    }

    fn finish(&self, request_id: ApprovalId, origin: &str, outcome: &ApprovalOutcome) {
        self.events.emit_sign_finished(request_id, outcome);
        let (event_type, audit_outcome) = match outcome {
            Ok(_) => (AuditEventType::ApprovalResolved, AuditOutcome::Success),
            Err(e) => (
                AuditEventType::ApprovalRejected,
                AuditOutcome::Failure {
                    reason: e.to_string(),
                },
            ),
        };
        self.audit_log(
            event_type,
            AuditActor::Origin {
                origin: origin.to_string(),
            },
            Some(request_id),
            audit_outcome,
            None,
        );
        match outcome {
            Ok(_) => tracing::info!(request_id = %request_id, "Sign request completed"),
            Err(e) => tracing::warn!(
                request_id = %request_id,
                error = %e,
                status = %e.sign_status(),
                "Sign request failed"
            ),
        }
    }

    fn check_permission(&self, origin: &str) -> KeyringResult<()> {
        match self.permissions()?.has_permission(origin) {
            Some(true) => Ok(()),
            Some(false) | None => Err(KeyringError::OriginNotPermitted(origin.to_string())),
        }
    }

    fn touch_site(&self, origin: &str) {
        match self.permissions() {
            Ok(mut permissions) => permissions.touch(origin),
            Err(e) => tracing::error!(error = %e, "Cannot touch connected site"),
        }
    }

    async fn drive_backend(
        &self,
        keyring_id: KeyringId,
        account: &Account,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<Value> {
        match account.keyring_type {
            KeyringType::Software | KeyringType::Hardware => {
                self.drive_capability(keyring_id, account, request_id, kind, payload, chain_id)
                    .await
            }
            KeyringType::Watch => Err(KeyringError::InvalidInput(format!(
                "{} is a watch-only address and cannot sign",
                account.address
            ))),
            KeyringType::RemoteSession => {
                self.drive_remote(keyring_id, account, request_id, kind, payload, chain_id)
                    .await
            }
            KeyringType::QrRelay => {
                self.drive_qr(keyring_id, account, request_id, kind, payload, chain_id)
                    .await
            }
            KeyringType::Multisig => self.build_proposal(keyring_id, account, request_id, payload),
        }
    }

    fn capability(&self, keyring_type: KeyringType) -> KeyringResult<Arc<dyn SignerCapability>> {
        let capability = match keyring_type {
            KeyringType::Hardware => self.backends.hardware.clone(),
            _ => self.backends.software.clone(),
        };
        capability.ok_or_else(|| {
            KeyringError::TransportFailure(format!("no signing capability for {keyring_type} accounts"))
        })
    }

    async fn drive_capability(
        &self,
        keyring_id: KeyringId,
        account: &Account,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<Value> {
        let (material, locked_brand) = {
            let registry = self.registry()?;
            match registry.get(keyring_id)? {
                Keyring::Software(k) => (k.material(), None),
                Keyring::Hardware(k) => (
                    k.material(),
                    (!k.is_unlocked()).then(|| k.brand_name.clone()),
                ),
                other => {
                    return Err(KeyringError::Internal(format!(
                        "{} keyring has no signing capability",
                        other.keyring_type()
                    )));
                }
            }
        };
        let capability = self.capability(account.keyring_type)?;

        if let Some(brand) = locked_brand {
            capability.unlock(&brand).await?;
            if let Some(hw) = self.registry()?.get_mut(keyring_id)?.as_hardware_mut() {
                hw.mark_unlocked();
            }
        }

        capability
            .sign(CapabilityRequest {
                request_id,
                account: account.clone(),
                kind,
                payload,
                chain_id,
                material,
            })
            .await
    }

    async fn drive_remote(
        &self,
        keyring_id: KeyringId,
        account: &Account,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<Value> {
        let started = {
            let mut registry = self.registry()?;
            remote_keyring(&mut registry, keyring_id)?.begin_sign(
                &account.address,
                &account.brand_name,
                request_id,
                kind,
                payload,
                chain_id,
            )
        };
        let started = match started {
            Ok(started) => started,
            Err(e) => {
                self.publish_remote_status(keyring_id, account);
                return Err(e);
            }
        };

        if let Some((bridge, topic)) = &started.connect {
            let uri = self.backends.transport.connect(bridge, *topic).await?;
            tracing::info!(address = %account.address, uri, "Opened remote session");
        }
        if let Some(message) = &started.update.outbound {
            self.backends.transport.send(message).await?;
        }
        if started.update.changed {
            self.emit_session_status(account, started.update.status);
        }

        let outcome = self
            .await_with_timeout(started.receiver, self.remote_timeout, "Remote signer")
            .await;
        if let Err(KeyringError::TransportFailure(_)) = &outcome {
            let expired = {
                let mut registry = self.registry()?;
                remote_keyring(&mut registry, keyring_id)?.expire(request_id)
            };
            if let Some((_, _, update)) = expired {
                self.emit_session_status(account, update.status);
            }
        }
        outcome
    }

    async fn drive_qr(
        &self,
        keyring_id: KeyringId,
        account: &Account,
        request_id: ApprovalId,
        kind: ApprovalKind,
        payload: Value,
        chain_id: Option<u64>,
    ) -> KeyringResult<Value> {
        let (display, receiver) = {
            let mut registry = self.registry()?;
            qr_keyring(&mut registry, keyring_id)?.request_signature(
                request_id,
                &account.address,
                kind,
                payload,
                chain_id,
            )?
        };
        self.events.emit(WalletEvent::QrPayloadReady {
            request_id,
            payload: display,
        });

        let outcome = self
            .await_with_timeout(receiver, self.qr_timeout, "QR signer")
            .await;
        // One relay per device: free it for the next request.
        self.cancel_backend(keyring_id, KeyringType::QrRelay, request_id);
        outcome
    }

    async fn await_with_timeout(
        &self,
        receiver: oneshot::Receiver<ApprovalOutcome>,
        limit: Option<Duration>,
        who: &str,
    ) -> ApprovalOutcome {
        let received = match limit {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(KeyringError::TransportFailure(format!(
                        "{who} did not answer within {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => receiver.await,
        };
        received.unwrap_or_else(|_| {
            Err(KeyringError::TransportFailure(format!(
                "{who} session closed before answering"
            )))
        })
    }

    /// Release any backend subscription still holding `request_id`.
    fn cancel_backend(&self, keyring_id: KeyringId, keyring_type: KeyringType, request_id: ApprovalId) {
        let Ok(mut registry) = self.registry() else {
            return;
        };
        let Ok(keyring) = registry.get_mut(keyring_id) else {
            return;
        };
        let cancelled = match keyring_type {
            KeyringType::RemoteSession => keyring
                .as_remote_mut()
                .is_some_and(|k| k.cancel(request_id)),
            KeyringType::QrRelay => keyring.as_qr_mut().is_some_and(|k| k.cancel(request_id)),
            _ => false,
        };
        if cancelled {
            tracing::debug!(request_id = %request_id, "Released backend request");
        }
    }

    /// Retry the durable save for a signature that was produced but not saved.
    pub async fn retry_persistence(&self, request_id: ApprovalId) -> KeyringResult<Value> {
        let unsaved = self
            .unsaved()?
            .get(&request_id)
            .cloned()
            .ok_or_else(|| KeyringError::NotFound(format!("unsaved result {request_id}")))?;

        let saved = match &unsaved.save {
            PendingSave::OwnerSignature {
                target,
                signer,
                signature,
            } => self.record_owner_signature(target, signer, signature).await,
            PendingSave::Proposal {
                keyring_id,
                safe_address,
                discarded,
            } => self.persist_proposal(*keyring_id, safe_address, discarded.as_ref()),
        };

        match saved {
            Ok(()) => {
                self.unsaved()?.remove(&request_id);
                tracing::info!(request_id = %request_id, "Persisted retained result");
                Ok(unsaved.value)
            }
            Err(e) => Err(KeyringError::PersistenceFailure {
                request_id: Some(request_id),
                reason: e.to_string(),
            }),
        }
    }

    fn retain_unsaved(&self, request_id: ApprovalId, save: PendingSave, value: Value, error: &KeyringError) -> KeyringError {
        tracing::error!(request_id = %request_id, error = %error, "Failed to persist signing result");
        match self.unsaved() {
            Ok(mut unsaved) => {
                unsaved.insert(request_id, UnsavedResult { save, value });
            }
            Err(e) => tracing::error!(error = %e, "Cannot retain unsaved result"),
        }
        KeyringError::PersistenceFailure {
            request_id: Some(request_id),
            reason: error.to_string(),
        }
    }

    // =========================================================================
    // Approvals
    // =========================================================================

    pub fn current_approval(&self) -> Option<ApprovalRequest> {
        self.approvals.current()
    }

    /// Requests queued or pending.
    pub fn pending_approvals(&self) -> usize {
        self.approvals.len()
    }

    /// Complete a request with the user's result. Idempotent.
    ///
    /// For software and hardware accounts the result only records consent;
    /// the account's capability produces the signature afterwards.
    pub fn resolve_approval(&self, id: ApprovalId, result: Value) -> bool {
        self.approvals.resolve(id, result)
    }

    /// Fail a request with a user rejection. Idempotent.
    pub fn reject_approval(&self, id: ApprovalId, reason: &str) -> bool {
        self.approvals.reject(id, KeyringError::rejected(reason))
    }

    pub fn reject_all_approvals(&self, reason: &str) -> usize {
        let count = self.approvals.reject_all(reason);
        if count > 0 {
            self.audit_log(
                AuditEventType::ApprovalsCleared,
                AuditActor::Orchestrator,
                None,
                AuditOutcome::Success,
                Some(json!({ "count": count, "reason": reason })),
            );
        }
        count
    }

    // =========================================================================
    // Accounts and keyrings
    // =========================================================================

    /// Every account of every persisted instance.
    pub fn accounts(&self) -> KeyringResult<Vec<Account>> {
        Ok(self.registry()?.accounts())
    }

    pub fn current_account(&self) -> Option<Account> {
        self.current_account.lock().ok().and_then(|a| a.clone())
    }

    fn set_current_account(&self, account: Option<Account>) -> KeyringResult<()> {
        *self
            .current_account
            .lock()
            .map_err(|_| KeyringError::Internal("Current account lock poisoned".to_string()))? =
            account;
        Ok(())
    }

    /// Switch the active account. Any in-flight approval is rejected first.
    pub fn change_account(
        &self,
        address: &str,
        keyring_type: KeyringType,
        brand_name: Option<&str>,
    ) -> KeyringResult<Account> {
        let address = normalize_address(address)?;
        let account = {
            let registry = self.registry()?;
            registry
                .accounts()
                .into_iter()
                .find(|a| {
                    a.address == address
                        && a.keyring_type == keyring_type
                        && brand_name.is_none_or(|b| a.brand_name == b)
                })
                .ok_or_else(|| KeyringError::NotFound(format!("account {address}")))?
        };

        if !self.approvals.is_empty() {
            self.reject_all_approvals("Active account changed");
        }
        self.set_current_account(Some(account.clone()))?;

        self.events.emit(WalletEvent::AccountsChanged {
            origin: None,
            accounts: vec![account.address.clone()],
        });
        self.audit_log(
            AuditEventType::AccountChanged,
            AuditActor::Account {
                address: account.address.clone(),
            },
            None,
            AuditOutcome::Success,
            Some(json!({ "keyringType": keyring_type })),
        );
        tracing::info!(address = %account.address, keyring_type = %keyring_type, "Active account changed");
        Ok(account)
    }

    /// Remove an account. An instance left without accounts is destroyed and its transports released.
    pub async fn remove_address(
        &self,
        address: &str,
        keyring_type: KeyringType,
        brand_name: Option<&str>,
    ) -> KeyringResult<()> {
        let address = normalize_address(address)?;
        let destroyed = self.registry()?.remove(&address, keyring_type, brand_name)?;

        if keyring_type == KeyringType::Multisig
            && let Err(e) = self.storage.delete_multisig_transaction(&address)
        {
            tracing::error!(error = %e, safe_address = %address, "Failed to delete multisig transaction");
        }
        if let Some(keyring) = destroyed {
            self.release(keyring).await;
        }

        if self
            .current_account()
            .is_some_and(|a| a.address == address && a.keyring_type == keyring_type)
        {
            self.set_current_account(None)?;
            self.events.emit(WalletEvent::AccountsChanged {
                origin: None,
                accounts: Vec::new(),
            });
        }

        self.audit_log(
            AuditEventType::KeyringRemoved,
            AuditActor::Account { address },
            None,
            AuditOutcome::Success,
            Some(json!({ "keyringType": keyring_type })),
        );
        Ok(())
    }

    async fn release(&self, keyring: Keyring) {
        match keyring {
            Keyring::RemoteSession(mut remote) => {
                for (bridge, topic) in remote.release_all() {
                    if let Err(e) = self.backends.transport.close(&bridge, topic).await {
                        tracing::warn!(error = %e, topic = %topic, "Failed to release relay topic");
                    }
                }
            }
            Keyring::Hardware(hw) => {
                tracing::info!(
                    brand = %hw.brand_name,
                    hid_authorized = hw.hid_authorized(),
                    "Released hardware device"
                );
            }
            _ => {}
        }
    }

    /// Watch an address without signing ability.
    pub fn import_watch_address(&self, address: &str) -> KeyringResult<Account> {
        let address = normalize_address(address)?;
        let mut registry = self.registry()?;
        if registry.has_address(&address) {
            return Err(KeyringError::StateConflict(format!(
                "{address} is already imported"
            )));
        }

        match registry.id_by_type(KeyringType::Watch) {
            Ok(id) => {
                if let Keyring::Watch(watch) = registry.get_mut(id)? {
                    watch.add_account(address.clone());
                }
                registry.persist()?;
            }
            Err(_) => {
                let mut watch = WatchKeyring::default();
                watch.add_account(address.clone());
                registry.add_persisted(Keyring::Watch(watch))?;
            }
        }
        Ok(Account::new(address, KeyringType::Watch, WatchKeyring::BRAND_NAME))
    }

    /// Stash a software keyring created from an encrypted vault.
    pub fn stash_software_keyring(
        &self,
        kind: SoftwareKind,
        vault: &str,
        addresses: &[String],
    ) -> KeyringResult<StashedKeyring> {
        let addresses = addresses
            .iter()
            .map(|a| normalize_address(a))
            .collect::<KeyringResult<Vec<_>>>()?;
        if addresses.is_empty() {
            return Err(KeyringError::InvalidInput(
                "a software keyring needs at least one account".to_string(),
            ));
        }
        let keyring = SoftwareKeyring::new(kind, vault, addresses);
        let accounts = keyring.accounts();
        let stash_id = self.registry()?.add_to_stash(Keyring::Software(keyring));
        Ok(StashedKeyring { stash_id, accounts })
    }

    /// Unlock a hardware device and stash an empty instance for it.
    pub async fn connect_hardware(&self, brand_name: &str, hd_path: Option<&str>) -> KeyringResult<KeyringId> {
        let mut hw = HardwareKeyring::new(brand_name);
        if let Some(path) = hd_path {
            hw.set_hd_path(path)?;
        }
        self.capability(KeyringType::Hardware)?
            .unlock(brand_name)
            .await?;
        hw.mark_unlocked();
        hw.authorize_hid();
        Ok(self.registry()?.add_to_stash(Keyring::Hardware(hw)))
    }

    /// Add device accounts to a hardware instance, stashed or persisted.
    pub fn add_hardware_accounts(&self, id: KeyringId, addresses: &[String]) -> KeyringResult<Vec<Account>> {
        let addresses = addresses
            .iter()
            .map(|a| normalize_address(a))
            .collect::<KeyringResult<Vec<_>>>()?;

        let mut registry = self.registry()?;
        let hw = registry
            .get_mut(id)?
            .as_hardware_mut()
            .ok_or_else(|| KeyringError::InvalidInput(format!("keyring {id} is not a hardware keyring")))?;
        for address in addresses {
            hw.add_account(address);
        }
        let accounts = hw.accounts();
        if !registry.is_stashed(id) {
            registry.persist()?;
        }
        Ok(accounts)
    }

    /// Confirm a stashed instance and save it.
    pub fn promote_keyring(&self, id: KeyringId) -> KeyringResult<Vec<Account>> {
        let accounts = {
            let mut registry = self.registry()?;
            registry.promote(id)?;
            registry.get(id)?.accounts()
        };
        self.audit_log(
            AuditEventType::KeyringPromoted,
            AuditActor::Orchestrator,
            None,
            AuditOutcome::Success,
            Some(json!({ "keyringId": id, "accounts": accounts.len() })),
        );
        Ok(accounts)
    }

    // =========================================================================
    // Remote sessions
    // =========================================================================

    /// Start pairing a remote wallet. Returns the URI to display and the stash handle.
    pub async fn init_remote_session(&self, brand_name: &str, stash_id: Option<KeyringId>) -> KeyringResult<RemotePairing> {
        let (stash_id, topic) = {
            let mut registry = self.registry()?;
            let id = match stash_id {
                Some(id) => {
                    registry.get_stashed(id)?;
                    id
                }
                None => registry.add_to_stash(Keyring::RemoteSession(RemoteSessionKeyring::default())),
            };
            let topic = remote_keyring(&mut registry, id)?.begin_pairing(brand_name, &self.default_bridge);
            (id, topic)
        };

        let uri = self
            .backends
            .transport
            .connect(&self.default_bridge, topic)
            .await?;
        tracing::info!(brand = brand_name, stash_id, topic = %topic, "Remote pairing started");
        Ok(RemotePairing {
            stash_id,
            topic,
            uri,
        })
    }

    /// Finish pairing once the peer revealed its account, and persist the instance.
    pub fn import_remote_account(
        &self,
        stash_id: KeyringId,
        topic: uuid::Uuid,
        address: &str,
        chain_id: u64,
    ) -> KeyringResult<Account> {
        let address = normalize_address(address)?;
        let paired = {
            let mut registry = self.registry()?;
            registry.get_stashed(stash_id)?;
            remote_keyring(&mut registry, stash_id)?.complete_pairing(topic, &address, chain_id)?
        };
        self.promote_keyring(stash_id)?;

        let account = Account::new(address, KeyringType::RemoteSession, paired.brand_name);
        self.emit_session_status(&account, SessionStatus::Connected);
        Ok(account)
    }

    pub fn remote_session_status(&self, address: &str, brand_name: &str) -> KeyringResult<Option<SessionInfo>> {
        let address = normalize_address(address)?;
        let registry = self.registry()?;
        let id = remote_owner(&registry, &address, brand_name)?;
        match registry.get(id)? {
            Keyring::RemoteSession(remote) => Ok(remote.session(&address, brand_name).map(|s| s.info())),
            _ => Ok(None),
        }
    }

    /// Feed a relay notification into the account's session.
    pub async fn handle_session_event(
        &self,
        address: &str,
        brand_name: &str,
        event: SessionEvent,
    ) -> KeyringResult<SessionStatus> {
        let address = normalize_address(address)?;
        let update = {
            let mut registry = self.registry()?;
            let id = remote_owner(&registry, &address, brand_name)?;
            remote_keyring(&mut registry, id)?.apply(&address, brand_name, event)?
        };

        if let Some(message) = &update.outbound {
            self.backends.transport.send(message).await?;
        }
        if update.changed {
            let account = Account::new(address, KeyringType::RemoteSession, brand_name);
            self.emit_session_status(&account, update.status);
        }
        Ok(update.status)
    }

    /// Re-send the pending request over the same relay identity.
    pub async fn resend_remote_session(&self, address: &str, brand_name: &str) -> KeyringResult<SessionStatus> {
        let address = normalize_address(address)?;
        let update = {
            let mut registry = self.registry()?;
            let id = remote_owner(&registry, &address, brand_name)?;
            remote_keyring(&mut registry, id)?.resend(&address, brand_name)?
        };

        if let Some(message) = &update.outbound {
            self.backends.transport.send(message).await?;
        }
        let account = Account::new(address, KeyringType::RemoteSession, brand_name);
        self.emit_session_status(&account, update.status);
        Ok(update.status)
    }

    /// Close a session and release its relay subscription.
    pub async fn kill_remote_session(&self, address: &str, brand_name: &str, reset_connect: bool) -> KeyringResult<()> {
        let address = normalize_address(address)?;
        let (update, bridge, topic) = {
            let mut registry = self.registry()?;
            let id = remote_owner(&registry, &address, brand_name)?;
            remote_keyring(&mut registry, id)?.close(&address, brand_name, reset_connect)?
        };

        self.backends.transport.close(&bridge, topic).await?;
        let account = Account::new(address, KeyringType::RemoteSession, brand_name);
        self.emit_session_status(&account, update.status);
        Ok(())
    }

    fn emit_session_status(&self, account: &Account, status: SessionStatus) {
        self.events.emit(WalletEvent::SessionStatusChanged {
            address: account.address.clone(),
            brand_name: account.brand_name.clone(),
            status,
        });
    }

    fn publish_remote_status(&self, keyring_id: KeyringId, account: &Account) {
        let status = self.registry().ok().and_then(|registry| match registry.get(keyring_id) {
            Ok(Keyring::RemoteSession(remote)) => remote
                .session(&account.address, &account.brand_name)
                .map(|s| s.status()),
            _ => None,
        });
        if let Some(status) = status {
            self.emit_session_status(account, status);
        }
    }

    // =========================================================================
    // QR relay
    // =========================================================================

    /// Pair an air-gapped device from its scanned sync payload.
    pub fn submit_qr_sync(&self, payload: &str) -> KeyringResult<StashedKeyring> {
        let keyring = QrKeyring::from_sync(payload)?;
        let accounts = keyring.accounts();
        let stash_id = self.registry()?.add_to_stash(Keyring::QrRelay(keyring));
        Ok(StashedKeyring { stash_id, accounts })
    }

    pub fn begin_qr_scan(&self, request_id: ApprovalId) -> KeyringResult<QrStatus> {
        let mut registry = self.registry()?;
        let id = qr_owner(&registry, request_id)?;
        qr_keyring(&mut registry, id)?.begin_scan(request_id)
    }

    /// Apply a scanned signature frame to the relay serving `request_id`.
    pub fn submit_qr_signature(&self, request_id: ApprovalId, scanned: &str) -> KeyringResult<QrStatus> {
        let mut registry = self.registry()?;
        let id = qr_owner(&registry, request_id)?;
        qr_keyring(&mut registry, id)?.submit_signature(request_id, scanned)
    }

    pub fn report_qr_scan_error(&self, request_id: ApprovalId, message: &str) -> KeyringResult<QrStatus> {
        let mut registry = self.registry()?;
        let id = qr_owner(&registry, request_id)?;
        qr_keyring(&mut registry, id)?.report_scan_error(request_id, message)
    }

    // =========================================================================
    // Multisig
    // =========================================================================

    /// Watch a Safe contract on `network_id`.
    pub fn import_safe(&self, address: &str, network_id: u64) -> KeyringResult<Account> {
        let mut registry = self.registry()?;
        let safe = match registry.id_by_type(KeyringType::Multisig) {
            Ok(id) => {
                let safe = multisig_keyring(&mut registry, id)?.add_safe(address, network_id)?;
                registry.persist()?;
                safe
            }
            Err(_) => {
                let mut multisig = MultisigKeyring::default();
                let safe = multisig.add_safe(address, network_id)?;
                registry.add_persisted(Keyring::Multisig(multisig))?;
                safe
            }
        };
        tracing::info!(safe_address = %safe, network_id, "Imported safe");
        Ok(Account::new(safe, KeyringType::Multisig, MultisigKeyring::BRAND_NAME))
    }

    fn build_proposal(
        &self,
        keyring_id: KeyringId,
        account: &Account,
        request_id: ApprovalId,
        tx: Value,
    ) -> KeyringResult<Value> {
        let (built, discarded) = {
            let mut registry = self.registry()?;
            let (built, discarded) = multisig_keyring(&mut registry, keyring_id)?.build(&account.address, tx)?;
            (built.clone(), discarded)
        };

        let value = json!({
            "safeAddress": built.safe_address,
            "networkId": built.network_id,
            "safeTxHash": built.safe_tx_hash,
            "discardedSafeTxHash": discarded.as_ref().map(|d| d.safe_tx_hash.clone()),
        });

        self.events.emit(WalletEvent::MultisigTransactionBuilt {
            safe_address: built.safe_address.clone(),
            safe_tx_hash: built.safe_tx_hash.clone(),
        });
        self.audit_log(
            AuditEventType::MultisigBuilt,
            AuditActor::Account {
                address: built.safe_address.clone(),
            },
            Some(request_id),
            AuditOutcome::Success,
            Some(json!({ "safeTxHash": built.safe_tx_hash, "discarded": discarded.is_some() })),
        );

        // A proposal for the same Safe is overwritten by the new record.
        let discarded = discarded.filter(|d| d.safe_address != built.safe_address);
        if let Err(e) = self.persist_proposal(keyring_id, &built.safe_address, discarded.as_ref()) {
            return Err(self.retain_unsaved(
                request_id,
                PendingSave::Proposal {
                    keyring_id,
                    safe_address: built.safe_address,
                    discarded,
                },
                value,
                &e,
            ));
        }
        Ok(value)
    }

    fn persist_proposal(
        &self,
        keyring_id: KeyringId,
        safe_address: &str,
        discarded: Option<&MultisigTransaction>,
    ) -> KeyringResult<()> {
        let tx = {
            let mut registry = self.registry()?;
            multisig_keyring(&mut registry, keyring_id)?
                .current_for(safe_address)?
                .clone()
        };
        if let Some(discarded) = discarded {
            self.storage
                .put_multisig_transaction(&discarded.safe_address, discarded)?;
        }
        self.storage.put_multisig_transaction(safe_address, &tx)
    }

    async fn owner_signature_target(&self, target: &MultisigTarget, signer: &str) -> KeyringResult<OwnerSignature> {
        let safe_address = normalize_address(&target.safe_address)?;
        let target = {
            let mut registry = self.registry()?;
            let keyring_id = registry.resolve_for_account(&safe_address, KeyringType::Multisig)?;
            let tx = multisig_keyring(&mut registry, keyring_id)?.current_for(&safe_address)?;
            OwnerSignature {
                keyring_id,
                safe_address: safe_address.clone(),
                network_id: tx.network_id,
                safe_tx_hash: tx.safe_tx_hash.clone(),
            }
        };

        let owners = self
            .backends
            .safe
            .owners(&target.safe_address, target.network_id)
            .await?;
        if !owners.iter().any(|o| o.eq_ignore_ascii_case(signer)) {
            return Err(KeyringError::InvalidInput(format!(
                "{signer} is not an owner of safe {safe_address}"
            )));
        }
        Ok(target)
    }

    fn owner_signature_payload(&self, target: &OwnerSignature) -> KeyringResult<Value> {
        let mut registry = self.registry()?;
        let tx = multisig_keyring(&mut registry, target.keyring_id)?.current_for(&target.safe_address)?;
        Ok(json!({
            "safeAddress": tx.safe_address,
            "networkId": tx.network_id,
            "safeTxHash": tx.safe_tx_hash,
            "tx": tx.tx,
        }))
    }

    async fn save_owner_signature(
        &self,
        request_id: ApprovalId,
        target: OwnerSignature,
        signer: &str,
        value: Value,
    ) -> KeyringResult<Value> {
        let signature = value
            .as_str()
            .map_or_else(|| value.to_string(), ToString::to_string);
        match self.record_owner_signature(&target, signer, &signature).await {
            Ok(()) => Ok(value),
            // The proposal moved on; retrying cannot succeed.
            Err(e @ (KeyringError::StateConflict(_) | KeyringError::NotFound(_))) => Err(e),
            Err(e) => Err(self.retain_unsaved(
                request_id,
                PendingSave::OwnerSignature {
                    target,
                    signer: signer.to_string(),
                    signature,
                },
                value,
                &e,
            )),
        }
    }

    /// Append an owner signature, proposing on the first one, and save the transaction.
    async fn record_owner_signature(&self, target: &OwnerSignature, signer: &str, signature: &str) -> KeyringResult<()> {
        // The proposal is posted with the first signature. The signature is only
        // recorded once that succeeds, so a retry posts it again.
        let proposal = {
            let mut registry = self.registry()?;
            let tx = owner_proposal(&mut registry, target)?;
            tx.ensure_signable()?;
            (tx.confirmations() == 0).then(|| tx.clone())
        };
        if let Some(proposal) = &proposal {
            self.backends.safe.propose(proposal, signer, signature).await?;
        }
        {
            let mut registry = self.registry()?;
            owner_proposal(&mut registry, target)?
                .add_signature(signer, signature)?;
        }

        let threshold = self
            .backends
            .safe
            .threshold(&target.safe_address, target.network_id)
            .await?;

        let snapshot = self.refresh_multisig(target.keyring_id, &target.safe_address, threshold)?;
        self.storage
            .put_multisig_transaction(&target.safe_address, &snapshot)?;

        self.events.emit(WalletEvent::MultisigTransactionConfirmed {
            safe_address: target.safe_address.clone(),
            signer: signer.to_lowercase(),
            confirmations: snapshot.confirmations(),
        });
        self.audit_log(
            AuditEventType::MultisigConfirmed,
            AuditActor::Account {
                address: signer.to_lowercase(),
            },
            None,
            AuditOutcome::Success,
            Some(json!({
                "safeAddress": target.safe_address,
                "confirmations": snapshot.confirmations(),
                "threshold": threshold,
            })),
        );
        Ok(())
    }

    fn refresh_multisig(&self, keyring_id: KeyringId, safe_address: &str, threshold: usize) -> KeyringResult<MultisigTransaction> {
        let mut registry = self.registry()?;
        let tx = multisig_keyring(&mut registry, keyring_id)?.current_for(safe_address)?;
        tx.refresh(threshold);
        Ok(tx.clone())
    }

    fn safe_context(&self, safe_address: &str) -> KeyringResult<(String, KeyringId, u64)> {
        let safe = normalize_address(safe_address)?;
        let mut registry = self.registry()?;
        let id = registry.resolve_for_account(&safe, KeyringType::Multisig)?;
        let network_id = multisig_keyring(&mut registry, id)?.current_for(&safe)?.network_id;
        Ok((safe, id, network_id))
    }

    /// The in-progress transaction and its collected signatures.
    pub fn multisig_signatures(&self, safe_address: &str) -> KeyringResult<MultisigTransaction> {
        let safe = normalize_address(safe_address)?;
        let mut registry = self.registry()?;
        let id = registry.resolve_for_account(&safe, KeyringType::Multisig)?;
        Ok(multisig_keyring(&mut registry, id)?.current_for(&safe)?.clone())
    }

    /// Re-query the threshold and report whether the transaction can execute.
    pub async fn check_multisig_executable(&self, safe_address: &str) -> KeyringResult<bool> {
        let (safe, id, network_id) = self.safe_context(safe_address)?;
        let threshold = self.backends.safe.threshold(&safe, network_id).await?;
        let tx = self.refresh_multisig(id, &safe, threshold)?;
        self.storage.put_multisig_transaction(&safe, &tx)?;
        Ok(tx.phase == MultisigPhase::Executable)
    }

    /// Execute the transaction once the current threshold is met. Returns the chain tx hash.
    pub async fn execute_multisig(&self, safe_address: &str) -> KeyringResult<String> {
        let (safe, id, network_id) = self.safe_context(safe_address)?;
        let threshold = self.backends.safe.threshold(&safe, network_id).await?;
        let tx = self.refresh_multisig(id, &safe, threshold)?;
        if tx.phase != MultisigPhase::Executable {
            return Err(KeyringError::StateConflict(format!(
                "safe {safe} has {} of {threshold} required signatures",
                tx.confirmations()
            )));
        }

        let tx_hash = self.backends.safe.execute(&tx).await?;
        let executed = {
            let mut registry = self.registry()?;
            let current = multisig_keyring(&mut registry, id)?.current_for(&safe)?;
            current.mark_executed(tx_hash.clone())?;
            current.clone()
        };
        self.storage.put_multisig_transaction(&safe, &executed)?;

        self.audit_log(
            AuditEventType::MultisigExecuted,
            AuditActor::Account {
                address: safe.clone(),
            },
            None,
            AuditOutcome::Success,
            Some(json!({ "safeTxHash": executed.safe_tx_hash, "txHash": tx_hash })),
        );
        tracing::info!(safe_address = %safe, tx_hash, "Executed multisig transaction");
        Ok(tx_hash)
    }

    /// Drop the in-progress transaction of a Safe. Returns `true` if one existed.
    pub fn clear_multisig(&self, safe_address: &str) -> KeyringResult<bool> {
        let safe = normalize_address(safe_address)?;
        let cleared = {
            let mut registry = self.registry()?;
            let id = registry.resolve_for_account(&safe, KeyringType::Multisig)?;
            let multisig = multisig_keyring(&mut registry, id)?;
            if multisig.current().is_some_and(|tx| tx.safe_address == safe) {
                multisig.clear().is_some()
            } else {
                false
            }
        };
        self.storage.delete_multisig_transaction(&safe)?;
        Ok(cleared)
    }

    // =========================================================================
    // Connected sites
    // =========================================================================

    /// Record a newly connected site and announce its chain.
    pub fn connect_site(&self, origin: &str, name: &str, icon: &str, chain_id: u64) -> KeyringResult<()> {
        self.permissions()?
            .add_connected_site(origin, name, icon, chain_id, false);
        self.events.emit_chain_changed(origin, chain_id);
        Ok(())
    }

    /// Apply a partial update; a chain switch is announced to the site.
    pub fn update_site(&self, origin: &str, patch: &SitePatch) -> KeyringResult<Option<ConnectedSite>> {
        let (before, after) = {
            let mut permissions = self.permissions()?;
            let before = permissions.peek(origin).map(|s| s.chain_id);
            (before, permissions.update(origin, patch))
        };
        if let Some(site) = &after
            && before != Some(site.chain_id)
        {
            self.events.emit_chain_changed(origin, site.chain_id);
        }
        Ok(after)
    }

    pub fn list_recent_sites(&self) -> KeyringResult<Vec<ConnectedSite>> {
        Ok(self.permissions()?.list_recent())
    }

    pub fn sites_by_chain(&self, chain_id: u64) -> KeyringResult<Vec<ConnectedSite>> {
        Ok(self.permissions()?.sites_by_chain(chain_id))
    }

    pub fn prefer_metamask_sites(&self) -> KeyringResult<Vec<ConnectedSite>> {
        Ok(self.permissions()?.prefer_metamask_sites())
    }

    /// Clear a site's MetaMask preference. Returns `false` if it was not set.
    pub fn remove_prefer_metamask(&self, origin: &str) -> KeyringResult<bool> {
        let mut permissions = self.permissions()?;
        if !permissions.peek(origin).is_some_and(|s| s.prefer_metamask) {
            return Ok(false);
        }
        let patch = SitePatch {
            prefer_metamask: Some(false),
            ..SitePatch::default()
        };
        Ok(permissions.update(origin, &patch).is_some())
    }

    /// Reorder connected sites; the first entry becomes the most recent.
    pub fn reorder_sites(&self, sites: Vec<ConnectedSite>) -> KeyringResult<()> {
        self.permissions()?.set_recent(sites);
        Ok(())
    }

    pub fn pin_site(&self, origin: &str, order: Option<u32>) -> KeyringResult<bool> {
        Ok(self.permissions()?.pin(origin, order))
    }

    pub fn unpin_site(&self, origin: &str) -> KeyringResult<bool> {
        Ok(self.permissions()?.unpin(origin))
    }

    /// Disconnect a site; it loses access to every account.
    pub fn remove_site(&self, origin: &str) -> KeyringResult<bool> {
        let removed = self.permissions()?.remove(origin);
        if removed {
            self.events.emit(WalletEvent::AccountsChanged {
                origin: Some(origin.to_string()),
                accounts: Vec::new(),
            });
        }
        Ok(removed)
    }

    /// Disconnect every unpinned connected site. Returns how many were disconnected.
    pub fn remove_all_recent_sites(&self) -> KeyringResult<usize> {
        let origins: Vec<String> = self
            .permissions()?
            .connected_sites()
            .into_iter()
            .filter(|s| !s.is_top)
            .map(|s| s.origin)
            .collect();

        let mut removed = 0;
        for origin in origins {
            if self.remove_site(&origin)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn remote_keyring(registry: &mut KeyringRegistry, id: KeyringId) -> KeyringResult<&mut RemoteSessionKeyring> {
    registry
        .get_mut(id)?
        .as_remote_mut()
        .ok_or_else(|| KeyringError::InvalidInput(format!("keyring {id} is not a remote session keyring")))
}

fn qr_keyring(registry: &mut KeyringRegistry, id: KeyringId) -> KeyringResult<&mut QrKeyring> {
    registry
        .get_mut(id)?
        .as_qr_mut()
        .ok_or_else(|| KeyringError::InvalidInput(format!("keyring {id} is not a QR keyring")))
}

/// The in-progress transaction `target` was produced for.
fn owner_proposal<'r>(
    registry: &'r mut KeyringRegistry,
    target: &OwnerSignature,
) -> KeyringResult<&'r mut MultisigTransaction> {
    let tx = multisig_keyring(registry, target.keyring_id)?.current_for(&target.safe_address)?;
    if tx.safe_tx_hash != target.safe_tx_hash {
        return Err(KeyringError::StateConflict(format!(
            "proposal {} was replaced by {}",
            target.safe_tx_hash, tx.safe_tx_hash
        )));
    }
    Ok(tx)
}

fn multisig_keyring(registry: &mut KeyringRegistry, id: KeyringId) -> KeyringResult<&mut MultisigKeyring> {
    registry
        .get_mut(id)?
        .as_multisig_mut()
        .ok_or_else(|| KeyringError::InvalidInput(format!("keyring {id} is not a multisig keyring")))
}

/// Persisted remote keyring holding (`address`, `brand_name`).
fn remote_owner(registry: &KeyringRegistry, address: &str, brand_name: &str) -> KeyringResult<KeyringId> {
    registry
        .find_persisted(|k| {
            k.keyring_type() == KeyringType::RemoteSession && k.has_account(address, Some(brand_name))
        })
        .ok_or_else(|| KeyringError::NotFound(format!("remote account {brand_name}-{address}")))
}

/// Persisted QR keyring whose relay serves `request_id`.
fn qr_owner(registry: &KeyringRegistry, request_id: ApprovalId) -> KeyringResult<KeyringId> {
    registry
        .find_persisted(|k| match k {
            Keyring::QrRelay(qr) => qr.status().is_some_and(|(id, _)| id == request_id),
            _ => false,
        })
        .ok_or_else(|| KeyringError::NotFound(format!("no QR relay serves request {request_id}")))
}
