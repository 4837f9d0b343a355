//! End-to-end flows through the orchestrator with in-test backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use keyring_service::approval::{ApprovalId, ApprovalKind};
use keyring_service::config::Settings;
use keyring_service::error::{KeyringError, KeyringResult, SignStatus};
use keyring_service::events::WalletEvent;
use keyring_service::keyring::{CapabilityRequest, KeyringType, SignerCapability, SoftwareKind};
use keyring_service::orchestrator::{Backends, MultisigTarget, Orchestrator, SignIntent};
use keyring_service::session::{
    MultisigPhase, MultisigTransaction, QrStatus, RelayMessage, SafeContract, SessionEvent,
    SessionStatus, SessionTransport, encode_signature_frame,
};
use keyring_service::storage::Storage;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::broadcast;

const ORIGIN: &str = "https://dapp.example";
const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
const BOB: &str = "0xb0b0000000000000000000000000000000000002";
const CAROL: &str = "0xca20100000000000000000000000000000000003";
const PHONE: &str = "0x9000000000000000000000000000000000000004";
const DEVICE: &str = "0xde71ce0000000000000000000000000000000005";
const SAFE: &str = "0x5afe000000000000000000000000000000000006";
const VAULT: &str = "0x5afe000000000000000000000000000000000007";

// =============================================================================
// In-test backends
// =============================================================================

/// Signs immediately with `signed:<address>`.
struct EchoCapability;

#[async_trait]
impl SignerCapability for EchoCapability {
    async fn sign(&self, request: CapabilityRequest) -> KeyringResult<Value> {
        Ok(json!(format!("signed:{}", request.account.address)))
    }
}

/// Echoes like [`EchoCapability`] and counts how often it was asked to sign.
#[derive(Default)]
struct CountingCapability {
    calls: AtomicUsize,
}

impl CountingCapability {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerCapability for CountingCapability {
    async fn sign(&self, request: CapabilityRequest) -> KeyringResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!(format!("signed:{}", request.account.address)))
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<RelayMessage>>,
    closed: Mutex<Vec<uuid::Uuid>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<RelayMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn connect(&self, _bridge: &str, topic: uuid::Uuid) -> KeyringResult<String> {
        Ok(format!("wc:{topic}@1"))
    }

    async fn send(&self, message: &RelayMessage) -> KeyringResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&self, _bridge: &str, topic: uuid::Uuid) -> KeyringResult<()> {
        self.closed.lock().unwrap().push(topic);
        Ok(())
    }
}

struct MockSafe {
    owners: Vec<String>,
    threshold: Mutex<usize>,
    /// Proposals the service accepted.
    proposals: Mutex<usize>,
    /// Upcoming proposals to refuse.
    failing_proposals: Mutex<usize>,
}

impl MockSafe {
    fn new(owners: &[&str], threshold: usize) -> Self {
        Self {
            owners: owners.iter().map(|o| o.to_string()).collect(),
            threshold: Mutex::new(threshold),
            proposals: Mutex::new(0),
            failing_proposals: Mutex::new(0),
        }
    }
}

#[async_trait]
impl SafeContract for MockSafe {
    async fn threshold(&self, _safe_address: &str, _network_id: u64) -> KeyringResult<usize> {
        Ok(*self.threshold.lock().unwrap())
    }

    async fn owners(&self, _safe_address: &str, _network_id: u64) -> KeyringResult<Vec<String>> {
        Ok(self.owners.clone())
    }

    async fn propose(
        &self,
        _tx: &MultisigTransaction,
        _sender: &str,
        _signature: &str,
    ) -> KeyringResult<()> {
        let mut failing = self.failing_proposals.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(KeyringError::TransportFailure("service down".to_string()));
        }
        *self.proposals.lock().unwrap() += 1;
        Ok(())
    }

    async fn execute(&self, _tx: &MultisigTransaction) -> KeyringResult<String> {
        Ok("0xexecuted".to_string())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<RecordingTransport>,
    safe: Arc<MockSafe>,
    _dir: TempDir,
}

fn harness_with(settings: &Settings, capability: Arc<dyn SignerCapability>, safe: MockSafe) -> Harness {
    let dir = TempDir::new().unwrap();
    let storage = Storage::open(&dir.path().join("keyring.redb")).unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let safe = Arc::new(safe);
    let backends = Backends {
        software: Some(capability),
        hardware: None,
        transport: transport.clone(),
        safe: safe.clone(),
    };
    let orchestrator = Orchestrator::new(storage, settings, backends).unwrap();
    orchestrator.init().unwrap();
    orchestrator.connect_site(ORIGIN, "dApp", "", 1).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        transport,
        safe,
        _dir: dir,
    }
}

fn harness(capability: Arc<dyn SignerCapability>) -> Harness {
    harness_with(&Settings::for_tests(), capability, MockSafe::new(&[], 1))
}

fn add_software(orchestrator: &Orchestrator, addresses: &[&str]) {
    let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    let stashed = orchestrator
        .stash_software_keyring(SoftwareKind::Mnemonic, "vault", &addresses)
        .unwrap();
    orchestrator.promote_keyring(stashed.stash_id).unwrap();
}

fn intent(keyring_type: KeyringType, from: &str) -> SignIntent {
    SignIntent {
        origin: ORIGIN.to_string(),
        keyring_type,
        from: from.to_string(),
        kind: ApprovalKind::SignText,
        payload: json!("0x68656c6c6f"),
        chain_id: Some(1),
        brand_name: None,
        multisig: None,
    }
}

fn spawn_sign(
    orchestrator: &Arc<Orchestrator>,
    intent: SignIntent,
) -> tokio::task::JoinHandle<KeyringResult<Value>> {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move { orchestrator.submit_sign_intent(intent).await })
}

/// Wait until the pending approval is a request other than `previous`.
async fn wait_for_pending(orchestrator: &Orchestrator, previous: Option<ApprovalId>) -> ApprovalId {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(current) = orchestrator.current_approval()
                && Some(current.id) != previous
            {
                return current.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no approval became pending")
}

/// Submit `intent` and approve it once it is pending.
async fn sign_approved(orchestrator: &Arc<Orchestrator>, intent: SignIntent) -> KeyringResult<Value> {
    let task = spawn_sign(orchestrator, intent);
    let id = wait_for_pending(orchestrator, None).await;
    assert!(orchestrator.resolve_approval(id, json!({ "approved": true })));
    task.await.unwrap()
}

async fn wait_for_event(
    rx: &mut broadcast::Receiver<WalletEvent>,
    matches: impl Fn(&WalletEvent) -> bool,
) -> WalletEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event was not published")
}

// =============================================================================
// Approval boundary
// =============================================================================

#[tokio::test]
async fn test_user_resolution_completes_request() {
    let h = harness(Arc::new(EchoCapability));
    add_software(&h.orchestrator, &[ALICE]);
    let mut rx = h.orchestrator.subscribe();

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    let id = wait_for_pending(&h.orchestrator, None).await;
    assert!(h.orchestrator.resolve_approval(id, json!({ "approved": true })));
    // Second settle is a no-op.
    assert!(!h.orchestrator.reject_approval(id, "too late"));

    assert_eq!(task.await.unwrap().unwrap(), json!(format!("signed:{ALICE}")));
    let finished = wait_for_event(&mut rx, |e| matches!(e, WalletEvent::SignFinished { .. })).await;
    assert!(matches!(
        finished,
        WalletEvent::SignFinished { request_id, success: true, status: SignStatus::Submitted, .. } if request_id == id
    ));
}

#[tokio::test]
async fn test_account_switch_rejects_in_flight_request() {
    let h = harness(Arc::new(EchoCapability));
    add_software(&h.orchestrator, &[ALICE, BOB]);

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    wait_for_pending(&h.orchestrator, None).await;

    h.orchestrator
        .change_account(BOB, KeyringType::Software, None)
        .unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, KeyringError::UserRejected(_)));
    assert_eq!(err.sign_status(), SignStatus::Rejected);
    assert!(h.orchestrator.current_approval().is_none());
    assert_eq!(h.orchestrator.current_account().unwrap().address, BOB);
}

#[tokio::test]
async fn test_requests_are_served_in_submission_order() {
    let h = harness(Arc::new(EchoCapability));
    add_software(&h.orchestrator, &[ALICE]);

    let first = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    let first_id = wait_for_pending(&h.orchestrator, None).await;

    let second = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.orchestrator.pending_approvals() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.orchestrator.current_approval().unwrap().id, first_id);

    h.orchestrator.reject_approval(first_id, "no");
    let second_id = wait_for_pending(&h.orchestrator, Some(first_id)).await;
    h.orchestrator.resolve_approval(second_id, json!({ "approved": true }));

    assert!(matches!(first.await.unwrap(), Err(KeyringError::UserRejected(_))));
    assert_eq!(second.await.unwrap().unwrap(), json!(format!("signed:{ALICE}")));
    assert_eq!(h.orchestrator.pending_approvals(), 0);
}

#[tokio::test]
async fn test_capability_signs_only_after_approval() {
    let capability = Arc::new(CountingCapability::default());
    let h = harness(capability.clone());
    add_software(&h.orchestrator, &[ALICE]);

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    let id = wait_for_pending(&h.orchestrator, None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(capability.calls(), 0);
    assert!(!task.is_finished());

    h.orchestrator.resolve_approval(id, json!({ "approved": true }));
    assert_eq!(task.await.unwrap().unwrap(), json!(format!("signed:{ALICE}")));
    assert_eq!(capability.calls(), 1);

    // A rejected request never reaches the capability.
    let task = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    let next = wait_for_pending(&h.orchestrator, Some(id)).await;
    h.orchestrator.reject_approval(next, "not now");
    assert!(matches!(task.await.unwrap(), Err(KeyringError::UserRejected(_))));
    assert_eq!(capability.calls(), 1);
}

#[tokio::test]
async fn test_abandoned_request_frees_the_queue() {
    let h = harness(Arc::new(EchoCapability));
    add_software(&h.orchestrator, &[ALICE]);

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::Software, ALICE));
    let abandoned = wait_for_pending(&h.orchestrator, None).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(h.orchestrator.pending_approvals(), 0);
    assert!(h.orchestrator.current_approval().is_none());
    assert!(!h.orchestrator.resolve_approval(abandoned, json!({ "approved": true })));

    let result = sign_approved(&h.orchestrator, intent(KeyringType::Software, ALICE)).await;
    assert_eq!(result.unwrap(), json!(format!("signed:{ALICE}")));
}

// =============================================================================
// Connected sites
// =============================================================================

#[tokio::test]
async fn test_chain_events_are_ordered() {
    let h = harness(Arc::new(EchoCapability));
    let mut rx = h.orchestrator.subscribe();

    h.orchestrator
        .connect_site("https://polygon.example", "Poly", "", 137)
        .unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        WalletEvent::InternalChainChanged {
            origin: "https://polygon.example".to_string(),
            chain_id: "0x89".to_string(),
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        WalletEvent::ChainChanged {
            origin: "https://polygon.example".to_string(),
            chain_id: "0x89".to_string(),
        }
    );
}

#[tokio::test]
async fn test_removed_site_loses_access() {
    let h = harness(Arc::new(EchoCapability));
    add_software(&h.orchestrator, &[ALICE]);
    let mut rx = h.orchestrator.subscribe();

    assert!(h.orchestrator.remove_site(ORIGIN).unwrap());
    assert_eq!(
        rx.recv().await.unwrap(),
        WalletEvent::AccountsChanged {
            origin: Some(ORIGIN.to_string()),
            accounts: Vec::new(),
        }
    );

    let err = h
        .orchestrator
        .submit_sign_intent(intent(KeyringType::Software, ALICE))
        .await
        .unwrap_err();
    assert!(matches!(err, KeyringError::OriginNotPermitted(_)));
    assert_eq!(h.orchestrator.pending_approvals(), 0);
}

// =============================================================================
// Remote sessions
// =============================================================================

async fn pair_phone(h: &Harness) {
    let pairing = h
        .orchestrator
        .init_remote_session("MetaMask", None)
        .await
        .unwrap();
    assert!(pairing.uri.contains(&pairing.topic.to_string()));
    h.orchestrator
        .import_remote_account(pairing.stash_id, pairing.topic, PHONE, 1)
        .unwrap();
}

fn phone_intent() -> SignIntent {
    let mut intent = intent(KeyringType::RemoteSession, PHONE);
    intent.brand_name = Some("MetaMask".to_string());
    intent
}

#[tokio::test]
async fn test_remote_resend_reuses_relay_identity() {
    let h = harness(Arc::new(EchoCapability));
    pair_phone(&h).await;
    let mut rx = h.orchestrator.subscribe();

    let task = spawn_sign(&h.orchestrator, phone_intent());
    wait_for_event(&mut rx, |e| {
        matches!(e, WalletEvent::SessionStatusChanged { status: SessionStatus::Submitted, .. })
    })
    .await;

    let status = h
        .orchestrator
        .handle_session_event(PHONE, "MetaMask", SessionEvent::Disconnected)
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Disconnected);

    let status = h
        .orchestrator
        .resend_remote_session(PHONE, "MetaMask")
        .await
        .unwrap();
    assert_eq!(status, SessionStatus::Waiting);

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].topic, sent[1].topic);
    assert_eq!(sent[0].request_id, sent[1].request_id);

    h.orchestrator
        .handle_session_event(
            PHONE,
            "MetaMask",
            SessionEvent::Signed {
                request_id: sent[0].request_id,
                signature: json!("0xphone"),
            },
        )
        .await
        .unwrap();
    assert_eq!(task.await.unwrap().unwrap(), json!("0xphone"));
}

#[tokio::test]
async fn test_remote_timeout_fails_with_transport_error() {
    let settings = Settings::for_tests().with_remote_timeout_ms(100);
    let h = harness_with(&settings, Arc::new(EchoCapability), MockSafe::new(&[], 1));
    pair_phone(&h).await;

    let err = h
        .orchestrator
        .submit_sign_intent(phone_intent())
        .await
        .unwrap_err();
    assert!(matches!(err, KeyringError::TransportFailure(_)));
    assert!(err.is_retryable());

    let info = h
        .orchestrator
        .remote_session_status(PHONE, "MetaMask")
        .unwrap()
        .unwrap();
    assert_eq!(info.status, SessionStatus::Rejected);
}

#[tokio::test]
async fn test_removing_last_remote_account_releases_relay() {
    let h = harness(Arc::new(EchoCapability));
    pair_phone(&h).await;
    let topic = h
        .orchestrator
        .remote_session_status(PHONE, "MetaMask")
        .unwrap()
        .unwrap()
        .topic;

    h.orchestrator
        .remove_address(PHONE, KeyringType::RemoteSession, Some("MetaMask"))
        .await
        .unwrap();

    assert_eq!(*h.transport.closed.lock().unwrap(), vec![topic]);
    assert!(h.orchestrator.accounts().unwrap().is_empty());
}

// =============================================================================
// QR relay
// =============================================================================

#[tokio::test]
async fn test_qr_relay_checks_request_id() {
    let h = harness(Arc::new(EchoCapability));
    let sync = base64::engine::general_purpose::STANDARD
        .encode(json!({ "fingerprint": "f00dcafe", "accounts": [DEVICE] }).to_string());
    let stashed = h.orchestrator.submit_qr_sync(&sync).unwrap();
    h.orchestrator.promote_keyring(stashed.stash_id).unwrap();
    let mut rx = h.orchestrator.subscribe();

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::QrRelay, DEVICE));
    let WalletEvent::QrPayloadReady { request_id, .. } =
        wait_for_event(&mut rx, |e| matches!(e, WalletEvent::QrPayloadReady { .. })).await
    else {
        unreachable!();
    };

    assert_eq!(h.orchestrator.begin_qr_scan(request_id).unwrap(), QrStatus::Sign);

    let foreign = encode_signature_frame(uuid::Uuid::new_v4(), json!("0xother")).unwrap();
    assert!(matches!(
        h.orchestrator.submit_qr_signature(request_id, &foreign),
        Err(KeyringError::StateConflict(_))
    ));
    assert_eq!(
        h.orchestrator
            .report_qr_scan_error(request_id, "camera blurred")
            .unwrap(),
        QrStatus::Sign
    );

    let answer = encode_signature_frame(request_id, json!("0xqr")).unwrap();
    assert_eq!(
        h.orchestrator.submit_qr_signature(request_id, &answer).unwrap(),
        QrStatus::Done
    );
    assert_eq!(task.await.unwrap().unwrap(), json!("0xqr"));

    // The relay is free again.
    assert!(matches!(
        h.orchestrator.begin_qr_scan(request_id),
        Err(KeyringError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_abandoned_qr_request_releases_relay() {
    let h = harness(Arc::new(EchoCapability));
    let sync = base64::engine::general_purpose::STANDARD
        .encode(json!({ "fingerprint": "f00dcafe", "accounts": [DEVICE] }).to_string());
    let stashed = h.orchestrator.submit_qr_sync(&sync).unwrap();
    h.orchestrator.promote_keyring(stashed.stash_id).unwrap();
    let mut rx = h.orchestrator.subscribe();

    let task = spawn_sign(&h.orchestrator, intent(KeyringType::QrRelay, DEVICE));
    let WalletEvent::QrPayloadReady { request_id, .. } =
        wait_for_event(&mut rx, |e| matches!(e, WalletEvent::QrPayloadReady { .. })).await
    else {
        unreachable!();
    };
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(h.orchestrator.pending_approvals(), 0);
    assert!(matches!(
        h.orchestrator.begin_qr_scan(request_id),
        Err(KeyringError::NotFound(_))
    ));
}

// =============================================================================
// Multisig
// =============================================================================

fn owner_intent(owner: &str) -> SignIntent {
    let mut intent = intent(KeyringType::Software, owner);
    intent.multisig = Some(MultisigTarget {
        safe_address: SAFE.to_string(),
    });
    intent
}

#[tokio::test]
async fn test_multisig_collects_owner_signatures_to_threshold() {
    let h = harness_with(
        &Settings::for_tests(),
        Arc::new(EchoCapability),
        MockSafe::new(&[ALICE, BOB], 2),
    );
    add_software(&h.orchestrator, &[ALICE, BOB, CAROL]);
    h.orchestrator.import_safe(SAFE, 1).unwrap();

    let mut build = intent(KeyringType::Multisig, SAFE);
    build.kind = ApprovalKind::SignTx;
    build.payload = json!({ "to": BOB, "value": "1000", "data": "0x" });
    let built = h.orchestrator.submit_sign_intent(build).await.unwrap();
    let safe_tx_hash = built["safeTxHash"].as_str().unwrap().to_string();

    sign_approved(&h.orchestrator, owner_intent(ALICE)).await.unwrap();
    // Re-signing by the same owner does not add a confirmation.
    sign_approved(&h.orchestrator, owner_intent(ALICE)).await.unwrap();
    assert_eq!(*h.safe.proposals.lock().unwrap(), 1);
    assert!(!h.orchestrator.check_multisig_executable(SAFE).await.unwrap());
    assert!(matches!(
        h.orchestrator.execute_multisig(SAFE).await,
        Err(KeyringError::StateConflict(_))
    ));

    assert!(matches!(
        h.orchestrator.submit_sign_intent(owner_intent(CAROL)).await,
        Err(KeyringError::InvalidInput(_))
    ));

    sign_approved(&h.orchestrator, owner_intent(BOB)).await.unwrap();
    assert!(h.orchestrator.check_multisig_executable(SAFE).await.unwrap());

    // Raising the threshold takes the transaction back to signing.
    *h.safe.threshold.lock().unwrap() = 3;
    assert!(!h.orchestrator.check_multisig_executable(SAFE).await.unwrap());
    *h.safe.threshold.lock().unwrap() = 2;

    assert_eq!(h.orchestrator.execute_multisig(SAFE).await.unwrap(), "0xexecuted");
    let tx = h.orchestrator.multisig_signatures(SAFE).unwrap();
    assert_eq!(tx.safe_tx_hash, safe_tx_hash);
    assert_eq!(tx.phase, MultisigPhase::Executed);
    assert_eq!(tx.confirmations(), 2);
}

#[tokio::test]
async fn test_rebuilding_discards_previous_proposal() {
    let h = harness_with(
        &Settings::for_tests(),
        Arc::new(EchoCapability),
        MockSafe::new(&[ALICE], 1),
    );
    h.orchestrator.import_safe(SAFE, 1).unwrap();

    let mut build = intent(KeyringType::Multisig, SAFE);
    build.payload = json!({ "to": ALICE, "value": "1" });
    let first = h.orchestrator.submit_sign_intent(build.clone()).await.unwrap();

    build.payload = json!({ "to": ALICE, "value": "2" });
    let second = h.orchestrator.submit_sign_intent(build).await.unwrap();
    assert_eq!(second["discardedSafeTxHash"], first["safeTxHash"]);
    assert!(h.orchestrator.clear_multisig(SAFE).unwrap());
    assert!(matches!(
        h.orchestrator.multisig_signatures(SAFE),
        Err(KeyringError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_proposal_is_posted_on_retry() {
    let h = harness_with(
        &Settings::for_tests(),
        Arc::new(EchoCapability),
        MockSafe::new(&[ALICE, BOB], 2),
    );
    add_software(&h.orchestrator, &[ALICE]);
    h.orchestrator.import_safe(SAFE, 1).unwrap();

    let mut build = intent(KeyringType::Multisig, SAFE);
    build.payload = json!({ "to": BOB, "value": "5" });
    h.orchestrator.submit_sign_intent(build).await.unwrap();

    *h.safe.failing_proposals.lock().unwrap() = 1;
    let err = sign_approved(&h.orchestrator, owner_intent(ALICE))
        .await
        .unwrap_err();
    let KeyringError::PersistenceFailure {
        request_id: Some(request_id),
        ..
    } = &err
    else {
        panic!("expected a retryable persistence failure, got {err:?}");
    };
    let request_id = *request_id;
    assert_eq!(*h.safe.proposals.lock().unwrap(), 0);
    assert_eq!(h.orchestrator.multisig_signatures(SAFE).unwrap().confirmations(), 0);

    let retried = h.orchestrator.retry_persistence(request_id).await.unwrap();
    assert_eq!(retried, json!(format!("signed:{ALICE}")));
    assert_eq!(*h.safe.proposals.lock().unwrap(), 1);
    assert_eq!(h.orchestrator.multisig_signatures(SAFE).unwrap().confirmations(), 1);

    // The retained result is gone once saved.
    assert!(matches!(
        h.orchestrator.retry_persistence(request_id).await,
        Err(KeyringError::NotFound(_))
    ));
}

// =============================================================================
// Durability
// =============================================================================

fn backends(safe: MockSafe) -> Backends {
    Backends {
        software: Some(Arc::new(EchoCapability) as Arc<dyn SignerCapability>),
        hardware: None,
        transport: Arc::new(RecordingTransport::default()),
        safe: Arc::new(safe),
    }
}

fn reopen(path: &std::path::Path) -> Orchestrator {
    let orchestrator = Orchestrator::new(
        Storage::open(path).unwrap(),
        &Settings::for_tests(),
        backends(MockSafe::new(&[], 1)),
    )
    .unwrap();
    orchestrator.init().unwrap();
    orchestrator
}

#[tokio::test]
async fn test_discarded_proposal_stays_discarded_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keyring.redb");

    let live_hash = {
        let orchestrator = reopen(&path);
        orchestrator.connect_site(ORIGIN, "dApp", "", 1).unwrap();
        orchestrator.import_safe(SAFE, 1).unwrap();
        orchestrator.import_safe(VAULT, 1).unwrap();

        // The discarded Safe sorts after the live one, so it would be restored last.
        let mut build = intent(KeyringType::Multisig, VAULT);
        build.payload = json!({ "to": ALICE, "value": "1" });
        let first = orchestrator.submit_sign_intent(build).await.unwrap();

        let mut build = intent(KeyringType::Multisig, SAFE);
        build.payload = json!({ "to": ALICE, "value": "2" });
        let second = orchestrator.submit_sign_intent(build).await.unwrap();
        assert_eq!(second["discardedSafeTxHash"], first["safeTxHash"]);
        second["safeTxHash"].as_str().unwrap().to_string()
    };

    let orchestrator = reopen(&path);
    assert_eq!(orchestrator.multisig_signatures(SAFE).unwrap().safe_tx_hash, live_hash);
    assert!(matches!(
        orchestrator.multisig_signatures(VAULT),
        Err(KeyringError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_keyrings_and_sites_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keyring.redb");

    {
        let orchestrator = reopen(&path);
        orchestrator.connect_site(ORIGIN, "dApp", "", 10).unwrap();
        add_software(&orchestrator, &[ALICE]);
        orchestrator.import_watch_address(BOB).unwrap();
        // Stashed instances are never written.
        orchestrator
            .stash_software_keyring(SoftwareKind::PrivateKey, "vault", &[CAROL.to_string()])
            .unwrap();
    }

    let orchestrator = reopen(&path);

    let mut addresses: Vec<String> = orchestrator
        .accounts()
        .unwrap()
        .into_iter()
        .map(|a| a.address)
        .collect();
    addresses.sort();
    assert_eq!(addresses, vec![ALICE.to_string(), BOB.to_string()]);

    let sites = orchestrator.list_recent_sites().unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].chain_id, 10);

    // Each start signs with a new key; the chain still verifies end to end.
    let audit = orchestrator.audit_logger();
    let seq = audit.current_seq();
    let first_key = audit.get_entry(1).unwrap().unwrap().signer_key;
    assert_ne!(first_key, audit.verifying_key_hex());
    assert!(audit.verify_chain(1, seq).unwrap());
}

#[tokio::test]
async fn test_retry_without_unsaved_result() {
    let h = harness(Arc::new(EchoCapability));
    assert!(matches!(
        h.orchestrator.retry_persistence(uuid::Uuid::new_v4()).await,
        Err(KeyringError::NotFound(_))
    ));
}
