//! Tamper-evident trail of approval, account and multisig lifecycle events.
//!
//! Every entry links to its predecessor by SHA-256 and is signed with the
//! ed25519 key of the process that wrote it. Each process generates a fresh
//! key, so an entry names its signing key and the chain accepts a new key
//! only on a `ServiceStart` entry.
//!
//! Entries never contain signatures, payloads or key material; only which
//! request, origin or account an event concerned and how it ended.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{KeyringError, KeyringResult};
use crate::storage::Storage;

/// `prev_hash` of the first entry.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ApprovalSubmitted,
    ApprovalResolved,
    ApprovalRejected,
    ApprovalsCleared,
    AccountChanged,
    KeyringPromoted,
    KeyringRemoved,
    MultisigBuilt,
    MultisigConfirmed,
    MultisigExecuted,
    /// Written once per process; introduces its signing key.
    ServiceStart,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ApprovalSubmitted => "approval_submitted",
            Self::ApprovalResolved => "approval_resolved",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalsCleared => "approvals_cleared",
            Self::AccountChanged => "account_changed",
            Self::KeyringPromoted => "keyring_promoted",
            Self::KeyringRemoved => "keyring_removed",
            Self::MultisigBuilt => "multisig_built",
            Self::MultisigConfirmed => "multisig_confirmed",
            Self::MultisigExecuted => "multisig_executed",
            Self::ServiceStart => "service_start",
        };
        f.write_str(name)
    }
}

/// Who an event is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditActor {
    /// dApp origin that submitted an intent.
    Origin { origin: String },
    /// Wallet account: a signing owner, the active account or a safe.
    Account { address: String },
    /// The orchestrator acting on its own (queue clears, promotions).
    Orchestrator,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { reason: String },
    Pending,
}

/// What happened, before it is sequenced and signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// A sequenced, chained and signed [`AuditRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub record: AuditRecord,
    /// Hex verifying key of the process that wrote the entry.
    pub signer_key: String,
    /// Hash of the previous entry.
    pub prev_hash: String,
    /// Hex ed25519 signature over every other field.
    pub signature: String,
}

/// Signed portion of an entry.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedFields<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    record: &'a AuditRecord,
    signer_key: &'a str,
    prev_hash: &'a str,
}

impl AuditEntry {
    fn signed_bytes(&self) -> KeyringResult<Vec<u8>> {
        Ok(serde_json::to_vec(&SignedFields {
            seq: self.seq,
            timestamp: &self.timestamp,
            record: &self.record,
            signer_key: &self.signer_key,
            prev_hash: &self.prev_hash,
        })?)
    }

    /// Chain hash: SHA-256 over the signed fields and the signature.
    pub fn hash(&self) -> KeyringResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.signed_bytes()?);
        hasher.update(self.signature.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Check the signature against the key the entry names.
    pub fn verify_signature(&self) -> bool {
        let Some(key) = decode_verifying_key(&self.signer_key) else {
            return false;
        };
        let Some(signature) = hex::decode(&self.signature)
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
        else {
            return false;
        };
        self.signed_bytes()
            .is_ok_and(|bytes| key.verify(&bytes, &signature).is_ok())
    }
}

fn decode_verifying_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

pub struct AuditLogger {
    storage: Storage,
    signing_key: SigningKey,
    signer_key: String,
    current_seq: AtomicU64,
    /// Held across read-previous/write-next so the chain never forks.
    append_lock: Mutex<()>,
}

impl AuditLogger {
    /// Continue the stored chain with a freshly generated process key.
    pub fn new(storage: Storage) -> KeyringResult<Self> {
        Self::with_signing_key(storage, SigningKey::generate(&mut OsRng))
    }

    pub fn with_signing_key(storage: Storage, signing_key: SigningKey) -> KeyringResult<Self> {
        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);
        let signer_key = hex::encode(signing_key.verifying_key().as_bytes());
        Ok(Self {
            storage,
            signing_key,
            signer_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    /// Hex key this process signs with; published by `/build-info`.
    pub fn verifying_key_hex(&self) -> String {
        self.signer_key.clone()
    }

    /// Sequence, chain, sign and store `record`. Returns the new sequence number.
    pub fn append(&self, record: AuditRecord) -> KeyringResult<u64> {
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| KeyringError::Internal("Audit append lock poisoned".to_string()))?;

        let seq = self.current_seq.load(Ordering::SeqCst) + 1;
        let prev_hash = match seq {
            1 => GENESIS_HASH.to_string(),
            _ => self.entry(seq - 1)?.hash()?,
        };

        let mut entry = AuditEntry {
            seq,
            timestamp: Utc::now(),
            record,
            signer_key: self.signer_key.clone(),
            prev_hash,
            signature: String::new(),
        };
        entry.signature = hex::encode(self.signing_key.sign(&entry.signed_bytes()?).to_bytes());

        self.storage.put_audit_entry(&entry)?;
        self.current_seq.store(seq, Ordering::SeqCst);
        tracing::debug!(seq, event_type = %entry.record.event_type, "Audit entry appended");
        Ok(seq)
    }

    /// Check links, signatures and key continuity for `start..=end`.
    ///
    /// The first entry in the range fixes the trusted key; only a
    /// `ServiceStart` entry may switch to another one.
    pub fn verify_chain(&self, start: u64, end: u64) -> KeyringResult<bool> {
        if start == 0 || start > end {
            return Ok(false);
        }

        let mut expected_prev = match start {
            1 => GENESIS_HASH.to_string(),
            _ => self.entry(start - 1)?.hash()?,
        };
        let mut trusted_key: Option<String> = None;

        for seq in start..=end {
            let entry = self.entry(seq)?;

            if entry.prev_hash != expected_prev {
                tracing::warn!(seq, expected = %expected_prev, actual = %entry.prev_hash, "Audit chain broken");
                return Ok(false);
            }
            let key_ok = trusted_key.as_deref().is_none_or(|key| {
                key == entry.signer_key || entry.record.event_type == AuditEventType::ServiceStart
            });
            if !key_ok {
                tracing::warn!(seq, signer_key = %entry.signer_key, "Audit key changed outside service start");
                return Ok(false);
            }
            if !entry.verify_signature() {
                tracing::warn!(seq, "Invalid signature on audit entry");
                return Ok(false);
            }

            expected_prev = entry.hash()?;
            trusted_key = Some(entry.signer_key);
        }
        Ok(true)
    }

    pub fn current_seq(&self) -> u64 {
        self.current_seq.load(Ordering::SeqCst)
    }

    pub fn get_entry(&self, seq: u64) -> KeyringResult<Option<AuditEntry>> {
        self.storage.get_audit_entry(seq)
    }

    fn entry(&self, seq: u64) -> KeyringResult<AuditEntry> {
        self.storage
            .get_audit_entry(seq)?
            .ok_or_else(|| KeyringError::Storage(format!("Missing audit entry {seq}")))
    }
}
