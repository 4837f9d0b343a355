//! Multisig backend: Safe-style contracts requiring a signature threshold.
//!
//! Each instance tracks at most one in-progress transaction. Building a new
//! one discards the previous. Signatures are keyed by signer address so a
//! repeated signer never counts twice toward the threshold.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{KeyringError, KeyringResult};
use crate::keyring::{Account, KeyringType, normalize_address};

/// Lifecycle of a multisig transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultisigPhase {
    NoTx,
    Building,
    Signing,
    Executable,
    Executed,
    Discarded,
}

impl std::fmt::Display for MultisigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTx => write!(f, "no_tx"),
            Self::Building => write!(f, "building"),
            Self::Signing => write!(f, "signing"),
            Self::Executable => write!(f, "executable"),
            Self::Executed => write!(f, "executed"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

/// An in-progress multisig transaction with collected owner signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigTransaction {
    pub safe_address: String,
    pub network_id: u64,
    pub safe_tx_hash: String,
    pub tx: Value,
    pub phase: MultisigPhase,
    /// Signer address to signature.
    pub signatures: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_tx_hash: Option<String>,
}

impl MultisigTransaction {
    /// Build a transaction and move it to `Signing`.
    pub fn build(safe_address: &str, network_id: u64, tx: Value) -> KeyringResult<Self> {
        if !tx.is_object() {
            return Err(KeyringError::InvalidInput(
                "multisig transaction must be a JSON object".to_string(),
            ));
        }
        let mut built = Self {
            safe_address: safe_address.to_string(),
            network_id,
            safe_tx_hash: safe_tx_hash(safe_address, network_id, &tx)?,
            tx,
            phase: MultisigPhase::Building,
            signatures: BTreeMap::new(),
            created_at: Utc::now(),
            executed_tx_hash: None,
        };
        built.phase = MultisigPhase::Signing;
        Ok(built)
    }

    /// Record `signer`'s signature, replacing any earlier one. Returns the distinct signer count.
    pub fn add_signature(&mut self, signer: &str, signature: &str) -> KeyringResult<usize> {
        self.ensure_signable()?;
        let signer = normalize_address(signer)?;
        self.signatures.insert(signer, signature.to_string());
        Ok(self.signatures.len())
    }

    /// Fails unless owner signatures are still being collected.
    pub fn ensure_signable(&self) -> KeyringResult<()> {
        if matches!(self.phase, MultisigPhase::Signing | MultisigPhase::Executable) {
            Ok(())
        } else {
            Err(KeyringError::StateConflict(format!(
                "multisig transaction is {}, cannot add signatures",
                self.phase
            )))
        }
    }

    pub fn confirmations(&self) -> usize {
        self.signatures.len()
    }

    /// Re-evaluate executability against the contract threshold.
    ///
    /// Owners may raise the threshold after build, so an executable
    /// transaction can fall back to `Signing`.
    pub fn refresh(&mut self, threshold: usize) -> MultisigPhase {
        if matches!(self.phase, MultisigPhase::Signing | MultisigPhase::Executable) {
            self.phase = if self.confirmations() >= threshold.max(1) {
                MultisigPhase::Executable
            } else {
                MultisigPhase::Signing
            };
        }
        self.phase
    }

    pub fn mark_executed(&mut self, tx_hash: String) -> KeyringResult<()> {
        if self.phase != MultisigPhase::Executable {
            return Err(KeyringError::StateConflict(format!(
                "multisig transaction is {}, not executable",
                self.phase
            )));
        }
        self.phase = MultisigPhase::Executed;
        self.executed_tx_hash = Some(tx_hash);
        Ok(())
    }

    /// Signatures sorted by signer address, concatenated as the contract expects.
    pub fn packed_signatures(&self) -> String {
        let body: String = self
            .signatures
            .values()
            .map(|s| s.trim_start_matches("0x"))
            .collect();
        format!("0x{body}")
    }
}

/// Content hash identifying a proposal: SHA-256 over canonical JSON.
fn safe_tx_hash(safe_address: &str, network_id: u64, tx: &Value) -> KeyringResult<String> {
    let canonical = serde_json::to_vec(&json!({
        "safe": safe_address,
        "networkId": network_id,
        "tx": tx,
    }))?;
    Ok(format!("0x{}", hex::encode(Sha256::digest(&canonical))))
}

/// Keyring of watched Safe contracts, keyed by address with their network.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MultisigKeyring {
    safes: BTreeMap<String, u64>,
    #[serde(skip)]
    current: Option<MultisigTransaction>,
}

impl MultisigKeyring {
    pub const BRAND_NAME: &'static str = "Safe";

    pub fn add_safe(&mut self, safe_address: &str, network_id: u64) -> KeyringResult<String> {
        let safe = normalize_address(safe_address)?;
        self.safes.insert(safe.clone(), network_id);
        Ok(safe)
    }

    pub fn remove_safe(&mut self, safe_address: &str) -> bool {
        if self
            .current
            .as_ref()
            .is_some_and(|tx| tx.safe_address == safe_address)
        {
            self.current = None;
        }
        self.safes.remove(safe_address).is_some()
    }

    pub fn safes(&self) -> impl Iterator<Item = (&str, u64)> {
        self.safes.iter().map(|(s, n)| (s.as_str(), *n))
    }

    pub fn network_id(&self, safe_address: &str) -> Option<u64> {
        self.safes.get(safe_address).copied()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.safes
            .keys()
            .map(|s| Account::new(s.clone(), KeyringType::Multisig, Self::BRAND_NAME))
            .collect()
    }

    pub fn phase(&self) -> MultisigPhase {
        self.current.as_ref().map_or(MultisigPhase::NoTx, |tx| tx.phase)
    }

    /// Build a new transaction for `safe_address`, replacing any in-progress one.
    ///
    /// Returns the new transaction and the discarded one, if any.
    pub fn build(
        &mut self,
        safe_address: &str,
        tx: Value,
    ) -> KeyringResult<(&MultisigTransaction, Option<MultisigTransaction>)> {
        let network_id = self
            .network_id(safe_address)
            .ok_or_else(|| KeyringError::NotFound(format!("safe {safe_address}")))?;
        let built = MultisigTransaction::build(safe_address, network_id, tx)?;

        let discarded = self.current.take().map(|mut old| {
            tracing::warn!(
                safe_address = %old.safe_address,
                safe_tx_hash = %old.safe_tx_hash,
                confirmations = old.confirmations(),
                "Discarding in-progress multisig transaction"
            );
            old.phase = MultisigPhase::Discarded;
            old
        });

        tracing::info!(
            safe_address,
            safe_tx_hash = %built.safe_tx_hash,
            "Built multisig transaction"
        );
        let current: &MultisigTransaction = self.current.insert(built);
        Ok((current, discarded))
    }

    pub fn current(&self) -> Option<&MultisigTransaction> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut MultisigTransaction> {
        self.current.as_mut()
    }

    /// In-progress transaction for `safe_address`.
    pub fn current_for(&mut self, safe_address: &str) -> KeyringResult<&mut MultisigTransaction> {
        self.current
            .as_mut()
            .filter(|tx| tx.safe_address == safe_address)
            .ok_or_else(|| {
                KeyringError::NotFound(format!("no multisig transaction for {safe_address}"))
            })
    }

    /// Drop the in-progress transaction.
    pub fn clear(&mut self) -> Option<MultisigTransaction> {
        self.current.take()
    }

    /// Reinstate a transaction loaded from storage.
    pub fn restore(&mut self, tx: MultisigTransaction) {
        if self.safes.contains_key(&tx.safe_address)
            && matches!(tx.phase, MultisigPhase::Signing | MultisigPhase::Executable)
        {
            self.current = Some(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAFE: &str = "0x5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe";
    const OWNER_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OWNER_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn keyring() -> MultisigKeyring {
        let mut keyring = MultisigKeyring::default();
        keyring.add_safe(SAFE, 1).unwrap();
        keyring
    }

    #[test]
    fn test_duplicate_signer_counts_once() {
        let mut keyring = keyring();
        keyring.build(SAFE, json!({"to": OWNER_A, "value": "1"})).unwrap();
        let tx = keyring.current_for(SAFE).unwrap();

        assert_eq!(tx.add_signature(OWNER_A, "0x01").unwrap(), 1);
        assert_eq!(tx.add_signature(OWNER_A, "0x02").unwrap(), 1);
        assert_eq!(tx.refresh(2), MultisigPhase::Signing);
        assert_eq!(tx.signatures[OWNER_A], "0x02");

        assert_eq!(tx.add_signature(OWNER_B, "0x03").unwrap(), 2);
        assert_eq!(tx.refresh(2), MultisigPhase::Executable);
        assert_eq!(tx.refresh(3), MultisigPhase::Signing);
    }

    #[test]
    fn test_build_discards_previous() {
        let mut keyring = keyring();
        let first_hash = keyring
            .build(SAFE, json!({"nonce": 1}))
            .unwrap()
            .0
            .safe_tx_hash
            .clone();
        let (second, discarded) = keyring.build(SAFE, json!({"nonce": 2})).unwrap();
        assert_ne!(second.safe_tx_hash, first_hash);

        let discarded = discarded.unwrap();
        assert_eq!(discarded.safe_tx_hash, first_hash);
        assert_eq!(discarded.phase, MultisigPhase::Discarded);
    }

    #[test]
    fn test_restore_skips_discarded() {
        let mut keyring = keyring();
        let mut old = MultisigTransaction::build(SAFE, 1, json!({"nonce": 1})).unwrap();
        old.phase = MultisigPhase::Discarded;
        assert!(old.ensure_signable().is_err());

        keyring.restore(old);
        assert_eq!(keyring.phase(), MultisigPhase::NoTx);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = MultisigTransaction::build(SAFE, 1, json!({"b": 1, "a": 2})).unwrap();
        let b = MultisigTransaction::build(SAFE, 1, json!({"a": 2, "b": 1})).unwrap();
        let c = MultisigTransaction::build(SAFE, 5, json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a.safe_tx_hash, b.safe_tx_hash);
        assert_ne!(a.safe_tx_hash, c.safe_tx_hash);
    }

    #[test]
    fn test_execute_requires_threshold() {
        let mut tx = MultisigTransaction::build(SAFE, 1, json!({})).unwrap();
        assert!(tx.mark_executed("0xhash".to_string()).is_err());
        tx.add_signature(OWNER_A, "0xaa").unwrap();
        tx.refresh(1);
        tx.mark_executed("0xhash".to_string()).unwrap();
        assert_eq!(tx.phase, MultisigPhase::Executed);
        assert!(tx.add_signature(OWNER_B, "0xbb").is_err());
    }

    #[test]
    fn test_packed_signatures_sorted_by_signer() {
        let mut tx = MultisigTransaction::build(SAFE, 1, json!({})).unwrap();
        tx.add_signature(OWNER_B, "0xbb").unwrap();
        tx.add_signature(OWNER_A, "0xaa").unwrap();
        assert_eq!(tx.packed_signatures(), "0xaabb");
    }

    #[test]
    fn test_unknown_safe_and_non_object_tx() {
        let mut keyring = keyring();
        assert!(matches!(
            keyring.build(OWNER_A, json!({})),
            Err(KeyringError::NotFound(_))
        ));
        assert!(matches!(
            keyring.build(SAFE, json!("raw")),
            Err(KeyringError::InvalidInput(_))
        ));
        assert_eq!(keyring.phase(), MultisigPhase::NoTx);
    }

    #[test]
    fn test_remove_safe_drops_transaction() {
        let mut keyring = keyring();
        keyring.build(SAFE, json!({})).unwrap();
        assert!(keyring.remove_safe(SAFE));
        assert!(keyring.current().is_none());
        assert!(keyring.accounts().is_empty());
    }
}
