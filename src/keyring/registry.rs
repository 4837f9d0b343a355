//! Keyring registry: an arena of backend instances with a persisted set and a stash.
//!
//! Instances are addressed by stable integer handles. A freshly created
//! instance lives in the stash until the user confirms it; only promoted
//! instances are persisted, visible to [`KeyringRegistry::get_by_type`] and
//! eligible to sign.

use std::collections::{BTreeMap, BTreeSet};

use super::backend::Keyring;
use super::types::{Account, KeyringId, KeyringType};
use crate::error::{KeyringError, KeyringResult};
use crate::session::MultisigTransaction;
use crate::storage::Storage;

pub struct KeyringRegistry {
    arena: BTreeMap<KeyringId, Keyring>,
    /// Persisted handles in insertion order.
    persisted: Vec<KeyringId>,
    stashed: BTreeSet<KeyringId>,
    next_id: KeyringId,
    storage: Option<Storage>,
}

impl KeyringRegistry {
    /// Registry without durable storage.
    pub fn in_memory() -> Self {
        Self {
            arena: BTreeMap::new(),
            persisted: Vec::new(),
            stashed: BTreeSet::new(),
            next_id: 1,
            storage: None,
        }
    }

    /// Restore persisted instances (and any open multisig proposals) from storage.
    pub fn load(storage: Storage) -> KeyringResult<Self> {
        let records: Vec<(u64, Keyring)> = storage.list_keyrings()?;
        let mut registry = Self::in_memory();

        for (id, mut keyring) in records {
            if let Some(multisig) = keyring.as_multisig_mut() {
                let safes: Vec<String> = multisig.safes().map(|(s, _)| s.to_string()).collect();
                for safe in safes {
                    if let Some(tx) = storage.get_multisig_transaction::<MultisigTransaction>(&safe)? {
                        multisig.restore(tx);
                    }
                }
            }
            registry.arena.insert(id, keyring);
            registry.persisted.push(id);
            registry.next_id = registry.next_id.max(id + 1);
        }

        tracing::info!(keyrings = registry.persisted.len(), "Keyring registry loaded");
        registry.storage = Some(storage);
        Ok(registry)
    }

    fn allocate(&mut self, keyring: Keyring) -> KeyringId {
        let id = self.next_id;
        self.next_id += 1;
        self.arena.insert(id, keyring);
        id
    }

    /// Hold a new instance until the user confirms it.
    pub fn add_to_stash(&mut self, keyring: Keyring) -> KeyringId {
        let keyring_type = keyring.keyring_type();
        let id = self.allocate(keyring);
        self.stashed.insert(id);
        tracing::debug!(keyring_id = id, keyring_type = %keyring_type, "Stashed keyring");
        id
    }

    pub fn get_stashed(&self, id: KeyringId) -> KeyringResult<&Keyring> {
        if !self.stashed.contains(&id) {
            return Err(KeyringError::NotFound(format!("stashed keyring {id}")));
        }
        self.arena
            .get(&id)
            .ok_or_else(|| KeyringError::NotFound(format!("stashed keyring {id}")))
    }

    pub fn is_stashed(&self, id: KeyringId) -> bool {
        self.stashed.contains(&id)
    }

    /// Move a stashed instance into the persisted set and save.
    ///
    /// Promoting an already persisted instance only saves it again.
    pub fn promote(&mut self, id: KeyringId) -> KeyringResult<()> {
        if self.stashed.remove(&id) {
            self.persisted.push(id);
            tracing::info!(keyring_id = id, "Promoted keyring");
        } else if !self.persisted.contains(&id) {
            return Err(KeyringError::NotFound(format!("keyring {id}")));
        }
        self.persist()
    }

    /// Add an instance straight to the persisted set.
    pub fn add_persisted(&mut self, keyring: Keyring) -> KeyringResult<KeyringId> {
        let id = self.allocate(keyring);
        self.persisted.push(id);
        self.persist()?;
        Ok(id)
    }

    /// Drop a stashed instance the user abandoned.
    pub fn discard_stashed(&mut self, id: KeyringId) -> Option<Keyring> {
        if self.stashed.remove(&id) {
            self.arena.remove(&id)
        } else {
            None
        }
    }

    /// Any instance, persisted or stashed.
    pub fn get(&self, id: KeyringId) -> KeyringResult<&Keyring> {
        self.arena
            .get(&id)
            .ok_or_else(|| KeyringError::NotFound(format!("keyring {id}")))
    }

    pub fn get_mut(&mut self, id: KeyringId) -> KeyringResult<&mut Keyring> {
        self.arena
            .get_mut(&id)
            .ok_or_else(|| KeyringError::NotFound(format!("keyring {id}")))
    }

    /// First persisted instance of a type. Stashed instances are never returned.
    pub fn get_by_type(&self, keyring_type: KeyringType) -> KeyringResult<&Keyring> {
        let id = self.id_by_type(keyring_type)?;
        self.get(id)
    }

    pub fn id_by_type(&self, keyring_type: KeyringType) -> KeyringResult<KeyringId> {
        self.find_persisted(|k| k.keyring_type() == keyring_type)
            .ok_or_else(|| KeyringError::NotFound(format!("no {keyring_type} keyring")))
    }

    /// First persisted instance matching `predicate`.
    pub fn find_persisted(&self, predicate: impl Fn(&Keyring) -> bool) -> Option<KeyringId> {
        self.persisted
            .iter()
            .copied()
            .find(|id| self.arena.get(id).is_some_and(&predicate))
    }

    /// The persisted instance of `keyring_type` that controls `address`.
    pub fn resolve_for_account(
        &self,
        address: &str,
        keyring_type: KeyringType,
    ) -> KeyringResult<KeyringId> {
        self.find_persisted(|k| k.keyring_type() == keyring_type && k.has_account(address, None))
            .ok_or_else(|| {
                KeyringError::NotFound(format!("no {keyring_type} keyring holds {address}"))
            })
    }

    /// Remove an account. Returns the destroyed instance if it became empty.
    pub fn remove(
        &mut self,
        address: &str,
        keyring_type: KeyringType,
        brand_name: Option<&str>,
    ) -> KeyringResult<Option<Keyring>> {
        let id = self
            .find_persisted(|k| {
                k.keyring_type() == keyring_type && k.has_account(address, brand_name)
            })
            .ok_or_else(|| {
                KeyringError::NotFound(format!("no {keyring_type} keyring holds {address}"))
            })?;

        let keyring = self.get_mut(id)?;
        keyring.remove_account(address, brand_name);
        let destroyed = if keyring.is_empty() {
            self.persisted.retain(|p| *p != id);
            tracing::info!(keyring_id = id, "Destroyed empty keyring");
            self.arena.remove(&id)
        } else {
            None
        };

        self.persist()?;
        Ok(destroyed)
    }

    /// All accounts across persisted instances.
    pub fn accounts(&self) -> Vec<Account> {
        self.persisted
            .iter()
            .filter_map(|id| self.arena.get(id))
            .flat_map(Keyring::accounts)
            .collect()
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.accounts().iter().any(|a| a.address == address)
    }

    /// Save every persisted instance in one transaction.
    pub fn persist(&self) -> KeyringResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let records: Vec<(u64, &Keyring)> = self
            .persisted
            .iter()
            .filter_map(|id| self.arena.get(id).map(|k| (*id, k)))
            .collect();
        storage
            .replace_keyrings(&records)
            .map_err(|e| KeyringError::PersistenceFailure {
                request_id: None,
                reason: e.to_string(),
            })
    }
}
