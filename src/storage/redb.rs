//! ReDB storage implementation for the keyring service.
//!
//! Provides persistent storage for:
//! - The connected-site cache dump
//! - Persisted keyring instances
//! - In-progress multisig transactions
//! - The hash-chained audit log
//!
//! Values are JSON-serialized.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{KeyringError, KeyringResult};

const CONNECTED_SITES: TableDefinition<&str, &[u8]> = TableDefinition::new("connected_sites");
const KEYRINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("keyrings");
const MULTISIG_TRANSACTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("multisig_transactions");
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// Key under which the whole connected-site dump is stored.
const SITES_DUMP_KEY: &str = "dump";

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> KeyringResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| KeyringError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        tracing::info!(path = %path.display(), "Opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory database for testing.
    #[cfg(test)]
    pub fn open_memory() -> KeyringResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| KeyringError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn init_tables(db: &Database) -> KeyringResult<()> {
        let write_txn = db.begin_write()?;
        {
            // Opening the tables creates them if they don't exist
            let _ = write_txn.open_table(CONNECTED_SITES)?;
            let _ = write_txn.open_table(KEYRINGS)?;
            let _ = write_txn.open_table(MULTISIG_TRANSACTIONS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Connected Sites
    // =========================================================================

    /// Replace the stored connected-site dump.
    pub fn put_connected_sites<T: Serialize>(&self, dump: &T) -> KeyringResult<()> {
        let value = serde_json::to_vec(dump)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONNECTED_SITES)?;
            table.insert(SITES_DUMP_KEY, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::trace!(bytes = value.len(), "Stored connected-site dump");
        Ok(())
    }

    /// Load the connected-site dump, if one was ever saved.
    pub fn get_connected_sites<T: DeserializeOwned>(&self) -> KeyringResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONNECTED_SITES)?;

        match table.get(SITES_DUMP_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Keyrings
    // =========================================================================

    /// Replace the full set of persisted keyring records in one transaction.
    pub fn replace_keyrings<T: Serialize>(&self, records: &[(u64, &T)]) -> KeyringResult<()> {
        let encoded = records
            .iter()
            .map(|(id, record)| Ok((*id, serde_json::to_vec(record)?)))
            .collect::<KeyringResult<Vec<_>>>()?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KEYRINGS)?;
            let existing: Vec<u64> = table
                .iter()?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            for id in existing {
                table.remove(id)?;
            }
            for (id, value) in &encoded {
                table.insert(*id, value.as_slice())?;
            }
        }
        write_txn.commit()?;
        tracing::debug!(count = encoded.len(), "Persisted keyrings");
        Ok(())
    }

    /// Load all persisted keyring records in handle order.
    pub fn list_keyrings<T: DeserializeOwned>(&self) -> KeyringResult<Vec<(u64, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYRINGS)?;

        table
            .iter()?
            .map(|entry| {
                let (k, v) = entry?;
                let parsed: T = serde_json::from_slice(v.value())?;
                Ok((k.value(), parsed))
            })
            .collect()
    }

    // =========================================================================
    // Multisig Transactions
    // =========================================================================

    /// Store the in-progress transaction for a safe.
    pub fn put_multisig_transaction<T: Serialize>(
        &self,
        safe_address: &str,
        transaction: &T,
    ) -> KeyringResult<()> {
        let value = serde_json::to_vec(transaction)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MULTISIG_TRANSACTIONS)?;
            table.insert(safe_address, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(safe_address, "Stored multisig transaction");
        Ok(())
    }

    /// Get the in-progress transaction for a safe.
    pub fn get_multisig_transaction<T: DeserializeOwned>(
        &self,
        safe_address: &str,
    ) -> KeyringResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MULTISIG_TRANSACTIONS)?;

        match table.get(safe_address)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Delete the in-progress transaction for a safe.
    pub fn delete_multisig_transaction(&self, safe_address: &str) -> KeyringResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(MULTISIG_TRANSACTIONS)?;
            table.remove(safe_address)?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            tracing::debug!(safe_address, "Deleted multisig transaction");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Audit Log
    // =========================================================================

    /// Get the latest audit sequence number.
    pub fn get_latest_audit_seq(&self) -> KeyringResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let latest = table.iter()?.last().transpose()?.map(|(k, _)| k.value());

        Ok(latest)
    }

    /// Store a single audit entry by sequence number.
    pub fn put_audit_entry(&self, entry: &crate::audit::AuditEntry) -> KeyringResult<()> {
        let value = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(entry.seq, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::trace!(seq = entry.seq, "Stored audit entry");
        Ok(())
    }

    /// Get a single audit entry by sequence number.
    pub fn get_audit_entry(&self, seq: u64) -> KeyringResult<Option<crate::audit::AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        match table.get(seq)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}
