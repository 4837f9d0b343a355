//! Storage layer for the keyring service.
//!
//! Uses ReDB for embedded key-value storage with ACID transactions.
//! Each save is a single write transaction, so a crash never leaves a
//! half-written connected-site dump or keyring list behind.

pub mod redb;

pub use self::redb::Storage;
