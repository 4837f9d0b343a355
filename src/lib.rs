// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., KeyringError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit
#![allow(clippy::too_many_arguments)] // Backend drivers mirror the sign request fields

//! Keyring Orchestration Service
//!
//! Multi-backend keyring orchestration for a wallet: decides whether a
//! requesting origin may act, which backend instance owns the requested
//! account, and how a sign request travels through the user approval
//! boundary to that backend and back.
//!
//! ## Architecture
//!
//! - **Registry**: arena of keyring instances (software, hardware, watch,
//!   remote session, QR relay, multisig) with a stash for unconfirmed ones.
//! - **Permission cache**: bounded recency cache of connected sites with pinning.
//! - **Approval queue**: FIFO of sign requests; exactly one is pending at a time.
//! - **Sessions**: state machines for backends that cannot sign in one call.
//! - **Orchestrator**: composition root wiring the above to outbound adapters.
//!
//! ## Guarantees
//!
//! - Every sign request completes exactly once, with a result or a typed error
//! - Switching the active account rejects every in-flight request
//! - Signatures that fail to persist are retained for retry

pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod keyring;
pub mod middleware;
pub mod orchestrator;
pub mod permission;
pub mod routes;
pub mod session;
pub mod storage;
pub mod telemetry;

// Re-export commonly used types
pub use config::Settings;
pub use error::{KeyringError, KeyringResult};
pub use orchestrator::{Backends, Orchestrator, SignIntent};
