//! Session-driven backends: remote wallets, QR relays and multisig contracts.
//!
//! These backends cannot sign in one call. Each keeps a small state machine
//! that the orchestrator drives with user commands and external events.

pub mod multisig;
pub mod qr;
pub mod remote;
pub mod safe;
pub mod transport;

pub use multisig::{MultisigKeyring, MultisigPhase, MultisigTransaction};
pub use qr::{QrKeyring, QrStatus, encode_signature_frame};
pub use remote::{
    RelayMessage, RemoteAccount, RemoteSession, RemoteSessionKeyring, RemoteSignStart,
    SessionEvent, SessionInfo, SessionStatus, SessionUpdate,
};
pub use safe::{HttpSafeService, SafeContract, UnconfiguredSafeService};
pub use transport::{HttpBridgeTransport, SessionTransport};
