//! Approval queue: the single point where user decisions enter the system.
//!
//! Requests are served FIFO. Exactly one request is pending at the head of
//! the queue; later ones wait for their turn. Settling a request is
//! idempotent, and `reject_all` always leaves the queue empty.

pub mod queue;
pub mod types;

pub use queue::{ApprovalHandle, ApprovalOutcome, ApprovalQueue};
pub use types::{ApprovalId, ApprovalKind, ApprovalRequest, ApprovalState};
