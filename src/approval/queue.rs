//! FIFO approval queue with single-shot responders.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};

use super::types::{ApprovalId, ApprovalRequest, ApprovalState};
use crate::error::{KeyringError, KeyringResult};

/// How many settled ids are remembered for idempotence and state queries.
const SETTLED_HISTORY: usize = 256;

/// Result delivered to the submitter once a request settles.
pub type ApprovalOutcome = KeyringResult<serde_json::Value>;

struct Entry {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalOutcome>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    settled: VecDeque<(ApprovalId, ApprovalState)>,
}

impl QueueState {
    fn head_id(&self) -> Option<ApprovalId> {
        self.entries.front().map(|e| e.request.id)
    }

    fn remember(&mut self, id: ApprovalId, state: ApprovalState) {
        if self.settled.len() == SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back((id, state));
    }
}

/// Approval queue shared between submitters and the UI-facing boundary.
pub struct ApprovalQueue {
    state: Mutex<QueueState>,
    current: watch::Sender<Option<ApprovalId>>,
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalQueue {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            state: Mutex::new(QueueState::default()),
            current,
        }
    }

    fn lock(&self) -> KeyringResult<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| KeyringError::Internal("Approval queue lock poisoned".to_string()))
    }

    /// Enqueue a request. It becomes pending immediately if the queue was empty.
    pub fn submit(&self, request: ApprovalRequest) -> KeyringResult<ApprovalHandle> {
        let id = request.id;
        let (responder, receiver) = oneshot::channel();
        let head = {
            let mut state = self.lock()?;
            state.entries.push_back(Entry { request, responder });
            state.head_id()
        };
        self.current.send_replace(head);

        tracing::info!(request_id = %id, pending = head == Some(id), "Approval submitted");

        Ok(ApprovalHandle {
            id,
            receiver,
            turn: self.current.subscribe(),
            settled: None,
        })
    }

    /// The request currently awaiting a decision, if any.
    pub fn current(&self) -> Option<ApprovalRequest> {
        self.lock()
            .ok()
            .and_then(|state| state.entries.front().map(|e| e.request.clone()))
    }

    /// Number of requests not yet settled (pending plus queued).
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifecycle state of a request, if it is known to the queue.
    pub fn state(&self, id: ApprovalId) -> Option<ApprovalState> {
        let state = self.lock().ok()?;
        if let Some(pos) = state.entries.iter().position(|e| e.request.id == id) {
            return Some(if pos == 0 {
                ApprovalState::Pending
            } else {
                ApprovalState::Queued
            });
        }
        state
            .settled
            .iter()
            .rev()
            .find(|(settled_id, _)| *settled_id == id)
            .map(|(_, s)| *s)
    }

    /// Complete a request with a result. Returns `false` if it was already settled.
    pub fn resolve(&self, id: ApprovalId, result: serde_json::Value) -> bool {
        self.settle(id, Ok(result))
    }

    /// Fail a request. Returns `false` if it was already settled.
    pub fn reject(&self, id: ApprovalId, error: KeyringError) -> bool {
        self.settle(id, Err(error))
    }

    /// Reject every pending and queued request with a user rejection.
    ///
    /// Returns the number of requests rejected. The queue is empty afterwards.
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<Entry> = match self.lock() {
            Ok(mut state) => {
                let drained: Vec<Entry> = state.entries.drain(..).collect();
                for entry in &drained {
                    state.remember(entry.request.id, ApprovalState::Rejected);
                }
                drained
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot reject approvals");
                return 0;
            }
        };
        self.current.send_replace(None);

        let count = drained.len();
        for entry in drained {
            // A dropped receiver means the submitter already gave up.
            let _ = entry
                .responder
                .send(Err(KeyringError::rejected(reason.to_string())));
        }

        if count > 0 {
            tracing::info!(count, reason, "Rejected all approvals");
        }
        count
    }

    fn settle(&self, id: ApprovalId, outcome: ApprovalOutcome) -> bool {
        let final_state = if outcome.is_ok() {
            ApprovalState::Resolved
        } else {
            ApprovalState::Rejected
        };

        let (entry, head) = match self.lock() {
            Ok(mut state) => {
                let Some(pos) = state.entries.iter().position(|e| e.request.id == id) else {
                    tracing::debug!(request_id = %id, "Ignoring settle of unknown or settled approval");
                    return false;
                };
                let entry = state.entries.remove(pos);
                state.remember(id, final_state);
                (entry, state.head_id())
            }
            Err(e) => {
                tracing::error!(error = %e, request_id = %id, "Cannot settle approval");
                return false;
            }
        };
        self.current.send_replace(head);

        if let Some(entry) = entry {
            let _ = entry.responder.send(outcome);
        }

        tracing::info!(request_id = %id, state = %final_state, "Approval settled");
        true
    }
}

/// Submitter-side handle to a queued request.
pub struct ApprovalHandle {
    id: ApprovalId,
    receiver: oneshot::Receiver<ApprovalOutcome>,
    turn: watch::Receiver<Option<ApprovalId>>,
    settled: Option<ApprovalOutcome>,
}

impl ApprovalHandle {
    pub fn id(&self) -> ApprovalId {
        self.id
    }

    /// Wait until this request reaches the head of the queue.
    ///
    /// Returns `false` if the request was settled before its turn came.
    pub async fn wait_turn(&mut self) -> bool {
        if self.settled.is_some() {
            return false;
        }
        loop {
            if *self.turn.borrow_and_update() == Some(self.id) {
                return true;
            }
            tokio::select! {
                changed = self.turn.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                outcome = &mut self.receiver => {
                    self.settled = Some(outcome.unwrap_or_else(|_| Err(queue_dropped())));
                    return false;
                }
            }
        }
    }

    /// Wait until the request settles. Cancel-safe and callable repeatedly.
    pub async fn wait_settled(&mut self) {
        if self.settled.is_none() {
            let outcome = (&mut self.receiver).await;
            self.settled = Some(outcome.unwrap_or_else(|_| Err(queue_dropped())));
        }
    }

    /// Consume the handle and return the final outcome.
    pub async fn outcome(mut self) -> ApprovalOutcome {
        self.wait_settled().await;
        self.settled.take().unwrap_or_else(|| Err(queue_dropped()))
    }
}

fn queue_dropped() -> KeyringError {
    KeyringError::Internal("Approval queue dropped the request".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalKind;
    use crate::keyring::{Account, KeyringType};
    use serde_json::json;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(
            ApprovalKind::SignText,
            "https://app.example",
            Account::new(
                "0x1111111111111111111111111111111111111111",
                KeyringType::Software,
                "HD Key Tree",
            ),
            json!({"data": "0x68656c6c6f"}),
            None,
        )
    }

    #[tokio::test]
    async fn test_resolve_completes_handle() {
        let queue = ApprovalQueue::new();
        let mut handle = queue.submit(request()).unwrap();
        assert!(handle.wait_turn().await);
        assert_eq!(queue.state(handle.id()), Some(ApprovalState::Pending));

        assert!(queue.resolve(handle.id(), json!("0xsig")));
        let id = handle.id();
        assert_eq!(handle.outcome().await.unwrap(), json!("0xsig"));
        assert_eq!(queue.state(id), Some(ApprovalState::Resolved));
        assert!(queue.current().is_none());
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let queue = ApprovalQueue::new();
        let handle = queue.submit(request()).unwrap();
        let id = handle.id();

        assert!(queue.reject(id, KeyringError::rejected("no")));
        assert!(!queue.reject(id, KeyringError::rejected("again")));
        assert!(!queue.resolve(id, json!("late")));

        let err = handle.outcome().await.unwrap_err();
        assert!(matches!(err, KeyringError::UserRejected(reason) if reason == "no"));
        assert_eq!(queue.state(id), Some(ApprovalState::Rejected));
    }

    #[tokio::test]
    async fn test_fifo_order_and_single_pending() {
        let queue = ApprovalQueue::new();
        let first = queue.submit(request()).unwrap();
        let mut second = queue.submit(request()).unwrap();

        assert_eq!(queue.current().map(|r| r.id), Some(first.id()));
        assert_eq!(queue.state(second.id()), Some(ApprovalState::Queued));

        queue.resolve(first.id(), json!(1));
        assert!(second.wait_turn().await);
        assert_eq!(queue.current().map(|r| r.id), Some(second.id()));
    }

    #[tokio::test]
    async fn test_reject_all_empties_queue() {
        let queue = ApprovalQueue::new();
        let first = queue.submit(request()).unwrap();
        let mut second = queue.submit(request()).unwrap();

        assert_eq!(queue.reject_all("account switched"), 2);
        assert!(queue.is_empty());
        assert!(queue.current().is_none());

        // A queued request learns it was settled while waiting for its turn.
        assert!(!second.wait_turn().await);
        assert!(matches!(
            second.outcome().await,
            Err(KeyringError::UserRejected(_))
        ));
        assert!(matches!(
            first.outcome().await,
            Err(KeyringError::UserRejected(_))
        ));
        assert_eq!(queue.reject_all("again"), 0);
    }
}
