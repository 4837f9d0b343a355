//! Approval request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyring::Account;

/// Approval request identifier.
pub type ApprovalId = Uuid;

/// What the user is being asked to approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Personal message (`personal_sign`).
    SignText,
    /// Structured data (EIP-712 style).
    SignTypedData,
    /// Transaction.
    SignTx,
    /// Any other request the user must confirm; the payload is passed through untouched.
    Custom,
}

impl std::fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignText => write!(f, "sign_text"),
            Self::SignTypedData => write!(f, "sign_typed_data"),
            Self::SignTx => write!(f, "sign_tx"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Lifecycle of a single approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Queued,
    Pending,
    Resolved,
    Rejected,
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A request awaiting a user decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub kind: ApprovalKind,
    pub origin: String,
    pub account: Account,
    /// Opaque payload shown to the user and handed to the backend.
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        kind: ApprovalKind,
        origin: impl Into<String>,
        account: Account,
        payload: serde_json::Value,
        chain_id: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            origin: origin.into(),
            account,
            payload,
            chain_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_wire_names() {
        let kind: ApprovalKind = serde_json::from_value(json!("custom")).unwrap();
        assert_eq!(kind, ApprovalKind::Custom);
        assert_eq!(kind.to_string(), "custom");
        assert_eq!(
            serde_json::to_value(ApprovalKind::SignTypedData).unwrap(),
            json!("sign_typed_data")
        );
        assert!(serde_json::from_value::<ApprovalKind>(json!("sign_anything")).is_err());
    }
}
