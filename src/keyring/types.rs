//! Account and backend type definitions shared across the crate.

use serde::{Deserialize, Serialize};

use crate::error::{KeyringError, KeyringResult};

/// Stable integer handle of a keyring instance in the registry arena.
pub type KeyringId = u64;

/// Backend family of a keyring instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyringType {
    /// Locally held mnemonic or private key, encrypted by the capability layer.
    Software,
    /// Ledger/Trezor style device behind a bridge.
    Hardware,
    /// Address watched without any signing ability.
    Watch,
    /// Mobile wallet reached over a paired relay session.
    RemoteSession,
    /// Air-gapped device exchanging animated QR frames.
    QrRelay,
    /// Safe-style multisig contract.
    Multisig,
}

impl std::fmt::Display for KeyringType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "software"),
            Self::Hardware => write!(f, "hardware"),
            Self::Watch => write!(f, "watch"),
            Self::RemoteSession => write!(f, "remote_session"),
            Self::QrRelay => write!(f, "qr_relay"),
            Self::Multisig => write!(f, "multisig"),
        }
    }
}

impl KeyringType {
    /// Backends that sign through a [`SignerCapability`](super::SignerCapability).
    ///
    /// They are only asked to sign once the user has approved the request.
    pub fn signs_after_approval(self) -> bool {
        matches!(self, Self::Software | Self::Hardware)
    }
}

impl std::str::FromStr for KeyringType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "software" => Ok(Self::Software),
            "hardware" => Ok(Self::Hardware),
            "watch" => Ok(Self::Watch),
            "remote_session" => Ok(Self::RemoteSession),
            "qr_relay" => Ok(Self::QrRelay),
            "multisig" => Ok(Self::Multisig),
            other => Err(format!("Invalid keyring type '{other}'")),
        }
    }
}

/// An address together with the backend that controls it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: String,
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    pub brand_name: String,
}

impl Account {
    pub fn new(address: impl Into<String>, keyring_type: KeyringType, brand_name: impl Into<String>) -> Self {
        Self {
            address: address.into().to_lowercase(),
            keyring_type,
            brand_name: brand_name.into(),
        }
    }
}

/// Validate an EVM-style address and return it lower-cased.
pub fn normalize_address(address: &str) -> KeyringResult<String> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| KeyringError::InvalidInput(format!("Address '{trimmed}' lacks 0x prefix")))?;

    if digits.len() != 40 || hex::decode(digits).is_err() {
        return Err(KeyringError::InvalidInput(format!(
            "Address '{trimmed}' is not 20 hex-encoded bytes"
        )));
    }

    Ok(format!("0x{}", digits.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        let addr = normalize_address("0xAbCdEf0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(addr, "0xabcdef0123456789abcdef0123456789abcdef01");
        assert!(normalize_address("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_keyring_type_parsing() {
        assert_eq!("qr_relay".parse::<KeyringType>().unwrap(), KeyringType::QrRelay);
        assert_eq!(KeyringType::RemoteSession.to_string(), "remote_session");
        assert!("ledger".parse::<KeyringType>().is_err());
    }

    #[test]
    fn test_account_serializes_type_field() {
        let account = Account::new(
            "0xABCDEF0123456789abcdef0123456789abcdef01",
            KeyringType::Hardware,
            "Ledger",
        );
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["type"], "hardware");
        assert_eq!(json["brandName"], "Ledger");
        assert_eq!(json["address"], "0xabcdef0123456789abcdef0123456789abcdef01");
    }
}
