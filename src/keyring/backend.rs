//! Keyring backend variants.

use serde::{Deserialize, Serialize};

use super::capability::KeyMaterial;
use super::types::{Account, KeyringType};
use crate::error::{KeyringError, KeyringResult};
use crate::session::{MultisigKeyring, QrKeyring, RemoteSessionKeyring};

/// One backend instance. Serialized as `{type, data}`; runtime session state is not persisted.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Keyring {
    Software(SoftwareKeyring),
    Hardware(HardwareKeyring),
    Watch(WatchKeyring),
    RemoteSession(RemoteSessionKeyring),
    QrRelay(QrKeyring),
    Multisig(MultisigKeyring),
}

impl Keyring {
    pub fn keyring_type(&self) -> KeyringType {
        match self {
            Self::Software(_) => KeyringType::Software,
            Self::Hardware(_) => KeyringType::Hardware,
            Self::Watch(_) => KeyringType::Watch,
            Self::RemoteSession(_) => KeyringType::RemoteSession,
            Self::QrRelay(_) => KeyringType::QrRelay,
            Self::Multisig(_) => KeyringType::Multisig,
        }
    }

    pub fn accounts(&self) -> Vec<Account> {
        match self {
            Self::Software(k) => k.accounts(),
            Self::Hardware(k) => k.accounts(),
            Self::Watch(k) => k.accounts(),
            Self::RemoteSession(k) => k.accounts(),
            Self::QrRelay(k) => k.accounts(),
            Self::Multisig(k) => k.accounts(),
        }
    }

    /// Whether this instance controls `address` (optionally under `brand_name`).
    pub fn has_account(&self, address: &str, brand_name: Option<&str>) -> bool {
        self.accounts().iter().any(|a| {
            a.address == address && brand_name.is_none_or(|brand| a.brand_name == brand)
        })
    }

    /// Account record for `address`, if present.
    pub fn account(&self, address: &str) -> Option<Account> {
        self.accounts().into_iter().find(|a| a.address == address)
    }

    pub fn remove_account(&mut self, address: &str, brand_name: Option<&str>) -> bool {
        match self {
            Self::Software(k) => remove_address(&mut k.accounts, address),
            Self::Hardware(k) => {
                brand_name.is_none_or(|b| b == k.brand_name)
                    && remove_address(&mut k.accounts, address)
            }
            Self::Watch(k) => remove_address(&mut k.accounts, address),
            Self::RemoteSession(k) => k.remove_account(address, brand_name),
            Self::QrRelay(k) => k.remove_account(address),
            Self::Multisig(k) => k.remove_safe(address),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts().is_empty()
    }

    pub fn as_hardware_mut(&mut self) -> Option<&mut HardwareKeyring> {
        match self {
            Self::Hardware(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_remote_mut(&mut self) -> Option<&mut RemoteSessionKeyring> {
        match self {
            Self::RemoteSession(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_qr_mut(&mut self) -> Option<&mut QrKeyring> {
        match self {
            Self::QrRelay(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_multisig(&self) -> Option<&MultisigKeyring> {
        match self {
            Self::Multisig(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_multisig_mut(&mut self) -> Option<&mut MultisigKeyring> {
        match self {
            Self::Multisig(k) => Some(k),
            _ => None,
        }
    }
}

fn remove_address(accounts: &mut Vec<String>, address: &str) -> bool {
    let before = accounts.len();
    accounts.retain(|a| a != address);
    accounts.len() != before
}

fn push_unique(accounts: &mut Vec<String>, address: String) {
    if !accounts.contains(&address) {
        accounts.push(address);
    }
}

// =============================================================================
// Software
// =============================================================================

/// How a software keyring was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftwareKind {
    Mnemonic,
    PrivateKey,
}

impl SoftwareKind {
    pub fn brand_name(self) -> &'static str {
        match self {
            Self::Mnemonic => "HD Key Tree",
            Self::PrivateKey => "Simple Key Pair",
        }
    }
}

/// Locally held keys, stored only as an encrypted vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareKeyring {
    pub kind: SoftwareKind,
    vault: String,
    accounts: Vec<String>,
}

impl SoftwareKeyring {
    pub fn new(kind: SoftwareKind, vault: impl Into<String>, accounts: Vec<String>) -> Self {
        Self {
            kind,
            vault: vault.into(),
            accounts,
        }
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(a.clone(), KeyringType::Software, self.kind.brand_name()))
            .collect()
    }

    pub fn add_account(&mut self, address: String) {
        push_unique(&mut self.accounts, address);
    }

    pub fn material(&self) -> KeyMaterial {
        KeyMaterial::Vault(self.vault.clone())
    }
}

// =============================================================================
// Hardware
// =============================================================================

/// Device-backed keys reached through a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareKeyring {
    pub brand_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hd_path: Option<String>,
    accounts: Vec<String>,
    #[serde(default)]
    hid_authorized: bool,
    #[serde(skip)]
    unlocked: bool,
}

impl HardwareKeyring {
    pub fn new(brand_name: impl Into<String>) -> Self {
        Self {
            brand_name: brand_name.into(),
            hd_path: None,
            accounts: Vec::new(),
            hid_authorized: false,
            unlocked: false,
        }
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(a.clone(), KeyringType::Hardware, self.brand_name.clone()))
            .collect()
    }

    pub fn add_account(&mut self, address: String) {
        push_unique(&mut self.accounts, address);
    }

    pub fn set_hd_path(&mut self, hd_path: &str) -> KeyringResult<()> {
        let path = hd_path.trim();
        if !path.starts_with("m/") {
            return Err(KeyringError::InvalidInput(format!(
                "HD path '{path}' must start with m/"
            )));
        }
        self.hd_path = Some(path.to_string());
        Ok(())
    }

    pub fn hd_path(&self) -> Option<&str> {
        self.hd_path.as_deref()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn mark_unlocked(&mut self) {
        self.unlocked = true;
    }

    /// Record that the user granted direct HID access to the device.
    pub fn authorize_hid(&mut self) {
        self.hid_authorized = true;
    }

    pub fn hid_authorized(&self) -> bool {
        self.hid_authorized
    }

    pub fn material(&self) -> KeyMaterial {
        KeyMaterial::Device {
            brand_name: self.brand_name.clone(),
            hd_path: self.hd_path.clone(),
        }
    }
}

// =============================================================================
// Watch
// =============================================================================

/// Addresses observed without signing ability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchKeyring {
    accounts: Vec<String>,
}

impl WatchKeyring {
    pub const BRAND_NAME: &'static str = "Watch Address";

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|a| Account::new(a.clone(), KeyringType::Watch, Self::BRAND_NAME))
            .collect()
    }

    pub fn add_account(&mut self, address: String) {
        push_unique(&mut self.accounts, address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn test_serialized_tag() {
        let mut watch = WatchKeyring::default();
        watch.add_account(ADDR.to_string());
        let json = serde_json::to_value(Keyring::Watch(watch)).unwrap();
        assert_eq!(json["type"], "watch");
        assert_eq!(json["data"]["accounts"][0], ADDR);
    }

    #[test]
    fn test_hardware_unlock_not_persisted() {
        let mut hw = HardwareKeyring::new("Ledger");
        hw.set_hd_path("m/44'/60'/0'/0").unwrap();
        hw.mark_unlocked();
        hw.add_account(ADDR.to_string());

        let restored: Keyring =
            serde_json::from_value(serde_json::to_value(Keyring::Hardware(hw)).unwrap()).unwrap();
        let Keyring::Hardware(hw) = restored else {
            panic!("expected hardware keyring");
        };
        assert!(!hw.is_unlocked());
        assert_eq!(hw.hd_path(), Some("m/44'/60'/0'/0"));
    }

    #[test]
    fn test_invalid_hd_path() {
        let mut hw = HardwareKeyring::new("Trezor");
        assert!(matches!(
            hw.set_hd_path("44'/60'"),
            Err(KeyringError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remove_account_respects_brand() {
        let mut hw = HardwareKeyring::new("Ledger");
        hw.add_account(ADDR.to_string());
        let mut keyring = Keyring::Hardware(hw);

        assert!(!keyring.remove_account(ADDR, Some("Trezor")));
        assert!(keyring.has_account(ADDR, Some("Ledger")));
        assert!(keyring.remove_account(ADDR, None));
        assert!(keyring.is_empty());
    }

    #[test]
    fn test_software_brand_names() {
        let keyring = SoftwareKeyring::new(SoftwareKind::PrivateKey, "vault", vec![ADDR.to_string()]);
        assert_eq!(keyring.accounts()[0].brand_name, "Simple Key Pair");
    }
}
