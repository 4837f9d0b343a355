//! Keyring backends and the registry that owns them.
//!
//! A keyring is one instance of a signing backend holding one or more
//! accounts. The set of backend families is closed ([`Keyring`] is a tagged
//! enum); key material stays behind the [`SignerCapability`] seam.

pub mod backend;
pub mod capability;
pub mod registry;
pub mod types;

pub use backend::{HardwareKeyring, Keyring, SoftwareKeyring, SoftwareKind, WatchKeyring};
pub use capability::{CapabilityRequest, HttpSignerCapability, KeyMaterial, SignerCapability};
pub use registry::KeyringRegistry;
pub use types::{Account, KeyringId, KeyringType, normalize_address};
