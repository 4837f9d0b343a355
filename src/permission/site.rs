use serde::{Deserialize, Serialize};

/// A dApp origin the user has connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedSite {
    pub origin: String,
    pub name: String,
    pub icon: String,
    /// Default chain the site operates on.
    pub chain_id: u64,
    pub is_connected: bool,
    #[serde(default)]
    pub is_signed: bool,
    /// Pinned sites are exempt from eviction.
    #[serde(default)]
    pub is_top: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    /// The user asked this site to talk to MetaMask instead of this wallet.
    #[serde(default)]
    pub prefer_metamask: bool,
}

impl ConnectedSite {
    pub fn new(origin: &str, name: &str, icon: &str, chain_id: u64) -> Self {
        Self {
            origin: origin.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            chain_id,
            is_connected: true,
            is_signed: false,
            is_top: false,
            order: None,
            prefer_metamask: false,
        }
    }
}

/// Partial update of a [`ConnectedSite`]; unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub chain_id: Option<u64>,
    pub is_signed: Option<bool>,
    pub prefer_metamask: Option<bool>,
}

impl SitePatch {
    pub(crate) fn apply(&self, site: &mut ConnectedSite) {
        if let Some(name) = &self.name {
            site.name.clone_from(name);
        }
        if let Some(icon) = &self.icon {
            site.icon.clone_from(icon);
        }
        if let Some(chain_id) = self.chain_id {
            site.chain_id = chain_id;
        }
        if let Some(is_signed) = self.is_signed {
            site.is_signed = is_signed;
        }
        if let Some(prefer_metamask) = self.prefer_metamask {
            site.prefer_metamask = prefer_metamask;
        }
    }
}
