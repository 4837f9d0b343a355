//! Connected-site permission cache.
//!
//! A bounded recency cache of origins the user has connected. Pinned sites are
//! never evicted by capacity pressure. Removing a site only marks it
//! disconnected so its history (name, icon, chain) survives reconnection.
//!
//! Every operation is a no-op (reads return nothing) until [`PermissionCache::init`]
//! has loaded the persisted dump. The internal origin always has permission and
//! is never tracked.

mod site;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyringResult;
use crate::storage::Storage;

pub use site::{ConnectedSite, SitePatch};

/// Persisted form of one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpEntry {
    site: ConnectedSite,
    touched_at: DateTime<Utc>,
}

struct Slot {
    site: ConnectedSite,
    tick: u64,
    touched_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    /// Recency index: tick -> origin. Higher tick is more recent.
    recency: BTreeMap<u64, String>,
    clock: u64,
}

impl CacheState {
    fn bump(&mut self, origin: &str) {
        self.clock += 1;
        let tick = self.clock;
        if let Some(slot) = self.slots.get_mut(origin) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            slot.touched_at = Utc::now();
            self.recency.insert(tick, origin.to_string());
        }
    }

    fn insert(&mut self, site: ConnectedSite, touched_at: DateTime<Utc>) {
        self.clock += 1;
        let tick = self.clock;
        let origin = site.origin.clone();
        if let Some(old) = self.slots.insert(
            origin.clone(),
            Slot {
                site,
                tick,
                touched_at,
            },
        ) {
            self.recency.remove(&old.tick);
        }
        self.recency.insert(tick, origin);
    }

    /// Evict least-recent unpinned entries until within capacity.
    fn evict(&mut self, capacity: usize) {
        while self.slots.len() > capacity {
            let victim = self.recency.iter().find_map(|(tick, origin)| {
                let pinned = self.slots.get(origin).is_some_and(|s| s.site.is_top);
                (!pinned).then(|| (*tick, origin.clone()))
            });
            let Some((tick, origin)) = victim else {
                // Only pinned entries remain.
                break;
            };
            self.recency.remove(&tick);
            self.slots.remove(&origin);
            tracing::debug!(origin = %origin, "Evicted connected site");
        }
    }

    /// Sites ordered most recent first.
    fn by_recency(&self) -> impl Iterator<Item = &Slot> {
        self.recency
            .values()
            .rev()
            .filter_map(|origin| self.slots.get(origin))
    }
}

/// Bounded recency cache of connected sites.
pub struct PermissionCache {
    capacity: usize,
    internal_origin: String,
    state: Option<CacheState>,
    storage: Option<Storage>,
}

impl PermissionCache {
    pub fn new(capacity: usize, internal_origin: impl Into<String>) -> Self {
        Self {
            capacity: capacity.max(1),
            internal_origin: internal_origin.into(),
            state: None,
            storage: None,
        }
    }

    /// Load the persisted dump and start serving requests.
    pub fn init(&mut self, storage: Storage) -> KeyringResult<()> {
        let dump: Vec<DumpEntry> = storage.get_connected_sites()?.unwrap_or_default();

        let mut state = CacheState::default();
        // The dump is most recent first; replay oldest first to rebuild recency.
        for entry in dump.into_iter().rev() {
            state.insert(entry.site, entry.touched_at);
        }
        state.evict(self.capacity);

        tracing::info!(sites = state.slots.len(), "Permission cache initialized");
        self.state = Some(state);
        self.storage = Some(storage);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn is_internal(&self, origin: &str) -> bool {
        origin == self.internal_origin
    }

    fn sync(&self) {
        let (Some(state), Some(storage)) = (&self.state, &self.storage) else {
            return;
        };
        let dump: Vec<DumpEntry> = state
            .by_recency()
            .map(|slot| DumpEntry {
                site: slot.site.clone(),
                touched_at: slot.touched_at,
            })
            .collect();
        if let Err(e) = storage.put_connected_sites(&dump) {
            tracing::error!(error = %e, "Failed to persist connected sites");
        }
    }

    /// Read a site and promote it to most recent.
    pub fn get(&mut self, origin: &str) -> Option<ConnectedSite> {
        let state = self.state.as_mut()?;
        state.slots.get(origin)?;
        state.bump(origin);
        let site = state.slots.get(origin).map(|s| s.site.clone());
        self.sync();
        site
    }

    /// Read a site without touching recency.
    pub fn peek(&self, origin: &str) -> Option<ConnectedSite> {
        self.state
            .as_ref()?
            .slots
            .get(origin)
            .map(|s| s.site.clone())
    }

    /// Insert or replace a site record, evicting as needed.
    pub fn set(&mut self, site: ConnectedSite) {
        if self.is_internal(&site.origin) {
            return;
        }
        let capacity = self.capacity;
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.insert(site, Utc::now());
        state.evict(capacity);
        self.sync();
    }

    /// Record a freshly connected site.
    pub fn add_connected_site(
        &mut self,
        origin: &str,
        name: &str,
        icon: &str,
        chain_id: u64,
        is_signed: bool,
    ) {
        let mut site = ConnectedSite::new(origin, name, icon, chain_id);
        site.is_signed = is_signed;
        self.set(site);
    }

    /// Promote a site to most recent. No-op for the internal origin.
    pub fn touch(&mut self, origin: &str) {
        if self.is_internal(origin) {
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if !state.slots.contains_key(origin) {
            return;
        }
        state.bump(origin);
        self.sync();
    }

    /// Apply a partial update. Returns the updated site, or `None` if nothing changed.
    pub fn update(&mut self, origin: &str, patch: &SitePatch) -> Option<ConnectedSite> {
        if self.is_internal(origin) {
            return None;
        }
        let slot = self.state.as_mut()?.slots.get_mut(origin)?;
        patch.apply(&mut slot.site);
        let site = slot.site.clone();
        self.sync();
        Some(site)
    }

    /// Whether `origin` may make requests. `None` before init.
    pub fn has_permission(&self, origin: &str) -> Option<bool> {
        let state = self.state.as_ref()?;
        if self.is_internal(origin) {
            return Some(true);
        }
        Some(state.slots.get(origin).is_some_and(|s| s.site.is_connected))
    }

    /// Soft-remove: the site stays in history but loses its connection.
    ///
    /// Returns `true` if a connected site was disconnected.
    pub fn remove(&mut self, origin: &str) -> bool {
        let Some(slot) = self.state.as_mut().and_then(|s| s.slots.get_mut(origin)) else {
            return false;
        };
        if !slot.site.is_connected {
            return false;
        }
        slot.site.is_connected = false;
        self.sync();
        tracing::debug!(origin, "Disconnected site");
        true
    }

    /// Pin a connected site. Without an explicit order it goes after every pinned site.
    pub fn pin(&mut self, origin: &str, order: Option<u32>) -> bool {
        let Some(state) = self.state.as_mut() else {
            return false;
        };
        if !state.slots.get(origin).is_some_and(|s| s.site.is_connected) {
            return false;
        }
        let order = order.unwrap_or_else(|| {
            state
                .slots
                .values()
                .filter(|s| s.site.is_top)
                .filter_map(|s| s.site.order)
                .max()
                .map_or(1, |max| max + 1)
        });
        if let Some(slot) = state.slots.get_mut(origin) {
            slot.site.is_top = true;
            slot.site.order = Some(order);
        }
        self.sync();
        true
    }

    /// Unpin a site, making it evictable again.
    pub fn unpin(&mut self, origin: &str) -> bool {
        let Some(slot) = self.state.as_mut().and_then(|s| s.slots.get_mut(origin)) else {
            return false;
        };
        slot.site.is_top = false;
        self.sync();
        true
    }

    /// Pinned connected sites by ascending order, then unpinned connected sites most recent first.
    pub fn list_recent(&self) -> Vec<ConnectedSite> {
        let Some(state) = self.state.as_ref() else {
            return Vec::new();
        };
        let connected: Vec<&ConnectedSite> = state
            .by_recency()
            .map(|slot| &slot.site)
            .filter(|site| site.is_connected)
            .collect();

        let mut pinned: Vec<ConnectedSite> = connected
            .iter()
            .filter(|site| site.is_top)
            .map(|site| (*site).clone())
            .collect();
        pinned.sort_by_key(|site| site.order.unwrap_or(0));

        pinned
            .into_iter()
            .chain(
                connected
                    .into_iter()
                    .filter(|site| !site.is_top)
                    .cloned(),
            )
            .collect()
    }

    /// All connected sites, most recent first.
    pub fn connected_sites(&self) -> Vec<ConnectedSite> {
        self.state.as_ref().map_or_else(Vec::new, |state| {
            state
                .by_recency()
                .filter(|slot| slot.site.is_connected)
                .map(|slot| slot.site.clone())
                .collect()
        })
    }

    /// Every known site flagged to prefer MetaMask, connected or not.
    pub fn prefer_metamask_sites(&self) -> Vec<ConnectedSite> {
        self.state.as_ref().map_or_else(Vec::new, |state| {
            state
                .by_recency()
                .filter(|slot| slot.site.prefer_metamask)
                .map(|slot| slot.site.clone())
                .collect()
        })
    }

    /// Connected sites currently pointed at `chain_id`.
    pub fn sites_by_chain(&self, chain_id: u64) -> Vec<ConnectedSite> {
        self.connected_sites()
            .into_iter()
            .filter(|site| site.chain_id == chain_id)
            .collect()
    }

    /// Replace the recency order with `sites` (first = most recent).
    ///
    /// Disconnected history entries are kept, older than any listed site.
    pub fn set_recent(&mut self, sites: Vec<ConnectedSite>) {
        let capacity = self.capacity;
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let history: Vec<(ConnectedSite, DateTime<Utc>)> = state
            .by_recency()
            .filter(|slot| !slot.site.is_connected)
            .map(|slot| (slot.site.clone(), slot.touched_at))
            .collect();

        let mut rebuilt = CacheState::default();
        for (site, touched_at) in history.into_iter().rev() {
            rebuilt.insert(site, touched_at);
        }
        let now = Utc::now();
        for site in sites.into_iter().rev() {
            rebuilt.insert(site, now);
        }
        rebuilt.evict(capacity);
        *state = rebuilt;
        self.sync();
    }
}
