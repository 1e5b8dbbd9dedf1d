//! Banned addresses.

use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};

use tetriforge_protocol::BanEntry;

/// Where banned addresses live. Persistence is up to the implementation.
pub trait BanList: Send + Sync + 'static {
    fn is_banned(&self, address: &IpAddr) -> bool;

    /// Bans an address. Banning it again replaces the entry.
    fn ban(&self, entry: BanEntry);

    /// Returns `true` if the address was banned.
    fn unban(&self, address: &IpAddr) -> bool;

    fn entries(&self) -> Vec<BanEntry>;
}

/// In-memory ban list; forgotten on restart.
#[derive(Debug, Default)]
pub struct MemoryBanList {
    entries: RwLock<Vec<BanEntry>>,
}

impl MemoryBanList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BanList for MemoryBanList {
    fn is_banned(&self, address: &IpAddr) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.address == *address)
    }

    fn ban(&self, entry: BanEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|e| e.address != entry.address);
        entries.push(entry);
    }

    fn unban(&self, address: &IpAddr) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.address != *address);
        entries.len() != before
    }

    fn entries(&self) -> Vec<BanEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
