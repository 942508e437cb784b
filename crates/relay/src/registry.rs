//! Registry mapping relay hostnames to live relays

use crate::relay::Relay;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use spacekit_core::tracing::metrics::gauge;
use std::sync::Arc;
use tracing::debug;

/// Result of [`RelayRegistry::register_if_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The relay now owns its hostname
    Accepted,
    /// Another relay already held the hostname; nothing changed
    RejectedDuplicate,
}

/// Concurrent hostname -> relay map.
///
/// At most one relay is registered per hostname. Insertion is an atomic
/// check-and-insert and removal only succeeds for the relay that is actually
/// registered, so a stale relay can never evict its successor.
#[derive(Clone, Default)]
pub struct RelayRegistry {
    relays: Arc<DashMap<String, Arc<Relay>>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact, case-sensitive lookup
    pub fn lookup(&self, hostname: &str) -> Option<Arc<Relay>> {
        self.relays.get(hostname).map(|entry| entry.value().clone())
    }

    /// Insert `relay` under its hostname unless one is already present
    pub fn register_if_absent(&self, relay: Arc<Relay>) -> Registration {
        let outcome = match self.relays.entry(relay.hostname().to_string()) {
            Entry::Occupied(existing) => {
                debug!(
                    hostname = %relay.hostname(),
                    existing = %existing.get().id(),
                    "Hostname already registered"
                );
                Registration::RejectedDuplicate
            }
            Entry::Vacant(slot) => {
                slot.insert(relay);
                Registration::Accepted
            }
        };
        self.update_gauge();
        outcome
    }

    /// Remove `relay` if it is the one registered under its hostname.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, relay: &Relay) -> bool {
        let removed = self
            .relays
            .remove_if(relay.hostname(), |_, current| current.id() == relay.id())
            .is_some();
        if removed {
            self.update_gauge();
        }
        removed
    }

    /// Snapshot of all registered relays, sorted by hostname
    pub fn list(&self) -> Vec<Arc<Relay>> {
        let mut relays: Vec<_> = self
            .relays
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        relays.sort_by(|a, b| a.hostname().cmp(b.hostname()));
        relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    fn update_gauge(&self) {
        gauge("relay_registry_relays").set(self.relays.len() as i64);
    }
}
