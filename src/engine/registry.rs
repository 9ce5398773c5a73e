use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Registered workstations keyed by (venue, unit). Each entry's lock is the
/// per-resource critical section every reservation mutation runs under.
pub struct Registry {
    resources: DashMap<ResourceKey, SharedResourceState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<SharedResourceState> {
        self.resources.get(key).map(|e| e.value().clone())
    }

    pub fn insert(&self, state: ResourceState) -> SharedResourceState {
        let key = state.key();
        let shared = Arc::new(RwLock::new(state));
        self.resources.insert(key, shared.clone());
        shared
    }

    /// All keys, sorted, so multi-resource walks lock in a stable order.
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.resources.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn venue_keys(&self, venue_id: &str) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self
            .resources
            .iter()
            .filter(|e| e.key().venue_id == venue_id)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn venue_unit_count(&self, venue_id: &str) -> usize {
        self.resources
            .iter()
            .filter(|e| e.key().venue_id == venue_id)
            .count()
    }
}
