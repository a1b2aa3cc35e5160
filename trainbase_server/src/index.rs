//! Entity index and identity resolution.
//!
//! A read-through cache from [`EntityKey`] to live host handles. Lookups hit
//! the index first and only fall back to scanning the host's live entity set
//! on a miss; a successful scan back-fills the index.

use std::collections::HashMap;

use tracing::{debug, trace};
use trainbase_shared::{
    ecs::EntityHandle,
    host::{EntityClass, EntityKey, Host},
};

/// Derives the network key of an entity. [`EntityKey::NONE`] when the entity
/// is gone, has no network identity, or the identity does not fit a key.
pub fn key_of(host: &dyn Host, entity: EntityHandle) -> EntityKey {
    host.net_id(entity)
        .map_or(EntityKey::NONE, EntityKey::from_net_id)
}

/// Whether a missed lookup may scan the whole host world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackScan {
    #[default]
    Enabled,
    Disabled,
}

/// Cached index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indexed {
    pub handle: EntityHandle,
    pub class: EntityClass,
}

/// Key → live entity cache.
#[derive(Debug, Default)]
pub struct EntityIndex {
    by_key: HashMap<EntityKey, Indexed>,
    fallback: FallbackScan,
    fallback_scans: u64,
}

impl EntityIndex {
    pub fn new(fallback: FallbackScan) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    pub fn set_fallback(&mut self, fallback: FallbackScan) {
        self.fallback = fallback;
    }

    /// Number of full-world scans performed so far.
    pub fn fallback_scans(&self) -> u64 {
        self.fallback_scans
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn get(&self, key: EntityKey) -> Option<Indexed> {
        self.by_key.get(&key).copied()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }

    /// Records a spawned entity. Unkeyable entities are skipped.
    pub fn on_spawn(&mut self, host: &dyn Host, entity: EntityHandle) {
        let key = key_of(host, entity);
        if key.is_none() {
            trace!(entity = ?entity, "Skipping unkeyable entity");
            return;
        }
        let class = host.class_of(entity);
        self.by_key.insert(
            key,
            Indexed {
                handle: entity,
                class,
            },
        );
    }

    /// Forgets a key, returning what was cached for it.
    pub fn on_destroy(&mut self, key: EntityKey) -> Option<Indexed> {
        self.by_key.remove(&key)
    }

    /// Repopulates the index from every live networked entity.
    pub fn rebuild_from_live_world(&mut self, host: &dyn Host) {
        self.by_key.clear();
        for entity in host.live_entities() {
            self.on_spawn(host, entity);
        }
        debug!(entities = self.by_key.len(), "Entity index rebuilt");
    }

    /// Resolves a key to a live handle.
    ///
    /// Destroyed and never-existing entities both resolve to `None`.
    pub fn resolve(&mut self, host: &dyn Host, key: EntityKey) -> Option<EntityHandle> {
        if key.is_none() {
            return None;
        }
        if let Some(hit) = self.by_key.get(&key) {
            if host.is_alive(hit.handle) && key_of(host, hit.handle) == key {
                return Some(hit.handle);
            }
        }
        self.scan(host, key)
    }

    /// Resolves a key and returns the cached class alongside the handle.
    pub fn resolve_indexed(&mut self, host: &dyn Host, key: EntityKey) -> Option<Indexed> {
        let handle = self.resolve(host, key)?;
        self.get(key).filter(|i| i.handle == handle)
    }

    fn scan(&mut self, host: &dyn Host, key: EntityKey) -> Option<EntityHandle> {
        if self.fallback == FallbackScan::Disabled {
            return None;
        }
        self.fallback_scans += 1;

        let found = host
            .live_entities()
            .into_iter()
            .find(|e| host.is_alive(*e) && key_of(host, *e) == key)?;
        debug!(key = %key, entity = ?found, "Index miss resolved by scan");
        self.on_spawn(host, found);
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainbase_shared::{
        math::Transform,
        sim::{prefabs, SimWorld},
    };

    fn world_with_cart() -> (SimWorld, EntityHandle) {
        let mut sim = SimWorld::new();
        let cart = sim
            .spawn_prefab(prefabs::WORKCART, Transform::default())
            .unwrap();
        sim.discard_events();
        (sim, cart)
    }

    #[test]
    fn key_of_unkeyable_is_none() {
        let mut sim = SimWorld::new();
        sim.set_next_net_id(u64::from(u32::MAX) + 7);
        let e = sim.spawn_prefab(prefabs::BARREL, Transform::default()).unwrap();
        assert!(key_of(&sim, e).is_none());
        assert!(key_of(&sim, EntityHandle(999)).is_none());

        let mut index = EntityIndex::default();
        index.on_spawn(&sim, e);
        assert!(index.is_empty());
    }

    #[test]
    fn spawn_is_idempotent_and_records_class() {
        let (sim, cart) = world_with_cart();
        let mut index = EntityIndex::default();
        index.on_spawn(&sim, cart);
        index.on_spawn(&sim, cart);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get(key_of(&sim, cart)),
            Some(Indexed {
                handle: cart,
                class: EntityClass::Train
            })
        );
    }

    #[test]
    fn miss_falls_back_to_scan_and_backfills() {
        let (sim, cart) = world_with_cart();
        let key = key_of(&sim, cart);
        let mut index = EntityIndex::default();

        assert_eq!(index.resolve(&sim, key), Some(cart));
        assert_eq!(index.fallback_scans(), 1);
        assert_eq!(index.resolve(&sim, key), Some(cart));
        assert_eq!(index.fallback_scans(), 1);
    }

    #[test]
    fn disabled_fallback_never_scans() {
        let (sim, cart) = world_with_cart();
        let mut index = EntityIndex::new(FallbackScan::Disabled);
        assert_eq!(index.resolve(&sim, key_of(&sim, cart)), None);
        assert_eq!(index.fallback_scans(), 0);
    }

    #[test]
    fn destroyed_entity_does_not_resolve() {
        let (mut sim, cart) = world_with_cart();
        let key = key_of(&sim, cart);
        let mut index = EntityIndex::default();
        index.rebuild_from_live_world(&sim);

        sim.kill(cart);
        assert_eq!(index.resolve(&sim, key), None);
        sim.reap();
        assert_eq!(index.resolve(&sim, key), None);
        assert_eq!(index.resolve(&sim, EntityKey::NONE), None);
    }
}
