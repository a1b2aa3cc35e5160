//! Anchor lifecycle.
//!
//! [`AnchorService`] owns the entity index, the ownership store and the
//! reverse links, and is the only place anchors are created or forgotten.
//! Every mutation of the store is followed by a synchronous persist.

use tracing::{debug, error, info, warn};
use trainbase_shared::{
    category::{detect_category, CarCategory},
    config::{AnchorConfig, PresetCatalog},
    ecs::EntityHandle,
    event::HostEvent,
    host::{BuildingGrade, EntityClass, EntityKey, Host},
    math::{Quat, Vec3},
};

use crate::{
    error::{AnchorError, Result},
    index::{key_of, EntityIndex, FallbackScan},
    ownership::{OwnershipStore, ReverseLinks},
    persist::OwnershipBackend,
};

/// What a sweep removed or relinked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub trains_dropped: usize,
    pub anchors_dropped: usize,
    pub links_refreshed: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.trains_dropped == 0 && self.anchors_dropped == 0
    }
}

/// Result of a preset application that placed at least one anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetOutcome {
    pub category: CarCategory,
    pub anchors: Vec<EntityHandle>,
    /// Offsets whose anchor could not be created.
    pub failed: usize,
}

/// Process-scoped anchor state.
pub struct AnchorService {
    config: AnchorConfig,
    catalog: PresetCatalog,
    index: EntityIndex,
    store: OwnershipStore,
    links: ReverseLinks,
    backend: Box<dyn OwnershipBackend>,
}

impl AnchorService {
    /// Creates an idle service with empty state. See [`AnchorService::start`].
    pub fn new(config: AnchorConfig, backend: Box<dyn OwnershipBackend>) -> Self {
        let catalog = config.catalog();
        Self {
            config,
            catalog,
            index: EntityIndex::new(FallbackScan::Enabled),
            store: OwnershipStore::default(),
            links: ReverseLinks::default(),
            backend,
        }
    }

    /// Loads the store, indexes the live world, relinks and sweeps.
    pub fn start(
        config: AnchorConfig,
        backend: Box<dyn OwnershipBackend>,
        host: &dyn Host,
    ) -> Self {
        let mut service = Self::new(config, backend);
        service.load();
        service.index.rebuild_from_live_world(host);
        service.rebuild_reverse_links();
        let report = service.sweep(host);
        info!(
            trains = service.store.len(),
            anchors = service.store.anchor_count(),
            indexed = service.index.len(),
            dropped_trains = report.trains_dropped,
            dropped_anchors = report.anchors_dropped,
            "Anchor service started"
        );
        service
    }

    /// Persists and releases all in-memory state.
    pub fn shutdown(&mut self) {
        self.persist();
        self.index.clear();
        self.links.clear();
        self.store.clear();
        info!("Anchor service stopped");
    }

    fn load(&mut self) {
        self.store = match self.backend.read() {
            Ok(Some(stored)) => OwnershipStore::from_stored(stored),
            Ok(None) => OwnershipStore::default(),
            Err(e) => {
                warn!(error = %e, "Could not read ownership data, starting empty");
                OwnershipStore::default()
            }
        };
        debug!(trains = self.store.len(), "Ownership data loaded");
    }

    fn persist(&mut self) {
        if let Err(e) = self.backend.write(&self.store.to_stored()) {
            error!(error = %e, "Failed to persist ownership data");
        }
    }

    /// Writes the store on demand (periodic world save).
    pub fn save(&mut self) {
        self.persist();
    }

    /// Recomputes anchor → train links from the store.
    pub fn rebuild_reverse_links(&mut self) {
        self.links.clear();
        for record in self.store.records() {
            for anchor in &record.anchor_keys {
                self.links.set(*anchor, record.train_key);
            }
        }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PresetCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &OwnershipStore {
        &self.store
    }

    pub fn links(&self) -> &ReverseLinks {
        &self.links
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    /// Allows or forbids full-world scans on index misses.
    pub fn set_fallback_scan(&mut self, fallback: FallbackScan) {
        self.index.set_fallback(fallback);
    }

    /// Anchor keys currently owned by `train`.
    pub fn anchors_of(&self, train: EntityKey) -> &[EntityKey] {
        match self.store.get(train) {
            Some(record) => &record.anchor_keys,
            None => &[],
        }
    }

    pub fn key_of(&self, host: &dyn Host, entity: EntityHandle) -> EntityKey {
        key_of(host, entity)
    }

    pub fn resolve(&mut self, host: &dyn Host, key: EntityKey) -> Option<EntityHandle> {
        self.index.resolve(host, key)
    }

    /// Class recorded at index time, falling back to asking the host.
    fn class_of(&self, host: &dyn Host, entity: EntityHandle) -> EntityClass {
        self.index
            .get(key_of(host, entity))
            .filter(|i| i.handle == entity)
            .map_or_else(|| host.class_of(entity), |i| i.class)
    }

    /// Nearest train at or above the hit entity in the parent chain.
    pub fn resolve_train_from_hit(
        &self,
        host: &dyn Host,
        hit: EntityHandle,
    ) -> Option<EntityHandle> {
        let mut current = Some(hit);
        while let Some(entity) = current {
            if !host.is_alive(entity) {
                return None;
            }
            if self.class_of(host, entity) == EntityClass::Train {
                return Some(entity);
            }
            current = host.parent(entity);
        }
        None
    }

    /// Category from the train's prefab name.
    pub fn detect_category(&self, host: &dyn Host, train: EntityHandle) -> CarCategory {
        let name = host
            .short_prefab_name(train)
            .or_else(|| host.prefab_name(train))
            .unwrap_or_default();
        detect_category(&name)
    }

    /// Dispatches one host notification.
    pub fn handle_event(&mut self, host: &mut dyn Host, event: HostEvent) {
        match event {
            HostEvent::EntitySpawned(entity) => self.on_entity_spawned(host, entity),
            HostEvent::EntityDestroyed(entity) => self.on_entity_destroyed(host, entity),
            HostEvent::ServerSave => self.save(),
        }
    }

    pub fn on_entity_spawned(&mut self, host: &dyn Host, entity: EntityHandle) {
        self.index.on_spawn(host, entity);
    }

    /// Unindexes a destroyed entity and cascades ownership changes.
    pub fn on_entity_destroyed(&mut self, host: &mut dyn Host, entity: EntityHandle) {
        let key = key_of(host, entity);
        if key.is_none() {
            return;
        }
        let class = self
            .index
            .on_destroy(key)
            .filter(|i| i.handle == entity)
            .map_or_else(|| host.class_of(entity), |i| i.class);

        if class == EntityClass::Train {
            let Some(record) = self.store.remove(key) else {
                return;
            };
            let mut killed = 0;
            for anchor in &record.anchor_keys {
                if let Some(handle) = self.index.resolve(host, *anchor) {
                    host.kill(handle);
                    killed += 1;
                }
                self.links.remove(*anchor);
            }
            self.persist();
            info!(
                train = %key,
                anchors = record.anchor_keys.len(),
                killed,
                "Train destroyed, anchors removed"
            );
            return;
        }

        if let Some(train) = self.links.remove(key) {
            let emptied = match self.store.get_mut(train) {
                Some(record) => {
                    record.remove_anchor(key);
                    record.anchor_keys.is_empty()
                }
                None => false,
            };
            if emptied {
                self.store.remove(train);
            }
            self.persist();
            debug!(anchor = %key, train = %train, emptied, "Anchor destroyed");
        }
    }

    /// Spawns one anchor on `train` at a pose local to the train.
    pub fn create_anchor(
        &mut self,
        host: &mut dyn Host,
        train: EntityHandle,
        local_offset: Vec3,
        local_rotation: Quat,
    ) -> Result<EntityHandle> {
        let train_key = key_of(host, train);
        let pose = match host.world_transform(train) {
            Some(pose) if host.is_alive(train) && !train_key.is_none() => {
                pose.apply(local_offset, local_rotation)
            }
            _ => return Err(AnchorError::ResolutionFailure { key: train_key }),
        };

        let prefab = self.config.anchor_prefab_id.clone();
        let Some(anchor) = host.create_entity(&prefab, pose.position, pose.rotation) else {
            error!(%prefab, "Configured anchor prefab could not be created");
            return Err(AnchorError::ConfigurationError { prefab });
        };
        if host.class_of(anchor) != EntityClass::Buildable {
            host.kill(anchor);
            error!(%prefab, "Configured prefab is not a building block");
            return Err(AnchorError::ConfigurationError { prefab });
        }

        host.set_building_grade(anchor, BuildingGrade::Metal);
        let max = host.max_health(anchor);
        host.set_health(anchor, max);
        host.set_saving_enabled(anchor, true);
        host.spawn(anchor);
        host.set_parent(anchor, train, true);
        host.hide_renderers(anchor);

        let anchor_key = key_of(host, anchor);
        if anchor_key.is_none() {
            host.kill(anchor);
            warn!(train = %train_key, "Spawned anchor has no usable network id");
            return Err(AnchorError::ResolutionFailure {
                key: EntityKey::NONE,
            });
        }

        self.index.on_spawn(host, anchor);
        self.store.entry(train_key).push_anchor(anchor_key);
        self.links.set(anchor_key, train_key);
        self.persist();

        host.send_network_update_immediate(anchor);
        debug!(train = %train_key, anchor = %anchor_key, ?local_offset, "Anchor created");
        Ok(anchor)
    }

    /// Kills every anchor of `train` and drops its record. Returns how many
    /// live anchors were killed.
    pub fn clear_anchors(&mut self, host: &mut dyn Host, train: EntityHandle) -> usize {
        let train_key = key_of(host, train);
        let Some(record) = self.store.remove(train_key) else {
            return 0;
        };

        let mut killed = 0;
        for anchor in &record.anchor_keys {
            if let Some(handle) = self.index.resolve(host, *anchor) {
                host.kill(handle);
                killed += 1;
            }
            self.links.remove(*anchor);
        }
        self.persist();
        info!(train = %train_key, killed, "Anchors cleared");
        killed
    }

    /// Reconciles the store against the live world.
    pub fn sweep(&mut self, host: &dyn Host) -> SweepReport {
        let mut report = SweepReport::default();

        for train_key in self.store.train_keys() {
            let train_live = self
                .index
                .resolve_indexed(host, train_key)
                .is_some_and(|i| i.class == EntityClass::Train);

            let anchors = self
                .store
                .get(train_key)
                .map(|r| r.anchor_keys.clone())
                .unwrap_or_default();

            if !train_live {
                for anchor in &anchors {
                    self.links.remove(*anchor);
                }
                self.store.remove(train_key);
                report.trains_dropped += 1;
                report.anchors_dropped += anchors.len();
                warn!(
                    train = %train_key,
                    anchors = anchors.len(),
                    "Dropping record of missing train"
                );
                continue;
            }

            let mut kept = Vec::with_capacity(anchors.len());
            for anchor in anchors {
                let is_block = self
                    .index
                    .resolve_indexed(host, anchor)
                    .is_some_and(|i| i.class == EntityClass::Buildable);
                if is_block {
                    self.links.set(anchor, train_key);
                    report.links_refreshed += 1;
                    kept.push(anchor);
                } else {
                    self.links.remove(anchor);
                    report.anchors_dropped += 1;
                }
            }

            if kept.is_empty() {
                self.store.remove(train_key);
                report.trains_dropped += 1;
            } else if let Some(record) = self.store.get_mut(train_key) {
                record.anchor_keys = kept;
            }
        }

        self.persist();
        if report.is_clean() {
            debug!(links = report.links_refreshed, "Sweep found no drift");
        } else {
            info!(
                trains_dropped = report.trains_dropped,
                anchors_dropped = report.anchors_dropped,
                links = report.links_refreshed,
                "Sweep purged stale anchors"
            );
        }
        report
    }

    /// Places the anchors of a preset on `train`.
    ///
    /// Succeeds when at least one anchor was created; individual placement
    /// failures are counted in the outcome.
    pub fn apply_preset(
        &mut self,
        host: &mut dyn Host,
        train: EntityHandle,
        category: CarCategory,
        clear_first: bool,
    ) -> Result<PresetOutcome> {
        if !host.is_alive(train) {
            return Err(AnchorError::ResolutionFailure {
                key: key_of(host, train),
            });
        }

        let offsets = self.catalog.offsets(category).to_vec();
        if offsets.is_empty() {
            warn!(%category, "No preset offsets configured");
            return Err(AnchorError::PresetMissing { category });
        }

        if clear_first {
            self.clear_anchors(host, train);
        }

        let mut anchors = Vec::with_capacity(offsets.len());
        let mut failed = 0;
        for offset in &offsets {
            match self.create_anchor(host, train, *offset, Quat::IDENTITY) {
                Ok(anchor) => anchors.push(anchor),
                Err(e) => {
                    debug!(error = %e, ?offset, "Preset anchor failed");
                    failed += 1;
                }
            }
        }

        if anchors.is_empty() {
            return Err(AnchorError::PartialCreationFailure {
                attempted: offsets.len(),
            });
        }
        if failed > 0 {
            warn!(%category, created = anchors.len(), failed, "Preset applied partially");
        } else {
            info!(%category, created = anchors.len(), "Preset applied");
        }
        Ok(PresetOutcome {
            category,
            anchors,
            failed,
        })
    }
}
