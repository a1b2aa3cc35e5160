//! Shared fixtures for the integration tests.
//!
//! A [`Harness`] is one "server session": a world, an anchor service started
//! over it and the backend it persists to. Restarting keeps the world and the
//! backend, and starts a fresh service, the way a plugin reload does.

use tracing::debug;
use trainbase_server::{anchors::AnchorService, persist::MemoryBackend};
use trainbase_shared::{prelude::*, sim::SimWorld};

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub world: SimWorld,
    pub service: AnchorService,
    pub backend: MemoryBackend,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AnchorConfig::default())
    }

    pub fn with_config(config: AnchorConfig) -> Self {
        let backend = MemoryBackend::new();
        let world = SimWorld::new();
        let service = AnchorService::start(config, Box::new(backend.clone()), &world);
        Self {
            world,
            service,
            backend,
        }
    }

    /// Starts a service over an already populated world and existing data.
    pub fn resume(mut world: SimWorld, backend: MemoryBackend) -> Self {
        world.discard_events();
        let service =
            AnchorService::start(AnchorConfig::default(), Box::new(backend.clone()), &world);
        Self {
            world,
            service,
            backend,
        }
    }

    /// Spawns a prefab at `position` and lets the service see the spawn.
    pub fn spawn(&mut self, prefab: &str, position: Vec3) -> anyhow::Result<EntityHandle> {
        let entity = self
            .world
            .spawn_prefab(prefab, Transform::from_position(position))
            .ok_or_else(|| anyhow::anyhow!("unknown prefab {prefab}"))?;
        self.pump();
        Ok(entity)
    }

    pub fn kill(&mut self, entity: EntityHandle) {
        self.world.kill(entity);
        self.pump();
    }

    /// Delivers pending host events until the queue is empty, then reaps.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.world.events_mut().pop() {
            self.service.handle_event(&mut self.world, event);
            handled += 1;
        }
        self.world.reap();
        handled
    }

    pub fn key(&self, entity: EntityHandle) -> EntityKey {
        self.service.key_of(&self.world, entity)
    }

    /// Shuts the service down and starts a new one over the same world and backend.
    pub fn restart(&mut self) {
        self.restart_with(|_| {});
    }

    /// Like [`Harness::restart`], mutating the world while the service is down.
    pub fn restart_with(&mut self, offline: impl FnOnce(&mut SimWorld)) {
        self.pump();
        self.service.shutdown();
        offline(&mut self.world);
        // Nobody is listening while the service is down.
        self.world.discard_events();
        self.world.reap();
        let config = self.service.config().clone();
        debug!(live = self.world.live_entities().len(), "Restarting anchor service");
        self.service = AnchorService::start(config, Box::new(self.backend.clone()), &self.world);
    }

    /// Every structural invariant the service keeps between events.
    pub fn assert_consistent(&self) {
        let store = self.service.store();
        assert!(
            self.service.links().is_consistent_with(store),
            "reverse links out of sync with store"
        );
        for record in store.records() {
            assert!(!record.train_key.is_none());
            assert!(!record.anchor_keys.is_empty(), "empty record for {}", record.train_key);
            let mut seen = std::collections::BTreeSet::new();
            for anchor in &record.anchor_keys {
                assert!(seen.insert(*anchor), "duplicate anchor {anchor}");
                assert!(!anchor.is_none());
            }
        }
    }

    /// True when every stored train and anchor is live in the world.
    pub fn store_matches_world(&self) -> bool {
        let live: std::collections::BTreeSet<EntityKey> = self
            .world
            .live_entities()
            .into_iter()
            .map(|e| self.key(e))
            .collect();
        self.service.store().records().all(|r| {
            live.contains(&r.train_key) && r.anchor_keys.iter().all(|a| live.contains(a))
        })
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
