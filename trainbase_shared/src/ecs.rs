//! Entity/component storage (minimal ECS).
//!
//! Backs the simulated host world. It is not archetype-based; typed
//! component storages are keyed by entity handle, and despawning an entity
//! removes it from every storage.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

/// Host-side handle to an entity instance.
///
/// Handles are never reused, so a stale handle can be detected by the host
/// instead of silently aliasing a newer entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

/// Type-erased storage that can drop a single entity's component.
trait ComponentStorage: Send + Sync {
    fn remove(&mut self, entity: EntityHandle);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send + Sync> ComponentStorage for HashMap<EntityHandle, T> {
    fn remove(&mut self, entity: EntityHandle) {
        HashMap::remove(self, &entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple world that can store typed components.
#[derive(Default)]
pub struct World {
    next_id: u64,
    alive: Vec<EntityHandle>,
    storages: HashMap<TypeId, Box<dyn ComponentStorage>>,
}

impl World {
    /// Creates a new entity.
    pub fn spawn(&mut self) -> EntityHandle {
        self.next_id += 1;
        let id = EntityHandle(self.next_id);
        self.alive.push(id);
        id
    }

    /// Removes an entity and all of its components.
    pub fn despawn(&mut self, entity: EntityHandle) -> bool {
        let Some(pos) = self.alive.iter().position(|e| *e == entity) else {
            return false;
        };
        self.alive.remove(pos);
        for storage in self.storages.values_mut() {
            storage.remove(entity);
        }
        true
    }

    pub fn contains(&self, entity: EntityHandle) -> bool {
        self.alive.contains(&entity)
    }

    /// Entities in creation order.
    pub fn entities(&self) -> &[EntityHandle] {
        &self.alive
    }

    /// Inserts/replaces a component for an entity.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityHandle, component: T) {
        if let Some(storage) = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(HashMap::<EntityHandle, T>::new()))
            .as_any_mut()
            .downcast_mut::<HashMap<EntityHandle, T>>()
        {
            storage.insert(entity, component);
        }
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityHandle) -> Option<&T> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<HashMap<EntityHandle, T>>())
            .and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityHandle) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<HashMap<EntityHandle, T>>())
            .and_then(|storage| storage.get_mut(&entity))
    }
}
