//! Host abstraction.
//!
//! The game engine that owns the live entity set. Everything the anchor
//! service knows about the world goes through this trait, so a real engine
//! binding and the in-memory [`SimWorld`](crate::sim::SimWorld) are
//! interchangeable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    ecs::EntityHandle,
    math::{Quat, Transform, Vec3},
};

/// Network identity of a live entity instance.
///
/// Assigned by the host, unique while the instance lives, not stable across
/// re-creation. `0` is reserved as the "unkeyable" sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityKey(pub u32);

impl EntityKey {
    pub const NONE: Self = Self(0);

    /// Coerces a raw host identity. Values that do not fit yield [`EntityKey::NONE`].
    pub fn from_net_id(raw: u64) -> Self {
        u32::try_from(raw).map(Self).unwrap_or(Self::NONE)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse entity category, recorded once when the entity is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    /// A train car that anchors can be attached to.
    Train,
    /// A building block; anchors are building blocks.
    Buildable,
    Other,
}

/// Building block material grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildingGrade {
    #[default]
    Twigs,
    Wood,
    Stone,
    Metal,
    TopTier,
}

/// Operations the anchor service needs from the game engine.
pub trait Host {
    /// Every live networked entity.
    fn live_entities(&self) -> Vec<EntityHandle>;

    /// False once the entity has been killed, even if its data is still readable.
    fn is_alive(&self, entity: EntityHandle) -> bool;

    /// Raw network identity. Stays readable until the host reaps a killed entity.
    fn net_id(&self, entity: EntityHandle) -> Option<u64>;

    fn class_of(&self, entity: EntityHandle) -> EntityClass;

    /// Full prefab path.
    fn prefab_name(&self, entity: EntityHandle) -> Option<String>;

    /// Prefab file stem, e.g. `workcart.entity`.
    fn short_prefab_name(&self, entity: EntityHandle) -> Option<String>;

    fn parent(&self, entity: EntityHandle) -> Option<EntityHandle>;

    fn world_transform(&self, entity: EntityHandle) -> Option<Transform>;

    /// Nearest live entity hit by a ray within `max_distance`.
    fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<EntityHandle>;

    /// Instantiates a prefab without spawning it. `None` for unknown prefabs.
    fn create_entity(&mut self, prefab: &str, position: Vec3, rotation: Quat)
        -> Option<EntityHandle>;

    /// Spawns a created entity into the networked world.
    fn spawn(&mut self, entity: EntityHandle);

    /// Destroys an entity and its children.
    fn kill(&mut self, entity: EntityHandle);

    fn set_parent(&mut self, child: EntityHandle, parent: EntityHandle, world_position_stays: bool);

    fn set_building_grade(&mut self, entity: EntityHandle, grade: BuildingGrade);

    fn max_health(&self, entity: EntityHandle) -> f32;

    fn set_health(&mut self, entity: EntityHandle, health: f32);

    fn set_saving_enabled(&mut self, entity: EntityHandle, enabled: bool);

    /// Disables every renderer and LOD group on the entity.
    fn hide_renderers(&mut self, entity: EntityHandle);

    /// Pushes the entity's state to clients now instead of on the next tick.
    fn send_network_update_immediate(&mut self, entity: EntityHandle);
}
