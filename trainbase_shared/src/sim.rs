//! In-memory host.
//!
//! `SimWorld` plays the part of the game engine: it owns entities in the
//! [`World`] component store, hands out network identities on spawn, keeps a
//! parent/child transform hierarchy and records lifecycle notifications in an
//! [`EventQueue`]. Killed entities stay readable (network id, prefab, class)
//! until [`SimWorld::reap`] runs, the way a real engine fires its kill hook
//! before freeing the object.

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::{
    ecs::{EntityHandle, World},
    event::{EventQueue, HostEvent},
    host::{BuildingGrade, EntityClass, Host},
    math::{Quat, Transform, Vec3},
};

/// Well-known prefab paths.
pub mod prefabs {
    pub const FOUNDATION: &str = "assets/prefabs/building core/foundation/foundation.prefab";
    pub const WORKCART: &str = "assets/content/vehicles/trains/workcart/workcart.entity.prefab";
    pub const FLATBED: &str =
        "assets/content/vehicles/trains/wagons/trainwagon.flatbed.entity.prefab";
    pub const ORE_HOPPER: &str =
        "assets/content/vehicles/trains/wagons/trainwagon.ore_hopper.entity.prefab";
    pub const COVERED: &str =
        "assets/content/vehicles/trains/wagons/trainwagon.covered_box.entity.prefab";
    pub const LOCOMOTIVE: &str =
        "assets/content/vehicles/trains/locomotive/locomotive.entity.prefab";
    pub const CABOOSE: &str = "assets/content/vehicles/trains/caboose/traincaboose.entity.prefab";
    pub const BARREL: &str = "assets/bundled/prefabs/radtown/loot_barrel_1.prefab";
}

bitflags! {
    /// Per-entity state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityFlags: u32 {
        const SPAWNED = 1 << 0;
        const DESTROYED = 1 << 1;
        const SAVING = 1 << 2;
        const RENDERERS_HIDDEN = 1 << 3;
    }
}

struct NetIdentity(u64);

struct Prefab(String);

struct LocalPose(Transform);

struct Parent(EntityHandle);

struct Bounds {
    radius: f32,
}

struct Kind(EntityClass);

struct NetUpdates(u32);

/// Building block state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockState {
    pub grade: BuildingGrade,
    pub health: f32,
}

/// Maximum health of a building block at each grade.
pub fn grade_max_health(grade: BuildingGrade) -> f32 {
    match grade {
        BuildingGrade::Twigs => 10.0,
        BuildingGrade::Wood => 250.0,
        BuildingGrade::Stone => 500.0,
        BuildingGrade::Metal => 1000.0,
        BuildingGrade::TopTier => 2000.0,
    }
}

/// Maps a prefab path to the entity class it instantiates.
///
/// Anything that is not a `.prefab` path is unknown to the host.
fn classify_prefab(path: &str) -> Option<EntityClass> {
    let lower = path.to_ascii_lowercase();
    if !lower.ends_with(".prefab") {
        return None;
    }
    if lower.contains("/trains/") {
        Some(EntityClass::Train)
    } else if lower.contains("/building core/") {
        Some(EntityClass::Buildable)
    } else {
        Some(EntityClass::Other)
    }
}

fn bounds_for(class: EntityClass) -> Bounds {
    let radius = match class {
        EntityClass::Train => 2.5,
        EntityClass::Buildable => 1.5,
        EntityClass::Other => 0.5,
    };
    Bounds { radius }
}

/// Deterministic in-memory game world.
pub struct SimWorld {
    world: World,
    events: EventQueue,
    next_net_id: u64,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self {
            world: World::default(),
            events: EventQueue::default(),
            next_net_id: 1,
        }
    }

    /// Overrides the next network id handed out on spawn.
    pub fn set_next_net_id(&mut self, id: u64) {
        self.next_net_id = id;
    }

    /// Creates and spawns a prefab in one go.
    pub fn spawn_prefab(&mut self, prefab: &str, pose: Transform) -> Option<EntityHandle> {
        let e = self.create_entity(prefab, pose.position, pose.rotation)?;
        self.spawn(e);
        Some(e)
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Drops pending notifications, as if nobody was listening.
    pub fn discard_events(&mut self) {
        self.events.drain();
    }

    /// Frees every killed entity. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let dead: Vec<EntityHandle> = self
            .world
            .entities()
            .iter()
            .copied()
            .filter(|e| self.flags(*e).contains(EntityFlags::DESTROYED))
            .collect();
        for e in &dead {
            self.world.despawn(*e);
        }
        if !dead.is_empty() {
            trace!(count = dead.len(), "Reaped destroyed entities");
        }
        dead.len()
    }

    pub fn flags(&self, entity: EntityHandle) -> EntityFlags {
        self.world
            .get::<EntityFlags>(entity)
            .copied()
            .unwrap_or_default()
    }

    fn flags_mut(&mut self, entity: EntityHandle) -> Option<&mut EntityFlags> {
        self.world.get_mut::<EntityFlags>(entity)
    }

    /// Direct children of an entity, in creation order.
    pub fn children(&self, entity: EntityHandle) -> Vec<EntityHandle> {
        self.world
            .entities()
            .iter()
            .copied()
            .filter(|c| self.world.get::<Parent>(*c).map(|p| p.0) == Some(entity))
            .collect()
    }

    /// Moves an entity within its parent's frame (or the world frame).
    pub fn set_local_pose(&mut self, entity: EntityHandle, pose: Transform) -> bool {
        match self.world.get_mut::<LocalPose>(entity) {
            Some(local) => {
                local.0 = pose;
                true
            }
            None => false,
        }
    }

    pub fn block_state(&self, entity: EntityHandle) -> Option<BlockState> {
        self.world.get::<BlockState>(entity).copied()
    }

    pub fn network_updates(&self, entity: EntityHandle) -> u32 {
        self.world.get::<NetUpdates>(entity).map_or(0, |n| n.0)
    }
}

impl Host for SimWorld {
    fn live_entities(&self) -> Vec<EntityHandle> {
        self.world
            .entities()
            .iter()
            .copied()
            .filter(|e| {
                let flags = self.flags(*e);
                flags.contains(EntityFlags::SPAWNED) && !flags.contains(EntityFlags::DESTROYED)
            })
            .collect()
    }

    fn is_alive(&self, entity: EntityHandle) -> bool {
        self.world.contains(entity) && !self.flags(entity).contains(EntityFlags::DESTROYED)
    }

    fn net_id(&self, entity: EntityHandle) -> Option<u64> {
        self.world.get::<NetIdentity>(entity).map(|n| n.0)
    }

    fn class_of(&self, entity: EntityHandle) -> EntityClass {
        self.world
            .get::<Kind>(entity)
            .map_or(EntityClass::Other, |k| k.0)
    }

    fn prefab_name(&self, entity: EntityHandle) -> Option<String> {
        self.world.get::<Prefab>(entity).map(|p| p.0.clone())
    }

    fn short_prefab_name(&self, entity: EntityHandle) -> Option<String> {
        let path = &self.world.get::<Prefab>(entity)?.0;
        let file = path.rsplit('/').next().unwrap_or(path);
        Some(file.strip_suffix(".prefab").unwrap_or(file).to_string())
    }

    fn parent(&self, entity: EntityHandle) -> Option<EntityHandle> {
        self.world.get::<Parent>(entity).map(|p| p.0)
    }

    fn world_transform(&self, entity: EntityHandle) -> Option<Transform> {
        let local = self.world.get::<LocalPose>(entity)?.0;
        match self.parent(entity) {
            Some(parent) => {
                let parent_pose = self.world_transform(parent)?;
                Some(parent_pose.apply(local.position, local.rotation))
            }
            None => Some(local),
        }
    }

    /// Nearest live networked entity hit by a ray, within `max_distance`.
    fn raycast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<EntityHandle> {
        let dir = dir.normalized();
        if dir == Vec3::ZERO {
            return None;
        }

        let mut best: Option<(f32, EntityHandle)> = None;
        for e in self.live_entities() {
            let (Some(bounds), Some(pose)) = (self.world.get::<Bounds>(e), self.world_transform(e))
            else {
                continue;
            };
            let oc = pose.position - origin;
            let along = oc.dot(dir);
            let r_sq = bounds.radius * bounds.radius;
            let perp_sq = oc.len_sq() - along * along;
            if perp_sq > r_sq {
                continue;
            }
            let entry = (along - (r_sq - perp_sq).sqrt()).max(0.0);
            if along + bounds.radius < 0.0 || entry > max_distance {
                continue;
            }
            if best.map_or(true, |(t, _)| entry < t) {
                best = Some((entry, e));
            }
        }
        best.map(|(_, e)| e)
    }

    fn create_entity(
        &mut self,
        prefab: &str,
        position: Vec3,
        rotation: Quat,
    ) -> Option<EntityHandle> {
        let Some(class) = classify_prefab(prefab) else {
            debug!(%prefab, "Unknown prefab");
            return None;
        };

        let e = self.world.spawn();
        self.world.insert(e, Prefab(prefab.to_string()));
        self.world.insert(e, Kind(class));
        self.world.insert(e, LocalPose(Transform::new(position, rotation)));
        self.world.insert(e, bounds_for(class));
        self.world.insert(e, EntityFlags::empty());
        if class == EntityClass::Buildable {
            self.world.insert(
                e,
                BlockState {
                    grade: BuildingGrade::Twigs,
                    health: grade_max_health(BuildingGrade::Twigs),
                },
            );
        }
        Some(e)
    }

    fn spawn(&mut self, entity: EntityHandle) {
        let Some(flags) = self.flags_mut(entity) else {
            return;
        };
        if flags.intersects(EntityFlags::SPAWNED | EntityFlags::DESTROYED) {
            return;
        }
        flags.insert(EntityFlags::SPAWNED);

        let id = self.next_net_id;
        self.next_net_id += 1;
        self.world.insert(entity, NetIdentity(id));
        self.events.push(HostEvent::EntitySpawned(entity));
        trace!(entity = ?entity, net_id = id, "Spawned");
    }

    fn kill(&mut self, entity: EntityHandle) {
        if !self.is_alive(entity) {
            return;
        }
        for child in self.children(entity) {
            self.kill(child);
        }

        let spawned = self.flags(entity).contains(EntityFlags::SPAWNED);
        if let Some(flags) = self.flags_mut(entity) {
            flags.insert(EntityFlags::DESTROYED);
        }
        if spawned {
            self.events.push(HostEvent::EntityDestroyed(entity));
        } else {
            self.world.despawn(entity);
        }
        trace!(entity = ?entity, "Killed");
    }

    fn set_parent(
        &mut self,
        child: EntityHandle,
        parent: EntityHandle,
        world_position_stays: bool,
    ) {
        if !self.world.contains(child) || !self.world.contains(parent) {
            return;
        }
        if world_position_stays {
            if let (Some(child_pose), Some(parent_pose)) =
                (self.world_transform(child), self.world_transform(parent))
            {
                self.world
                    .insert(child, LocalPose(child_pose.relative_to(&parent_pose)));
            }
        }
        self.world.insert(child, Parent(parent));
    }

    fn set_building_grade(&mut self, entity: EntityHandle, grade: BuildingGrade) {
        if let Some(block) = self.world.get_mut::<BlockState>(entity) {
            block.grade = grade;
            block.health = block.health.min(grade_max_health(grade));
        }
    }

    fn max_health(&self, entity: EntityHandle) -> f32 {
        self.block_state(entity)
            .map_or(0.0, |b| grade_max_health(b.grade))
    }

    fn set_health(&mut self, entity: EntityHandle, health: f32) {
        if let Some(block) = self.world.get_mut::<BlockState>(entity) {
            block.health = health.clamp(0.0, grade_max_health(block.grade));
        }
    }

    fn set_saving_enabled(&mut self, entity: EntityHandle, enabled: bool) {
        if let Some(flags) = self.flags_mut(entity) {
            flags.set(EntityFlags::SAVING, enabled);
        }
    }

    fn hide_renderers(&mut self, entity: EntityHandle) {
        if let Some(flags) = self.flags_mut(entity) {
            flags.insert(EntityFlags::RENDERERS_HIDDEN);
        }
    }

    fn send_network_update_immediate(&mut self, entity: EntityHandle) {
        if !self.is_alive(entity) {
            return;
        }
        let count = self.network_updates(entity) + 1;
        self.world.insert(entity, NetUpdates(count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn spawn_assigns_net_ids_and_emits_events() {
        let mut sim = SimWorld::new();
        let a = sim.spawn_prefab(prefabs::WORKCART, at(0.0, 0.0, 0.0)).unwrap();
        let b = sim.spawn_prefab(prefabs::BARREL, at(5.0, 0.0, 0.0)).unwrap();

        assert_eq!(sim.net_id(a), Some(1));
        assert_eq!(sim.net_id(b), Some(2));
        assert_eq!(sim.class_of(a), EntityClass::Train);
        assert_eq!(sim.class_of(b), EntityClass::Other);
        assert_eq!(
            sim.events_mut().drain(),
            vec![HostEvent::EntitySpawned(a), HostEvent::EntitySpawned(b)]
        );
    }

    #[test]
    fn unknown_prefab_is_rejected() {
        let mut sim = SimWorld::new();
        assert!(sim.create_entity("not/a/prefab", Vec3::ZERO, Quat::IDENTITY).is_none());
        assert!(sim.create_entity("", Vec3::ZERO, Quat::IDENTITY).is_none());
    }

    #[test]
    fn kill_cascades_to_children_and_stays_readable_until_reaped() {
        let mut sim = SimWorld::new();
        let train = sim.spawn_prefab(prefabs::FLATBED, at(10.0, 0.0, 0.0)).unwrap();
        let block = sim.spawn_prefab(prefabs::FOUNDATION, at(11.0, 0.0, 0.0)).unwrap();
        sim.set_parent(block, train, true);
        sim.discard_events();

        sim.kill(train);
        assert!(!sim.is_alive(train));
        assert!(!sim.is_alive(block));
        assert_eq!(
            sim.events_mut().drain(),
            vec![
                HostEvent::EntityDestroyed(block),
                HostEvent::EntityDestroyed(train)
            ]
        );
        assert_eq!(sim.net_id(train), Some(1));

        assert_eq!(sim.reap(), 2);
        assert_eq!(sim.net_id(train), None);
        assert!(sim.live_entities().is_empty());
    }

    #[test]
    fn children_follow_parent() {
        let mut sim = SimWorld::new();
        let train = sim.spawn_prefab(prefabs::WORKCART, at(0.0, 0.0, 0.0)).unwrap();
        let block = sim.spawn_prefab(prefabs::FOUNDATION, at(1.2, 0.05, 0.0)).unwrap();
        sim.set_parent(block, train, true);

        sim.set_local_pose(train, at(100.0, 0.0, 0.0));
        let pose = sim.world_transform(block).unwrap();
        assert!(pose.position.approx_eq(Vec3::new(101.2, 0.05, 0.0), 1e-4));
    }

    #[test]
    fn raycast_hits_nearest() {
        let mut sim = SimWorld::new();
        let near = sim.spawn_prefab(prefabs::WORKCART, at(5.0, 0.0, 0.0)).unwrap();
        let _far = sim.spawn_prefab(prefabs::LOCOMOTIVE, at(20.0, 0.0, 0.0)).unwrap();

        let hit = sim.raycast(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 8.0);
        assert_eq!(hit, Some(near));
        assert_eq!(sim.raycast(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), 8.0), None);
        assert_eq!(sim.raycast(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 2.0), None);
    }

    #[test]
    fn building_grade_sets_health_cap() {
        let mut sim = SimWorld::new();
        let block = sim.spawn_prefab(prefabs::FOUNDATION, at(0.0, 0.0, 0.0)).unwrap();
        sim.set_building_grade(block, BuildingGrade::Metal);
        assert_eq!(sim.max_health(block), 1000.0);
        sim.set_health(block, sim.max_health(block));
        assert_eq!(
            sim.block_state(block),
            Some(BlockState {
                grade: BuildingGrade::Metal,
                health: 1000.0
            })
        );
    }
}
