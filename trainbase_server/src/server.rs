//! Server implementation.
//!
//! A tick-driven host loop around the anchor service. It supports:
//! - Host lifecycle events forwarded to the anchor service in order
//! - Periodic world saves
//! - Kinematic train movement (anchors ride along as children)
//! - Console commands (spawn, kill, move, drive, look, trainbase, status, save, quit)
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Events are drained to exhaustion every tick, so a cascade started by one
//!   handler is finished before the tick ends.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};
use trainbase_shared::{
    config::{AnchorConfig, ServerConfig},
    ecs::EntityHandle,
    event::HostEvent,
    host::{EntityKey, Host},
    math::{Quat, Transform, Vec3},
    sim::SimWorld,
};

use crate::{
    anchors::AnchorService,
    commands::{self, Player, PERM_USE},
    persist::{JsonFileBackend, OwnershipBackend},
};

/// Server lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Running,
    /// `quit` was issued; the caller should shut down.
    Stopping,
}

/// Game server hosting the anchor service.
pub struct GameServer {
    pub cfg: ServerConfig,
    world: SimWorld,
    service: AnchorService,
    /// The console operator, used as the player for `trainbase` commands.
    operator: Player,
    /// Per-train velocity in world units per second.
    velocities: BTreeMap<EntityHandle, Vec3>,

    tick: u32,
    state: ServerState,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Loads the anchor config and ownership data from disk.
    pub fn new(cfg: ServerConfig) -> anyhow::Result<Self> {
        let anchor_cfg = AnchorConfig::load_or_create(Path::new(&cfg.config_path))
            .context("load anchor config")?;
        let backend = JsonFileBackend::new(PathBuf::from(&cfg.data_dir));
        info!(data = %backend.path().display(), "Using ownership data file");
        Ok(Self::with_parts(
            cfg,
            SimWorld::new(),
            anchor_cfg,
            Box::new(backend),
        ))
    }

    /// Builds a server around an existing world, starting the anchor service
    /// against whatever is already live in it.
    pub fn with_parts(
        cfg: ServerConfig,
        mut world: SimWorld,
        anchor_cfg: AnchorConfig,
        backend: Box<dyn OwnershipBackend>,
    ) -> Self {
        // The service indexes the live world itself on start.
        world.discard_events();
        world.reap();
        let service = AnchorService::start(anchor_cfg, backend, &world);

        let mut operator = Player::new("console");
        operator.admin = true;

        Self {
            cfg,
            world,
            service,
            operator,
            velocities: BTreeMap::new(),
            tick: 0,
            state: ServerState::Running,
            console_rx: None,
        }
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut SimWorld {
        &mut self.world
    }

    pub fn service(&self) -> &AnchorService {
        &self.service
    }

    pub fn operator_mut(&mut self) -> &mut Player {
        &mut self.operator
    }

    /// Hands the world back after persisting, for restart scenarios.
    pub fn shutdown(mut self) -> SimWorld {
        self.pump_events();
        self.service.shutdown();
        self.world
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32())?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.process_console_commands()?;
        self.simulate(dt_sec);
        self.tick += 1;
        if self.cfg.save_interval_ticks > 0 && self.tick % self.cfg.save_interval_ticks == 0 {
            self.world.events_mut().push(HostEvent::ServerSave);
        }
        self.pump_events();
        Ok(())
    }

    /// Delivers queued host events to the anchor service until none remain,
    /// then frees destroyed entities.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.world.events_mut().pop() {
            if let HostEvent::EntityDestroyed(entity) = event {
                self.velocities.remove(&entity);
            }
            self.service.handle_event(&mut self.world, event);
            handled += 1;
        }
        self.world.reap();
        handled
    }

    fn process_console_commands(&mut self) -> anyhow::Result<()> {
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line)? {
                println!("{out}");
            }
        }
        Ok(())
    }

    fn simulate(&mut self, dt_sec: f32) {
        for (entity, velocity) in &self.velocities {
            let Some(pose) = self.world.world_transform(*entity) else {
                continue;
            };
            let moved = Transform::new(pose.position + *velocity * dt_sec, pose.rotation);
            self.world.set_local_pose(*entity, moved);
        }
    }

    fn resolve_arg(&mut self, arg: &str) -> Option<EntityHandle> {
        let key = EntityKey(arg.parse().ok()?);
        self.service.resolve(&self.world, key)
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() || line.starts_with("//") {
            return Ok(Vec::new());
        }

        let floats = |args: &[&str]| -> Option<Vec3> {
            match args {
                [x, y, z, ..] => Some(Vec3::new(x.parse().ok()?, y.parse().ok()?, z.parse().ok()?)),
                _ => None,
            }
        };

        let out = match tokens[0] {
            "trainbase" => {
                let reply = commands::execute(
                    &mut self.service,
                    &mut self.world,
                    &self.operator,
                    &tokens[1..],
                );
                let mut out = reply.lines;
                if let Some(panel) = reply.panel {
                    out.push(format!("== {} ==", panel.title));
                    for button in panel.buttons {
                        out.push(format!("  {:<20} {}", button.label, button.command));
                    }
                }
                out
            }
            "spawn" => {
                let Some(prefab) = tokens.get(1) else {
                    return Ok(vec!["Usage: spawn <prefab> [x y z]".to_string()]);
                };
                let position = floats(&tokens[2..]).unwrap_or(Vec3::ZERO);
                match self
                    .world
                    .spawn_prefab(prefab, Transform::from_position(position))
                {
                    Some(entity) => {
                        let key = crate::index::key_of(&self.world, entity);
                        vec![format!("Spawned {prefab} as {key}")]
                    }
                    None => vec![format!("Unknown prefab: {prefab}")],
                }
            }
            "kill" => match tokens.get(1).and_then(|a| self.resolve_arg(a)) {
                Some(entity) => {
                    self.world.kill(entity);
                    vec!["Killed.".to_string()]
                }
                None => vec!["Usage: kill <key> (live entity)".to_string()],
            },
            "move" => {
                let entity = tokens.get(1).and_then(|a| self.resolve_arg(a));
                match (entity, floats(tokens.get(2..).unwrap_or_default())) {
                    (Some(entity), Some(p)) => {
                        let rotation = self
                            .world
                            .world_transform(entity)
                            .map_or(Quat::IDENTITY, |t| t.rotation);
                        self.world.set_local_pose(entity, Transform::new(p, rotation));
                        vec![format!("Moved to {} {} {}", p.x, p.y, p.z)]
                    }
                    _ => vec!["Usage: move <key> <x> <y> <z>".to_string()],
                }
            }
            "drive" => {
                let entity = tokens.get(1).and_then(|a| self.resolve_arg(a));
                match (entity, floats(tokens.get(2..).unwrap_or_default())) {
                    (Some(entity), Some(velocity)) => {
                        self.velocities.insert(entity, velocity);
                        vec![format!(
                            "Velocity set to {} {} {}",
                            velocity.x, velocity.y, velocity.z
                        )]
                    }
                    _ => vec!["Usage: drive <key> <vx> <vy> <vz>".to_string()],
                }
            }
            "pos" => match floats(&tokens[1..]) {
                Some(p) => {
                    self.operator.eyes = p;
                    vec![format!("Eyes at {} {} {}", p.x, p.y, p.z)]
                }
                None => vec!["Usage: pos <x> <y> <z>".to_string()],
            },
            "look" => match floats(&tokens[1..]) {
                Some(d) => {
                    self.operator.forward = d;
                    vec![format!("Looking along {} {} {}", d.x, d.y, d.z)]
                }
                None => vec!["Usage: look <x> <y> <z>".to_string()],
            },
            "grant" => {
                self.operator.permissions.insert(PERM_USE.to_string());
                vec![format!("Granted {PERM_USE}")]
            }
            "revoke" => {
                self.operator.permissions.remove(PERM_USE);
                self.operator.admin = false;
                vec![format!("Revoked {PERM_USE} and admin")]
            }
            "save" => {
                self.world.events_mut().push(HostEvent::ServerSave);
                vec!["Saved.".to_string()]
            }
            "status" => self.status_lines(),
            "quit" | "exit" => {
                info!("Server shutting down");
                self.state = ServerState::Stopping;
                vec!["Shutting down.".to_string()]
            }
            other => {
                debug!(command = %other, "Unknown console command");
                vec![format!("Unknown command: {other}")]
            }
        };

        self.pump_events();
        Ok(out)
    }

    fn status_lines(&self) -> Vec<String> {
        let store = self.service.store();
        let mut out = vec![
            format!("Server state: {:?}", self.state),
            format!("Tick: {}", self.tick),
            format!("Live entities: {}", self.world.live_entities().len()),
            format!(
                "Indexed: {} (fallback scans: {})",
                self.service.index().len(),
                self.service.index().fallback_scans()
            ),
            format!("Trains with anchors: {}", store.len()),
        ];
        for record in store.records() {
            let anchors: Vec<String> = record.anchor_keys.iter().map(|k| k.to_string()).collect();
            out.push(format!("  train {}: [{}]", record.train_key, anchors.join(", ")));
        }
        if !self.service.links().is_consistent_with(store) {
            warn!("Reverse links disagree with the ownership store");
            out.push("WARNING: reverse links inconsistent".to_string());
        }
        out
    }
}

/// Helper for tests: a server on a fresh world with in-memory persistence.
pub fn bind_memory(tick_hz: u32) -> (GameServer, crate::persist::MemoryBackend) {
    let backend = crate::persist::MemoryBackend::new();
    let cfg = ServerConfig {
        tick_hz,
        ..Default::default()
    };
    let server = GameServer::with_parts(
        cfg,
        SimWorld::new(),
        AnchorConfig::default(),
        Box::new(backend.clone()),
    );
    (server, backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainbase_shared::sim::prefabs;

    #[test]
    fn console_spawn_preset_and_kill() {
        let (mut server, backend) = bind_memory(64);
        let out = server
            .exec_console(&format!("spawn {} 5 1.6 0", prefabs::FLATBED))
            .unwrap();
        assert_eq!(out, vec![format!("Spawned {} as 1", prefabs::FLATBED)]);

        let out = server.exec_console("trainbase preset auto").unwrap();
        assert_eq!(out, vec!["[TrainBase] Applied preset: Flatbed"]);
        assert_eq!(server.service().store().anchor_count(), 3);

        server.exec_console("kill 1").unwrap();
        assert!(server.service().store().is_empty());
        assert!(server.service().links().is_empty());
        assert!(server.world().live_entities().is_empty());

        server.exec_console("save").unwrap();
        assert!(backend.write_count() >= 1);
        let blob = backend.blob().unwrap();
        let stored = crate::ownership::StoredOwnership::from_json_str(&blob).unwrap();
        assert!(stored.trains.is_empty());
    }

    #[test]
    fn driving_moves_anchors_with_train() {
        let (mut server, _) = bind_memory(64);
        server
            .exec_console(&format!("spawn {} 5 1.6 0", prefabs::WORKCART))
            .unwrap();
        server.exec_console("trainbase nudge 0 0.05 0").unwrap();
        server.exec_console("drive 1 0 0 2").unwrap();
        for _ in 0..64 {
            server.step(1.0 / 64.0).unwrap();
        }

        let anchor = server.service().anchors_of(EntityKey(1))[0];
        let handle = server.service().index().get(anchor).map(|i| i.handle).unwrap();
        let pose = server.world().world_transform(handle).unwrap();
        assert!(pose.position.approx_eq(Vec3::new(5.0, 1.65, 2.0), 1e-3));
    }

    #[test]
    fn move_teleports_root_entity() {
        let (mut server, _) = bind_memory(64);
        server
            .exec_console(&format!("spawn {} 0 0 0", prefabs::CABOOSE))
            .unwrap();
        let out = server.exec_console("move 1 3 0 4").unwrap();
        assert_eq!(out, vec!["Moved to 3 0 4"]);
        let handle = server.service().index().get(EntityKey(1)).map(|i| i.handle).unwrap();
        let pose = server.world().world_transform(handle).unwrap();
        assert!(pose.position.approx_eq(Vec3::new(3.0, 0.0, 4.0), 1e-6));
    }

    #[test]
    fn revoke_blocks_trainbase() {
        let (mut server, _) = bind_memory(64);
        server.exec_console("revoke").unwrap();
        let out = server.exec_console("trainbase clear").unwrap();
        assert_eq!(out, vec!["[TrainBase] You don't have permission."]);
        server.exec_console("grant").unwrap();
        let out = server.exec_console("trainbase clear").unwrap();
        assert_eq!(out, vec!["[TrainBase] Look at a train car within range."]);
    }

    #[test]
    fn periodic_save_fires_on_interval() {
        let (mut server, backend) = bind_memory(64);
        server.cfg.save_interval_ticks = 4;
        let before = backend.write_count();
        for _ in 0..8 {
            server.step(0.0).unwrap();
        }
        assert_eq!(backend.write_count() - before, 2);
    }

    #[test]
    fn quit_stops_server() {
        let (mut server, _) = bind_memory(64);
        assert_eq!(*server.state(), ServerState::Running);
        server.exec_console("quit").unwrap();
        assert_eq!(*server.state(), ServerState::Stopping);
    }
}
