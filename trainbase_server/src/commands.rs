//! The `trainbase` player command.
//!
//! Thin glue: parses arguments, finds the train car the player is looking at
//! and calls into [`AnchorService`].
//!
//! ```text
//! trainbase                    open the anchor panel
//! trainbase preset [<kind>|auto]
//! trainbase nudge <x> <y> <z>
//! trainbase clear
//! ```

use std::collections::BTreeSet;

use trainbase_shared::{
    category::CarCategory,
    ecs::EntityHandle,
    host::Host,
    math::{Quat, Vec3},
};

use crate::anchors::AnchorService;

/// Permission that grants non-admins access to the command.
pub const PERM_USE: &str = "trainbase.use";

const PREFIX: &str = "[TrainBase]";
const LOOK_AT_TRAIN: &str = "Look at a train car within range.";
const NUDGE_USAGE: &str = "Usage: /trainbase nudge <x> <y> <z>";

/// The player issuing a command.
#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub admin: bool,
    pub permissions: BTreeSet<String>,
    pub eyes: Vec3,
    pub forward: Vec3,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            admin: false,
            permissions: BTreeSet::new(),
            eyes: Vec3::new(0.0, 1.6, 0.0),
            forward: Vec3::new(1.0, 0.0, 0.0),
        }
    }

    pub fn can_use(&self) -> bool {
        self.admin || self.permissions.contains(PERM_USE)
    }
}

/// Which preset a `preset` subcommand asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetChoice {
    Auto,
    Category(CarCategory),
}

/// Parsed `trainbase` invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainBaseCommand {
    Preset(PresetChoice),
    Nudge(Vec3),
    Clear,
    OpenPanel,
}

impl TrainBaseCommand {
    /// Parses the arguments after `trainbase`. `Err` carries a usage line.
    /// Unrecognised subcommands open the panel.
    pub fn parse(args: &[&str]) -> Result<Self, &'static str> {
        let Some(sub) = args.first() else {
            return Ok(Self::OpenPanel);
        };
        match sub.to_lowercase().as_str() {
            "clear" => Ok(Self::Clear),
            "nudge" => {
                let coords: Option<Vec<f32>> = args[1..].iter().map(|a| a.parse().ok()).collect();
                match coords.as_deref() {
                    Some(&[x, y, z]) => Ok(Self::Nudge(Vec3::new(x, y, z))),
                    _ => Err(NUDGE_USAGE),
                }
            }
            "preset" => {
                let choice = match args.get(1).map(|a| a.to_lowercase()) {
                    None => PresetChoice::Auto,
                    Some(arg) if arg == "auto" => PresetChoice::Auto,
                    Some(arg) => PresetChoice::Category(CarCategory::parse(&arg)),
                };
                Ok(Self::Preset(choice))
            }
            _ => Ok(Self::OpenPanel),
        }
    }
}

/// A button on the anchor panel and the command it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelButton {
    pub label: &'static str,
    pub command: &'static str,
}

/// Request to show the anchor panel to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRequest {
    pub title: &'static str,
    pub buttons: Vec<PanelButton>,
}

impl PanelRequest {
    pub fn anchors() -> Self {
        let button = |label, command| PanelButton { label, command };
        Self {
            title: "Train Base Anchors",
            buttons: vec![
                button("Apply Preset (Auto)", "trainbase preset auto"),
                button("Workcart", "trainbase preset workcart"),
                button("Flatbed", "trainbase preset flatbed"),
                button("Ore Hopper", "trainbase preset ore"),
                button("Covered/Box", "trainbase preset covered"),
                button("Engine/Locomotive", "trainbase preset engine"),
                button("Add Center", "trainbase nudge 0 0.05 0"),
                button("Add Left (-X)", "trainbase nudge -1.4 0.05 0"),
                button("Add Right (+X)", "trainbase nudge 1.4 0.05 0"),
                button("Clear Anchors", "trainbase clear"),
            ],
        }
    }
}

/// What the command produced for the player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    pub lines: Vec<String>,
    pub panel: Option<PanelRequest>,
}

impl CommandReply {
    fn say(msg: impl AsRef<str>) -> Self {
        Self {
            lines: vec![format!("{PREFIX} {}", msg.as_ref())],
            panel: None,
        }
    }
}

/// The train car in the player's line of sight, if any.
pub fn look_train(
    service: &AnchorService,
    host: &dyn Host,
    player: &Player,
) -> Option<EntityHandle> {
    let hit = host.raycast(player.eyes, player.forward, service.config().raycast_distance)?;
    service.resolve_train_from_hit(host, hit)
}

/// Runs `trainbase <args>` for a player.
pub fn execute(
    service: &mut AnchorService,
    host: &mut dyn Host,
    player: &Player,
    args: &[&str],
) -> CommandReply {
    if !player.can_use() {
        return CommandReply::say("You don't have permission.");
    }

    let command = match TrainBaseCommand::parse(args) {
        Ok(command) => command,
        Err(usage) => return CommandReply::say(usage),
    };

    let Some(train) = look_train(service, host, player) else {
        return CommandReply::say(LOOK_AT_TRAIN);
    };

    match command {
        TrainBaseCommand::Clear => {
            service.clear_anchors(host, train);
            CommandReply::say("Cleared anchors on this train car.")
        }
        TrainBaseCommand::Nudge(offset) => {
            match service.create_anchor(host, train, offset, Quat::IDENTITY) {
                Ok(_) => CommandReply::say(format!(
                    "Added anchor at local offset {} {} {}.",
                    offset.x, offset.y, offset.z
                )),
                Err(_) => CommandReply::say("Failed to create anchor."),
            }
        }
        TrainBaseCommand::Preset(choice) => {
            let category = match choice {
                PresetChoice::Auto => service.detect_category(host, train),
                PresetChoice::Category(category) => category,
            };
            match service.apply_preset(host, train, category, true) {
                Ok(outcome) => CommandReply::say(format!("Applied preset: {}", outcome.category)),
                Err(_) => CommandReply::say("No preset anchors applied."),
            }
        }
        TrainBaseCommand::OpenPanel => CommandReply {
            lines: Vec::new(),
            panel: Some(PanelRequest::anchors()),
        },
    }
}
