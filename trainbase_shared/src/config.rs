//! Configuration system.
//!
//! Loads the anchor configuration from JSON strings/files. The on-disk
//! preset table is keyed by free-form strings; it is resolved into a total
//! [`PresetCatalog`] once, at load time.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::{category::CarCategory, math::Vec3};

/// Raw preset table as written in the config file.
pub type PresetTable = BTreeMap<String, Vec<Vec3>>;

/// Root anchor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorConfig {
    /// Prefab spawned for each anchor. Must produce a building block.
    #[serde(default = "default_anchor_prefab")]
    pub anchor_prefab_id: String,
    /// How far a player may look to target a train car.
    #[serde(default = "default_raycast_distance")]
    pub raycast_distance: f32,
    /// Offsets per car category. Entries in the file replace the built-in
    /// row for their category; categories the file omits keep theirs.
    #[serde(default = "default_presets", deserialize_with = "merge_presets")]
    pub presets: PresetTable,
}

fn default_anchor_prefab() -> String {
    "assets/prefabs/building core/foundation/foundation.prefab".to_string()
}

fn default_raycast_distance() -> f32 {
    8.0
}

fn row(spread: f32) -> Vec<Vec3> {
    vec![
        Vec3::new(-spread, 0.05, 0.0),
        Vec3::new(0.0, 0.05, 0.0),
        Vec3::new(spread, 0.05, 0.0),
    ]
}

fn default_presets() -> PresetTable {
    [
        (CarCategory::Workcart, 1.20),
        (CarCategory::Flatbed, 1.60),
        (CarCategory::Ore, 1.30),
        (CarCategory::Covered, 1.35),
        (CarCategory::Engine, 1.10),
        (CarCategory::Unknown, 1.40),
    ]
    .into_iter()
    .map(|(category, spread)| (category.key().to_string(), row(spread)))
    .collect()
}

fn merge_presets<'de, D>(deserializer: D) -> Result<PresetTable, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = PresetTable::deserialize(deserializer)?;
    let mut table = default_presets();
    for (key, offsets) in overrides {
        match CarCategory::from_key(&key) {
            Some(category) => {
                table.insert(category.key().to_string(), offsets);
            }
            // Kept so the catalog can report it.
            None => {
                table.insert(key, offsets);
            }
        }
    }
    Ok(table)
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            anchor_prefab_id: default_anchor_prefab(),
            raycast_distance: default_raycast_distance(),
            presets: default_presets(),
        }
    }
}

impl AnchorConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Reads the config file, writing the defaults back if it does not exist.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        let cfg = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            Self::from_json_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        } else {
            info!(path = %path.display(), "Config not found, writing defaults");
            Self::default()
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        fs::write(path, cfg.to_json_string()?)
            .with_context(|| format!("write config {}", path.display()))?;
        Ok(cfg)
    }

    /// Resolves the preset table into a total catalog.
    pub fn catalog(&self) -> PresetCatalog {
        PresetCatalog::from_table(&self.presets)
    }
}

/// Demo server settings (command-line driven).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Directory holding the ownership data file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Path of the anchor configuration file.
    #[serde(default = "default_config_path")]
    pub config_path: String,
    /// Ticks between periodic world saves. `0` disables them.
    #[serde(default = "default_save_interval")]
    pub save_interval_ticks: u32,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_config_path() -> String {
    "config/TrainBase.json".to_string()
}

fn default_save_interval() -> u32 {
    64 * 300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_hz: 64,
            data_dir: default_data_dir(),
            config_path: default_config_path(),
            save_interval_ticks: default_save_interval(),
        }
    }
}

/// Anchor offsets for every car category.
///
/// Categories missing from the source table, or listed with no offsets,
/// carry the `Unknown` offsets instead, so lookups never need a fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetCatalog {
    offsets: [Vec<Vec3>; CarCategory::ALL.len()],
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::from_table(&default_presets())
    }
}

impl PresetCatalog {
    pub fn from_table(table: &PresetTable) -> Self {
        let mut offsets: [Vec<Vec3>; CarCategory::ALL.len()] = Default::default();
        for (key, list) in table {
            match CarCategory::from_key(key) {
                Some(category) => offsets[category.index()] = list.clone(),
                None => warn!(%key, "Ignoring preset for unrecognised car category"),
            }
        }

        let fallback = offsets[CarCategory::Unknown.index()].clone();
        for category in CarCategory::ALL {
            let slot = &mut offsets[category.index()];
            if slot.is_empty() {
                slot.clone_from(&fallback);
            }
        }
        Self { offsets }
    }

    /// Offsets for a category. Empty only when the `Unknown` preset is empty too.
    pub fn offsets(&self, category: CarCategory) -> &[Vec3] {
        &self.offsets[category.index()]
    }
}
