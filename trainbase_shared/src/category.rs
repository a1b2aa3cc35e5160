//! Train car categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Car category, used to pick an anchor preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarCategory {
    Workcart,
    Flatbed,
    Ore,
    Covered,
    Engine,
    Unknown,
}

/// Keyword groups in match order. The first group with a hit wins.
const KEYWORDS: &[(CarCategory, &[&str])] = &[
    (CarCategory::Workcart, &["workcart"]),
    (CarCategory::Flatbed, &["flatbed", "platform"]),
    (CarCategory::Ore, &["ore", "hopper"]),
    (CarCategory::Covered, &["covered", "box"]),
    (CarCategory::Engine, &["engine", "locomotive"]),
];

impl CarCategory {
    pub const ALL: [CarCategory; 6] = [
        CarCategory::Workcart,
        CarCategory::Flatbed,
        CarCategory::Ore,
        CarCategory::Covered,
        CarCategory::Engine,
        CarCategory::Unknown,
    ];

    /// Config/command key.
    pub fn key(self) -> &'static str {
        match self {
            CarCategory::Workcart => "workcart",
            CarCategory::Flatbed => "flatbed",
            CarCategory::Ore => "ore",
            CarCategory::Covered => "covered",
            CarCategory::Engine => "engine",
            CarCategory::Unknown => "unknown",
        }
    }

    /// Exact key lookup (case-insensitive).
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.key() == key)
    }

    /// Command argument parsing: anything unrecognised is `Unknown`.
    pub fn parse(arg: &str) -> Self {
        Self::from_key(arg).unwrap_or(CarCategory::Unknown)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CarCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CarCategory::Workcart => "Workcart",
            CarCategory::Flatbed => "Flatbed",
            CarCategory::Ore => "Ore",
            CarCategory::Covered => "Covered",
            CarCategory::Engine => "Engine",
            CarCategory::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Classifies a car from its prefab name.
pub fn detect_category(name: &str) -> CarCategory {
    let name = name.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| name.contains(w)))
        .map_or(CarCategory::Unknown, |(category, _)| *category)
}
