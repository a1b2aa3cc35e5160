//! Anchor operation errors.
//!
//! None of these are fatal. Every failure leaves the ownership store and the
//! reverse links consistent with each other.

use thiserror::Error;
use trainbase_shared::{category::CarCategory, host::EntityKey};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnchorError {
    /// The target (looked at or stored) is not a live entity.
    #[error("entity {key} does not resolve to a live entity")]
    ResolutionFailure { key: EntityKey },

    /// The configured anchor prefab does not produce a building block.
    #[error("configured prefab '{prefab}' is not a building block")]
    ConfigurationError { prefab: String },

    /// Neither the requested category nor the fallback has offsets.
    #[error("no preset offsets for {category} and no fallback")]
    PresetMissing { category: CarCategory },

    /// Every placement of a preset failed.
    #[error("none of the {attempted} preset anchors could be created")]
    PartialCreationFailure { attempted: usize },
}

pub type Result<T> = std::result::Result<T, AnchorError>;
