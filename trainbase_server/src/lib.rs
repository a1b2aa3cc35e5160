//! `trainbase_server`
//!
//! Server-side systems:
//! - Entity index keyed by network identity
//! - Train → anchor ownership with persistence
//! - Anchor lifecycle (spawn, cascade on destroy, sweep)
//! - The `trainbase` player command
//! - Fixed timestep host loop with a console
//!
//! Threading model:
//! - Everything runs on the host's simulation thread. Console input arrives
//!   over a channel and is applied between ticks.

pub mod anchors;
pub mod commands;
pub mod error;
pub mod index;
pub mod ownership;
pub mod persist;
pub mod server;

pub use anchors::AnchorService;
pub use error::AnchorError;
pub use server::GameServer;
