//! `trainbase_shared`
//!
//! Libraries shared by the anchor service, the demo server and the tests.
//!
//! Design goals:
//! - Deterministic and single-threaded.
//! - The game engine sits behind the [`host::Host`] trait; [`sim::SimWorld`]
//!   is an in-memory implementation of it.
//! - No `unsafe`.

pub mod category;
pub mod config;
pub mod ecs;
pub mod event;
pub mod host;
pub mod math;
pub mod sim;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::category::*;
    pub use crate::config::*;
    pub use crate::ecs::EntityHandle;
    pub use crate::event::*;
    pub use crate::host::*;
    pub use crate::math::*;
}
