//! # Strata World
//!
//! Chunk storage cache for the strata voxel-world server.
//!
//! This crate handles:
//! - Memory-bounded, concurrency-safe chunk residency
//! - At-most-one load per coordinate under concurrent demand
//! - Asynchronous write-back that never serves stale data to readers
//! - Chunk persistence and procedural generation behind narrow seams

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod chunk;
pub mod generation;
mod loader;
pub mod store;
pub mod tasks;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cache::*;
    pub use crate::chunk::*;
    pub use crate::generation::*;
    pub use crate::store::*;
    pub use crate::tasks::*;
}

pub use prelude::*;
