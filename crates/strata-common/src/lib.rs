//! # Strata Common
//!
//! Common types and shared abstractions for the strata world server.
//!
//! This crate provides foundational types used across all strata subsystems:
//! - Coordinate types (block, chunk, local)
//! - Version information for on-disk schemas
//! - Common error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::version::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_to_column_conversion() {
        let block = BlockPos::new(-1, 70, 33);
        assert_eq!(block.column(), ChunkCoords::new(-1, 2));
        assert_eq!(block.local(), LocalPos::new(15, 70, 1));
    }

    #[test]
    fn test_column_origin_round_trip() {
        let coords = ChunkCoords::new(-3, 7);
        let origin = coords.origin();
        assert_eq!(origin, BlockPos::new(-48, 0, 112));
        assert_eq!(origin.column(), coords);
    }

    #[test]
    fn test_version_can_read() {
        let current = SchemaVersion::CHUNK_FORMAT;
        assert!(current.can_read(&SchemaVersion::new(1, 0, 0)));
        assert!(!current.can_read(&SchemaVersion::new(2, 0, 0)));
    }
}
