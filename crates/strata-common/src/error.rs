//! Error types shared by the strata subsystems.

use thiserror::Error;

/// World and chunk errors.
///
/// `Clone` because a single failed load fans out to every waiter of the
/// corresponding load ticket.
#[derive(Debug, Clone, Error)]
pub enum WorldError {
    /// Chunk absent from the backing store. Expected during normal miss
    /// handling (it triggers generation) and not reported as an error.
    #[error("Chunk not found at ({x}, {z})")]
    ChunkNotFound {
        /// X coordinate
        x: i32,
        /// Z coordinate
        z: i32,
    },

    /// Chunk read or decode failed
    #[error("Failed to load chunk: {0}")]
    LoadFailed(String),

    /// Chunk write or encode failed
    #[error("Failed to save chunk: {0}")]
    SaveFailed(String),

    /// Chunk generation failed
    #[error("Chunk generation failed: {0}")]
    GenerationFailed(String),
}

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
