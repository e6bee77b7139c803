//! Coordinate types for block and chunk positions.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Side length of a chunk column in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// Build height of a chunk column in blocks.
pub const COLUMN_HEIGHT: i32 = 256;

/// Chunk coordinates (identifies a terrain column in the world grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkCoords {
    /// X coordinate in chunk space
    pub x: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkCoords {
    /// Creates new chunk coordinates.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the block position of this column's base corner (y = 0).
    #[must_use]
    pub const fn origin(self) -> BlockPos {
        BlockPos {
            x: self.x * CHUNK_SIZE,
            y: 0,
            z: self.z * CHUNK_SIZE,
        }
    }
}

impl std::fmt::Display for ChunkCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// X coordinate in block space
    pub x: i32,
    /// Y coordinate (0 to `COLUMN_HEIGHT` - 1)
    pub y: i32,
    /// Z coordinate in block space
    pub z: i32,
}

impl BlockPos {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the coordinates of the chunk column containing this block.
    #[must_use]
    pub const fn column(self) -> ChunkCoords {
        ChunkCoords {
            x: self.x.div_euclid(CHUNK_SIZE),
            z: self.z.div_euclid(CHUNK_SIZE),
        }
    }

    /// Returns this block's position relative to its column.
    #[must_use]
    pub const fn local(self) -> LocalPos {
        LocalPos {
            x: self.x.rem_euclid(CHUNK_SIZE) as u16,
            y: self.y.rem_euclid(COLUMN_HEIGHT) as u16,
            z: self.z.rem_euclid(CHUNK_SIZE) as u16,
        }
    }
}

/// Block position relative to its chunk column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct LocalPos {
    /// X coordinate within the column (0 to 15)
    pub x: u16,
    /// Y coordinate within the column (0 to `COLUMN_HEIGHT` - 1)
    pub y: u16,
    /// Z coordinate within the column (0 to 15)
    pub z: u16,
}

impl LocalPos {
    /// Creates a new local position.
    #[must_use]
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn block_reconstructs_from_column_and_local(
            x in -1_000_000..1_000_000_i32,
            y in 0..COLUMN_HEIGHT,
            z in -1_000_000..1_000_000_i32,
        ) {
            let block = BlockPos::new(x, y, z);
            let origin = block.column().origin();
            let local = block.local();
            prop_assert_eq!(origin.x + i32::from(local.x), x);
            prop_assert_eq!(i32::from(local.y), y);
            prop_assert_eq!(origin.z + i32::from(local.z), z);
        }
    }
}
