//! Chunk column data structures and serialization.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use strata_common::{BlockPos, ChunkCoords, MagicBytes, SchemaVersion};
use thiserror::Error;

/// Number of vertical sections in a chunk column.
pub const SECTIONS_PER_COLUMN: usize = 16;

/// Blocks per section (16 x 16 x 16).
pub const SECTION_VOLUME: usize = 4096;

/// Entries in a column's biome table (16 x 16).
pub const BIOME_TABLE_SIZE: usize = 256;

/// Chunk errors.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    /// Deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
    /// Invalid magic bytes
    #[error("Invalid chunk format")]
    InvalidFormat,
    /// Version mismatch
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },
    /// Compression failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
}

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Chunk file header.
///
/// Deliberately carries no coordinates: the store names files after the
/// coordinates and hands them to [`ChunkColumnData::decode`] out-of-band,
/// so a renamed file cannot smuggle in a stale position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Bit `i` set iff section `i` is present in the payload
    pub section_mask: u16,
    /// Compression type (1 = lz4)
    pub compression: u8,
}

impl ChunkHeader {
    /// Creates a new header.
    #[must_use]
    pub fn new(section_mask: u16) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FORMAT,
            section_mask,
            compression: 1, // LZ4
        }
    }

    /// Validates the header.
    pub fn validate(&self) -> ChunkResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(ChunkError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FORMAT.can_read(&self.version) {
            return Err(ChunkError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FORMAT.to_string(),
                actual: self.version.to_string(),
            });
        }
        Ok(())
    }
}

/// A 16x16x16 slice of block data within a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSection {
    /// Block type ids, indexed `y << 8 | z << 4 | x`
    blocks: Vec<u16>,
}

impl ChunkSection {
    /// Creates an all-air section.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: vec![0; SECTION_VOLUME],
        }
    }

    fn from_blocks(blocks: Vec<u16>) -> ChunkResult<Self> {
        if blocks.len() != SECTION_VOLUME {
            return Err(ChunkError::DeserializationFailed(
                "section size mismatch".into(),
            ));
        }
        Ok(Self { blocks })
    }

    /// Gets the block type at section-local coordinates (each 0 to 15).
    #[must_use]
    pub fn block(&self, x: u32, y: u32, z: u32) -> Option<u16> {
        if x >= 16 || y >= 16 || z >= 16 {
            return None;
        }
        self.blocks.get((y << 8 | z << 4 | x) as usize).copied()
    }

    /// Sets the block type at section-local coordinates (each 0 to 15).
    pub fn set_block(&mut self, x: u32, y: u32, z: u32, id: u16) -> bool {
        if x >= 16 || y >= 16 || z >= 16 {
            return false;
        }
        let index = (y << 8 | z << 4 | x) as usize;
        if let Some(slot) = self.blocks.get_mut(index) {
            *slot = id;
            return true;
        }
        false
    }

    /// Returns a slice of all block ids.
    #[must_use]
    pub fn blocks(&self) -> &[u16] {
        &self.blocks
    }
}

impl Default for ChunkSection {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutable payload of a chunk column: a stack of vertical sections
/// plus a biome table, with a dirty flag tracking unpersisted changes.
///
/// Absent sections are all-air and not materialized. The biome table is
/// indexed `z << 4 | x`.
#[derive(Debug, Clone)]
pub struct ChunkColumnData {
    sections: Vec<Option<ChunkSection>>,
    biomes: Vec<u8>,
    dirty: bool,
}

impl ChunkColumnData {
    /// Creates an empty (all-air) column payload.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: vec![None; SECTIONS_PER_COLUMN],
            biomes: vec![0; BIOME_TABLE_SIZE],
            dirty: false,
        }
    }

    /// Returns whether the data has unpersisted changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the data as having unpersisted changes.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Marks the data as matching what is durably persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Gets the block type at column-local coordinates.
    #[must_use]
    pub fn block(&self, x: u32, y: u32, z: u32) -> Option<u16> {
        if x >= 16 || y >= 256 || z >= 16 {
            return None;
        }
        match &self.sections[(y / 16) as usize] {
            Some(section) => section.block(x, y % 16, z),
            None => Some(0), // absent section is all air
        }
    }

    /// Sets the block type at column-local coordinates, materializing the
    /// section if needed.
    pub fn set_block(&mut self, x: u32, y: u32, z: u32, id: u16) -> bool {
        if x >= 16 || y >= 256 || z >= 16 {
            return false;
        }
        let section = self.sections[(y / 16) as usize].get_or_insert_with(ChunkSection::new);
        if section.set_block(x, y % 16, z, id) {
            self.dirty = true;
            return true;
        }
        false
    }

    /// Gets the biome id at column-local coordinates.
    #[must_use]
    pub fn biome(&self, x: u32, z: u32) -> Option<u8> {
        if x >= 16 || z >= 16 {
            return None;
        }
        self.biomes.get((z << 4 | x) as usize).copied()
    }

    /// Sets the biome id at column-local coordinates.
    pub fn set_biome(&mut self, x: u32, z: u32, biome: u8) -> bool {
        if x >= 16 || z >= 16 {
            return false;
        }
        let index = (z << 4 | x) as usize;
        if let Some(slot) = self.biomes.get_mut(index) {
            *slot = biome;
            self.dirty = true;
            return true;
        }
        false
    }

    /// Returns the column's sections.
    #[must_use]
    pub fn sections(&self) -> &[Option<ChunkSection>] {
        &self.sections
    }

    /// Returns the biome table.
    #[must_use]
    pub fn biomes(&self) -> &[u8] {
        &self.biomes
    }

    /// Returns whether two payloads hold identical terrain, ignoring the
    /// dirty flag.
    #[must_use]
    pub fn same_terrain(&self, other: &Self) -> bool {
        self.sections == other.sections && self.biomes == other.biomes
    }

    /// Serializes the column payload to bytes.
    pub fn encode(&self) -> ChunkResult<Vec<u8>> {
        let mut section_mask: u16 = 0;
        for (i, section) in self.sections.iter().enumerate() {
            if section.is_some() {
                section_mask |= 1 << i;
            }
        }
        let header = ChunkHeader::new(section_mask);
        let header_bytes = bincode::serialize(&header)
            .map_err(|e| ChunkError::SerializationFailed(e.to_string()))?;

        // Present sections in ascending order, then the biome table
        let mut payload =
            Vec::with_capacity(section_mask.count_ones() as usize * SECTION_VOLUME * 2 + 256);
        for section in self.sections.iter().flatten() {
            payload.extend_from_slice(bytemuck::cast_slice(section.blocks()));
        }
        payload.extend_from_slice(&self.biomes);
        let compressed = lz4_flex::compress_prepend_size(&payload);

        let mut result = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
        result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        result.extend_from_slice(&header_bytes);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    /// Deserializes a column payload from bytes. The result starts clean.
    ///
    /// Coordinates are intentionally not part of the encoding; callers
    /// carry them out-of-band (see [`ChunkHeader`]).
    pub fn decode(bytes: &[u8]) -> ChunkResult<Self> {
        if bytes.len() < 8 {
            return Err(ChunkError::DeserializationFailed("data too short".into()));
        }
        let header_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + header_len {
            return Err(ChunkError::DeserializationFailed(
                "header length mismatch".into(),
            ));
        }
        let header: ChunkHeader = bincode::deserialize(&bytes[4..4 + header_len])
            .map_err(|e| ChunkError::DeserializationFailed(e.to_string()))?;
        header.validate()?;

        let compressed = &bytes[4 + header_len..];
        let payload = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|e| ChunkError::CompressionFailed(e.to_string()))?;

        let present = header.section_mask.count_ones() as usize;
        if payload.len() != present * SECTION_VOLUME * 2 + BIOME_TABLE_SIZE {
            return Err(ChunkError::DeserializationFailed(
                "payload size mismatch".into(),
            ));
        }

        let mut sections: Vec<Option<ChunkSection>> = vec![None; SECTIONS_PER_COLUMN];
        let mut offset = 0;
        for (i, slot) in sections.iter_mut().enumerate() {
            if header.section_mask & (1 << i) == 0_u16 {
                continue;
            }
            let raw = &payload[offset..offset + SECTION_VOLUME * 2];
            let blocks: Vec<u16> = bytemuck::pod_collect_to_vec(raw);
            *slot = Some(ChunkSection::from_blocks(blocks)?);
            offset += SECTION_VOLUME * 2;
        }
        let biomes = payload[offset..].to_vec();

        Ok(Self {
            sections,
            biomes,
            dirty: false,
        })
    }
}

impl Default for ChunkColumnData {
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk column bound to its position in the world: the externally
/// visible unit of the cache.
///
/// Callers receive `Arc<ChunkColumn>` and read or mutate the payload
/// through the data guards; any mutation marks the payload dirty.
#[derive(Debug)]
pub struct ChunkColumn {
    coords: ChunkCoords,
    data: RwLock<ChunkColumnData>,
}

impl ChunkColumn {
    /// Creates a column at `coords` owning `data`.
    #[must_use]
    pub fn new(coords: ChunkCoords, data: ChunkColumnData) -> Self {
        Self {
            coords,
            data: RwLock::new(data),
        }
    }

    /// Returns the column's coordinates.
    #[must_use]
    pub const fn coords(&self) -> ChunkCoords {
        self.coords
    }

    /// Locks the payload for reading.
    pub fn data(&self) -> RwLockReadGuard<'_, ChunkColumnData> {
        self.data.read()
    }

    /// Locks the payload for writing.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, ChunkColumnData> {
        self.data.write()
    }

    /// Returns whether the payload has unpersisted changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.data.read().is_dirty()
    }

    /// Gets the block type at an absolute position, or `None` if the
    /// position is outside this column.
    #[must_use]
    pub fn block_at(&self, pos: BlockPos) -> Option<u16> {
        if pos.column() != self.coords {
            return None;
        }
        let local = pos.local();
        self.data
            .read()
            .block(u32::from(local.x), u32::from(local.y), u32::from(local.z))
    }

    /// Sets the block type at an absolute position. Returns false if the
    /// position is outside this column.
    pub fn set_block_at(&self, pos: BlockPos, id: u16) -> bool {
        if pos.column() != self.coords {
            return false;
        }
        let local = pos.local();
        self.data.write().set_block(
            u32::from(local.x),
            u32::from(local.y),
            u32::from(local.z),
            id,
        )
    }

    /// Atomically captures an immutable copy of the payload for
    /// persistence and clears the dirty flag, so later mutations are
    /// tracked against the captured state. Returns `None` if clean.
    pub fn snapshot_for_save(&self) -> Option<ChunkColumnData> {
        let mut data = self.data.write();
        if !data.is_dirty() {
            return None;
        }
        data.mark_clean();
        Some(data.clone())
    }
}
