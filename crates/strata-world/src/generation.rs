//! Procedural chunk generation.

use noise::{NoiseFn, Perlin};
use strata_common::{ChunkCoords, WorldResult};

use crate::chunk::ChunkColumnData;

/// Block type ids used by the built-in generator.
pub mod blocks {
    /// Air
    pub const AIR: u16 = 0;
    /// Stone
    pub const STONE: u16 = 1;
    /// Grass
    pub const GRASS: u16 = 2;
    /// Sand
    pub const SAND: u16 = 3;
    /// Water
    pub const WATER: u16 = 4;
    /// Bedrock
    pub const BEDROCK: u16 = 5;
}

/// Ocean biome id.
pub const BIOME_OCEAN: u8 = 0;

/// Plains biome id.
pub const BIOME_PLAINS: u8 = 1;

/// Produces chunk columns for coordinates absent from the store.
///
/// Implementations must not touch the cache or the store themselves;
/// the cache decides when generation happens and where the result goes.
/// Generation failures propagate to callers exactly like store read
/// failures.
pub trait ChunkGenerator: Send + Sync {
    /// Generates the column at `coords`.
    fn generate(&self, coords: ChunkCoords) -> WorldResult<ChunkColumnData>;
}

/// Heightmap generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// World seed
    pub seed: u32,
    /// Terrain scale in blocks (larger = smoother)
    pub terrain_scale: f64,
    /// Lowest terrain surface height
    pub min_height: u32,
    /// Highest terrain surface height
    pub max_height: u32,
    /// Water fills ocean columns up to this height
    pub sea_level: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            terrain_scale: 40.0,
            min_height: 50,
            max_height: 200,
            sea_level: 70,
        }
    }
}

/// Deterministic heightmap-based terrain generator: a bedrock floor, a
/// stone body up to a noise-sampled surface, grass on land and sand
/// under water below sea level.
pub struct HeightmapGenerator {
    config: GeneratorConfig,
    height_noise: Perlin,
}

impl HeightmapGenerator {
    /// Creates a new generator with the given config.
    #[must_use]
    pub fn new(config: GeneratorConfig) -> Self {
        let height_noise = Perlin::new(config.seed);
        Self {
            config,
            height_noise,
        }
    }

    /// Creates a generator with default config and the given seed.
    #[must_use]
    pub fn with_seed(seed: u32) -> Self {
        Self::new(GeneratorConfig {
            seed,
            ..Default::default()
        })
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn surface_height(&self, block_x: i32, block_z: i32) -> u32 {
        let sample = self.height_noise.get([
            f64::from(block_x) / self.config.terrain_scale,
            f64::from(block_z) / self.config.terrain_scale,
        ]);
        let normalized = ((sample + 1.0) / 2.0).clamp(0.0, 1.0);
        let band = f64::from(self.config.max_height - self.config.min_height);
        self.config.min_height + (normalized * band) as u32
    }
}

impl ChunkGenerator for HeightmapGenerator {
    fn generate(&self, coords: ChunkCoords) -> WorldResult<ChunkColumnData> {
        let origin = coords.origin();
        let mut data = ChunkColumnData::new();
        for z in 0..16u32 {
            for x in 0..16u32 {
                let height = self.surface_height(origin.x + x as i32, origin.z + z as i32);
                data.set_block(x, 0, z, blocks::BEDROCK);
                for y in 1..height {
                    data.set_block(x, y, z, blocks::STONE);
                }
                if height > self.config.sea_level {
                    data.set_block(x, height, z, blocks::GRASS);
                    data.set_biome(x, z, BIOME_PLAINS);
                } else {
                    data.set_block(x, height, z, blocks::SAND);
                    for y in height + 1..=self.config.sea_level {
                        data.set_block(x, y, z, blocks::WATER);
                    }
                    data.set_biome(x, z, BIOME_OCEAN);
                }
            }
        }
        // generated terrain starts dirty: nothing on disk matches it yet
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_deterministic() {
        let gen1 = HeightmapGenerator::with_seed(42);
        let gen2 = HeightmapGenerator::with_seed(42);

        let chunk1 = gen1.generate(ChunkCoords::new(0, 0)).expect("generate");
        let chunk2 = gen2.generate(ChunkCoords::new(0, 0)).expect("generate");

        assert!(chunk1.same_terrain(&chunk2));
    }

    #[test]
    fn test_different_seeds_different_terrain() {
        let gen1 = HeightmapGenerator::with_seed(42);
        let gen2 = HeightmapGenerator::with_seed(999);

        let chunk1 = gen1.generate(ChunkCoords::new(0, 0)).expect("generate");
        let chunk2 = gen2.generate(ChunkCoords::new(0, 0)).expect("generate");

        assert!(!chunk1.same_terrain(&chunk2));
    }

    #[test]
    fn test_generated_terrain_shape() {
        let generator = HeightmapGenerator::with_seed(7);
        let config = generator.config().clone();
        let data = generator.generate(ChunkCoords::new(-3, 5)).expect("generate");

        assert!(data.is_dirty());
        for z in 0..16 {
            for x in 0..16 {
                assert_eq!(data.block(x, 0, z), Some(blocks::BEDROCK));
                // the surface sits inside the configured band
                assert_eq!(data.block(x, config.min_height - 1, z), Some(blocks::STONE));
                assert_eq!(data.block(x, config.max_height + 1, z), Some(blocks::AIR));
                let biome = data.biome(x, z).expect("biome");
                assert!(biome == BIOME_OCEAN || biome == BIOME_PLAINS);
            }
        }
    }
}
