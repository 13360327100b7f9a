//! Noise-based procedural terrain field

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::field::{Material, VoxelField, VoxelSample};
use crate::core::types::DVec3;

/// Parameters controlling terrain generation
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f64,        // Horizontal scale (larger = smoother)
    pub height_scale: f64, // Vertical scale (max height)
    pub base_height: f64,  // Height of the noise midpoint
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f64,  // FBM persistence (0.5 typical)
    pub lacunarity: f64,   // FBM lacunarity (2.0 typical)
    pub sea_level: f64,    // Below this, surface is sand
    pub snow_line: f64,    // Above this, surface is snow
    /// Strength of the 3D noise that carves overhangs; 0 disables it
    pub overhang_strength: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 240.0,
            height_scale: 96.0,
            base_height: 0.0,
            octaves: 5,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: -20.0,
            snow_line: 60.0,
            overhang_strength: 0.0,
        }
    }
}

/// Heightfield terrain using fractal Brownian motion (FBM)
pub struct NoiseTerrain {
    params: TerrainParams,
    height: Fbm<Perlin>,
    overhang: Perlin,
}

impl NoiseTerrain {
    /// Create a new terrain field with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let height = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence)
            .set_lacunarity(params.lacunarity);
        let overhang = Perlin::new(params.seed.wrapping_add(1));

        Self { params, height, overhang }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Terrain surface height at world position (x, z)
    pub fn height_at(&self, x: f64, z: f64) -> f64 {
        let n = self.height.get([x / self.params.scale, z / self.params.scale]);
        self.params.base_height + n * self.params.height_scale
    }

    fn material_at(&self, position: DVec3, surface: f64) -> Material {
        let depth = surface - position.y;
        if surface < self.params.sea_level {
            Material::Sand
        } else if surface > self.params.snow_line && depth < 2.0 {
            Material::Snow
        } else if depth < 1.5 {
            Material::Grass
        } else if depth < 6.0 {
            Material::Dirt
        } else {
            Material::Rock
        }
    }
}

impl VoxelField for NoiseTerrain {
    fn sample(&self, position: DVec3) -> VoxelSample {
        let surface = self.height_at(position.x, position.z);
        let mut density = position.y - surface;

        if self.params.overhang_strength > 0.0 {
            let s = self.params.scale * 0.25;
            let n = self.overhang.get([position.x / s, position.y / s, position.z / s]);
            density += n * self.params.overhang_strength;
        }

        let material = if density < 0.0 {
            self.material_at(position, surface)
        } else {
            Material::Air
        };
        VoxelSample::new(density as f32, material)
    }
}
