//! Voxel fields, density sampling, and surface extraction

pub mod coord;
pub mod density;
pub mod extract;
pub mod field;
pub mod mesh;
pub mod terrain;

pub use coord::ChunkCoord;
pub use density::DensityBlock;
pub use extract::extract;
pub use field::{FlatField, Material, SphereField, VoxelField, VoxelSample};
pub use mesh::{ExtractedMesh, ExtractionSettings, ExtractionStrategy, MeshVertex, NormalMode};
pub use terrain::{NoiseTerrain, TerrainParams};
