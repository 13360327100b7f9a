//! Extracted chunk geometry and extraction settings

use bytemuck::{Pod, Zeroable};

use super::coord::ChunkCoord;
use crate::math::Aabb;

/// Vertex layout shared by both extraction strategies.
///
/// Positions are local to the chunk's world origin; the draw transform
/// translates them into place.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// How density is turned into triangles
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Binary voxels, one quad per exposed cube face
    #[default]
    Cubical,
    /// Smooth surface with one vertex per surface-crossing cell
    Dual,
}

impl ExtractionStrategy {
    pub fn name(self) -> &'static str {
        match self {
            ExtractionStrategy::Cubical => "cubical",
            ExtractionStrategy::Dual => "dual",
        }
    }
}

impl std::str::FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cubical" | "cubes" => Ok(ExtractionStrategy::Cubical),
            "dual" | "smooth" => Ok(ExtractionStrategy::Dual),
            other => Err(format!("unknown extraction strategy '{other}'")),
        }
    }
}

/// Normal computation for the dual strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalMode {
    /// Density gradient at the vertex (smooth shading)
    #[default]
    Gradient,
    /// Averaged normals of the adjacent faces
    Geometry,
}

/// Extraction parameters fixed for the lifetime of a generator
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub strategy: ExtractionStrategy,
    /// Voxels per chunk axis, at every LOD
    pub cells_per_axis: usize,
    pub normals: NormalMode,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::Cubical,
            cells_per_axis: 16,
            normals: NormalMode::Gradient,
        }
    }
}

/// Triangle mesh for one chunk
#[derive(Clone, Debug)]
pub struct ExtractedMesh {
    pub coord: ChunkCoord,
    pub strategy: ExtractionStrategy,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    /// Local-space bounds of `vertices`
    pub bounds: Aabb,
}

impl ExtractedMesh {
    pub fn empty(coord: ChunkCoord, strategy: ExtractionStrategy) -> Self {
        Self {
            coord,
            strategy,
            vertices: Vec::new(),
            indices: Vec::new(),
            bounds: Aabb::EMPTY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex data as raw bytes for upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as raw bytes for upload
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Bytes a device needs to hold this mesh
    pub fn byte_size(&self) -> usize {
        self.vertex_bytes().len() + self.index_bytes().len()
    }

    pub(crate) fn recompute_bounds(&mut self) {
        self.bounds = Aabb::from_points(self.vertices.iter().map(|v| v.position.into()));
    }
}
