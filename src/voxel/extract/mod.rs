//! Mesh extraction from density blocks
//!
//! Two strategies share one vertex format:
//! - [`cubical`]: binary voxels, a quad for every solid face next to air
//! - [`dual`]: surface nets, one vertex per cell the surface passes through
//!
//! Both emit geometry only for the voxels a chunk owns, reading the apron to
//! decide what lies across the boundary, so neighbouring chunks at the same
//! LOD never duplicate faces.

pub mod cubical;
pub mod dual;

use super::density::DensityBlock;
use super::mesh::{ExtractedMesh, ExtractionSettings, ExtractionStrategy};

/// Extract a mesh using the configured strategy
pub fn extract(block: &DensityBlock, settings: &ExtractionSettings) -> ExtractedMesh {
    if block.is_homogeneous() {
        return ExtractedMesh::empty(block.coord(), settings.strategy);
    }

    let mut mesh = match settings.strategy {
        ExtractionStrategy::Cubical => cubical::extract(block),
        ExtractionStrategy::Dual => dual::extract(block, settings.normals),
    };
    mesh.recompute_bounds();
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::coord::ChunkCoord;
    use crate::voxel::field::{Material, VoxelSample};

    #[test]
    fn test_homogeneous_block_is_empty() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let block = DensityBlock::from_fn(coord, 32, 8, |_, _, _| {
            VoxelSample::new(-1.0, Material::Rock)
        });
        for strategy in [ExtractionStrategy::Cubical, ExtractionStrategy::Dual] {
            let settings = ExtractionSettings { strategy, ..Default::default() };
            let mesh = extract(&block, &settings);
            assert!(mesh.is_empty());
            assert_eq!(mesh.strategy, strategy);
        }
    }

    #[test]
    fn test_bounds_cover_vertices() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let block = DensityBlock::from_fn(coord, 32, 8, |_, y, _| {
            VoxelSample::new(y as f32 - 4.5, Material::Grass)
        });
        let mesh = extract(&block, &ExtractionSettings::default());
        assert!(!mesh.is_empty());
        for v in &mesh.vertices {
            assert!(mesh.bounds.contains_point(v.position.into()));
        }
    }
}
