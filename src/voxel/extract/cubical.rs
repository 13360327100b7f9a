//! Binary voxel extraction: one quad per exposed cube face

use crate::voxel::density::DensityBlock;
use crate::voxel::mesh::{ExtractedMesh, ExtractionStrategy, MeshVertex};

/// Face direction, outward normal, and corner offsets in counter-clockwise
/// order seen from outside.
const FACES: [([i32; 3], [[f32; 3]; 4]); 6] = [
    ([1, 0, 0], [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]]),
    ([-1, 0, 0], [[0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]),
    ([0, 1, 0], [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]]),
    ([0, -1, 0], [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]]),
    ([0, 0, 1], [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]]),
    ([0, 0, -1], [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
];

/// Extract block faces.
///
/// Voxel `v` along an axis is solid when block sample `v + 1` has negative
/// density; it spans `[v, v + 1] * voxel_size` in chunk-local space.
pub fn extract(block: &DensityBlock) -> ExtractedMesh {
    let n = block.cells();
    let vs = block.voxel_size() as f32;
    let mut mesh = ExtractedMesh::empty(block.coord(), ExtractionStrategy::Cubical);

    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let sample = block.get(x + 1, y + 1, z + 1);
                if !sample.is_solid() {
                    continue;
                }
                let color = sample.material.color().to_array();

                for (dir, corners) in FACES.iter() {
                    // Apron guarantees neighbours at indices 0..=n+1
                    let nx = (x as i32 + 1 + dir[0]) as usize;
                    let ny = (y as i32 + 1 + dir[1]) as usize;
                    let nz = (z as i32 + 1 + dir[2]) as usize;
                    if block.get(nx, ny, nz).is_solid() {
                        continue;
                    }

                    let base = mesh.vertices.len() as u32;
                    let normal = [dir[0] as f32, dir[1] as f32, dir[2] as f32];
                    for corner in corners {
                        mesh.vertices.push(MeshVertex {
                            position: [
                                (x as f32 + corner[0]) * vs,
                                (y as f32 + corner[1]) * vs,
                                (z as f32 + corner[2]) * vs,
                            ],
                            normal,
                            color,
                        });
                    }
                    mesh.indices
                        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                }
            }
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::voxel::coord::ChunkCoord;
    use crate::voxel::field::{FlatField, Material, VoxelSample};
    use std::sync::atomic::AtomicBool;

    fn block_with_solid(solid: &[(usize, usize, usize)]) -> DensityBlock {
        DensityBlock::from_fn(ChunkCoord::new(0, 0, 0, 0), 32, 4, |x, y, z| {
            if solid.contains(&(x, y, z)) {
                VoxelSample::new(-1.0, Material::Rock)
            } else {
                VoxelSample::new(1.0, Material::Air)
            }
        })
    }

    #[test]
    fn test_single_voxel() {
        let mesh = extract(&block_with_solid(&[(2, 2, 2)]));
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }

    #[test]
    fn test_adjacent_voxels_share_no_faces() {
        let mesh = extract(&block_with_solid(&[(2, 2, 2), (3, 2, 2)]));
        assert_eq!(mesh.indices.len(), 10 * 6);
    }

    #[test]
    fn test_apron_voxels_are_not_emitted() {
        // Sample 0 is the neighbour chunk's voxel
        let mesh = extract(&block_with_solid(&[(0, 2, 2)]));
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_winding_matches_normal() {
        let mesh = extract(&block_with_solid(&[(1, 1, 1)]));
        for tri in mesh.indices.chunks(3) {
            let a = Vec3::from(mesh.vertices[tri[0] as usize].position);
            let b = Vec3::from(mesh.vertices[tri[1] as usize].position);
            let c = Vec3::from(mesh.vertices[tri[2] as usize].position);
            let face = (b - a).cross(c - a).normalize();
            let normal = Vec3::from(mesh.vertices[tri[0] as usize].normal);
            assert!(face.dot(normal) > 0.99, "face {face} vs normal {normal}");
        }
    }

    #[test]
    fn test_flat_ground_top_faces_only() {
        let field = FlatField { height: 9.0, material: Material::Grass };
        let cancel = AtomicBool::new(false);
        let block = DensityBlock::sample(&field, ChunkCoord::new(0, 0, 0, 0), 32, 16, &cancel).unwrap();
        let mesh = extract(&block);

        assert_eq!(mesh.indices.len(), 16 * 16 * 6);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
        assert!(mesh.vertices.iter().all(|v| v.position[1] == 10.0));
        assert!(mesh.vertices.iter().all(|v| v.color == Material::Grass.color().to_array()));
    }
}
