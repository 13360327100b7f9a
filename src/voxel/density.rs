//! Dense density samples for one chunk
//!
//! A block for a chunk with `cells` voxels per axis holds `cells + 2`
//! samples per axis: the chunk's `cells + 1` corner samples plus a one-sample
//! apron below the origin, so extraction can look at neighbours across the
//! chunk boundary without touching other chunks. Sample `i` along an axis
//! sits at `origin + (i - 1) * voxel_size`.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use super::coord::ChunkCoord;
use super::field::{Material, VoxelField, VoxelSample};
use crate::core::error::ExtractionError;
use crate::core::types::DVec3;

/// Grid of density/material samples covering one chunk plus apron
#[derive(Clone, Debug)]
pub struct DensityBlock {
    coord: ChunkCoord,
    cells: usize,
    dim: usize,
    voxel_size: f64,
    origin: DVec3,
    samples: Vec<VoxelSample>,
}

impl DensityBlock {
    /// Number of samples along one axis for `cells` voxels
    pub const fn dim_for(cells: usize) -> usize {
        cells + 2
    }

    /// Sample a chunk from a field.
    ///
    /// Z-slabs are sampled in parallel. The `cancel` flag is polled between
    /// slabs; once raised, sampling stops with [`ExtractionError::Cancelled`].
    pub fn sample(
        field: &dyn VoxelField,
        coord: ChunkCoord,
        chunk_size: u32,
        cells: usize,
        cancel: &AtomicBool,
    ) -> Result<Self, ExtractionError> {
        let dim = Self::dim_for(cells);
        let voxel_size = coord.edge(chunk_size) / cells as f64;
        let origin = coord.world_origin(chunk_size);
        let mut samples = vec![VoxelSample::default(); dim * dim * dim];

        samples
            .par_chunks_mut(dim * dim)
            .enumerate()
            .try_for_each(|(z, slab)| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ExtractionError::Cancelled(coord));
                }
                let wz = origin.z + (z as f64 - 1.0) * voxel_size;
                for y in 0..dim {
                    let wy = origin.y + (y as f64 - 1.0) * voxel_size;
                    for x in 0..dim {
                        let wx = origin.x + (x as f64 - 1.0) * voxel_size;
                        slab[y * dim + x] = field.sample(DVec3::new(wx, wy, wz));
                    }
                }
                Ok(())
            })?;

        if let Some(index) = samples.iter().position(|s| !s.density.is_finite()) {
            return Err(ExtractionError::MalformedDensity { coord, index });
        }

        Ok(Self { coord, cells, dim, voxel_size, origin, samples })
    }

    /// Build a block from a closure over sample indices
    pub fn from_fn(
        coord: ChunkCoord,
        chunk_size: u32,
        cells: usize,
        mut f: impl FnMut(usize, usize, usize) -> VoxelSample,
    ) -> Self {
        let dim = Self::dim_for(cells);
        let mut samples = Vec::with_capacity(dim * dim * dim);
        for z in 0..dim {
            for y in 0..dim {
                for x in 0..dim {
                    samples.push(f(x, y, z));
                }
            }
        }
        Self {
            coord,
            cells,
            dim,
            voxel_size: coord.edge(chunk_size) / cells as f64,
            origin: coord.world_origin(chunk_size),
            samples,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Voxels per axis inside the chunk
    pub fn cells(&self) -> usize {
        self.cells
    }

    /// Samples per axis including apron
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// World units between adjacent samples
    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// World position of the chunk's minimum corner (sample index 1)
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dim + y) * self.dim + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> VoxelSample {
        self.samples[self.index(x, y, z)]
    }

    #[inline]
    pub fn density(&self, x: usize, y: usize, z: usize) -> f32 {
        self.samples[self.index(x, y, z)].density
    }

    #[inline]
    pub fn material(&self, x: usize, y: usize, z: usize) -> Material {
        self.samples[self.index(x, y, z)].material
    }

    /// True when every sample is on the same side of the surface
    pub fn is_homogeneous(&self) -> bool {
        let Some(first) = self.samples.first() else {
            return true;
        };
        let solid = first.is_solid();
        self.samples.iter().all(|s| s.is_solid() == solid)
    }

    /// Approximate heap size in bytes
    pub fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<VoxelSample>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::field::FlatField;

    #[test]
    fn test_sample_positions_include_apron() {
        let coord = ChunkCoord::new(1, 0, 0, 0);
        let field = |p: DVec3| VoxelSample::new(p.x as f32, Material::Rock);
        let cancel = AtomicBool::new(false);
        let block = DensityBlock::sample(&field, coord, 32, 16, &cancel).unwrap();

        assert_eq!(block.dim(), 18);
        assert_eq!(block.voxel_size(), 2.0);
        // Sample 0 is one voxel before the chunk origin at x = 32
        assert_eq!(block.density(0, 0, 0), 30.0);
        assert_eq!(block.density(1, 0, 0), 32.0);
        assert_eq!(block.density(17, 0, 0), 64.0);
    }

    #[test]
    fn test_lod_scales_voxel_size() {
        let coord = ChunkCoord::new(0, 0, 0, 2);
        let field = FlatField { height: 0.0, material: Material::Grass };
        let cancel = AtomicBool::new(false);
        let block = DensityBlock::sample(&field, coord, 32, 16, &cancel).unwrap();
        assert_eq!(block.voxel_size(), 8.0);
    }

    #[test]
    fn test_non_finite_density_is_malformed() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let field = |p: DVec3| {
            let d = if p.x > 10.0 { f32::NAN } else { 1.0 };
            VoxelSample::new(d, Material::Air)
        };
        let cancel = AtomicBool::new(false);
        let err = DensityBlock::sample(&field, coord, 32, 8, &cancel).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedDensity { .. }));
    }

    #[test]
    fn test_cancelled_sampling() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let field = FlatField { height: 0.0, material: Material::Grass };
        let cancel = AtomicBool::new(true);
        let err = DensityBlock::sample(&field, coord, 32, 8, &cancel).unwrap_err();
        assert_eq!(err, ExtractionError::Cancelled(coord));
    }

    #[test]
    fn test_homogeneous() {
        let coord = ChunkCoord::new(0, 5, 0, 0);
        let field = FlatField { height: 0.0, material: Material::Grass };
        let cancel = AtomicBool::new(false);
        let block = DensityBlock::sample(&field, coord, 32, 8, &cancel).unwrap();
        assert!(block.is_homogeneous());

        let coord = ChunkCoord::new(0, 0, 0, 0);
        let field = FlatField { height: 16.0, material: Material::Grass };
        let block = DensityBlock::sample(&field, coord, 32, 8, &cancel).unwrap();
        assert!(!block.is_homogeneous());
    }
}
