//! Chunk coordinates across levels of detail
//!
//! A chunk at `lod` covers a cube of edge `chunk_size << lod` world units.
//! Its `x, y, z` are grid indices at its own LOD, so the world origin is
//! `(x, y, z) * (chunk_size << lod)`. Children live at `lod - 1` and tile the
//! parent's volume exactly.

use std::fmt;

use crate::core::types::{DVec3, IVec3};

/// Identifies one cubic chunk of the world at a specific level of detail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ChunkCoord {
    pub lod: u8,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub const fn new(x: i32, y: i32, z: i32, lod: u8) -> Self {
        Self { lod, x, y, z }
    }

    /// Grid position as an integer vector
    pub fn grid(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Edge length of this chunk in world units
    pub fn edge(&self, chunk_size: u32) -> f64 {
        (chunk_size as f64) * (1u64 << self.lod) as f64
    }

    /// World-space minimum corner of this chunk
    pub fn world_origin(&self, chunk_size: u32) -> DVec3 {
        self.grid().as_dvec3() * self.edge(chunk_size)
    }

    /// World-space center of this chunk
    pub fn center(&self, chunk_size: u32) -> DVec3 {
        self.world_origin(chunk_size) + DVec3::splat(self.edge(chunk_size) * 0.5)
    }

    /// Distance from a world position to this chunk's center
    pub fn distance_to(&self, position: DVec3, chunk_size: u32) -> f64 {
        self.center(chunk_size).distance(position)
    }

    /// Chunk containing a world position at the given LOD
    pub fn containing(position: DVec3, lod: u8, chunk_size: u32) -> Self {
        let edge = chunk_size as f64 * (1u64 << lod) as f64;
        let grid = (position / edge).floor();
        Self::new(grid.x as i32, grid.y as i32, grid.z as i32, lod)
    }

    /// Parent one level coarser
    pub fn parent(&self) -> Self {
        Self::new(
            self.x.div_euclid(2),
            self.y.div_euclid(2),
            self.z.div_euclid(2),
            self.lod + 1,
        )
    }

    /// Child in the given octant (bit 0 = +X, bit 1 = +Y, bit 2 = +Z).
    ///
    /// Returns `None` at lod 0.
    pub fn child(&self, octant: usize) -> Option<Self> {
        if self.lod == 0 {
            return None;
        }
        let dx = (octant & 1) as i32;
        let dy = ((octant >> 1) & 1) as i32;
        let dz = ((octant >> 2) & 1) as i32;
        // None when the child grid position does not fit in i32
        Some(Self::new(
            self.x.checked_mul(2)?.checked_add(dx)?,
            self.y.checked_mul(2)?.checked_add(dy)?,
            self.z.checked_mul(2)?.checked_add(dz)?,
            self.lod - 1,
        ))
    }

    /// All eight children in octant order, or `None` at lod 0
    pub fn children(&self) -> Option<[Self; 8]> {
        if self.lod == 0 {
            return None;
        }
        let mut out = [*self; 8];
        for (octant, slot) in out.iter_mut().enumerate() {
            *slot = self.child(octant)?;
        }
        Some(out)
    }

    /// Octant index of this chunk inside its parent
    pub fn octant_in_parent(&self) -> usize {
        (self.x.rem_euclid(2) as usize)
            | ((self.y.rem_euclid(2) as usize) << 1)
            | ((self.z.rem_euclid(2) as usize) << 2)
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})@{}", self.x, self.y, self.z, self.lod)
    }
}
