//! Voxel field sampling interface
//!
//! A field maps a world position to a signed density and a material.
//! Negative density is solid, positive is empty. Fields are stateless and
//! deterministic so any worker can sample any chunk in any order.

use crate::core::types::{DVec3, Vec3};

/// Surface material of a voxel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Material {
    #[default]
    Air,
    Sand,
    Grass,
    Dirt,
    Rock,
    Snow,
}

impl Material {
    /// Linear RGB color used for vertex coloring
    pub fn color(self) -> Vec3 {
        match self {
            Material::Air => Vec3::ZERO,
            Material::Sand => Vec3::new(0.76, 0.70, 0.50),
            Material::Grass => Vec3::new(0.30, 0.55, 0.20),
            Material::Dirt => Vec3::new(0.45, 0.32, 0.20),
            Material::Rock => Vec3::new(0.45, 0.45, 0.47),
            Material::Snow => Vec3::new(0.95, 0.95, 0.97),
        }
    }
}

/// One density/material sample
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoxelSample {
    pub density: f32,
    pub material: Material,
}

impl VoxelSample {
    pub fn new(density: f32, material: Material) -> Self {
        Self { density, material }
    }

    pub fn is_solid(&self) -> bool {
        self.density < 0.0
    }
}

/// Deterministic density source shared by all generator workers
pub trait VoxelField: Send + Sync {
    /// Sample the field at a world position
    fn sample(&self, position: DVec3) -> VoxelSample;
}

impl<F> VoxelField for F
where
    F: Fn(DVec3) -> VoxelSample + Send + Sync,
{
    fn sample(&self, position: DVec3) -> VoxelSample {
        self(position)
    }
}

/// Flat ground at a fixed height
#[derive(Clone, Copy, Debug)]
pub struct FlatField {
    pub height: f64,
    pub material: Material,
}

impl VoxelField for FlatField {
    fn sample(&self, position: DVec3) -> VoxelSample {
        VoxelSample::new((position.y - self.height) as f32, self.material)
    }
}

/// Solid sphere, mostly useful for tests and benchmarks
#[derive(Clone, Copy, Debug)]
pub struct SphereField {
    pub center: DVec3,
    pub radius: f64,
    pub material: Material,
}

impl VoxelField for SphereField {
    fn sample(&self, position: DVec3) -> VoxelSample {
        let d = position.distance(self.center) - self.radius;
        VoxelSample::new(d as f32, self.material)
    }
}
