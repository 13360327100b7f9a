//! Voxstream - streaming level-of-detail voxel terrain

pub mod core;
pub mod math;
pub mod voxel;
pub mod streaming;
pub mod render;
pub mod world;

pub use world::{StreamingWorld, WorldStats};
