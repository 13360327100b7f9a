//! Level of Detail (LOD) selection by distance
//!
//! Each LOD level doubles the chunk edge. `radii[L]` is the distance band in
//! which chunks of LOD `L` are wanted; the last entry is the coarsest LOD and
//! bounds the whole resident area. A split/merge factor pair adds hysteresis
//! so a viewpoint hovering at a band edge does not flap nodes.

use crate::core::error::Error;
use crate::core::types::{DVec3, Result};
use crate::voxel::coord::ChunkCoord;

/// Default LOD bands in world units: 64, 128, 256, 512, 1024
pub const LOD_RADII: [f64; 5] = [64.0, 128.0, 256.0, 512.0, 1024.0];

/// Configuration for LOD behavior
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Edge of a LOD 0 chunk in world units
    pub chunk_size: u32,
    /// Distance band per LOD level, strictly ascending
    pub radii: Vec<f64>,
    /// Split when closer than `radius * split_factor`
    pub split_factor: f64,
    /// Merge when farther than `radius * merge_factor`
    pub merge_factor: f64,
    /// Optional world-space `[min_y, max_y]`; root chunks outside are never created
    pub vertical_limits: Option<[f64; 2]>,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            radii: LOD_RADII.to_vec(),
            split_factor: 0.8,
            merge_factor: 1.2,
            vertical_limits: None,
        }
    }
}

impl LodConfig {
    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.radii.is_empty() {
            return Err(Error::Config("radii must not be empty".into()));
        }
        if self.radii.len() > 16 {
            return Err(Error::Config("at most 16 LOD levels are supported".into()));
        }
        if self.radii.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(Error::Config("radii must be positive and finite".into()));
        }
        if self.radii.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config("radii must be strictly ascending".into()));
        }
        if !(self.split_factor > 0.0 && self.split_factor < self.merge_factor) {
            return Err(Error::Config(format!(
                "split_factor ({}) must be positive and below merge_factor ({})",
                self.split_factor, self.merge_factor
            )));
        }
        if let Some([lo, hi]) = self.vertical_limits {
            if lo >= hi {
                return Err(Error::Config("vertical_limits must be [min, max]".into()));
            }
        }
        Ok(())
    }

    /// Coarsest LOD level; all roots live here
    pub fn coarsest_lod(&self) -> u8 {
        (self.radii.len() - 1) as u8
    }

    /// Distance band for a LOD level, clamped to the coarsest level
    pub fn radius(&self, lod: u8) -> f64 {
        let i = (lod as usize).min(self.radii.len() - 1);
        self.radii[i]
    }

    /// Distance from the viewpoint to a chunk's center
    pub fn distance(&self, coord: ChunkCoord, viewpoint: DVec3) -> f64 {
        coord.distance_to(viewpoint, self.chunk_size)
    }

    /// Loading priority: closer chunks first
    pub fn priority(&self, coord: ChunkCoord, viewpoint: DVec3) -> f32 {
        priority_for_distance(self.distance(coord, viewpoint))
    }

    /// Whether a root chunk belongs in the resident set.
    ///
    /// New roots enter within the coarsest radius; resident roots stay until
    /// they pass `radius * merge_factor`.
    pub fn keeps_root(&self, coord: ChunkCoord, viewpoint: DVec3, resident: bool) -> bool {
        if !self.within_vertical_limits(coord) {
            return false;
        }
        let d = self.distance(coord, viewpoint);
        let r = self.radius(coord.lod);
        if resident { d <= r * self.merge_factor } else { d <= r }
    }

    /// Whether a leaf at `coord` should be split into children
    pub fn wants_split(&self, coord: ChunkCoord, viewpoint: DVec3) -> bool {
        coord.lod > 0 && self.distance(coord, viewpoint) < self.radius(coord.lod) * self.split_factor
    }

    /// Whether a split node may collapse back into a leaf.
    ///
    /// Requires the node itself and every child to be past their merge bands.
    pub fn wants_merge(&self, coord: ChunkCoord, viewpoint: DVec3) -> bool {
        if self.distance(coord, viewpoint) <= self.radius(coord.lod) * self.merge_factor {
            return false;
        }
        let Some(children) = coord.children() else {
            return true;
        };
        let child_band = self.radius(coord.lod - 1) * self.merge_factor;
        children
            .iter()
            .all(|c| self.distance(*c, viewpoint) > child_band)
    }

    /// Whether a node should end up split, given whether it is split now
    pub fn should_be_split(&self, coord: ChunkCoord, viewpoint: DVec3, split_now: bool) -> bool {
        if split_now {
            !self.wants_merge(coord, viewpoint)
        } else {
            self.wants_split(coord, viewpoint)
        }
    }

    /// Coarsest-LOD chunks that could be resident around a viewpoint.
    ///
    /// Roots are limited to the grid range whose LOD 0 descendants still fit
    /// in `i32`; a viewpoint beyond it gets only the edge of that range.
    pub fn candidate_roots(&self, viewpoint: DVec3) -> Vec<ChunkCoord> {
        if !viewpoint.is_finite() {
            return Vec::new();
        }
        let lod = self.coarsest_lod();
        let edge = self.chunk_size as f64 * (1u64 << lod) as f64;
        let reach = self.radius(lod) * self.merge_factor + edge;
        let grid_min = i32::MIN.checked_shr(lod as u32).unwrap_or(-1) as f64;
        let grid_max = i32::MAX.checked_shr(lod as u32).unwrap_or(0) as f64;
        let (grid_min, grid_max) = (DVec3::splat(grid_min), DVec3::splat(grid_max));
        let lo = ((viewpoint - DVec3::splat(reach)) / edge).floor().clamp(grid_min, grid_max);
        let hi = ((viewpoint + DVec3::splat(reach)) / edge).floor().clamp(grid_min, grid_max);

        let mut out = Vec::new();
        for z in lo.z as i32..=hi.z as i32 {
            for y in lo.y as i32..=hi.y as i32 {
                for x in lo.x as i32..=hi.x as i32 {
                    let coord = ChunkCoord::new(x, y, z, lod);
                    if self.within_vertical_limits(coord) {
                        out.push(coord);
                    }
                }
            }
        }
        out
    }

    fn within_vertical_limits(&self, coord: ChunkCoord) -> bool {
        match self.vertical_limits {
            None => true,
            Some([lo, hi]) => {
                let y0 = coord.world_origin(self.chunk_size).y;
                let y1 = y0 + coord.edge(self.chunk_size);
                y1 > lo && y0 < hi
            }
        }
    }
}

/// Priority for a chunk center at `distance`: `1 / (distance + 1)`
///
/// # Examples
/// ```
/// use voxstream::streaming::lod::priority_for_distance;
///
/// assert_eq!(priority_for_distance(0.0), 1.0);
/// assert!(priority_for_distance(10.0) > priority_for_distance(20.0));
/// ```
pub fn priority_for_distance(distance: f64) -> f32 {
    (1.0 / (distance.max(0.0) + 1.0)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> LodConfig {
        LodConfig {
            chunk_size: 32,
            radii: vec![64.0, 128.0, 256.0],
            split_factor: 0.8,
            merge_factor: 1.2,
            vertical_limits: None,
        }
    }

    #[test]
    fn test_default_validates() {
        assert!(LodConfig::default().validate().is_ok());
        assert_eq!(LodConfig::default().coarsest_lod(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let mut config = scenario();
        config.radii = vec![128.0, 64.0];
        assert!(config.validate().is_err());

        let mut config = scenario();
        config.split_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = scenario();
        config.radii.clear();
        assert!(config.validate().is_err());

        let mut config = scenario();
        config.vertical_limits = Some([10.0, -10.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_only_above_lod_zero() {
        let config = scenario();
        assert!(!config.wants_split(ChunkCoord::new(0, 0, 0, 0), DVec3::ZERO));
        assert!(config.wants_split(ChunkCoord::new(0, 0, 0, 1), DVec3::ZERO));
        assert!(config.wants_split(ChunkCoord::new(0, 0, 0, 2), DVec3::ZERO));
    }

    #[test]
    fn test_hysteresis_band_keeps_state() {
        let config = scenario();
        let coord = ChunkCoord::new(0, 0, 0, 1);
        // Center (32, 32, 32); split below 102.4, merge above 153.6
        let center = coord.center(32);
        let between = center + DVec3::new(120.0, 0.0, 0.0);

        assert!(!config.should_be_split(coord, between, false));
        assert!(config.should_be_split(coord, between, true));
    }

    #[test]
    fn test_merge_outside_band() {
        let config = scenario();
        let coord = ChunkCoord::new(0, 0, 0, 1);
        // Merge band for LOD 1 is 128 * 1.2 = 153.6
        let viewpoint = DVec3::new(32.0 + 140.0, 32.0, 32.0);
        assert!(!config.wants_merge(coord, viewpoint));

        let viewpoint = DVec3::new(32.0 + 200.0, 32.0, 32.0);
        assert!(config.wants_merge(coord, viewpoint));
    }

    #[test]
    fn test_root_retention() {
        let config = scenario();
        let root = ChunkCoord::new(2, 0, 0, 2);
        // Center (320, 64, 64) is 290 away: outside 256, inside 307.2
        let viewpoint = DVec3::new(30.0, 64.0, 64.0);
        assert!(!config.keeps_root(root, viewpoint, false));
        assert!(config.keeps_root(root, viewpoint, true));
        assert!(!config.keeps_root(root, DVec3::new(-100.0, 64.0, 64.0), true));
    }

    #[test]
    fn test_candidate_roots_cover_radius() {
        let config = scenario();
        let roots = config.candidate_roots(DVec3::ZERO);
        assert!(roots.contains(&ChunkCoord::new(0, 0, 0, 2)));
        assert!(roots.contains(&ChunkCoord::new(-1, -1, -1, 2)));
        assert!(roots.iter().all(|c| c.lod == 2));
    }

    #[test]
    fn test_candidate_roots_stay_on_grid() {
        let config = scenario();
        let roots = config.candidate_roots(DVec3::new(1.0e12, 0.0, -1.0e12));
        assert!(!roots.is_empty() && roots.len() <= 27);
        assert!(roots.iter().all(|c| c.x == i32::MAX >> 2 && c.z == i32::MIN >> 2));

        // Every root must be refinable all the way down
        let mut level = roots;
        while level[0].lod > 0 {
            level = level.iter().flat_map(|c| c.children().unwrap()).collect();
        }
        assert!(level.iter().any(|c| c.x == i32::MAX));

        assert!(config.candidate_roots(DVec3::new(f64::NAN, 0.0, 0.0)).is_empty());
        assert!(config.candidate_roots(DVec3::splat(f64::INFINITY)).is_empty());
    }

    #[test]
    fn test_vertical_limits_filter_roots() {
        let mut config = scenario();
        config.vertical_limits = Some([-10.0, 10.0]);
        let roots = config.candidate_roots(DVec3::ZERO);
        assert!(roots.iter().all(|c| c.y == 0 || c.y == -1));
        assert!(!config.keeps_root(ChunkCoord::new(0, 1, 0, 2), DVec3::ZERO, true));
    }

    #[test]
    fn test_priority_prefers_closer() {
        let config = scenario();
        let near = config.priority(ChunkCoord::new(0, 0, 0, 0), DVec3::ZERO);
        let far = config.priority(ChunkCoord::new(5, 0, 0, 0), DVec3::ZERO);
        assert!(near > far);
        assert!(near <= 1.0);
    }
}
