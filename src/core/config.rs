//! Top-level configuration, loadable from JSON
//!
//! Every section defaults, so a config file only needs the fields it changes:
//!
//! ```json
//! { "lod": { "radii": [64, 128, 256] }, "generator": { "workers": 2 } }
//! ```

use std::path::Path;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::budget::{FrameBudget, MemoryLimits};
use crate::streaming::generator::GeneratorConfig;
use crate::streaming::lod::LodConfig;
use crate::voxel::terrain::TerrainParams;

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub lod: LodConfig,
    pub generator: GeneratorConfig,
    pub frame: FrameBudget,
    pub memory: MemoryLimits,
    pub terrain: TerrainParams,
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        self.lod.validate()?;
        self.generator.validate()?;
        if self.frame.max_completions_per_frame == 0 {
            return Err(Error::Config("max_completions_per_frame must be positive".into()));
        }
        if self.lod.chunk_size as usize % self.generator.extraction.cells_per_axis != 0 {
            log::warn!(
                "chunk_size {} is not a multiple of cells_per_axis {}",
                self.lod.chunk_size,
                self.generator.extraction.cells_per_axis
            );
        }
        Ok(())
    }

    /// Load and validate a config file
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        StreamingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "lod": { "radii": [50.0, 100.0] }, "generator": { "workers": 3 } }"#)
                .unwrap();
        assert_eq!(config.lod.radii, vec![50.0, 100.0]);
        assert_eq!(config.lod.chunk_size, 32);
        assert_eq!(config.generator.workers, 3);
        assert_eq!(config.frame, FrameBudget::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("streaming.json");
        let mut config = StreamingConfig::default();
        config.terrain.seed = 7;
        config.generator.retain_density = true;

        config.save_json(&path).unwrap();
        let loaded = StreamingConfig::load_json(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "lod": { "radii": [] } }"#).unwrap();
        assert!(matches!(StreamingConfig::load_json(&path), Err(Error::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(StreamingConfig::load_json(&path), Err(Error::Json(_))));

        let missing = dir.path().join("missing.json");
        assert!(matches!(StreamingConfig::load_json(&missing), Err(Error::Io(_))));
    }
}
