//! Streaming world: one tree, one watcher, one generator pool
//!
//! The world is driven from the simulation thread with [`StreamingWorld::tick`].
//! The render thread gets its own [`Integrator`] from
//! [`StreamingWorld::integrator`] and never touches the watcher or generator.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::core::config::StreamingConfig;
use crate::core::types::Result;
use crate::render::{RenderDevice, ViewpointSource};
use crate::streaming::budget::MemoryBudget;
use crate::streaming::generator::{Completion, Generator, GeneratorStats};
use crate::streaming::index::NodeState;
use crate::streaming::integrator::{Integrator, RenderLink};
use crate::streaming::shared::{ChunkTree, SharedTree};
use crate::streaming::store::StoreStats;
use crate::streaming::watcher::{TickReport, Watcher};
use crate::voxel::field::VoxelField;
use crate::voxel::terrain::NoiseTerrain;

/// Snapshot of the whole streaming system
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldStats {
    pub nodes: usize,
    pub leaves: usize,
    pub pending: usize,
    pub generating: usize,
    pub ready: usize,
    pub uploaded: usize,
    pub queued: usize,
    pub cpu_bytes: usize,
    pub gpu_bytes: usize,
    pub gpu_pressure: f32,
    pub generator: GeneratorStats,
    pub store: StoreStats,
}

pub struct StreamingWorld {
    config: StreamingConfig,
    tree: SharedTree,
    watcher: Watcher,
    generator: Generator,
    completions: Receiver<Completion>,
}

impl StreamingWorld {
    pub fn new(config: StreamingConfig, field: Arc<dyn VoxelField>) -> Result<Self> {
        config.validate()?;
        let tree = SharedTree::new(ChunkTree::new(MemoryBudget::from_limits(&config.memory)));
        let (generator, completions) =
            Generator::spawn(&config.generator, config.lod.chunk_size, field, tree.clone())?;
        let watcher = Watcher::new(config.lod.clone());

        log::info!(
            "Streaming world: {} LOD levels, chunk size {}, coarsest radius {}",
            config.lod.radii.len(),
            config.lod.chunk_size,
            config.lod.radius(config.lod.coarsest_lod())
        );
        Ok(Self { config, tree, watcher, generator, completions })
    }

    /// World over noise terrain built from `config.terrain`
    pub fn with_noise_terrain(config: StreamingConfig) -> Result<Self> {
        let field = Arc::new(NoiseTerrain::new(config.terrain.clone()));
        Self::new(config, field)
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// One simulation step
    pub fn tick(&mut self, source: &dyn ViewpointSource) -> TickReport {
        self.watcher.tick(source, &self.tree, &self.generator)
    }

    pub fn render_link(&self) -> RenderLink {
        RenderLink {
            tree: self.tree.clone(),
            completions: self.completions.clone(),
            chunk_size: self.config.lod.chunk_size,
        }
    }

    /// Integrator for the render thread
    pub fn integrator<D: RenderDevice>(&self, device: D) -> Integrator<D> {
        Integrator::new(device, self.render_link(), self.config.frame.clone())
    }

    pub fn stats(&self) -> WorldStats {
        let tree = self.tree.read();
        let mut stats = WorldStats {
            nodes: tree.index.len(),
            cpu_bytes: tree.store.memory().cpu_used(),
            gpu_bytes: tree.store.memory().gpu_used(),
            gpu_pressure: tree.store.memory().gpu_pressure(),
            store: tree.store.stats(),
            ..Default::default()
        };
        for leaf in tree.index.leaves() {
            stats.leaves += 1;
            match leaf.state() {
                NodeState::Pending => stats.pending += 1,
                NodeState::Generating => stats.generating += 1,
                NodeState::ReadyCpu => stats.ready += 1,
                NodeState::UploadedGpu => stats.uploaded += 1,
                NodeState::Split => {}
            }
        }
        drop(tree);

        stats.queued = self.generator.queue_len();
        stats.generator = self.generator.stats();
        stats
    }

    /// Stop the watcher, then drain and join the generator pool.
    ///
    /// Integrators should be torn down after this returns.
    pub fn shutdown(&mut self) {
        if self.generator.is_stopped() {
            return;
        }
        self.watcher.stop();
        self.generator.stop();
        log::info!("Streaming world shut down after {} ticks", self.watcher.ticks());
    }
}

impl Drop for StreamingWorld {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::Camera;
    use crate::core::types::DVec3;
    use crate::render::{DrawRecorder, HeadlessDevice};
    use crate::streaming::lod::LodConfig;
    use crate::voxel::field::{FlatField, Material};
    use crate::voxel::mesh::ExtractionStrategy;
    use std::time::{Duration, Instant};

    fn small_config(strategy: ExtractionStrategy) -> StreamingConfig {
        crate::core::logging::init_for_tests();
        let mut config = StreamingConfig::default();
        config.lod = LodConfig { radii: vec![48.0, 96.0], ..LodConfig::default() };
        config.generator.workers = 2;
        config.generator.extraction.cells_per_axis = 8;
        config.generator.extraction.strategy = strategy;
        config.generator.min_extraction_interval_ms = 10;
        config
    }

    /// Tick and integrate until every leaf is on the device
    fn settle(
        world: &mut StreamingWorld,
        integrator: &mut Integrator<HeadlessDevice>,
        surface: &mut DrawRecorder,
        camera: &Camera,
    ) -> WorldStats {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            world.tick(camera);
            surface.clear();
            integrator.integrate(surface);
            let stats = world.stats();
            if stats.leaves > 0 && stats.uploaded == stats.leaves {
                return stats;
            }
            assert!(Instant::now() < deadline, "world did not settle: {stats:?}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_world_streams_to_device() {
        let field = Arc::new(FlatField { height: 0.5, material: Material::Grass });
        let mut world = StreamingWorld::new(small_config(ExtractionStrategy::Dual), field).unwrap();
        let mut integrator = world.integrator(HeadlessDevice::new());
        let mut surface = DrawRecorder::new();
        let camera = Camera::new(DVec3::new(0.0, 8.0, 0.0));

        let stats = settle(&mut world, &mut integrator, &mut surface, &camera);
        assert_eq!(stats.pending + stats.generating + stats.ready, 0);
        assert!(world.tree().read().index.check_invariants().is_ok());

        surface.clear();
        integrator.integrate(&mut surface);
        assert_eq!(integrator.resident_count(), stats.leaves);
        let drawable = drawable_leaves(&world);
        assert!(drawable > 0);
        assert_eq!(integrator.device().live_buffers(), drawable);
        assert_eq!(surface.len(), drawable);

        world.shutdown();
        integrator.teardown();
        assert_eq!(integrator.device().live_buffers(), 0);
    }

    #[test]
    fn test_world_follows_moving_viewpoint() {
        let field = Arc::new(FlatField { height: 0.5, material: Material::Rock });
        let mut world = StreamingWorld::new(small_config(ExtractionStrategy::Cubical), field).unwrap();
        let mut integrator = world.integrator(HeadlessDevice::new());
        let mut surface = DrawRecorder::new();

        let near = settle(&mut world, &mut integrator, &mut surface, &Camera::new(DVec3::ZERO));
        assert!(near.leaves > 0);
        let far = Camera::new(DVec3::new(2000.0, 0.0, 0.0));
        let stats = settle(&mut world, &mut integrator, &mut surface, &far);

        // Everything near the old viewpoint is gone, buffers included
        let tree = world.tree().read();
        assert!(tree.index.leaf_coords().iter().all(|c| c.center(32).length() > 1000.0));
        drop(tree);
        integrator.integrate(&mut surface);
        assert_eq!(integrator.resident_count(), stats.leaves);
        assert_eq!(integrator.device().live_buffers(), drawable_leaves(&world));
        world.shutdown();
    }

    /// Uploaded leaves that hold a device buffer
    fn drawable_leaves(world: &StreamingWorld) -> usize {
        let tree = world.tree().read();
        tree.index
            .leaves()
            .into_iter()
            .filter(|n| n.gpu().is_some_and(|g| g.index_count > 0))
            .count()
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let field = Arc::new(FlatField { height: 0.0, material: Material::Dirt });
        let mut world = StreamingWorld::new(small_config(ExtractionStrategy::Cubical), field).unwrap();
        world.tick(&Camera::default());
        world.shutdown();
        world.shutdown();
        assert_eq!(world.tick(&Camera::default()), TickReport::default());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = small_config(ExtractionStrategy::Cubical);
        config.lod.radii.clear();
        let field = Arc::new(FlatField { height: 0.0, material: Material::Dirt });
        assert!(StreamingWorld::new(config, field).is_err());
    }
}
