//! Background chunk generation
//!
//! A fixed pool of named worker threads pulls the highest-priority ready
//! request from a [`RequestQueue`], samples the voxel field, and extracts a
//! mesh with the strategy chosen when the pool was spawned. Results go back
//! over a bounded completion channel to the integrator.
//!
//! Cancellation is cooperative. A worker claims a node (`Pending →
//! Generating`) only if the request's epoch is still current, and drops its
//! result without sending it if the node was evicted or reset while it was
//! working. `stop` closes the queue, raises the cancel flag that sampling
//! polls between slabs, and joins every worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use super::index::Epoch;
use super::priority::{PendingRequest, PushOutcome, RequestQueue};
use super::shared::SharedTree;
use crate::core::error::{Error, ExtractionError};
use crate::core::types::Result;
use crate::voxel::coord::ChunkCoord;
use crate::voxel::density::DensityBlock;
use crate::voxel::extract;
use crate::voxel::field::VoxelField;
use crate::voxel::mesh::{ExtractedMesh, ExtractionSettings, ExtractionStrategy};

const SEND_RETRY: Duration = Duration::from_millis(50);

/// Generator configuration
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Worker threads; 0 uses the available hardware parallelism
    pub workers: usize,
    /// Pending requests held before the lowest-priority ones are dropped
    pub max_queue_depth: usize,
    /// Finished chunks buffered for the integrator
    pub completion_capacity: usize,
    pub extraction: ExtractionSettings,
    /// Minimum time between two extractions of the same coordinate
    pub min_extraction_interval_ms: u64,
    /// Keep the density block alongside the mesh
    pub retain_density: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_queue_depth: 512,
            completion_capacity: 256,
            extraction: ExtractionSettings::default(),
            min_extraction_interval_ms: 250,
            retain_density: false,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_depth == 0 {
            return Err(Error::Config("max_queue_depth must be positive".into()));
        }
        if self.completion_capacity == 0 {
            return Err(Error::Config("completion_capacity must be positive".into()));
        }
        if self.extraction.cells_per_axis == 0 {
            return Err(Error::Config("cells_per_axis must be positive".into()));
        }
        Ok(())
    }

    /// Worker count with 0 resolved to the hardware parallelism
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }
}

/// Geometry produced for one chunk
#[derive(Clone, Debug)]
pub struct ChunkPayload {
    pub mesh: Arc<ExtractedMesh>,
    pub density: Option<Arc<DensityBlock>>,
}

/// Result of one generation, tagged with the epoch it was requested at
#[derive(Debug)]
pub struct Completion {
    pub coord: ChunkCoord,
    pub epoch: Epoch,
    pub result: std::result::Result<ChunkPayload, ExtractionError>,
    pub elapsed: Duration,
}

/// Snapshot of generator counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    pub completed: u64,
    pub failed: u64,
    /// Requests whose node was gone or re-epoched before work started
    pub skipped_stale: u64,
    /// Results dropped because the node changed while extracting
    pub discarded_late: u64,
    /// Queued requests evicted by higher-priority ones
    pub dropped: u64,
    /// Requests refused because the queue was full
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    skipped_stale: AtomicU64,
    discarded_late: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GeneratorStats {
        GeneratorStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_stale: self.skipped_stale.load(Ordering::Relaxed),
            discarded_late: self.discarded_late.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    queue: Mutex<RequestQueue>,
    wake: Condvar,
    cancel: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Worker pool turning pending requests into meshes
pub struct Generator {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    strategy: ExtractionStrategy,
    stopped: bool,
}

impl Generator {
    /// Spawn the worker pool.
    ///
    /// Returns the generator and the receiving end of its completion channel.
    pub fn spawn(
        config: &GeneratorConfig,
        chunk_size: u32,
        field: Arc<dyn VoxelField>,
        tree: SharedTree,
    ) -> Result<(Self, Receiver<Completion>)> {
        config.validate()?;
        let (sender, receiver) = crossbeam_channel::bounded(config.completion_capacity);
        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::new(
                config.max_queue_depth,
                Duration::from_millis(config.min_extraction_interval_ms),
            )),
            wake: Condvar::new(),
            cancel: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let mut generator = Self {
            shared: Arc::clone(&shared),
            workers: Vec::new(),
            strategy: config.extraction.strategy,
            stopped: false,
        };

        let count = config.resolved_workers();
        for i in 0..count {
            let worker = Worker {
                id: i,
                shared: Arc::clone(&shared),
                field: Arc::clone(&field),
                tree: tree.clone(),
                sender: sender.clone(),
                settings: config.extraction.clone(),
                chunk_size,
                retain_density: config.retain_density,
            };
            let handle = thread::Builder::new()
                .name(format!("chunk-gen-{i}"))
                .spawn(move || worker.run())?;
            generator.workers.push(handle);
        }

        log::info!(
            "Generator started: {} workers, {} extraction, {} cells/axis",
            count,
            config.extraction.strategy.name(),
            config.extraction.cells_per_axis
        );
        Ok((generator, receiver))
    }

    /// Offer requests to the pool. Never waits for capacity.
    ///
    /// Returns how many were queued or updated.
    pub fn enqueue(&self, requests: impl IntoIterator<Item = PendingRequest>) -> usize {
        let now = Instant::now();
        let mut accepted = 0;
        {
            let mut queue = self.shared.queue();
            for request in requests {
                match queue.push(request, now) {
                    PushOutcome::Queued | PushOutcome::Updated => accepted += 1,
                    PushOutcome::DroppedLowest(coord) => {
                        log::trace!("Dropped request {} for higher priority {}", coord, request.coord);
                        Counters::bump(&self.shared.counters.dropped);
                        accepted += 1;
                    }
                    PushOutcome::Rejected => Counters::bump(&self.shared.counters.rejected),
                    PushOutcome::Closed => break,
                }
            }
        }
        if accepted > 0 {
            self.shared.wake.notify_all();
        }
        accepted
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn stats(&self) -> GeneratorStats {
        self.shared.counters.snapshot()
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Close the queue, cancel in-flight work, and join all workers
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        {
            let mut queue = self.shared.queue();
            queue.close();
            self.shared.cancel.store(true, Ordering::Release);
        }
        self.shared.wake.notify_all();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("chunk-gen").to_string();
            if handle.join().is_err() {
                log::error!("Generator worker {} panicked", name);
            }
        }
        log::info!("Generator stopped");
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    id: usize,
    shared: Arc<Shared>,
    field: Arc<dyn VoxelField>,
    tree: SharedTree,
    sender: Sender<Completion>,
    settings: ExtractionSettings,
    chunk_size: u32,
    retain_density: bool,
}

impl Worker {
    fn run(self) {
        log::debug!("Worker {} started", self.id);
        while let Some(request) = self.next_request() {
            self.process(request);
        }
        log::debug!("Worker {} exiting", self.id);
    }

    fn cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    /// Block until a request is ready or the pool is shutting down
    fn next_request(&self) -> Option<PendingRequest> {
        let mut queue = self.shared.queue();
        loop {
            if queue.is_closed() || self.cancelled() {
                return None;
            }
            let now = Instant::now();
            if let Some(request) = queue.pop_ready(now) {
                return Some(request);
            }
            queue = match queue.next_ready_at() {
                Some(at) => {
                    let timeout = at.saturating_duration_since(now);
                    self.shared
                        .wake
                        .wait_timeout(queue, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn process(&self, request: PendingRequest) {
        let PendingRequest { coord, epoch, .. } = request;

        // Claim the node; a missing node or newer epoch means the request is stale
        {
            let mut tree = self.tree.write();
            let claimed = tree
                .node_and_store(coord)
                .is_some_and(|(node, store)| store.begin_generation(node, epoch));
            if !claimed {
                log::trace!("Skipping stale request {}", coord);
                Counters::bump(&self.shared.counters.skipped_stale);
                return;
            }
        }
        let started = Instant::now();
        self.shared.queue().mark_started(coord, started);

        let result = self.generate(coord);
        if self.cancelled() {
            return;
        }

        {
            let tree = self.tree.read();
            if tree.live_node(coord, epoch).is_none() {
                log::debug!("Discarding late result for {}", coord);
                Counters::bump(&self.shared.counters.discarded_late);
                return;
            }
        }

        match &result {
            Ok(payload) => {
                log::trace!(
                    "Generated {} ({} triangles) in {:?}",
                    coord,
                    payload.mesh.triangle_count(),
                    started.elapsed()
                );
                Counters::bump(&self.shared.counters.completed);
            }
            Err(err) => {
                log::warn!("Extraction failed for {}: {}", coord, err);
                Counters::bump(&self.shared.counters.failed);
            }
        }

        self.send(Completion {
            coord,
            epoch,
            result,
            elapsed: started.elapsed(),
        });
    }

    fn generate(&self, coord: ChunkCoord) -> std::result::Result<ChunkPayload, ExtractionError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let block = DensityBlock::sample(
                self.field.as_ref(),
                coord,
                self.chunk_size,
                self.settings.cells_per_axis,
                &self.shared.cancel,
            )?;
            if self.cancelled() {
                return Err(ExtractionError::Cancelled(coord));
            }
            let mesh = extract::extract(&block, &self.settings);
            Ok(ChunkPayload {
                mesh: Arc::new(mesh),
                density: self.retain_density.then(|| Arc::new(block)),
            })
        }));

        outcome.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Voxel field panicked while generating {}: {}", coord, message);
            Err(ExtractionError::Panicked { coord, message })
        })
    }

    /// Hand a completion to the integrator, giving up only on shutdown
    fn send(&self, mut completion: Completion) {
        loop {
            match self.sender.send_timeout(completion, SEND_RETRY) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.cancelled() {
                        return;
                    }
                    completion = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    log::debug!("Completion channel closed; worker {} dropping result", self.id);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DVec3;
    use crate::streaming::budget::MemoryBudget;
    use crate::streaming::index::NodeState;
    use crate::streaming::shared::ChunkTree;
    use crate::voxel::field::{FlatField, Material, VoxelSample};

    const WAIT: Duration = Duration::from_secs(10);

    fn config() -> GeneratorConfig {
        crate::core::logging::init_for_tests();
        GeneratorConfig {
            workers: 2,
            min_extraction_interval_ms: 0,
            extraction: ExtractionSettings {
                cells_per_axis: 8,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn tree_with(coord: ChunkCoord) -> (SharedTree, Epoch) {
        let shared = SharedTree::new(ChunkTree::new(MemoryBudget::new(64, 64)));
        let epoch = {
            let mut tree = shared.write();
            let id = tree.index.insert(coord).unwrap();
            tree.index.node(id).unwrap().epoch()
        };
        (shared, epoch)
    }

    fn ground() -> Arc<dyn VoxelField> {
        Arc::new(FlatField { height: 10.0, material: Material::Grass })
    }

    #[test]
    fn test_generates_pending_chunk() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let (mut generator, completions) =
            Generator::spawn(&config(), 32, ground(), tree.clone()).unwrap();

        assert_eq!(generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]), 1);
        let completion = completions.recv_timeout(WAIT).unwrap();

        assert_eq!(completion.coord, coord);
        assert_eq!(completion.epoch, epoch);
        let payload = completion.result.unwrap();
        assert!(!payload.mesh.is_empty());
        assert!(payload.density.is_none());
        assert_eq!(tree.read().index.node_at(coord).unwrap().state(), NodeState::Generating);

        generator.stop();
        assert_eq!(generator.stats().completed, 1);
    }

    #[test]
    fn test_stale_request_is_skipped() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, _) = tree_with(coord);
        let (mut generator, completions) =
            Generator::spawn(&config(), 32, ground(), tree.clone()).unwrap();

        generator.enqueue([PendingRequest::new(coord, 1.0, Epoch::next())]);
        assert!(completions.recv_timeout(Duration::from_millis(300)).is_err());
        generator.stop();

        assert_eq!(generator.stats().skipped_stale, 1);
        assert_eq!(tree.read().index.node_at(coord).unwrap().state(), NodeState::Pending);
    }

    #[test]
    fn test_stale_skip_does_not_throttle_coordinate() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let config = GeneratorConfig { min_extraction_interval_ms: 60_000, ..config() };
        let (mut generator, completions) = Generator::spawn(&config, 32, ground(), tree).unwrap();

        generator.enqueue([PendingRequest::new(coord, 1.0, Epoch::next())]);
        let deadline = Instant::now() + WAIT;
        while generator.stats().skipped_stale == 0 {
            assert!(Instant::now() < deadline, "stale request was never skipped");
            std::thread::sleep(Duration::from_millis(2));
        }

        generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]);
        let completion = completions.recv_timeout(WAIT).unwrap();
        assert_eq!(completion.epoch, epoch);
        generator.stop();
    }

    #[test]
    fn test_panicking_field_reports_error() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let field: Arc<dyn VoxelField> = Arc::new(|_: DVec3| -> VoxelSample { panic!("bad field") });
        let (mut generator, completions) = Generator::spawn(&config(), 32, field, tree).unwrap();

        generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]);
        let completion = completions.recv_timeout(WAIT).unwrap();
        assert!(matches!(
            completion.result,
            Err(ExtractionError::Panicked { .. })
        ));

        generator.stop();
        assert_eq!(generator.stats().failed, 1);
    }

    #[test]
    fn test_retains_density_when_configured() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let mut config = config();
        config.retain_density = true;
        let (generator, completions) = Generator::spawn(&config, 32, ground(), tree).unwrap();

        generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]);
        let payload = completions.recv_timeout(WAIT).unwrap().result.unwrap();
        assert_eq!(payload.density.unwrap().dim(), 10);
    }

    #[test]
    fn test_reset_during_extraction_discards_result() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let entered = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(AtomicBool::new(false));
        let field: Arc<dyn VoxelField> = {
            let entered = Arc::clone(&entered);
            let gate = Arc::clone(&gate);
            Arc::new(move |p: DVec3| {
                entered.store(true, Ordering::SeqCst);
                while !gate.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                VoxelSample::new((p.y - 10.0) as f32, Material::Rock)
            })
        };
        let (mut generator, completions) =
            Generator::spawn(&config(), 32, field, tree.clone()).unwrap();
        generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]);

        let deadline = Instant::now() + WAIT;
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        {
            let mut tree = tree.write();
            let (node, store) = tree.node_and_store(coord).unwrap();
            store.reset(node);
        }
        gate.store(true, Ordering::SeqCst);

        assert!(completions.recv_timeout(Duration::from_millis(500)).is_err());
        let deadline = Instant::now() + WAIT;
        while generator.stats().discarded_late == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        generator.stop();
        assert_eq!(generator.stats().discarded_late, 1);
    }

    #[test]
    fn test_stop_joins_and_refuses_work() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, epoch) = tree_with(coord);
        let (mut generator, _completions) = Generator::spawn(&config(), 32, ground(), tree).unwrap();
        assert_eq!(generator.worker_count(), 2);

        generator.stop();
        assert!(generator.is_stopped());
        assert_eq!(generator.worker_count(), 0);
        assert_eq!(generator.enqueue([PendingRequest::new(coord, 1.0, epoch)]), 0);
        generator.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let (tree, _) = tree_with(coord);
        let mut config = config();
        config.max_queue_depth = 0;
        assert!(Generator::spawn(&config, 32, ground(), tree).is_err());
    }
}
