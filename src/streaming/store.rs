//! Per-node representations and state transitions
//!
//! The index decides which nodes exist; the store decides what they hold.
//! Every transition that drops a GPU-resident node queues a [`GpuRelease`]
//! so the device buffer is freed later on the integrator's thread.

use std::sync::Arc;

use super::budget::MemoryBudget;
use super::index::{Epoch, NodeState, OctreeNode};
use crate::voxel::coord::ChunkCoord;
use crate::voxel::density::DensityBlock;
use crate::voxel::mesh::{ExtractedMesh, ExtractionStrategy};

/// CPU-side data of a generated chunk
#[derive(Clone, Debug)]
pub struct CpuRepresentation {
    pub strategy: ExtractionStrategy,
    pub mesh: Arc<ExtractedMesh>,
    /// Raw samples, kept only when the generator is configured to retain them
    pub density: Option<Arc<DensityBlock>>,
}

impl CpuRepresentation {
    pub fn byte_size(&self) -> usize {
        self.mesh.byte_size() + self.density.as_ref().map_or(0, |d| d.byte_size())
    }
}

/// GPU residency recorded on a node; the buffer itself lives with the integrator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuResidency {
    pub epoch: Epoch,
    pub vertex_count: u32,
    pub index_count: u32,
    pub bytes: usize,
}

/// A device buffer that must be destroyed by the integrator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuRelease {
    pub coord: ChunkCoord,
    pub epoch: Epoch,
}

/// Cumulative transition counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accepted: u64,
    pub failed: u64,
    pub uploaded: u64,
    pub reset: u64,
    pub released: u64,
}

/// Owner of representation transitions and memory accounting
#[derive(Debug)]
pub struct ChunkStore {
    pending_free: Vec<GpuRelease>,
    memory: MemoryBudget,
    stats: StoreStats,
}

impl ChunkStore {
    pub fn new(memory: MemoryBudget) -> Self {
        Self {
            pending_free: Vec::new(),
            memory,
            stats: StoreStats::default(),
        }
    }

    pub fn memory(&self) -> &MemoryBudget {
        &self.memory
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// `Pending → Generating` if the request's epoch is still current
    pub fn begin_generation(&mut self, node: &mut OctreeNode, epoch: Epoch) -> bool {
        if node.state != NodeState::Pending || node.epoch != epoch {
            return false;
        }
        node.state = NodeState::Generating;
        true
    }

    /// `Generating → ReadyCpu` for a completion whose epoch matches.
    ///
    /// Returns false, leaving the node untouched, for a stale completion.
    pub fn accept(&mut self, node: &mut OctreeNode, epoch: Epoch, cpu: CpuRepresentation) -> bool {
        if node.state != NodeState::Generating || node.epoch != epoch {
            return false;
        }
        self.memory.add_cpu(cpu.byte_size());
        node.cpu = Some(cpu);
        node.state = NodeState::ReadyCpu;
        self.stats.accepted += 1;
        true
    }

    /// `Generating → Pending` after an extraction error, with a fresh epoch
    pub fn fail_generation(&mut self, node: &mut OctreeNode, epoch: Epoch) -> bool {
        if node.state != NodeState::Generating || node.epoch != epoch {
            return false;
        }
        node.state = NodeState::Pending;
        node.epoch = Epoch::next();
        self.stats.failed += 1;
        true
    }

    /// `ReadyCpu → UploadedGpu`, integrator thread only
    pub fn mark_uploaded(&mut self, node: &mut OctreeNode, residency: GpuResidency) -> bool {
        if node.state != NodeState::ReadyCpu || node.epoch != residency.epoch {
            return false;
        }
        self.memory.add_gpu(residency.bytes);
        node.gpu = Some(residency);
        node.state = NodeState::UploadedGpu;
        self.stats.uploaded += 1;
        true
    }

    /// Drop both representations, queueing the GPU side for release
    pub fn release_representations(&mut self, node: &mut OctreeNode) {
        if let Some(cpu) = node.cpu.take() {
            self.memory.remove_cpu(cpu.byte_size());
        }
        if let Some(gpu) = node.gpu.take() {
            self.memory.remove_gpu(gpu.bytes);
            self.pending_free.push(GpuRelease { coord: node.coord(), epoch: gpu.epoch });
        }
    }

    /// Return a leaf to `Pending` with a fresh epoch.
    ///
    /// Any in-flight generation for the old epoch becomes stale.
    pub fn reset(&mut self, node: &mut OctreeNode) {
        self.release_representations(node);
        if node.state != NodeState::Split {
            node.state = NodeState::Pending;
        }
        node.epoch = Epoch::next();
        self.stats.reset += 1;
    }

    /// Dispose of a node that left the index
    pub fn release(&mut self, mut node: OctreeNode) {
        self.release_representations(&mut node);
        self.stats.released += 1;
    }

    /// Drain the GPU buffers awaiting destruction
    pub fn take_pending_free(&mut self) -> Vec<GpuRelease> {
        std::mem::take(&mut self.pending_free)
    }

    pub fn pending_free_len(&self) -> usize {
        self.pending_free.len()
    }
}
