//! Render-thread integration of generated chunks
//!
//! The integrator is the only code that touches the render device. Each frame
//! it retries uploads left over from earlier frames, drains a bounded number
//! of completions, destroys buffers released by the watcher, and issues draw
//! calls for every uploaded leaf in index order.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::budget::FrameBudget;
use super::generator::Completion;
use super::index::{Epoch, NodeState};
use super::shared::SharedTree;
use super::store::{CpuRepresentation, GpuResidency};
use crate::core::error::AllocationFailure;
use crate::core::types::Mat4;
use crate::render::{DrawSurface, RenderDevice};
use crate::voxel::coord::ChunkCoord;
use crate::voxel::mesh::ExtractedMesh;

/// Everything the render thread needs from the streaming world
#[derive(Clone, Debug)]
pub struct RenderLink {
    pub tree: SharedTree,
    pub completions: Receiver<Completion>,
    pub chunk_size: u32,
}

/// A chunk's buffer; `None` for chunks with no geometry
#[derive(Debug)]
struct GpuChunk<H> {
    handle: Option<H>,
    epoch: Epoch,
}

/// What one integrate pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub drained: usize,
    pub accepted: usize,
    /// Completions whose node was gone or had moved on
    pub stale: usize,
    pub failed: usize,
    pub uploaded: usize,
    pub upload_failures: usize,
    /// Ready chunks left for a later frame by the upload byte budget
    pub deferred: usize,
    pub freed: usize,
    pub draws: usize,
}

impl FrameReport {
    fn accumulate(&mut self, other: &FrameReport) {
        self.drained += other.drained;
        self.accepted += other.accepted;
        self.stale += other.stale;
        self.failed += other.failed;
        self.uploaded += other.uploaded;
        self.upload_failures += other.upload_failures;
        self.deferred += other.deferred;
        self.freed += other.freed;
    }
}

/// Moves generated chunks onto the device and draws them
pub struct Integrator<D: RenderDevice> {
    device: D,
    link: RenderLink,
    resident: HashMap<ChunkCoord, GpuChunk<D::Handle>>,
    budget: FrameBudget,
    frames: u64,
    totals: FrameReport,
}

impl<D: RenderDevice> Integrator<D> {
    pub fn new(device: D, link: RenderLink, budget: FrameBudget) -> Self {
        Self {
            device,
            link,
            resident: HashMap::new(),
            budget,
            frames: 0,
            totals: FrameReport::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Chunks with a live GPU representation
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Counters summed over all frames (draws excluded)
    pub fn totals(&self) -> FrameReport {
        self.totals
    }

    /// One render-thread pass
    pub fn integrate(&mut self, surface: &mut dyn DrawSurface<D::Handle>) -> FrameReport {
        let mut report = FrameReport::default();
        let mut bytes_left = self.budget.max_upload_bytes_per_frame;

        self.retry_ready(&mut bytes_left, &mut report);
        self.drain_completions(&mut bytes_left, &mut report);
        self.free_released(&mut report);
        self.draw(surface, &mut report);

        self.frames += 1;
        self.totals.accumulate(&report);
        if report.drained + report.freed + report.upload_failures > 0 {
            log::debug!(
                "Frame {}: drained {}, uploaded {}, stale {}, freed {}, draws {}",
                self.frames,
                report.drained,
                report.uploaded,
                report.stale,
                report.freed,
                report.draws
            );
        }
        report
    }

    /// Upload chunks that reached `ReadyCpu` on an earlier frame
    fn retry_ready(&mut self, bytes_left: &mut usize, report: &mut FrameReport) {
        let ready: Vec<(ChunkCoord, Epoch, Arc<ExtractedMesh>)> = {
            let tree = self.link.tree.read();
            tree.index
                .leaves()
                .into_iter()
                .filter(|n| n.state() == NodeState::ReadyCpu)
                .filter_map(|n| n.cpu().map(|cpu| (n.coord(), n.epoch(), Arc::clone(&cpu.mesh))))
                .collect()
        };
        for (coord, epoch, mesh) in ready {
            self.upload(coord, epoch, mesh, bytes_left, report);
        }
    }

    fn drain_completions(&mut self, bytes_left: &mut usize, report: &mut FrameReport) {
        while report.drained < self.budget.max_completions_per_frame {
            let Ok(completion) = self.link.completions.try_recv() else {
                break;
            };
            report.drained += 1;
            let Completion { coord, epoch, result, .. } = completion;

            let accepted = {
                let mut tree = self.link.tree.write();
                let Some((node, store)) = tree.node_and_store(coord) else {
                    log::debug!("Discarding completion for evicted {}", coord);
                    report.stale += 1;
                    continue;
                };
                if node.state() != NodeState::Generating || node.epoch() != epoch {
                    log::debug!("Discarding stale completion for {}", coord);
                    report.stale += 1;
                    continue;
                }
                match result {
                    Ok(payload) => {
                        let mesh = Arc::clone(&payload.mesh);
                        let cpu = CpuRepresentation {
                            strategy: payload.mesh.strategy,
                            mesh: payload.mesh,
                            density: payload.density,
                        };
                        store.accept(node, epoch, cpu).then_some(mesh)
                    }
                    Err(err) => {
                        log::debug!("Requeueing {} after {}", coord, err);
                        store.fail_generation(node, epoch);
                        report.failed += 1;
                        None
                    }
                }
            };

            if let Some(mesh) = accepted {
                report.accepted += 1;
                self.upload(coord, epoch, mesh, bytes_left, report);
            }
        }
    }

    /// Move a `ReadyCpu` chunk onto the device
    fn upload(
        &mut self,
        coord: ChunkCoord,
        epoch: Epoch,
        mesh: Arc<ExtractedMesh>,
        bytes_left: &mut usize,
        report: &mut FrameReport,
    ) {
        let bytes = mesh.byte_size();
        // Always let one upload through so a large chunk cannot stall forever
        if bytes > *bytes_left && report.uploaded > 0 {
            report.deferred += 1;
            return;
        }

        if !self.link.tree.read().store.memory().can_upload(bytes) {
            let failure = AllocationFailure { bytes, reason: "GPU memory budget exhausted".into() };
            log::warn!("Upload of {} deferred: {}", coord, failure);
            report.upload_failures += 1;
            return;
        }

        if let Some(old) = self.resident.remove(&coord) {
            if let Some(handle) = old.handle {
                self.device.destroy_buffer(handle);
            }
            report.freed += 1;
        }

        let handle = if mesh.is_empty() {
            None
        } else {
            match self.device.create_buffer(&mesh) {
                Ok(handle) => Some(handle),
                Err(failure) => {
                    log::warn!("Upload of {} failed: {}", coord, failure);
                    report.upload_failures += 1;
                    return;
                }
            }
        };

        let residency = GpuResidency {
            epoch,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
            bytes,
        };
        let uploaded = {
            let mut tree = self.link.tree.write();
            tree.node_and_store(coord)
                .is_some_and(|(node, store)| store.mark_uploaded(node, residency))
        };

        if uploaded {
            self.resident.insert(coord, GpuChunk { handle, epoch });
            report.uploaded += 1;
            *bytes_left = bytes_left.saturating_sub(bytes);
        } else {
            // Evicted or reset between accept and upload
            if let Some(handle) = handle {
                self.device.destroy_buffer(handle);
            }
            report.stale += 1;
        }
    }

    /// Destroy buffers whose nodes were evicted, reset, or merged away
    fn free_released(&mut self, report: &mut FrameReport) {
        let releases = self.link.tree.write().store.take_pending_free();
        for release in releases {
            let matches = self
                .resident
                .get(&release.coord)
                .is_some_and(|chunk| chunk.epoch == release.epoch);
            if !matches {
                continue;
            }
            if let Some(chunk) = self.resident.remove(&release.coord) {
                if let Some(handle) = chunk.handle {
                    self.device.destroy_buffer(handle);
                }
                report.freed += 1;
            }
        }
    }

    fn draw(&mut self, surface: &mut dyn DrawSurface<D::Handle>, report: &mut FrameReport) {
        let chunk_size = self.link.chunk_size;
        let drawable: Vec<(ChunkCoord, Epoch)> = {
            let tree = self.link.tree.read();
            tree.index
                .leaves()
                .into_iter()
                .filter(|n| n.state() == NodeState::UploadedGpu)
                .map(|n| (n.coord(), n.epoch()))
                .collect()
        };

        for (coord, epoch) in drawable {
            let Some(chunk) = self.resident.get(&coord) else {
                continue;
            };
            let Some(handle) = chunk.handle.as_ref().filter(|_| chunk.epoch == epoch) else {
                continue;
            };
            let origin = coord.world_origin(chunk_size).as_vec3();
            surface.issue_draw_call(handle, Mat4::from_translation(origin));
            report.draws += 1;
        }
    }

    /// Destroy every remaining buffer. Call after the generator has stopped
    /// and before the device itself goes away.
    pub fn teardown(&mut self) -> usize {
        while self.link.completions.try_recv().is_ok() {}
        let count = self.resident.len();
        for (_, chunk) in self.resident.drain() {
            if let Some(handle) = chunk.handle {
                self.device.destroy_buffer(handle);
            }
        }
        log::info!("Integrator released {} chunk buffers", count);
        count
    }
}
