//! Headless render device and draw recorder
//!
//! Stands in for a real graphics backend in the driver binary, tests, and
//! benchmarks. It accounts for every buffer so leaks and double frees show up
//! as counts.

use std::collections::HashMap;

use super::{DrawSurface, RenderDevice};
use crate::core::error::AllocationFailure;
use crate::core::types::Mat4;
use crate::voxel::coord::ChunkCoord;
use crate::voxel::mesh::ExtractedMesh;

/// Handle to a headless buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug)]
struct BufferInfo {
    coord: ChunkCoord,
    bytes: usize,
}

/// In-memory device that tracks buffer lifetimes
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u64,
    live: HashMap<u64, BufferInfo>,
    live_bytes: usize,
    created: u64,
    destroyed: u64,
    /// Refuse allocations that would exceed this many bytes in total
    capacity: Option<usize>,
    fail_next: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device with a fixed memory capacity
    pub fn with_capacity(bytes: usize) -> Self {
        Self { capacity: Some(bytes), ..Self::default() }
    }

    /// Make the next `count` allocations fail
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }

    /// Number of live buffers holding a chunk
    pub fn buffers_for(&self, coord: ChunkCoord) -> usize {
        self.live.values().filter(|b| b.coord == coord).count()
    }
}

impl RenderDevice for HeadlessDevice {
    type Handle = BufferHandle;

    fn create_buffer(&mut self, mesh: &ExtractedMesh) -> Result<BufferHandle, AllocationFailure> {
        let bytes = mesh.byte_size();
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(AllocationFailure { bytes, reason: "injected failure".into() });
        }
        if let Some(capacity) = self.capacity {
            if self.live_bytes + bytes > capacity {
                return Err(AllocationFailure {
                    bytes,
                    reason: format!("{} of {} bytes in use", self.live_bytes, capacity),
                });
            }
        }

        self.next_id += 1;
        self.live.insert(self.next_id, BufferInfo { coord: mesh.coord, bytes });
        self.live_bytes += bytes;
        self.created += 1;
        Ok(BufferHandle(self.next_id))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.live.remove(&handle.0) {
            Some(info) => {
                self.live_bytes -= info.bytes;
                self.destroyed += 1;
            }
            None => log::error!("Destroying unknown buffer {}", handle.0),
        }
    }
}

/// Surface that records the draw calls of one frame
#[derive(Debug, Default)]
pub struct DrawRecorder {
    pub calls: Vec<(BufferHandle, Mat4)>,
}

impl DrawRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl DrawSurface<BufferHandle> for DrawRecorder {
    fn issue_draw_call(&mut self, handle: &BufferHandle, transform: Mat4) {
        self.calls.push((*handle, transform));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::mesh::{ExtractionStrategy, MeshVertex};

    fn mesh(coord: ChunkCoord) -> ExtractedMesh {
        let mut mesh = ExtractedMesh::empty(coord, ExtractionStrategy::Cubical);
        mesh.vertices = vec![MeshVertex::default(); 3];
        mesh.indices = vec![0, 1, 2];
        mesh
    }

    #[test]
    fn test_create_and_destroy() {
        let mut device = HeadlessDevice::new();
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let handle = device.create_buffer(&mesh(coord)).unwrap();
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.live_bytes(), 3 * 36 + 12);
        assert_eq!(device.buffers_for(coord), 1);

        device.destroy_buffer(handle);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_bytes(), 0);
        assert_eq!(device.created(), 1);
        assert_eq!(device.destroyed(), 1);
    }

    #[test]
    fn test_injected_failure() {
        let mut device = HeadlessDevice::new();
        device.fail_next(1);
        let coord = ChunkCoord::new(0, 0, 0, 0);
        assert!(device.create_buffer(&mesh(coord)).is_err());
        assert!(device.create_buffer(&mesh(coord)).is_ok());
    }

    #[test]
    fn test_capacity_limit() {
        let mut device = HeadlessDevice::with_capacity(200);
        let coord = ChunkCoord::new(0, 0, 0, 0);
        assert!(device.create_buffer(&mesh(coord)).is_ok());
        let err = device.create_buffer(&mesh(coord)).unwrap_err();
        assert_eq!(err.bytes, 120);
    }
}
