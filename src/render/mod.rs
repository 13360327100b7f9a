//! Interfaces to the rendering collaborators
//!
//! Streaming never talks to a graphics API directly. The viewpoint comes from
//! a [`ViewpointSource`], buffers are created and destroyed through a
//! [`RenderDevice`] on the integrator's thread, and draws go to a
//! [`DrawSurface`].

pub mod headless;

pub use headless::{BufferHandle, DrawRecorder, HeadlessDevice};

use crate::core::error::AllocationFailure;
use crate::core::types::{DVec3, Mat4, Quat};
use crate::voxel::mesh::ExtractedMesh;

/// Position and orientation of the viewer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewpointPose {
    pub position: DVec3,
    pub orientation: Quat,
}

impl ViewpointPose {
    pub fn at(position: DVec3) -> Self {
        Self { position, orientation: Quat::IDENTITY }
    }
}

/// Supplies the current viewpoint once per simulation tick
pub trait ViewpointSource {
    fn viewpoint_pose(&self) -> ViewpointPose;
}

impl ViewpointSource for ViewpointPose {
    fn viewpoint_pose(&self) -> ViewpointPose {
        *self
    }
}

/// Owner of GPU buffers. Only ever called from the integrator's thread.
pub trait RenderDevice {
    type Handle;

    /// Upload a mesh into a new device buffer
    fn create_buffer(&mut self, mesh: &ExtractedMesh) -> Result<Self::Handle, AllocationFailure>;

    /// Destroy a buffer created by this device
    fn destroy_buffer(&mut self, handle: Self::Handle);
}

/// Receives draw calls in traversal order
pub trait DrawSurface<H> {
    /// Draw one chunk; `transform` maps chunk-local space to world space
    fn issue_draw_call(&mut self, handle: &H, transform: Mat4);
}
