//! Streaming level-of-detail terrain
//!
//! A watcher keeps a [`SpatialIndex`] of chunks refined around the viewpoint,
//! a pool of generator workers turns pending chunks into meshes, and the
//! integrator moves finished meshes onto the render device. The three meet
//! only at the [`SharedTree`] structure lock and the completion channel.

pub mod budget;
pub mod generator;
pub mod index;
pub mod integrator;
pub mod lod;
pub mod priority;
pub mod shared;
pub mod store;
pub mod watcher;

pub use budget::{BytePool, FrameBudget, MemoryBudget, MemoryLimits};
pub use generator::{ChunkPayload, Completion, Generator, GeneratorConfig, GeneratorStats};
pub use index::{Epoch, NodeId, NodeState, OctreeNode, SpatialIndex, MAX_LOD};
pub use integrator::{FrameReport, Integrator, RenderLink};
pub use lod::{LodConfig, LOD_RADII, priority_for_distance};
pub use priority::{PendingRequest, PushOutcome, RequestQueue};
pub use shared::{ChunkTree, SharedTree};
pub use store::{ChunkStore, CpuRepresentation, GpuRelease, GpuResidency, StoreStats};
pub use watcher::{ResidentSet, TickReport, Watcher};
