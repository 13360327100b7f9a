//! The structure lock shared by the watcher, generator workers, and integrator

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::budget::MemoryBudget;
use super::index::{Epoch, NodeId, OctreeNode, SpatialIndex};
use super::store::ChunkStore;
use crate::core::error::StructuralViolation;
use crate::voxel::coord::ChunkCoord;

/// Index and store, always mutated together
#[derive(Debug)]
pub struct ChunkTree {
    pub index: SpatialIndex,
    pub store: ChunkStore,
}

impl ChunkTree {
    pub fn new(memory: MemoryBudget) -> Self {
        Self {
            index: SpatialIndex::new(),
            store: ChunkStore::new(memory),
        }
    }

    /// Node at `coord` if its epoch is still `epoch`
    pub fn live_node(&self, coord: ChunkCoord, epoch: Epoch) -> Option<&OctreeNode> {
        self.index.node_at(coord).filter(|n| n.epoch() == epoch)
    }

    /// Mutable node and the store, split-borrowed so transitions can run
    pub fn node_and_store(&mut self, coord: ChunkCoord) -> Option<(&mut OctreeNode, &mut ChunkStore)> {
        let node = self.index.node_at_mut(coord)?;
        Some((node, &mut self.store))
    }

    /// Split a leaf, dropping whatever it held.
    ///
    /// Its representations are released (queueing any GPU buffer for the
    /// integrator) and its epoch is refreshed so in-flight work goes stale.
    pub fn split(&mut self, coord: ChunkCoord) -> Result<[NodeId; 8], StructuralViolation> {
        self.index.check_splittable(coord)?;
        if let Some((node, store)) = self.node_and_store(coord) {
            store.reset(node);
        }
        self.index.split(coord)
    }

    /// Merge a split node's leaf children back into it, releasing them
    pub fn merge(&mut self, coord: ChunkCoord) -> Result<usize, StructuralViolation> {
        let removed = self.index.merge(coord)?;
        let count = removed.len();
        for node in removed {
            self.store.release(node);
        }
        Ok(count)
    }
}

/// Cloneable handle to the structure lock.
///
/// A panic while holding the lock leaves the tree between whole transitions,
/// so poisoning is recovered from rather than propagated.
#[derive(Clone, Debug)]
pub struct SharedTree(Arc<RwLock<ChunkTree>>);

impl SharedTree {
    pub fn new(tree: ChunkTree) -> Self {
        Self(Arc::new(RwLock::new(tree)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ChunkTree> {
        self.0.read().unwrap_or_else(|poisoned| {
            log::warn!("Structure lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ChunkTree> {
        self.0.write().unwrap_or_else(|poisoned| {
            log::warn!("Structure lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::index::NodeState;
    use crate::streaming::store::{CpuRepresentation, GpuRelease, GpuResidency};
    use crate::voxel::mesh::{ExtractedMesh, ExtractionStrategy};

    #[test]
    fn test_live_node_checks_epoch() {
        let shared = SharedTree::new(ChunkTree::new(MemoryBudget::new(1, 1)));
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let epoch = {
            let mut tree = shared.write();
            let id = tree.index.insert(coord).unwrap();
            tree.index.node(id).unwrap().epoch()
        };

        let tree = shared.read();
        assert!(tree.live_node(coord, epoch).is_some());
        assert!(tree.live_node(coord, Epoch::next()).is_none());
    }

    /// Drive `coord` to `UploadedGpu` with a 128-byte residency
    fn uploaded(tree: &mut ChunkTree, coord: ChunkCoord) -> Epoch {
        tree.index.insert(coord).unwrap();
        let (node, store) = tree.node_and_store(coord).unwrap();
        let epoch = node.epoch();
        assert!(store.begin_generation(node, epoch));
        let mesh = ExtractedMesh::empty(coord, ExtractionStrategy::Cubical);
        let cpu = CpuRepresentation {
            strategy: ExtractionStrategy::Cubical,
            mesh: Arc::new(mesh),
            density: None,
        };
        assert!(store.accept(node, epoch, cpu));
        let residency = GpuResidency { epoch, vertex_count: 3, index_count: 3, bytes: 128 };
        assert!(store.mark_uploaded(node, residency));
        epoch
    }

    #[test]
    fn test_split_releases_uploaded_leaf() {
        let mut tree = ChunkTree::new(MemoryBudget::new(1, 1));
        let coord = ChunkCoord::new(0, 0, 0, 1);
        let epoch = uploaded(&mut tree, coord);
        assert_eq!(tree.store.memory().gpu_used(), 128);

        tree.split(coord).unwrap();
        let node = tree.index.node_at(coord).unwrap();
        assert_eq!(node.state(), NodeState::Split);
        assert!(node.cpu().is_none() && node.gpu().is_none());
        assert_ne!(node.epoch(), epoch);
        assert_eq!(tree.store.memory().gpu_used(), 0);
        assert_eq!(tree.store.take_pending_free(), vec![GpuRelease { coord, epoch }]);
        tree.index.check_invariants().unwrap();

        assert_eq!(tree.merge(coord).unwrap(), 8);
        let node = tree.index.node_at(coord).unwrap();
        assert_eq!(node.state(), NodeState::Pending);
        assert!(node.gpu().is_none());
        tree.index.check_invariants().unwrap();
    }

    #[test]
    fn test_bare_index_split_refuses_resident_leaf() {
        let mut tree = ChunkTree::new(MemoryBudget::new(1, 1));
        let coord = ChunkCoord::new(0, 0, 0, 1);
        uploaded(&mut tree, coord);

        assert!(matches!(
            tree.index.split(coord),
            Err(StructuralViolation::SplitState { state: "resident", .. })
        ));
        assert_eq!(tree.index.node_at(coord).unwrap().state(), NodeState::UploadedGpu);
        tree.index.check_invariants().unwrap();
    }

    #[test]
    fn test_split_cancels_generating_leaf() {
        let mut tree = ChunkTree::new(MemoryBudget::new(1, 1));
        let coord = ChunkCoord::new(0, 0, 0, 1);
        tree.index.insert(coord).unwrap();
        let (node, store) = tree.node_and_store(coord).unwrap();
        let epoch = node.epoch();
        assert!(store.begin_generation(node, epoch));

        tree.split(coord).unwrap();
        assert!(tree.live_node(coord, epoch).is_none());
        assert_eq!(tree.index.node_at(coord).unwrap().state(), NodeState::Split);
        tree.index.check_invariants().unwrap();
    }

    #[test]
    fn test_failed_split_keeps_node() {
        let mut tree = ChunkTree::new(MemoryBudget::new(1, 1));
        let coord = ChunkCoord::new(0, 0, 0, 0);
        let epoch = uploaded(&mut tree, coord);

        assert!(matches!(tree.split(coord), Err(StructuralViolation::FinestLod(_))));
        let node = tree.live_node(coord, epoch).unwrap();
        assert_eq!(node.state(), NodeState::UploadedGpu);
        assert!(node.gpu().is_some());
        assert!(tree.store.take_pending_free().is_empty());
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let shared = SharedTree::new(ChunkTree::new(MemoryBudget::new(1, 1)));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.write();
            panic!("poison");
        })
        .join();

        assert!(shared.read().index.is_empty());
    }
}
