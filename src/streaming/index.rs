//! Spatial index of chunk nodes
//!
//! An octree stored as an arena: nodes are addressed by [`NodeId`], children
//! are fixed arrays of ids and the parent link is a plain id that does not own
//! anything. Roots are coarsest-LOD chunks with no parent; the index keeps them
//! in an ordered set so traversal order is stable from frame to frame.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::StructuralViolation;
use crate::voxel::coord::ChunkCoord;

use super::store::{CpuRepresentation, GpuResidency};

/// Deepest LOD the index walks when checking ancestors
pub const MAX_LOD: u8 = 16;

/// Generation stamp for a node's current request.
///
/// Drawn from a process-wide counter, so a coordinate that is evicted and
/// created again never sees an epoch it had before.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

impl Epoch {
    pub fn next() -> Self {
        Self(NEXT_EPOCH.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Arena slot of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Lifecycle state of a node present in the index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Waiting for a generator worker
    Pending,
    /// A worker is sampling and extracting it
    Generating,
    /// Mesh is on the CPU, not yet on the device
    ReadyCpu,
    /// Mesh is uploaded and drawable
    UploadedGpu,
    /// Interior node; its children are drawn instead
    Split,
}

impl NodeState {
    pub fn name(self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Generating => "generating",
            NodeState::ReadyCpu => "ready-cpu",
            NodeState::UploadedGpu => "uploaded-gpu",
            NodeState::Split => "split",
        }
    }
}

/// One chunk in the octree
#[derive(Debug)]
pub struct OctreeNode {
    coord: ChunkCoord,
    pub(crate) state: NodeState,
    pub(crate) epoch: Epoch,
    parent: Option<NodeId>,
    children: Option<[NodeId; 8]>,
    pub(crate) cpu: Option<CpuRepresentation>,
    pub(crate) gpu: Option<GpuResidency>,
}

impl OctreeNode {
    fn new(coord: ChunkCoord, parent: Option<NodeId>) -> Self {
        Self {
            coord,
            state: NodeState::Pending,
            epoch: Epoch::next(),
            parent,
            children: None,
            cpu: None,
            gpu: None,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<&[NodeId; 8]> {
        self.children.as_ref()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn cpu(&self) -> Option<&CpuRepresentation> {
        self.cpu.as_ref()
    }

    pub fn gpu(&self) -> Option<&GpuResidency> {
        self.gpu.as_ref()
    }
}

/// Octree of chunk nodes keyed by coordinate
#[derive(Debug, Default)]
pub struct SpatialIndex {
    slots: Vec<Option<OctreeNode>>,
    free: Vec<u32>,
    by_coord: HashMap<ChunkCoord, NodeId>,
    roots: BTreeSet<ChunkCoord>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes, interior ones included
    pub fn len(&self) -> usize {
        self.by_coord.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_coord.is_empty()
    }

    pub fn id_of(&self, coord: ChunkCoord) -> Option<NodeId> {
        self.by_coord.get(&coord).copied()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.by_coord.contains_key(&coord)
    }

    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut OctreeNode> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Node at a coordinate, or `None` when absent
    pub fn node_at(&self, coord: ChunkCoord) -> Option<&OctreeNode> {
        self.id_of(coord).and_then(|id| self.node(id))
    }

    pub fn node_at_mut(&mut self, coord: ChunkCoord) -> Option<&mut OctreeNode> {
        let id = self.id_of(coord)?;
        self.node_mut(id)
    }

    /// Root coordinates in ascending order
    pub fn roots(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.roots.iter().copied()
    }

    pub fn is_root(&self, coord: ChunkCoord) -> bool {
        self.roots.contains(&coord)
    }

    /// Coordinates of a node's children, if it is split
    pub fn children_of(&self, coord: ChunkCoord) -> Option<[ChunkCoord; 8]> {
        let node = self.node_at(coord)?;
        let children = node.children()?;
        let mut out = [coord; 8];
        for (slot, id) in out.iter_mut().zip(children) {
            *slot = self.node(*id)?.coord;
        }
        Some(out)
    }

    pub fn parent_of(&self, coord: ChunkCoord) -> Option<ChunkCoord> {
        let parent = self.node_at(coord)?.parent?;
        self.node(parent).map(|n| n.coord)
    }

    fn alloc(&mut self, node: OctreeNode) -> NodeId {
        let coord = node.coord;
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId((self.slots.len() - 1) as u32)
            }
        };
        self.by_coord.insert(coord, id);
        id
    }

    fn dealloc(&mut self, id: NodeId) -> Option<OctreeNode> {
        let node = self.slots.get_mut(id.0 as usize)?.take()?;
        self.by_coord.remove(&node.coord);
        self.free.push(id.0);
        Some(node)
    }

    /// Insert a root node in `Pending`.
    ///
    /// Returns the existing node's id if the coordinate is already present.
    /// Fails when any ancestor exists, since that ancestor already covers the
    /// volume.
    pub fn insert(&mut self, coord: ChunkCoord) -> Result<NodeId, StructuralViolation> {
        if let Some(id) = self.id_of(coord) {
            return Ok(id);
        }
        let mut ancestor = coord;
        while ancestor.lod < MAX_LOD {
            ancestor = ancestor.parent();
            if self.contains(ancestor) {
                return Err(StructuralViolation::ParentPresent(coord, ancestor));
            }
        }
        let id = self.alloc(OctreeNode::new(coord, None));
        self.roots.insert(coord);
        Ok(id)
    }

    /// Remove a root and its whole subtree.
    ///
    /// Children of split nodes leave only through [`SpatialIndex::merge`].
    /// Returns the removed nodes, deepest first, so their resources can be
    /// released.
    pub fn remove(&mut self, coord: ChunkCoord) -> Result<Vec<OctreeNode>, StructuralViolation> {
        let id = self.id_of(coord).ok_or(StructuralViolation::Missing(coord))?;
        if let Some(parent) = self.parent_of(coord) {
            return Err(StructuralViolation::ChildOfSplit(coord, parent));
        }
        let mut removed = Vec::new();
        self.remove_subtree(id, &mut removed);
        self.roots.remove(&coord);
        Ok(removed)
    }

    fn remove_subtree(&mut self, id: NodeId, removed: &mut Vec<OctreeNode>) {
        let children = self.node(id).and_then(|n| n.children);
        if let Some(children) = children {
            for child in children {
                self.remove_subtree(child, removed);
            }
        }
        if let Some(node) = self.dealloc(id) {
            removed.push(node);
        }
    }

    /// Check that `coord` is a leaf with room for eight children.
    ///
    /// Lifecycle state is not checked here; see [`SpatialIndex::split`].
    pub fn check_splittable(&self, coord: ChunkCoord) -> Result<NodeId, StructuralViolation> {
        let id = self.id_of(coord).ok_or(StructuralViolation::Missing(coord))?;
        let node = self.node(id).ok_or(StructuralViolation::Missing(coord))?;
        let child_coords = coord.children().ok_or(StructuralViolation::FinestLod(coord))?;
        if !node.is_leaf() {
            return Err(StructuralViolation::SplitState { coord, state: node.state.name() });
        }
        if let Some(existing) = child_coords.iter().find(|c| self.contains(**c)) {
            return Err(StructuralViolation::Corrupt(format!(
                "child {existing} of leaf {coord} already exists"
            )));
        }
        Ok(id)
    }

    /// Split a leaf into eight `Pending` children and mark it `Split`.
    ///
    /// Only `Pending` or `UploadedGpu` leaves qualify, and the leaf must no
    /// longer hold a CPU or GPU representation. Release them through the store
    /// first, or use [`ChunkTree::split`] which does both.
    ///
    /// [`ChunkTree::split`]: super::shared::ChunkTree::split
    pub fn split(&mut self, coord: ChunkCoord) -> Result<[NodeId; 8], StructuralViolation> {
        let id = self.check_splittable(coord)?;
        let node = self.node(id).ok_or(StructuralViolation::Missing(coord))?;
        if !matches!(node.state, NodeState::Pending | NodeState::UploadedGpu) {
            return Err(StructuralViolation::SplitState { coord, state: node.state.name() });
        }
        if node.cpu.is_some() || node.gpu.is_some() {
            return Err(StructuralViolation::SplitState { coord, state: "resident" });
        }
        let child_coords = coord.children().ok_or(StructuralViolation::FinestLod(coord))?;

        let mut children = [id; 8];
        for (slot, child) in children.iter_mut().zip(child_coords) {
            *slot = self.alloc(OctreeNode::new(child, Some(id)));
        }
        let node = self.node_mut(id).ok_or(StructuralViolation::Missing(coord))?;
        node.children = Some(children);
        node.state = NodeState::Split;
        Ok(children)
    }

    /// Collapse a split node whose children are all leaves that are not
    /// generating. The node becomes a `Pending` leaf with a fresh epoch.
    ///
    /// Returns the removed children.
    pub fn merge(&mut self, coord: ChunkCoord) -> Result<Vec<OctreeNode>, StructuralViolation> {
        let id = self.id_of(coord).ok_or(StructuralViolation::Missing(coord))?;
        let node = self.node(id).ok_or(StructuralViolation::Missing(coord))?;
        let children = match (node.state, node.children) {
            (NodeState::Split, Some(children)) => children,
            (state, _) => {
                return Err(StructuralViolation::MergeState { coord, state: state.name() });
            }
        };
        for child in children {
            let c = self
                .node(child)
                .ok_or_else(|| StructuralViolation::Corrupt(format!("dangling child of {coord}")))?;
            if !c.is_leaf() || matches!(c.state, NodeState::Generating | NodeState::Split) {
                return Err(StructuralViolation::MergeChild {
                    parent: coord,
                    child: c.coord,
                    state: c.state.name(),
                });
            }
        }

        let removed: Vec<OctreeNode> = children
            .iter()
            .filter_map(|child| self.dealloc(*child))
            .collect();
        let node = self.node_mut(id).ok_or(StructuralViolation::Missing(coord))?;
        node.children = None;
        node.state = NodeState::Pending;
        node.epoch = Epoch::next();
        Ok(removed)
    }

    /// Leaves in traversal order: roots ascending, children by octant
    pub fn leaves(&self) -> Vec<&OctreeNode> {
        let mut out = Vec::new();
        for root in &self.roots {
            if let Some(id) = self.id_of(*root) {
                self.collect_leaves(id, &mut out);
            }
        }
        out
    }

    fn collect_leaves<'a>(&'a self, id: NodeId, out: &mut Vec<&'a OctreeNode>) {
        let Some(node) = self.node(id) else {
            return;
        };
        match node.children {
            Some(children) => {
                for child in children {
                    self.collect_leaves(child, out);
                }
            }
            None => out.push(node),
        }
    }

    /// Leaf coordinates in traversal order
    pub fn leaf_coords(&self) -> Vec<ChunkCoord> {
        self.leaves().iter().map(|n| n.coord).collect()
    }

    /// Every node, in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = &OctreeNode> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Verify the structural invariants of the whole tree
    pub fn check_invariants(&self) -> Result<(), StructuralViolation> {
        let corrupt = |msg: String| Err(StructuralViolation::Corrupt(msg));

        for (coord, id) in &self.by_coord {
            let Some(node) = self.node(*id) else {
                return corrupt(format!("{coord} maps to an empty slot"));
            };
            if node.coord != *coord {
                return corrupt(format!("{coord} maps to node {}", node.coord));
            }
            if (node.state == NodeState::Split) != node.children.is_some() {
                return corrupt(format!("{coord} is {} with children={}", node.state.name(), node.children.is_some()));
            }
            if (node.state == NodeState::UploadedGpu) != node.gpu.is_some() {
                return corrupt(format!("{coord} is {} with gpu={}", node.state.name(), node.gpu.is_some()));
            }
            let holds_cpu = matches!(node.state, NodeState::ReadyCpu | NodeState::UploadedGpu);
            if node.cpu.is_some() && !holds_cpu {
                return corrupt(format!("{coord} is {} with a cpu representation", node.state.name()));
            }
            match node.parent {
                None if !self.roots.contains(coord) => {
                    return corrupt(format!("{coord} has no parent and is not a root"));
                }
                Some(parent) => {
                    let Some(p) = self.node(parent) else {
                        return corrupt(format!("{coord} has a dangling parent"));
                    };
                    if p.coord != coord.parent() {
                        return corrupt(format!("{coord} is a child of {}", p.coord));
                    }
                    if !p.children.is_some_and(|c| c[coord.octant_in_parent()] == *id) {
                        return corrupt(format!("{} does not list {coord} as a child", p.coord));
                    }
                }
                None => {}
            }
            if let Some(children) = node.children {
                for (octant, child) in children.iter().enumerate() {
                    let Some(c) = self.node(*child) else {
                        return corrupt(format!("{coord} has a dangling child"));
                    };
                    if Some(c.coord) != coord.child(octant) {
                        return corrupt(format!("{coord} octant {octant} holds {}", c.coord));
                    }
                }
            }
        }
        for root in &self.roots {
            if !self.by_coord.contains_key(root) {
                return corrupt(format!("root {root} is missing"));
            }
        }
        Ok(())
    }
}
