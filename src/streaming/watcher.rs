//! Viewpoint watcher
//!
//! Once per simulation tick the watcher works out which chunks should exist
//! around the viewpoint and brings the index in line in a single pass under
//! the structure lock: far roots are evicted, new roots inserted, leaves split
//! and subtrees merged by the distance rule in [`LodConfig`]. Requests for
//! every pending leaf are handed to the generator after the lock is released.

use std::collections::BTreeSet;

use super::generator::Generator;
use super::index::{NodeState, SpatialIndex};
use super::lod::LodConfig;
use super::priority::PendingRequest;
use super::shared::{ChunkTree, SharedTree};
use crate::core::error::report_violation;
use crate::core::types::DVec3;
use crate::render::ViewpointSource;
use crate::voxel::coord::ChunkCoord;

/// Coordinates that should exist for a viewpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResidentSet {
    /// Drawable chunks
    pub leaves: BTreeSet<ChunkCoord>,
    /// Split nodes above them
    pub interior: BTreeSet<ChunkCoord>,
}

impl ResidentSet {
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.leaves.contains(&coord) || self.interior.contains(&coord)
    }

    pub fn len(&self) -> usize {
        self.leaves.len() + self.interior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.interior.is_empty()
    }
}

/// What one tick changed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub roots_added: usize,
    pub roots_evicted: usize,
    pub splits: usize,
    pub merges: usize,
    /// Nodes removed from the index, subtrees included
    pub nodes_released: usize,
    pub requests_issued: usize,
    pub requests_accepted: usize,
    pub leaves: usize,
    pub nodes: usize,
    pub violations: usize,
}

impl TickReport {
    /// True when the tick changed the tree's shape
    pub fn changed_structure(&self) -> bool {
        self.roots_added + self.roots_evicted + self.splits + self.merges > 0
    }
}

/// Diffs the ideal resident set against the index each tick
#[derive(Debug)]
pub struct Watcher {
    lod: LodConfig,
    stopped: bool,
    ticks: u64,
}

impl Watcher {
    pub fn new(lod: LodConfig) -> Self {
        Self { lod, stopped: false, ticks: 0 }
    }

    pub fn lod(&self) -> &LodConfig {
        &self.lod
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Refuse further ticks
    pub fn stop(&mut self) {
        if !self.stopped {
            log::info!("Watcher stopped after {} ticks", self.ticks);
        }
        self.stopped = true;
    }

    /// Ideal resident set for a viewpoint given the index's current shape.
    ///
    /// The current shape only matters for hysteresis: resident roots and split
    /// nodes get the wider retention band.
    pub fn ideal_set(&self, viewpoint: DVec3, index: &SpatialIndex) -> ResidentSet {
        let mut set = ResidentSet::default();
        for root in self.lod.candidate_roots(viewpoint) {
            if self.lod.keeps_root(root, viewpoint, index.is_root(root)) {
                self.ideal_subtree(root, viewpoint, index, &mut set);
            }
        }
        set
    }

    fn ideal_subtree(&self, coord: ChunkCoord, viewpoint: DVec3, index: &SpatialIndex, set: &mut ResidentSet) {
        let split_now = index
            .node_at(coord)
            .is_some_and(|n| n.state() == NodeState::Split);
        let children = coord
            .children()
            .filter(|_| self.lod.should_be_split(coord, viewpoint, split_now));
        match children {
            Some(children) => {
                set.interior.insert(coord);
                for child in children {
                    self.ideal_subtree(child, viewpoint, index, set);
                }
            }
            None => {
                set.leaves.insert(coord);
            }
        }
    }

    /// Bring the tree in line with the ideal set for `viewpoint`.
    ///
    /// Returns the tick report and a request for every pending leaf, highest
    /// priority first.
    pub fn apply(&self, viewpoint: DVec3, tree: &mut ChunkTree) -> (TickReport, Vec<PendingRequest>) {
        let mut report = TickReport::default();

        let roots: Vec<ChunkCoord> = tree.index.roots().collect();
        for root in roots {
            if self.lod.keeps_root(root, viewpoint, true) {
                continue;
            }
            match tree.index.remove(root) {
                Ok(removed) => {
                    report.roots_evicted += 1;
                    report.nodes_released += removed.len();
                    for node in removed {
                        log::trace!("Evicted {} ({})", node.coord(), node.state().name());
                        tree.store.release(node);
                    }
                }
                Err(violation) => {
                    report_violation(&violation);
                    report.violations += 1;
                }
            }
        }

        for root in self.lod.candidate_roots(viewpoint) {
            if tree.index.is_root(root) || !self.lod.keeps_root(root, viewpoint, false) {
                continue;
            }
            match tree.index.insert(root) {
                Ok(_) => report.roots_added += 1,
                Err(violation) => {
                    report_violation(&violation);
                    report.violations += 1;
                }
            }
        }

        let roots: Vec<ChunkCoord> = tree.index.roots().collect();
        for root in roots {
            self.reconcile(root, viewpoint, tree, &mut report);
        }

        let leaves = tree.index.leaves();
        let mut requests: Vec<PendingRequest> = leaves
            .iter()
            .filter(|n| n.state() == NodeState::Pending)
            .map(|n| PendingRequest::new(n.coord(), self.lod.priority(n.coord(), viewpoint), n.epoch()))
            .collect();
        requests.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        report.leaves = leaves.len();
        report.nodes = tree.index.len();
        report.requests_issued = requests.len();
        (report, requests)
    }

    fn reconcile(&self, coord: ChunkCoord, viewpoint: DVec3, tree: &mut ChunkTree, report: &mut TickReport) {
        let Some(node) = tree.index.node_at(coord) else {
            return;
        };
        let split_now = node.state() == NodeState::Split;
        let want_split =
            coord.children().is_some() && self.lod.should_be_split(coord, viewpoint, split_now);

        match (split_now, want_split) {
            (false, true) => {
                if self.split(coord, tree, report) {
                    for child in coord.children().into_iter().flatten() {
                        self.reconcile(child, viewpoint, tree, report);
                    }
                }
            }
            (true, true) => {
                for child in coord.children().into_iter().flatten() {
                    self.reconcile(child, viewpoint, tree, report);
                }
            }
            (true, false) => self.collapse(coord, tree, report),
            (false, false) => {}
        }
    }

    /// Split a leaf, cancelling whatever it held or was generating
    fn split(&self, coord: ChunkCoord, tree: &mut ChunkTree, report: &mut TickReport) -> bool {
        match tree.split(coord) {
            Ok(_) => {
                log::trace!("Split {}", coord);
                report.splits += 1;
                true
            }
            Err(violation) => {
                report_violation(&violation);
                report.violations += 1;
                false
            }
        }
    }

    /// Merge a subtree back into `coord`, deepest levels first
    fn collapse(&self, coord: ChunkCoord, tree: &mut ChunkTree, report: &mut TickReport) {
        let Some(children) = tree.index.children_of(coord) else {
            return;
        };
        for child in children {
            let state = tree.index.node_at(child).map(|n| n.state());
            match state {
                Some(NodeState::Split) => self.collapse(child, tree, report),
                Some(NodeState::Generating) => {
                    if let Some((node, store)) = tree.node_and_store(child) {
                        store.reset(node);
                    }
                }
                _ => {}
            }
        }

        match tree.index.merge(coord) {
            Ok(removed) => {
                log::trace!("Merged {}", coord);
                report.merges += 1;
                report.nodes_released += removed.len();
                for node in removed {
                    tree.store.release(node);
                }
            }
            Err(violation) => {
                report_violation(&violation);
                report.violations += 1;
            }
        }
    }

    /// One watcher pass: read the viewpoint, update the tree, then offer
    /// requests to the generator outside the structure lock.
    pub fn tick(
        &mut self,
        source: &dyn ViewpointSource,
        tree: &SharedTree,
        generator: &Generator,
    ) -> TickReport {
        if self.stopped {
            log::debug!("Ignoring tick on stopped watcher");
            return TickReport::default();
        }
        let viewpoint = source.viewpoint_pose().position;

        let (mut report, requests) = {
            let mut guard = tree.write();
            self.apply(viewpoint, &mut guard)
        };
        report.requests_accepted = generator.enqueue(requests);
        self.ticks += 1;

        if report.changed_structure() {
            log::debug!(
                "Tick {}: +{} roots, -{} roots, {} splits, {} merges, {} leaves",
                self.ticks,
                report.roots_added,
                report.roots_evicted,
                report.splits,
                report.merges,
                report.leaves
            );
        }
        report
    }
}
