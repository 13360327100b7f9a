//! Bounded priority queue of generation requests
//!
//! One entry per coordinate. Re-offering a queued coordinate updates it in
//! place. When the queue is full the lowest-priority entry makes room for a
//! higher-priority one; a request that would itself be the lowest is
//! rejected. Coordinates extracted recently are held back until the throttle
//! interval has passed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::index::Epoch;
use crate::voxel::coord::ChunkCoord;

/// A request to generate one chunk
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingRequest {
    pub coord: ChunkCoord,
    pub priority: f32, // Higher = more important
    pub epoch: Epoch,
    /// Earliest time a worker may start it
    pub not_before: Option<Instant>,
}

impl PendingRequest {
    pub fn new(coord: ChunkCoord, priority: f32, epoch: Epoch) -> Self {
        Self { coord, priority, epoch, not_before: None }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }

    /// Higher priority first; ties go to the smaller coordinate
    fn rank(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.coord.cmp(&self.coord))
    }
}

/// What happened to a pushed request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Already queued; priority and epoch refreshed
    Updated,
    /// Queued after evicting the lowest-priority entry
    DroppedLowest(ChunkCoord),
    /// Queue full and the request ranked lowest
    Rejected,
    Closed,
}

/// Request queue shared by the watcher and the generator workers
#[derive(Debug)]
pub struct RequestQueue {
    entries: HashMap<ChunkCoord, PendingRequest>,
    max_depth: usize,
    min_interval: Duration,
    last_started: HashMap<ChunkCoord, Instant>,
    closed: bool,
}

impl RequestQueue {
    pub fn new(max_depth: usize, min_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_depth: max_depth.max(1),
            min_interval,
            last_started: HashMap::new(),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.entries.contains_key(&coord)
    }

    pub fn get(&self, coord: ChunkCoord) -> Option<&PendingRequest> {
        self.entries.get(&coord)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting requests and discard queued ones
    pub fn close(&mut self) {
        self.closed = true;
        self.entries.clear();
    }

    fn throttle_until(&self, coord: ChunkCoord) -> Option<Instant> {
        self.last_started.get(&coord).map(|t| *t + self.min_interval)
    }

    /// Offer a request. Never blocks.
    pub fn push(&mut self, mut request: PendingRequest, now: Instant) -> PushOutcome {
        if self.closed {
            return PushOutcome::Closed;
        }
        request.not_before = match (request.not_before, self.throttle_until(request.coord)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
        .filter(|t| *t > now);

        if let Some(existing) = self.entries.get_mut(&request.coord) {
            existing.priority = request.priority;
            existing.epoch = request.epoch;
            existing.not_before = request.not_before;
            return PushOutcome::Updated;
        }

        if self.entries.len() < self.max_depth {
            self.entries.insert(request.coord, request);
            return PushOutcome::Queued;
        }

        let Some(lowest) = self
            .entries
            .values()
            .min_by(|a, b| a.rank(b))
            .copied()
        else {
            return PushOutcome::Rejected;
        };
        if request.rank(&lowest) != Ordering::Greater {
            return PushOutcome::Rejected;
        }
        self.entries.remove(&lowest.coord);
        self.entries.insert(request.coord, request);
        PushOutcome::DroppedLowest(lowest.coord)
    }

    /// Take the highest-priority request whose throttle has expired
    pub fn pop_ready(&mut self, now: Instant) -> Option<PendingRequest> {
        let best = self
            .entries
            .values()
            .filter(|r| r.is_ready(now))
            .max_by(|a, b| a.rank(b))
            .map(|r| r.coord)?;
        self.entries.remove(&best)
    }

    /// Record that a worker claimed `coord`, starting its throttle window
    pub fn mark_started(&mut self, coord: ChunkCoord, now: Instant) {
        self.last_started.insert(coord, now);
        if self.last_started.len() > self.max_depth * 4 {
            let interval = self.min_interval;
            self.last_started.retain(|_, t| now.duration_since(*t) < interval);
        }
    }

    /// Earliest time a currently throttled request becomes ready
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.entries.values().filter_map(|r| r.not_before).min()
    }

    pub fn remove(&mut self, coord: ChunkCoord) -> Option<PendingRequest> {
        self.entries.remove(&coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(x: i32, priority: f32) -> PendingRequest {
        PendingRequest::new(ChunkCoord::new(x, 0, 0, 0), priority, Epoch::next())
    }

    #[test]
    fn test_pops_highest_priority() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::ZERO);
        queue.push(req(0, 0.1), now);
        queue.push(req(1, 0.9), now);
        queue.push(req(2, 0.5), now);

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop_ready(now))
            .map(|r| r.coord.x)
            .collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_push_updates_in_place() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::ZERO);
        let first = req(0, 0.1);
        queue.push(first, now);

        let mut second = req(0, 0.7);
        second.epoch = Epoch::next();
        assert_eq!(queue.push(second, now), PushOutcome::Updated);
        assert_eq!(queue.len(), 1);
        let popped = queue.pop_ready(now).unwrap();
        assert_eq!(popped.priority, 0.7);
        assert_eq!(popped.epoch, second.epoch);
    }

    #[test]
    fn test_full_queue_drops_lowest() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(2, Duration::ZERO);
        queue.push(req(0, 0.2), now);
        queue.push(req(1, 0.5), now);

        assert_eq!(
            queue.push(req(2, 0.9), now),
            PushOutcome::DroppedLowest(ChunkCoord::new(0, 0, 0, 0))
        );
        assert_eq!(queue.push(req(3, 0.1), now), PushOutcome::Rejected);
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(ChunkCoord::new(2, 0, 0, 0)));
        assert!(queue.contains(ChunkCoord::new(1, 0, 0, 0)));
    }

    #[test]
    fn test_throttle_defers_recent_coordinates() {
        let now = Instant::now();
        let interval = Duration::from_millis(250);
        let mut queue = RequestQueue::new(8, interval);
        queue.push(req(0, 0.5), now);
        let started = queue.pop_ready(now).unwrap();
        queue.mark_started(started.coord, now);

        // Offered again right away: queued but not ready
        assert_eq!(queue.push(req(0, 0.5), now), PushOutcome::Queued);
        assert!(queue.pop_ready(now).is_none());
        assert_eq!(queue.next_ready_at(), Some(now + interval));
        assert!(queue.pop_ready(now + interval).is_some());
    }

    #[test]
    fn test_unclaimed_pop_does_not_throttle() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(1));
        queue.push(req(0, 0.5), now);
        assert!(queue.pop_ready(now).is_some());

        queue.push(req(0, 0.5), now);
        assert_eq!(queue.next_ready_at(), None);
        assert_eq!(queue.pop_ready(now).unwrap().coord.x, 0);
    }

    #[test]
    fn test_throttled_entry_does_not_block_others() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::from_secs(1));
        queue.push(req(0, 0.9), now);
        queue.pop_ready(now);
        queue.mark_started(ChunkCoord::new(0, 0, 0, 0), now);
        queue.push(req(0, 0.9), now);
        queue.push(req(1, 0.1), now);

        assert_eq!(queue.pop_ready(now).unwrap().coord.x, 1);
    }

    #[test]
    fn test_closed_queue_refuses() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(8, Duration::ZERO);
        queue.push(req(0, 0.5), now);
        queue.close();
        assert!(queue.is_empty());
        assert_eq!(queue.push(req(1, 0.5), now), PushOutcome::Closed);
        assert!(queue.pop_ready(now).is_none());
    }
}
