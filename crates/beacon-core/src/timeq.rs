//! One-shot timer queue driving the engine.
//!
//! Timers are keyed by an opaque [`TimerHandle`]. Cancelling a handle removes
//! it from the live table immediately; the heap slot is skipped when it
//! surfaces, so a cancelled timer can never fire.
//!
//! Events due at the same instant fire in priority order (announcement steps
//! before group recomputations) and then in scheduling order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::announce::AnnouncementId;
use crate::group::GroupId;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

/// What a timer fires into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    /// Next step of an announcement state machine.
    Announcement(AnnouncementId),
    /// Deferred recomputation of a group's aggregate state.
    GroupRecompute(GroupId),
}

impl TimerTarget {
    fn priority(&self) -> u8 {
        match self {
            TimerTarget::Announcement(_) => 0,
            TimerTarget::GroupRecompute(_) => 1,
        }
    }
}

/// Heap compaction kicks in once cancelled slots outnumber live ones by this
/// factor.
const COMPACT_FACTOR: usize = 4;
const COMPACT_MIN: usize = 64;

/// Min-heap of deadlines with O(1) cancellation.
#[derive(Debug, Default)]
pub struct TimeEventQueue {
    heap: BinaryHeap<Reverse<(Instant, u8, TimerHandle)>>,
    live: HashMap<TimerHandle, TimerTarget>,
    next: u64,
}

impl TimeEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `target` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, target: TimerTarget) -> TimerHandle {
        self.next += 1;
        let handle = TimerHandle(self.next);
        self.heap
            .push(Reverse((deadline, target.priority(), handle)));
        self.live.insert(handle, target);
        handle
    }

    /// Cancel a timer. Returns whether it was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.live.remove(&handle).is_some();
        if removed {
            self.maybe_compact();
        }
        removed
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.live.contains_key(&handle)
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_cancelled_head();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Pop the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, TimerTarget)> {
        self.drop_cancelled_head();
        let Reverse((deadline, _, handle)) = *self.heap.peek()?;
        if deadline > now {
            return None;
        }
        self.heap.pop();
        let target = self.live.remove(&handle)?;
        Some((handle, target))
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn drop_cancelled_head(&mut self) {
        while let Some(Reverse((_, _, handle))) = self.heap.peek() {
            if self.live.contains_key(handle) {
                break;
            }
            self.heap.pop();
        }
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() > COMPACT_MIN && self.heap.len() > COMPACT_FACTOR * self.live.len() {
            let live = &self.live;
            self.heap
                .retain(|Reverse((_, _, handle))| live.contains_key(handle));
        }
    }
}
