use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::SystemTime;

use derivative::Derivative;
use generational_arena::{Arena, Index};

/// Handle to a scheduled timeout, used to cancel it.
///
/// Ids are generational: once a timeout has been popped, its id never refers
/// to another timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(Index);

#[derive(Debug, Clone)]
struct TimeoutEvent<E> {
    deadline: SystemTime,
    event: E,
    cancelled: bool,
}

/// Heap entry, ordered on `(deadline, entry_count)` only.
#[derive(Derivative)]
#[derivative(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    deadline: SystemTime,
    entry_count: u64,
    #[derivative(PartialEq = "ignore")]
    #[derivative(PartialOrd = "ignore")]
    #[derivative(Ord = "ignore")]
    index: Index,
}

/// Pending timeouts, earliest deadline first.
///
/// Timeouts with equal deadlines come out in the order they were added.
/// Cancellation only flags an entry; cancelled entries are dropped when they
/// reach the front of the queue.
pub struct Timeouts<E> {
    entries: Arena<TimeoutEvent<E>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    counter: u64,
}

impl<E> Default for Timeouts<E> {
    fn default() -> Self {
        Timeouts {
            entries: Arena::new(),
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }
}

impl<E: Copy> Timeouts<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the queue, cancelled ones included.
    pub fn size(&self) -> usize {
        self.heap.len()
    }

    pub fn add_timeout(&mut self, deadline: SystemTime, event: E) -> TimeoutId {
        let index = self.entries.insert(TimeoutEvent {
            deadline,
            event,
            cancelled: false,
        });
        self.heap.push(Reverse(HeapEntry {
            deadline,
            entry_count: self.counter,
            index,
        }));
        self.counter += 1;
        TimeoutId(index)
    }

    /// Cancel a timeout. Unknown or already popped ids are ignored.
    pub fn cancel_timeout(&mut self, id: TimeoutId) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.cancelled = true;
        }
    }

    /// Drop the cancelled entries at the front of the queue.
    pub fn pop_earliest_cancelled_timeouts(&mut self) {
        while let Some(Reverse(front)) = self.heap.peek() {
            let cancelled = self.entries.get(front.index).map_or(true, |entry| entry.cancelled);
            if !cancelled {
                break;
            }
            self.pop_timeout();
        }
    }

    /// The earliest deadline and its event, cancelled or not.
    pub fn get_earliest_timeout(&self) -> Option<(SystemTime, E)> {
        let Reverse(front) = self.heap.peek()?;
        self.entries.get(front.index).map(|entry| (entry.deadline, entry.event))
    }

    /// Remove and return the earliest deadline and its event.
    pub fn pop_timeout(&mut self) -> Option<(SystemTime, E)> {
        let Reverse(front) = self.heap.pop()?;
        self.entries.remove(front.index).map(|entry| (entry.deadline, entry.event))
    }
}
