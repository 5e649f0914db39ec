//! Event queue and logical clock.
//!
//! Events are ordered by `(timestamp, sequence)`. The sequence number grows by
//! one on every `schedule` call, so simultaneous events come out in the order
//! they were scheduled and two runs with the same inputs dispatch identically.
//!
//! Cancellation is lazy: a cancelled event stays in the heap and is skipped
//! when it reaches the top.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::clock::SimTime;
use crate::error::{SimError, SimResult};

/// Identifies a scheduled event for later cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    sequence: u64,
    time: SimTime,
}

impl EventHandle {
    pub fn time(&self) -> SimTime {
        self.time
    }
}

struct Entry<E> {
    time: SimTime,
    sequence: u64,
    payload: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.sequence).cmp(&(other.time, other.sequence))
    }
}

pub struct Scheduler<E> {
    now: SimTime,
    next_sequence: u64,
    heap: BinaryHeap<Reverse<Entry<E>>>,
    // Sequence numbers of events that are scheduled and not cancelled.
    pending: HashSet<u64>,
    dispatched: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_sequence: 0,
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            dispatched: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `payload` to fire `delay` after the current clock.
    pub fn schedule(&mut self, delay: SimTime, payload: E) -> SimResult<EventHandle> {
        if delay.is_negative() {
            return Err(SimError::InvalidSchedule {
                requested: self.now + delay,
                now: self.now,
            });
        }
        self.schedule_at(self.now.saturating_add(delay), payload)
    }

    /// Schedule `payload` at an absolute time, which must not be in the past.
    pub fn schedule_at(&mut self, time: SimTime, payload: E) -> SimResult<EventHandle> {
        if time < self.now {
            return Err(SimError::InvalidSchedule { requested: time, now: self.now });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(Entry { time, sequence, payload }));
        self.pending.insert(sequence);
        Ok(EventHandle { sequence, time })
    }

    /// Cancel a pending event. Returns `false` if it was already cancelled or dispatched.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.sequence)
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.sequence)
    }

    /// Number of live (scheduled, not cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total number of events handed out by `pop_until`.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Pop the earliest live event with a timestamp not later than `end`,
    /// advancing the clock to its timestamp.
    pub fn pop_until(&mut self, end: SimTime) -> Option<(SimTime, E)> {
        loop {
            let top_time = self.heap.peek()?.0.time;
            if top_time > end {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if !self.pending.remove(&entry.sequence) {
                continue;
            }
            self.now = entry.time;
            self.dispatched += 1;
            return Some((entry.time, entry.payload));
        }
    }

    /// Move the clock forward without dispatching anything.
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Drop every remaining event and return how many live ones were discarded.
    pub fn clear(&mut self) -> usize {
        let live = self.pending.len();
        self.heap.clear();
        self.pending.clear();
        live
    }
}
