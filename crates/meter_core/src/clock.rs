//! Virtual-time event queue used to replay recorded rides deterministically.
//!
//! Events pop in timestamp order. At equal timestamps they pop by kind and then in
//! scheduling order, so a replay of the same trace always produces the same sequence.
//! A tick at `t` closes the second ending at `t`, so it runs before fixes and commands
//! stamped `t`; snapshots run last and see everything that happened at `t`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Milliseconds per metered clock tick.
pub const ONE_SEC_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    ClockTick,
    LocationFix,
    Command,
    SnapshotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
    /// Index into the trace for fix and command events.
    pub subject: Option<usize>,
    seq: u64,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on every key to make BinaryHeap a min-heap.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.kind.cmp(&self.kind))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct ReplayClock {
    now: u64,
    next_seq: u64,
    events: BinaryHeap<Event>,
}

impl ReplayClock {
    /// A clock whose current time is `start_ms`.
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now: start_ms,
            ..Self::default()
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule at an absolute timestamp. Times in the past are clamped to now.
    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind, subject: Option<usize>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Event {
            timestamp: timestamp.max(self.now),
            kind,
            subject,
            seq,
        });
    }

    /// Schedule `delay_ms` after the current time.
    pub fn schedule_in(&mut self, delay_ms: u64, kind: EventKind, subject: Option<usize>) {
        self.schedule_at(self.now.saturating_add(delay_ms), kind, subject);
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|event| event.timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.events.len()
    }
}
