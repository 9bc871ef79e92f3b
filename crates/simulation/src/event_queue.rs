//! Ordering key for the global event queue.

use crate::NodeIndex;
use favo_core::{Event, EventPriority};
use std::time::Duration;

/// Key for an event in the simulation queue.
///
/// Events are ordered by time, then priority, then target node, then
/// insertion sequence. The sequence number makes every key unique and keeps
/// same-time events in the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node_index: NodeIndex,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, event: &Event, node_index: NodeIndex, sequence: u64) -> Self {
        Self {
            time,
            priority: event.priority(),
            node_index,
            sequence,
        }
    }
}
