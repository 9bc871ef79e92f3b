//! State machine traits.

use crate::{Action, Event};
use std::time::Duration;

/// A deterministic, synchronous state machine.
///
/// Implementations must not perform I/O. Given the same state and the same
/// event sequence (with the same `set_time` calls) they must produce the same
/// actions.
pub trait StateMachine {
    /// Process one event and return the actions the runner should perform.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Advance the logical clock. Called by the runner before each `handle`.
    fn set_time(&mut self, now: Duration);

    /// Current logical time.
    fn now(&self) -> Duration;
}
