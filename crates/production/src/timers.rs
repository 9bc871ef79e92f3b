//! Timer management for production runner.
//!
//! Timers are tokio tasks that sleep and then report back on a dedicated
//! channel. Every `set_timer` bumps a generation number; a fire whose
//! generation no longer matches was superseded while it sat in the channel
//! and is discarded by [`TimerManager::take_fired`].

use favo_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// A timer task woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    pub generation: u64,
}

/// Manages timers for the production runner.
pub struct TimerManager {
    /// Active timers (id -> generation, task handle).
    timers: HashMap<TimerId, (u64, JoinHandle<()>)>,
    next_generation: u64,
    fired_tx: mpsc::Sender<TimerFired>,
}

impl TimerManager {
    pub fn new(fired_tx: mpsc::Sender<TimerFired>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            fired_tx,
        }
    }

    /// Set a timer that will fire after the given duration.
    ///
    /// If a timer with the same ID already exists, it is cancelled first.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        self.next_generation += 1;
        let generation = self.next_generation;
        let fired_tx = self.fired_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, generation, "Timer fired");
            let _ = fired_tx.send(TimerFired { id, generation }).await;
        });

        self.timers.insert(id, (generation, handle));
        debug!(?id, ?duration, generation, "Timer set");
    }

    /// Cancel a timer. No-op if it doesn't exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some((generation, handle)) = self.timers.remove(&id) {
            handle.abort();
            debug!(?id, generation, "Timer cancelled");
        }
    }

    /// Turn a fire notification into its event, unless the timer was
    /// replaced or cancelled after the task woke up.
    pub fn take_fired(&mut self, fired: TimerFired) -> Option<Event> {
        match self.timers.get(&fired.id) {
            Some((generation, _)) if *generation == fired.generation => {
                self.timers.remove(&fired.id);
                Some(fired.id.event())
            }
            _ => {
                trace!(id = ?fired.id, generation = fired.generation, "Stale timer fire discarded");
                None
            }
        }
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (id, (_, handle)) in self.timers.drain() {
            handle.abort();
            trace!(?id, "Timer cancelled (shutdown)");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("active", &self.timers.len())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_fire(rx: &mut mpsc::Receiver<TimerFired>, within: Duration) -> TimerFired {
        tokio::time::timeout(within, rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_timer_fires() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Proposal, Duration::from_millis(10));

        let fired = next_fire(&mut rx, Duration::from_millis(200)).await;
        assert_eq!(fired.id, TimerId::Proposal);
        assert!(matches!(manager.take_fired(fired), Some(Event::ProposalTimer)));
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_timer_cancel() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Round, Duration::from_millis(50));
        manager.cancel_timer(TimerId::Round);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "Timer should have been cancelled");
    }

    #[tokio::test]
    async fn test_timer_replace() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Round, Duration::from_millis(100));
        manager.set_timer(TimerId::Round, Duration::from_millis(10));

        let fired = next_fire(&mut rx, Duration::from_millis(60)).await;
        assert!(matches!(manager.take_fired(fired), Some(Event::RoundTimeout)));
    }

    #[tokio::test]
    async fn test_superseded_fire_is_discarded() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Round, Duration::from_millis(5));
        let stale = next_fire(&mut rx, Duration::from_millis(200)).await;

        // Re-armed before the runner got to the first fire.
        manager.set_timer(TimerId::Round, Duration::from_secs(60));
        assert!(manager.take_fired(stale).is_none());
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_timers() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Proposal, Duration::from_millis(10));
        manager.set_timer(TimerId::Round, Duration::from_millis(20));
        assert_eq!(manager.active_count(), 2);

        let first = next_fire(&mut rx, Duration::from_millis(200)).await;
        let second = next_fire(&mut rx, Duration::from_millis(200)).await;
        assert_ne!(first.id, second.id);
        assert!(manager.take_fired(first).is_some());
        assert!(manager.take_fired(second).is_some());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Proposal, Duration::from_millis(50));
        manager.set_timer(TimerId::Round, Duration::from_millis(50));
        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "All timers should have been cancelled");
    }
}
