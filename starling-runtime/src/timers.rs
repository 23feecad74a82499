//! Timer facility for the consensus server.
//!
//! Election and heartbeat timers are tokio tasks that sleep and then
//! enqueue the matching event; they never invoke handler code directly.
//! Setting a timer that is already armed cancels the pending fire first,
//! so a reset is cancel-then-arm.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::server::Event;

/// The two timers a replica runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Randomized election timeout; armed while not leader.
    Election,
    /// Fixed heartbeat interval; armed while leader.
    Heartbeat,
}

impl TimerKind {
    const fn event(self) -> Event {
        match self {
            Self::Election => Event::ElectionTimeout,
            Self::Heartbeat => Event::HeartbeatTimeout,
        }
    }
}

/// Manages the consensus timers.
///
/// Each armed timer is a tokio task that sleeps for the specified
/// duration and then sends the corresponding timer event to the event
/// channel.
pub struct TimerManager {
    /// Armed timers (kind -> task handle).
    timers: HashMap<TimerKind, JoinHandle<()>>,
    /// Event sender for timer fires.
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    /// Creates a new timer manager.
    #[must_use]
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arms a timer to fire after the given duration.
    ///
    /// If the timer is already armed, the pending fire is cancelled first.
    pub fn set_timer(&mut self, kind: TimerKind, duration: Duration) {
        self.cancel_timer(kind);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?kind, "timer fired");
            // A closed channel means the server is shutting down.
            let _ = event_tx.send(kind.event()).await;
        });

        self.timers.insert(kind, handle);
        trace!(?kind, ?duration, "timer armed");
    }

    /// Cancels a timer.
    ///
    /// If the timer is not armed or has already fired, this is a no-op.
    pub fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(handle) = self.timers.remove(&kind) {
            handle.abort();
            trace!(?kind, "timer cancelled");
        }
    }

    /// Cancels all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    /// Returns the number of armed timers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerKind::Election, Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert!(matches!(event, Event::ElectionTimeout));
    }

    #[tokio::test]
    async fn test_timer_cancel() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerKind::Election, Duration::from_millis(50));
        manager.cancel_timer(TimerKind::Election);

        let result = tokio::time::timeout(Duration::from_millis(150), event_rx.recv()).await;
        assert!(result.is_err(), "timer should have been cancelled");
    }

    #[tokio::test]
    async fn test_timer_reset_replaces_pending_fire() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerKind::Election, Duration::from_secs(60));
        manager.set_timer(TimerKind::Election, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);

        // Fires quickly: the long timer was replaced, not kept.
        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, Event::ElectionTimeout));
    }

    #[tokio::test]
    async fn test_timers_are_independent() {
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(event_tx);

        manager.set_timer(TimerKind::Election, Duration::from_secs(60));
        manager.set_timer(TimerKind::Heartbeat, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 2);

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, Event::HeartbeatTimeout));
    }
}
