//! Foreground and background signals from the host application.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// The app is about to become active.
    Foreground,
    /// The app moved to the background. No new work should be scheduled.
    Background,
}

/// Fans lifecycle signals out to every scheduler.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
    tx: broadcast::Sender<Lifecycle>,
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Lifecycle> {
        self.tx.subscribe()
    }

    /// Deliver a signal. Returns the number of listeners that received it.
    pub fn send(&self, signal: Lifecycle) -> usize {
        let listeners = self.tx.send(signal).unwrap_or(0);
        tracing::debug!(?signal, listeners, "lifecycle signal");
        listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = LifecycleBus::new();
        assert_eq!(bus.send(Lifecycle::Foreground), 0);

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.send(Lifecycle::Background), 2);
        assert_eq!(a.recv().await.unwrap(), Lifecycle::Background);
        assert_eq!(b.recv().await.unwrap(), Lifecycle::Background);
    }
}
