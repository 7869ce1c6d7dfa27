//! Typed in-process publish/subscribe bus decoupling producers (the
//! LifecycleEngine) from consumers (an out-of-scope HTTP/WebSocket fan-out
//! service) — spec §2, §6, §9 Design Notes: "model as a typed publish/
//! subscribe bus with a closed set of event variants; subscribers receive
//! values, never mutable handles to internal state."

use crate::lifecycle::state::{Token, Trade};
use tokio::sync::broadcast;

/// Snapshot of per-run counters emitted on a periodic cadence for dashboards
/// that want a single tick rather than polling metrics (spec §6 `StatsTick`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsTick {
    pub tokens_tracked: u64,
    pub tokens_persisted: u64,
    pub trades_persisted: u64,
}

/// The closed set of events this core ever publishes (spec §6: `on(NewToken)`,
/// `on(Trade)`, `on(Graduation)`, `on(StatsTick)`).
#[derive(Debug, Clone)]
pub enum Event {
    NewToken(Token),
    Trade(Trade),
    Graduation { mint: solana_sdk::pubkey::Pubkey, slot: u64 },
    StatsTick(StatsTick),
}

const DEFAULT_CAPACITY: usize = 4096;

/// Thin wrapper over a `tokio::sync::broadcast` channel. Cloning an
/// `EventBus` shares the same channel — every clone is a new sender handle
/// over the same underlying queue.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to every current subscriber. Returns the number of receivers
    /// that were live at publish time; a publish with zero subscribers is
    /// not an error — the bus has no durability guarantee, by design.
    pub fn publish(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::StatsTick(StatsTick::default()));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::StatsTick(_)));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        let delivered = bus.publish(Event::StatsTick(StatsTick::default()));
        assert_eq!(delivered, 0);
    }
}
