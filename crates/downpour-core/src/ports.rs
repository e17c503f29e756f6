//! Port definitions.
//!
//! The engine delivers events through an [`EventSink`]; adapters decide
//! where they go (UI bridge, log, test collector).

use crate::events::TransferEvent;
use std::fmt::Debug;
use tokio::sync::broadcast;

/// Outbound port for transfer events.
///
/// Implementations must be cheap to call from the transfer hot path and
/// must never block.
pub trait EventSink: Send + Sync + Debug {
    /// Deliver one event. Delivery failures are the sink's problem and
    /// must not propagate back into the transfer.
    fn emit(&self, event: TransferEvent);

    /// Clone into a boxed trait object.
    fn clone_box(&self) -> Box<dyn EventSink>;
}

impl Clone for Box<dyn EventSink> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Sink that discards all events. Useful for tests and headless runs.
#[derive(Clone, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: TransferEvent) {}

    fn clone_box(&self) -> Box<dyn EventSink> {
        Box::new(self.clone())
    }
}

/// Sink that fans events out to any number of subscribers over a
/// tokio broadcast channel.
///
/// Emitting with no subscribers is fine; events are simply dropped.
/// Slow subscribers that fall behind the channel capacity lose the
/// oldest events, per broadcast semantics.
#[derive(Clone, Debug)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TransferEvent>,
}

impl BroadcastEventSink {
    /// Create a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Open a new subscription. Only events emitted after this call are
    /// observed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TransferEvent) {
        // send only fails when there are no receivers, which is fine
        let _ = self.tx.send(event);
    }

    fn clone_box(&self) -> Box<dyn EventSink> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    #[test]
    fn test_noop_sink_ignores_events() {
        let sink = NoopEventSink;
        sink.emit(TransferEvent::error(TaskId::new("x"), "boom"));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscriber() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();

        let event = TransferEvent::completed(TaskId::new("t1"), "/tmp/out.bin");
        sink.emit(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[test]
    fn test_broadcast_sink_no_subscribers() {
        let sink = BroadcastEventSink::new(8);
        // Must not panic or error with nobody listening.
        sink.emit(TransferEvent::error(TaskId::new("t1"), "nobody home"));
    }

    #[tokio::test]
    async fn test_boxed_sink_clone() {
        let sink: Box<dyn EventSink> = Box::new(BroadcastEventSink::new(8));
        let cloned = sink.clone();
        cloned.emit(TransferEvent::error(TaskId::new("t1"), "via clone"));
    }
}
