use std::pin::Pin;

use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::types::LedgerEvent;

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Fan-out of ledger events to any number of subscribers.
///
/// Slow subscribers lose the oldest events rather than applying backpressure
/// to admission.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn emit(&self, event: LedgerEvent) {
        let _ = self.sender.send(event);
    }

    /// Event stream from this point on
    pub fn subscribe(&self) -> BoxStream<LedgerEvent> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1000)
    }
}
