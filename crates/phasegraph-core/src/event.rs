use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::types::DisplayEvent;

/// Receiving half of a turn's event channel.
pub type EventStream = UnboundedReceiverStream<DisplayEvent>;

/// Outbound display-event channel for one session.
///
/// Single producer (the engine and the executor it drives), single consumer
/// (the transport). Events arrive in exactly the order they were emitted.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DisplayEvent>,
}

impl EventSink {
    /// Create a sink and the stream that drains it.
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    pub fn emit(&self, event: DisplayEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            // The turn keeps running without a listener
            trace!(event_type = %event.event_type(), "Event consumer gone, dropping event");
        }
    }

    /// Whether the consumer is still listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
