//! Events delivered from the dispatcher to the session consumer.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::metadata::Metadata;
use crate::status::CallStatus;

/// One callback from the call lifecycle.
///
/// Events arrive in the order their underlying operations completed.
/// `Finished` and `Aborted` are mutually exclusive, fire at most once,
/// and are always the last event of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A queued payload was accepted by the transport; the write slot
    /// is free again.
    MessageSent,
    /// A server message arrived.
    MessageReceived(Vec<u8>),
    /// Headers that precede the first server message.
    InitialMetadataReceived(Metadata),
    /// Headers delivered alongside the terminal status.
    TrailingMetadataReceived(Metadata),
    /// The definitive outcome, OK or not.
    Finished(CallStatus),
    /// The worker stopped before any definitive outcome was available.
    Aborted,
}

/// Receiving half of a session's event stream.
///
/// Delivery is decoupled from the worker: the consumer drains events on
/// its own schedule, async or not.
#[derive(Debug)]
pub struct SessionEvents {
    rx: UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the session is gone
    /// and every queued event has been drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<SessionEvent, TryRecvError> {
        self.rx.try_recv()
    }

    /// Blocking variant of [`recv`](Self::recv), for synchronous
    /// consumers. Must not be called from an async context.
    pub fn blocking_recv(&mut self) -> Option<SessionEvent> {
        self.rx.blocking_recv()
    }
}
