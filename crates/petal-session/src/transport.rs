//! Call transport abstraction.
//!
//! This module defines the [`CallTransport`] trait that abstracts the
//! byte-oriented transport underneath one call: a set of non-blocking
//! operation starters, each correlated by a [`Tag`], and a blocking
//! completion-queue poll that is the sole cross-thread synchronization
//! point of the whole design.
//!
//! Implementations:
//! - `MemTransport` from `petal-testkit`, the in-process semantic
//!   reference used by the test suite
//! - a real channel-backed transport supplied by the embedding
//!   application's connector

use std::io;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::metadata::WireMetadata;
use crate::method::MethodDescriptor;
use crate::status::CallStatus;
use crate::tag::Tag;

/// One event pulled from the completion queue.
///
/// `ok == false` does not name a reason: the definitive status is only
/// available from the terminal status fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    /// The correlation token of the operation that completed.
    pub tag: Tag,
    /// Whether the operation succeeded.
    pub ok: bool,
}

/// Outcome of one completion-queue poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePoll {
    /// An operation completed.
    Event(CompletionEvent),
    /// The deadline expired with no event. The caller re-checks its
    /// interruption flag and polls again.
    Timeout,
    /// The queue is drained and shut down; no further event will ever
    /// be produced.
    Shutdown,
}

/// A byte-oriented transport driving one call.
///
/// Operation starters enqueue asynchronous work and return immediately;
/// each eventually produces exactly one [`CompletionEvent`] carrying the
/// given tag. At most one read and one write operation are outstanding
/// at any instant, which is what makes the single-slot buffer accessors
/// (`take_message`, `status`, the metadata getters) race-free: they are
/// only called by the dispatcher after the matching completion.
pub trait CallTransport: Send + 'static {
    /// Enqueue the call-start operation.
    fn start_call(&mut self, tag: Tag);

    /// Enqueue a message write. `last` additionally half-closes the
    /// client side, signalling no more client data.
    fn write(&mut self, payload: Vec<u8>, last: bool, tag: Tag);

    /// Enqueue a client half-close without a payload.
    fn writes_done(&mut self, tag: Tag);

    /// Arm the single read slot.
    fn read(&mut self, tag: Tag);

    /// Enqueue the terminal status fetch.
    fn finish(&mut self, tag: Tag);

    /// Block for the next completion event, up to `timeout`.
    fn poll(&mut self, timeout: Duration) -> QueuePoll;

    /// Take the payload of the last successful read, clearing the slot.
    fn take_message(&mut self) -> Option<Vec<u8>>;

    /// Server's initial metadata; valid once the first read completed.
    fn initial_metadata(&mut self) -> WireMetadata;

    /// Server's trailing metadata; valid once the finish completed.
    fn trailing_metadata(&mut self) -> WireMetadata;

    /// The terminal status; valid once the finish completed.
    fn status(&mut self) -> CallStatus;
}

/// A factory that builds the transport for one call.
///
/// This is the seam to the embedding application: it owns channel
/// construction, credential handling and any channel reuse across
/// sessions. The session treats everything in [`ChannelConfig`] as
/// opaque pass-through.
pub trait Connector {
    /// The transport this connector produces.
    type Transport: CallTransport;

    /// Build a channel and prepare the call described by `method`,
    /// attaching the already-encoded outbound metadata.
    fn connect(
        &self,
        channel: &ChannelConfig,
        method: &MethodDescriptor,
        metadata: WireMetadata,
    ) -> io::Result<Self::Transport>;
}
