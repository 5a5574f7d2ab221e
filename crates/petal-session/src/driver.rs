//! Completion dispatcher: the per-session worker.
//!
//! The driver owns the transport and the exclusive right to mutate the
//! call state. It runs a loop on a dedicated thread: drain pending
//! commands, then block (with a bounded interval) on the completion
//! queue; classify each event by the current state and by whether its
//! tag matches the outstanding read or write tag; dispatch to the
//! matching transition handler. Everything the consumer observes leaves
//! through the event channel, so delivery is decoupled from the worker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::POLL_INTERVAL;
use crate::event::SessionEvent;
use crate::metadata::decode_metadata;
use crate::method::MethodDescriptor;
use crate::state::CallState;
use crate::tag::{Direction, TagAllocator};
use crate::transport::{CallTransport, CompletionEvent, QueuePoll};

/// Commands enqueued by the session façade.
#[derive(Debug)]
pub(crate) enum Command {
    Send(Vec<u8>),
    FinishWrites,
    Finish,
}

/// State shared between the façade and the worker.
///
/// The worker is the only writer of `state`; the façade reads it to
/// reject programming errors synchronously. `interrupt` is the
/// destruction-time teardown signal, deliberately separate from the
/// RPC-level finish so a hung transport cannot keep the worker alive.
#[derive(Debug)]
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) interrupt: AtomicBool,
    pub(crate) writes_closed: AtomicBool,
    pub(crate) sends_accepted: AtomicU32,
    terminal: AtomicBool,
    begun: Instant,
    ended: OnceLock<Instant>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(CallState::Preparing.as_u8()),
            interrupt: AtomicBool::new(false),
            writes_closed: AtomicBool::new(false),
            sends_accepted: AtomicU32::new(0),
            terminal: AtomicBool::new(false),
            begun: Instant::now(),
            ended: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CallState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// First caller wins; later terminal signals are suppressed.
    pub(crate) fn mark_terminal(&self) -> bool {
        let first = !self.terminal.swap(true, Ordering::AcqRel);
        if first {
            let _ = self.ended.set(Instant::now());
        }
        first
    }

    pub(crate) fn elapsed(&self) -> Duration {
        match self.ended.get() {
            Some(ended) => ended.duration_since(self.begun),
            None => self.begun.elapsed(),
        }
    }
}

/// The dispatcher worker. Consumed by [`run`](Driver::run) on the
/// session's dedicated thread.
pub(crate) struct Driver<T: CallTransport> {
    transport: T,
    method: MethodDescriptor,
    shared: Arc<Shared>,
    commands: UnboundedReceiver<Command>,
    events: UnboundedSender<SessionEvent>,
    state: CallState,
    read_tags: TagAllocator,
    write_tags: TagAllocator,
    /// Writes staged while `Preparing` or while the write slot is busy.
    pending_writes: VecDeque<Vec<u8>>,
    write_outstanding: bool,
    half_close_requested: bool,
    got_initial_metadata: bool,
    terminal: bool,
}

impl<T: CallTransport> Driver<T> {
    pub(crate) fn new(
        transport: T,
        method: MethodDescriptor,
        shared: Arc<Shared>,
        commands: UnboundedReceiver<Command>,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            method,
            shared,
            commands,
            events,
            state: CallState::Preparing,
            read_tags: TagAllocator::new(Direction::Read),
            write_tags: TagAllocator::new(Direction::Write),
            pending_writes: VecDeque::new(),
            write_outstanding: false,
            half_close_requested: false,
            got_initial_metadata: false,
            terminal: false,
        }
    }

    /// Run until a terminal event, queue shutdown, or interruption.
    ///
    /// The loop blocks only inside the bounded completion poll; the
    /// interrupt flag is re-checked on every timeout. Exiting for any
    /// reason other than a delivered `Finished` raises `Aborted`.
    pub(crate) fn run(mut self) {
        // The call-start operation correlates with the write direction,
        // like every other client-initiated operation.
        self.transport.start_call(self.write_tags.current());

        while !self.terminal {
            self.drain_commands();
            match self.transport.poll(POLL_INTERVAL) {
                QueuePoll::Shutdown => {
                    debug!("completion queue shut down");
                    break;
                }
                QueuePoll::Timeout => {
                    if self.shared.interrupt.load(Ordering::Acquire) {
                        debug!("worker interruption requested");
                        break;
                    }
                }
                QueuePoll::Event(event) => self.handle_event(event),
            }
        }

        if !self.terminal && self.shared.mark_terminal() {
            debug!("session aborted before a definitive status");
            let _ = self.events.send(SessionEvent::Aborted);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The consumer may be gone already; that only means nobody is
        // listening, not that the call should stop making progress.
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: CallState) {
        trace!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.shared.set_state(state);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(payload) => {
                    if self.state >= CallState::WritesDone {
                        // The façade rejects this synchronously; a race
                        // can still slip one through.
                        warn!(state = ?self.state, "dropping send issued after writes closed");
                    } else {
                        self.pending_writes.push_back(payload);
                        self.maybe_issue_write();
                    }
                }
                Command::FinishWrites => {
                    if self.state >= CallState::WritesDone {
                        debug!("write side already closed");
                    } else if !self.method.client_streaming {
                        // The single write already carried the half-close.
                        trace!("half-close implied by write-last");
                    } else {
                        self.half_close_requested = true;
                        self.maybe_issue_write();
                    }
                }
                Command::Finish => self.begin_finish(),
            }
        }
    }

    /// Issue the next queued write, or the deferred half-close once the
    /// queue has drained. The write slot holds at most one outstanding
    /// operation.
    fn maybe_issue_write(&mut self) {
        if self.state != CallState::Connected || self.write_outstanding {
            return;
        }
        if let Some(payload) = self.pending_writes.pop_front() {
            let last = !self.method.client_streaming;
            self.write_tags.advance();
            trace!(tag = %self.write_tags.current(), last, "issuing write");
            self.transport.write(payload, last, self.write_tags.current());
            self.write_outstanding = true;
        } else if self.half_close_requested {
            self.half_close_requested = false;
            self.write_tags.advance();
            trace!(tag = %self.write_tags.current(), "issuing half-close");
            self.transport.writes_done(self.write_tags.current());
            self.set_state(CallState::WritesDone);
        }
    }

    /// Request the terminal status fetch. Idempotent past `Finishing`.
    fn begin_finish(&mut self) {
        if self.state >= CallState::Finishing {
            debug!("already finishing");
            return;
        }
        self.set_state(CallState::Finishing);
        self.write_tags.advance();
        self.transport.finish(self.write_tags.current());
    }

    // ------------------------------------------------------------------
    // Completion events
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: CompletionEvent) {
        if !event.ok && self.state < CallState::Finishing {
            // A failed operation mid-stream is not the end of the story:
            // force the status fetch so the consumer always learns a
            // definitive outcome.
            debug!(tag = %event.tag, state = ?self.state, "operation failed, fetching status");
            self.write_outstanding = false;
            self.begin_finish();
            return;
        }

        match self.state {
            CallState::Preparing => self.on_call_started(event),
            CallState::Connected | CallState::WritesDone => {
                if event.tag == self.read_tags.current() {
                    self.on_read_complete();
                } else if event.tag == self.write_tags.current() {
                    if self.state == CallState::WritesDone {
                        trace!("half-close acknowledged");
                    } else {
                        self.on_write_complete();
                    }
                } else {
                    warn!(tag = %event.tag, state = ?self.state, "completion for unknown tag");
                }
            }
            CallState::Finishing => {
                if event.tag == self.write_tags.current() {
                    self.on_finish_complete();
                } else {
                    // A stale read or write completing after the status
                    // fetch was issued; the state machine is past caring.
                    trace!(tag = %event.tag, "late completion while finishing");
                }
            }
        }
    }

    fn on_call_started(&mut self, event: CompletionEvent) {
        if event.tag != self.write_tags.current() {
            warn!(tag = %event.tag, "completion for unknown tag");
            return;
        }
        debug!("call started");
        self.set_state(CallState::Connected);
        self.maybe_issue_write();
        self.transport.read(self.read_tags.current());
    }

    fn on_read_complete(&mut self) {
        if !self.got_initial_metadata {
            self.got_initial_metadata = true;
            let metadata = decode_metadata(&self.transport.initial_metadata());
            self.emit(SessionEvent::InitialMetadataReceived(metadata));
        }

        let payload = self.transport.take_message().unwrap_or_default();
        trace!(len = payload.len(), "message received");
        self.emit(SessionEvent::MessageReceived(payload));

        if self.method.server_streaming {
            self.read_tags.advance();
            self.transport.read(self.read_tags.current());
        } else {
            // The single logical response has arrived; nothing further
            // can come before the status, so fetch it now.
            self.begin_finish();
        }
    }

    fn on_write_complete(&mut self) {
        self.write_outstanding = false;
        self.emit(SessionEvent::MessageSent);
        self.maybe_issue_write();
    }

    fn on_finish_complete(&mut self) {
        let trailing = decode_metadata(&self.transport.trailing_metadata());
        self.emit(SessionEvent::TrailingMetadataReceived(trailing));

        let status = self.transport.status();
        debug!(code = status.code, "call finished");
        self.terminal = true;
        if self.shared.mark_terminal() {
            self.emit(SessionEvent::Finished(status));
        }
    }
}
