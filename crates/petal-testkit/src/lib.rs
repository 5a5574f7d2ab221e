#![deny(unsafe_code)]

//! In-process transport for petal call sessions.
//!
//! This is the semantic reference implementation of
//! [`CallTransport`]: a scripted server behind a real completion queue
//! (mutex + condvar with timed wait), so the dispatcher exercises the
//! same bounded-poll contract it would against a production channel.
//!
//! A [`CallScript`] describes what the fake server does — responses,
//! metadata, terminal status, failure injection — and a [`MemHandle`]
//! lets tests observe what the client actually put on the wire.
//!
//! ```ignore
//! let script = CallScript::new().respond(b"pong").status(code::OK, "");
//! let (connector, handle) = MemConnector::new(script);
//! let (session, events) = CallSession::start(&connector, method, &channel, &[])?;
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use petal_session::{
    CallStatus, CallTransport, ChannelConfig, CompletionEvent, Connector, MethodDescriptor,
    QueuePoll, Tag, WireMetadata,
};

/// Install a tracing subscriber honouring `RUST_LOG`, once per process.
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Script
// ============================================================================

/// Scripted behaviour of the fake server for one call.
#[derive(Debug, Clone, Default)]
pub struct CallScript {
    responses: VecDeque<Vec<u8>>,
    initial_metadata: WireMetadata,
    trailing_metadata: WireMetadata,
    status: CallStatus,
    respond_after_half_close: bool,
    fail_write_at: Option<usize>,
    fail_start: bool,
    shutdown_on_finish: bool,
}

impl CallScript {
    /// An empty script: no responses, OK status, no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a server message. May be called repeatedly; messages are
    /// delivered in order.
    pub fn respond(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.responses.push_back(payload.into());
        self
    }

    /// Initial metadata delivered ahead of the first message.
    pub fn initial_metadata(mut self, metadata: WireMetadata) -> Self {
        self.initial_metadata = metadata;
        self
    }

    /// Trailing metadata delivered alongside the status.
    pub fn trailing_metadata(mut self, metadata: WireMetadata) -> Self {
        self.trailing_metadata = metadata;
        self
    }

    /// Terminal status of the call.
    pub fn status(mut self, code: i32, message: &str) -> Self {
        self.status.code = code;
        self.status.message = message.to_string();
        self
    }

    /// Opaque details blob attached to the terminal status.
    pub fn status_details(mut self, details: Vec<u8>) -> Self {
        self.status.details = details;
        self
    }

    /// Hold responses back until the client half-closes, the way a
    /// client-streaming server aggregates its input first.
    pub fn respond_after_half_close(mut self) -> Self {
        self.respond_after_half_close = true;
        self
    }

    /// Fail the `nth` write completion (1-based), simulating transport
    /// failure mid-stream.
    pub fn fail_write(mut self, nth: usize) -> Self {
        self.fail_write_at = Some(nth);
        self
    }

    /// Fail the call-start completion.
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Shut the completion queue down when the status fetch is issued,
    /// instead of completing it. The session can then only abort.
    pub fn shutdown_on_finish(mut self) -> Self {
        self.shutdown_on_finish = true;
        self
    }
}

// ============================================================================
// Shared observation state
// ============================================================================

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<CompletionEvent>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Observed {
    sent: Vec<Vec<u8>>,
    request_metadata: WireMetadata,
    request_path: String,
    half_closed: bool,
    finish_requested: bool,
}

#[derive(Debug, Default)]
struct Inner {
    queue: Mutex<QueueState>,
    ready: Condvar,
    observed: Mutex<Observed>,
}

impl Inner {
    fn push(&self, tag: Tag, ok: bool) {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        queue.events.push_back(CompletionEvent { tag, ok });
        self.ready.notify_one();
    }

    fn shutdown(&self) {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        queue.shutdown = true;
        self.ready.notify_one();
    }
}

/// Test-side view of one call's wire activity.
#[derive(Debug, Clone)]
pub struct MemHandle {
    inner: Arc<Inner>,
}

impl MemHandle {
    /// Payloads the client has written so far, in order.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.inner.observed.lock().expect("observed lock poisoned").sent.clone()
    }

    /// Wire metadata the client attached when starting the call.
    pub fn request_metadata(&self) -> WireMetadata {
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .request_metadata
            .clone()
    }

    /// Request path of the call.
    pub fn request_path(&self) -> String {
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .request_path
            .clone()
    }

    /// Whether the client has half-closed its side.
    pub fn half_closed(&self) -> bool {
        self.inner.observed.lock().expect("observed lock poisoned").half_closed
    }

    /// Whether the client has issued the terminal status fetch.
    pub fn finish_requested(&self) -> bool {
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .finish_requested
    }

    /// Shut the completion queue down from the outside, as if the
    /// channel collapsed underneath the call.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

// ============================================================================
// Transport
// ============================================================================

/// The in-memory [`CallTransport`].
///
/// Every operation starter synchronously decides its completion and
/// pushes it onto the queue, so event order is deterministic: the order
/// operations were issued in, gated only by the script's response
/// policy.
#[derive(Debug)]
pub struct MemTransport {
    inner: Arc<Inner>,
    script: CallScript,
    read_armed: Option<Tag>,
    read_slot: Option<Vec<u8>>,
    writes_completed: usize,
    half_closed: bool,
}

impl MemTransport {
    /// Deliver a queued response into the armed read slot, or end the
    /// stream once the script is exhausted.
    fn pump(&mut self) {
        let Some(tag) = self.read_armed else {
            return;
        };
        // A server never speaks before it has heard the request: hold
        // responses until the first write, or until half-close when the
        // script aggregates a client stream.
        if self.script.respond_after_half_close {
            if !self.half_closed {
                return;
            }
        } else if self.writes_completed == 0 {
            return;
        }
        self.read_armed = None;
        match self.script.responses.pop_front() {
            Some(payload) => {
                trace!(tag = %tag, len = payload.len(), "scripted response ready");
                self.read_slot = Some(payload);
                self.inner.push(tag, true);
            }
            // Stream end surfaces as a failed read, like a real
            // completion queue reports it.
            None => self.inner.push(tag, false),
        }
    }

    fn mark_half_closed(&mut self) {
        self.half_closed = true;
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .half_closed = true;
    }
}

impl CallTransport for MemTransport {
    fn start_call(&mut self, tag: Tag) {
        self.inner.push(tag, !self.script.fail_start);
    }

    fn write(&mut self, payload: Vec<u8>, last: bool, tag: Tag) {
        self.writes_completed += 1;
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .sent
            .push(payload);
        if last {
            self.mark_half_closed();
        }
        let ok = self.script.fail_write_at != Some(self.writes_completed);
        self.inner.push(tag, ok);
        if ok {
            self.pump();
        }
    }

    fn writes_done(&mut self, tag: Tag) {
        self.mark_half_closed();
        self.inner.push(tag, true);
        self.pump();
    }

    fn read(&mut self, tag: Tag) {
        self.read_armed = Some(tag);
        self.pump();
    }

    fn finish(&mut self, tag: Tag) {
        self.inner
            .observed
            .lock()
            .expect("observed lock poisoned")
            .finish_requested = true;
        if self.script.shutdown_on_finish {
            self.inner.shutdown();
        } else {
            self.inner.push(tag, true);
        }
    }

    fn poll(&mut self, timeout: Duration) -> QueuePoll {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().expect("queue lock poisoned");
        loop {
            if let Some(event) = queue.events.pop_front() {
                return QueuePoll::Event(event);
            }
            if queue.shutdown {
                return QueuePoll::Shutdown;
            }
            let now = Instant::now();
            if now >= deadline {
                return QueuePoll::Timeout;
            }
            let (guard, _) = self
                .inner
                .ready
                .wait_timeout(queue, deadline - now)
                .expect("queue lock poisoned");
            queue = guard;
        }
    }

    fn take_message(&mut self) -> Option<Vec<u8>> {
        self.read_slot.take()
    }

    fn initial_metadata(&mut self) -> WireMetadata {
        self.script.initial_metadata.clone()
    }

    fn trailing_metadata(&mut self) -> WireMetadata {
        self.script.trailing_metadata.clone()
    }

    fn status(&mut self) -> CallStatus {
        self.script.status.clone()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Single-use [`Connector`] producing one scripted [`MemTransport`].
#[derive(Debug)]
pub struct MemConnector {
    script: Mutex<Option<CallScript>>,
    inner: Arc<Inner>,
}

impl MemConnector {
    /// Build a connector for one call, plus the handle tests observe it
    /// through.
    pub fn new(script: CallScript) -> (Self, MemHandle) {
        let inner = Arc::new(Inner::default());
        let connector = Self {
            script: Mutex::new(Some(script)),
            inner: Arc::clone(&inner),
        };
        (connector, MemHandle { inner })
    }

    /// A connector whose `connect` always fails, for exercising the
    /// setup error path.
    pub fn refusing() -> Self {
        Self {
            script: Mutex::new(None),
            inner: Arc::new(Inner::default()),
        }
    }
}

impl Connector for MemConnector {
    type Transport = MemTransport;

    fn connect(
        &self,
        channel: &ChannelConfig,
        method: &MethodDescriptor,
        metadata: WireMetadata,
    ) -> io::Result<MemTransport> {
        let script = self
            .script
            .lock()
            .expect("script lock poisoned")
            .take()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no route to {}", channel.target),
                )
            })?;

        let mut observed = self.inner.observed.lock().expect("observed lock poisoned");
        observed.request_path = method.path.clone();
        observed.request_metadata = metadata;
        drop(observed);

        Ok(MemTransport {
            inner: Arc::clone(&self.inner),
            script,
            read_armed: None,
            read_slot: None,
            writes_completed: 0,
            half_closed: false,
        })
    }
}
