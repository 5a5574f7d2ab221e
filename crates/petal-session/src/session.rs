//! The call session façade.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::warn;

use crate::channel::ChannelConfig;
use crate::driver::{Command, Driver, Shared};
use crate::errors::{SendError, SetupError};
use crate::event::{SessionEvent, SessionEvents};
use crate::metadata::encode_metadata;
use crate::method::MethodDescriptor;
use crate::state::CallState;
use crate::transport::Connector;

/// One RPC invocation in flight.
///
/// Commands are non-blocking enqueues callable from any context; all
/// state mutation happens on the session's dedicated dispatcher worker.
/// Events arrive through the [`SessionEvents`] half returned by
/// [`start`](CallSession::start). A session is never reused: once
/// `Finished` or `Aborted` has been delivered it is inert and should be
/// dropped.
///
/// Dropping the session requests worker interruption, joins the worker,
/// and only then releases the transport, so no event ever fires after
/// the drop returns.
#[derive(Debug)]
pub struct CallSession {
    commands: UnboundedSender<Command>,
    shared: Arc<Shared>,
    method: MethodDescriptor,
    worker: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Start a call.
    ///
    /// Encodes the outbound metadata (an encoding failure prevents call
    /// initiation), builds the transport through `connector`, spawns the
    /// dispatcher worker and immediately enqueues the call-start
    /// operation. On error no session exists and no event will ever be
    /// delivered.
    pub fn start<C: Connector>(
        connector: &C,
        method: MethodDescriptor,
        channel: &ChannelConfig,
        metadata: &[(String, String)],
    ) -> Result<(CallSession, SessionEvents), SetupError> {
        let wire_metadata = encode_metadata(metadata)?;
        let transport = connector
            .connect(channel, &method, wire_metadata)
            .map_err(SetupError::Connect)?;

        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        let shared = Arc::new(Shared::new());

        let driver = Driver::new(
            transport,
            method.clone(),
            Arc::clone(&shared),
            command_rx,
            event_tx.clone(),
        );

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("petal-session".into())
            .spawn(move || {
                // A fault inside a transition handler must not unwind
                // past the loop boundary: convert it into an abort so
                // the consumer still gets its terminal event.
                if std::panic::catch_unwind(AssertUnwindSafe(|| driver.run())).is_err() {
                    warn!("dispatcher worker panicked");
                    if worker_shared.mark_terminal() {
                        let _ = event_tx.send(SessionEvent::Aborted);
                    }
                }
            })
            .map_err(SetupError::Worker)?;

        let session = CallSession {
            commands: command_tx,
            shared,
            method,
            worker: Some(worker),
        };
        Ok((session, SessionEvents::new(event_rx)))
    }

    /// Queue a message write.
    ///
    /// While the call is still `Preparing` the payload is staged and
    /// issued as the first write on connection. Sending after
    /// `finish_writes`/`finish`, or a second payload on a call whose
    /// client side does not stream, is a programming error.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), SendError> {
        let state = self.state();
        if state >= CallState::WritesDone || self.shared.writes_closed.load(Ordering::Acquire) {
            return Err(SendError::InvalidState { state });
        }
        let accepted = self.shared.sends_accepted.fetch_add(1, Ordering::AcqRel);
        if !self.method.client_streaming && accepted > 0 {
            return Err(SendError::InvalidState { state });
        }
        let _ = self.commands.send(Command::Send(payload));
        Ok(())
    }

    /// Close the client half of the stream. Only meaningful for
    /// client/bidirectional streaming; idempotent past `WritesDone`.
    pub fn finish_writes(&self) {
        self.shared.writes_closed.store(true, Ordering::Release);
        let _ = self.commands.send(Command::FinishWrites);
    }

    /// Request the terminal status fetch. Idempotent past `Finishing`.
    ///
    /// In-flight operations are not abandoned instantly: the call moves
    /// to `Finishing`, further state advancement is suppressed, and the
    /// definitive status is still delivered through `Finished`.
    pub fn finish(&self) {
        self.shared.writes_closed.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Finish);
    }

    /// Alias for [`finish`](Self::finish): cancel the call while still
    /// obtaining a definitive status.
    pub fn cancel(&self) {
        self.finish();
    }

    /// Snapshot of the current call state.
    pub fn state(&self) -> CallState {
        self.shared.state()
    }

    /// The method this session is invoking.
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// Wall-clock duration of the call: start to terminal event, or to
    /// now while still in flight.
    pub fn elapsed(&self) -> Duration {
        self.shared.elapsed()
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.shared.interrupt.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            // Bounded: the worker re-checks the interrupt flag on every
            // poll timeout even when the transport produces nothing.
            let _ = worker.join();
        }
    }
}
