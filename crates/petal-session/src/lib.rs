#![deny(unsafe_code)]

//! Generic RPC call session.
//!
//! This crate drives a single RPC invocation — unary, client-streaming,
//! server-streaming, or bidirectional — over an untyped byte-oriented
//! transport that reports progress through a completion queue of opaque
//! correlation tags. Payloads are opaque byte buffers: schema
//! resolution and message encoding live in the embedding application.
//!
//! A [`CallSession`] exposes a small set of non-blocking commands
//! (`send`, `finish_writes`, `finish`) and emits an ordered stream of
//! [`SessionEvent`]s to a single consumer. A dedicated worker thread
//! per session drains the completion queue and owns all call state;
//! `Finished` or `Aborted` is always the last event.
//!
//! ```ignore
//! let method = MethodDescriptor::new("greet.Greeter", "SayHello", false, false);
//! let channel = ChannelConfig::insecure("localhost:50051");
//! let (session, mut events) = CallSession::start(&connector, method, &channel, &metadata)?;
//! session.send(request_bytes)?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::MessageReceived(bytes) => render(bytes),
//!         SessionEvent::Finished(status) => println!("{status}"),
//!         _ => {}
//!     }
//! }
//! ```

mod channel;
mod driver;
mod errors;
mod event;
mod metadata;
mod method;
mod session;
mod state;
mod status;
mod tag;
mod transport;

pub use channel::{ChannelConfig, ChannelOptions, Credentials, TlsOptions};
pub use errors::{MetadataError, SendError, SetupError};
pub use event::{SessionEvent, SessionEvents};
pub use metadata::{
    BINARY_SUFFIX, Metadata, WireMetadata, WireValue, decode_metadata, encode_metadata,
};
pub use method::MethodDescriptor;
pub use session::CallSession;
pub use state::CallState;
pub use status::{CallStatus, code, code_label};
pub use tag::{Direction, Tag, TagAllocator};
pub use transport::{CallTransport, CompletionEvent, Connector, QueuePoll};

use std::time::Duration;

/// Bound on one completion-queue poll. The worker wakes at least this
/// often to pick up commands and the interruption flag.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);
