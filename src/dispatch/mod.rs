//! Event dispatch: match an event to covering responders and notify each once.
//!
//! The dispatcher is synchronous from the caller's point of view. Sends to
//! different responders run concurrently on short-lived threads, each bounded by
//! the configured timeout; a send that overruns is counted as failed and left
//! to finish in the background.

/// Matching and fan-out.
pub mod dispatcher;
/// Notification collaborator contract and in-process gateways.
pub mod gateway;

pub use dispatcher::{DispatchEvent, DispatchOutcome, EventDispatcher, EventKind};
pub use gateway::{Notification, NotificationGateway, RecordingGateway, SendReceipt, TracingGateway};
