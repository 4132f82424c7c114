//! feedgen-jetstream: Jetstream ingestion for the feed generator.
//!
//! - [`event`] decodes frames into tagged [`StreamEvent`]s
//! - [`source`] opens connections ([`JetstreamSource`] over WebSocket)
//! - [`subscriber`] runs the resumable reconnect loop
//! - [`builder`] wires a [`Subscriber`] fluently

pub mod builder;
pub mod event;
pub mod source;
pub mod subscriber;

pub use builder::SubscriberBuilder;
pub use event::{Commit, CommitOp, EventKind, PostRecord, StreamEvent};
pub use source::{ConnectRequest, EventSource, FrameStream, JetstreamSource};
pub use subscriber::{Subscriber, SubscriberConfig, SubscriberState, SubscriberStats};
