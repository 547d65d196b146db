//! Process-to-process communication protocol.
//!
//! This module holds everything needed to exchange [`Message`](crate::Message)s
//! between a server process and the processes connecting to it: the binary
//! framing, the per-connection handshake state machine, the single-threaded
//! server loop and the client-side sender and receiver.
//!
//! # Overview
//!
//! A server binds the socket of its process name and serves any number of
//! connections from one thread. Each loop iteration polls the listener and
//! every open connection for readability, accepts at most one new connection,
//! heartbeats idle connections and feeds one frame of every ready connection
//! to its [`ClientLifecycle`].
//!
//! Connections open and close with acknowledged handshakes:
//!
//! ```text
//! server                      client
//!   | ---- ConnectionStart ---> |
//!   | <-- ConnectionStartOk --- |
//!   | <------ greeting -------- |
//!   | ---- MessageReceived ---> |
//!   | <------ message --------- |
//!   | ---- MessageReceived ---> |
//!   | <--- ConnectionClose ---- |   (or the other way around)
//!   | --- ConnectionCloseOk --> |
//! ```
//!
//! # Binary Format
//!
//! Every message travels as one frame:
//!
//! - a `u16` media type length followed by the media type,
//! - a `u32` content length followed by the content,
//! - a single `0xCE` end marker.
//!
//! All integers are big-endian. A frame that can't be decoded in full is
//! treated exactly like the peer closing the connection.
//!
//! # Key Components
//!
//! - [`Codec`]: encodes and decodes frames.
//! - [`Client`]: one end of a connection.
//! - [`ClientLifecycle`]: server-side handshake state of a connection.
//! - [`Connections`]: listener, open connections and readiness polling.
//! - [`Server`]: the iteration loop, driven by user code through [`Continuation`]s.
//! - [`Sender`] and [`Receiver`]: the connecting side.
mod client;
mod connections;
mod continuation;
mod lifecycle;
mod peer;
mod receiver;
mod sender;
mod server;
mod signals;
mod transport;

pub use client::Client;
pub use connections::{ConnectionId, Connections, Ready};
pub use continuation::{CallbackError, Continuation, Outcome};
pub use lifecycle::{ClientLifecycle, LifecycleState, Notified};
pub use peer::{ClientConfig, ClientError};
pub use receiver::Receiver;
pub use sender::Sender;
pub use server::{Server, ServerConfig, ServerError};
pub use signals::{SHUTDOWN_SIGNALS, Signals};
pub use transport::{Codec, END_MARKER, TransportError, content_length};
