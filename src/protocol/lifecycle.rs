//! Server-side protocol state of one connection.
//!
//! Every accepted connection is driven by a [`ClientLifecycle`]. It greets the
//! peer with `ConnectionStart` on creation, then consumes one frame per
//! [`notify`](ClientLifecycle::notify) call:
//!
//! | State            | `ConnectionStartOk` | `ConnectionClose`          | `ConnectionCloseOk` | application message     |
//! |------------------|---------------------|----------------------------|---------------------|-------------------------|
//! | `PendingStartOk` | → `AwaitingMessage` | stay                       | stay                | stay, dropped           |
//! | `AwaitingMessage`| stay                | reply `CloseOk` → `Garbage`| stay                | ack, forward to callback|
//! | `PendingCloseOk` | stay                | stay                       | → `Garbage`         | stay, dropped           |
//! | `Garbage`        | inert               | inert                      | inert               | inert                   |
//!
//! Any other control message leaves the state untouched and is never forwarded.
//! A peer going away without the handshake moves straight to `Garbage`.
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::{
    message::{Control, Message},
    process::ProcessName,
};

use super::{
    client::Client,
    continuation::{CallbackError, Continuation, Outcome},
    transport::TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    PendingStartOk,
    AwaitingMessage,
    PendingCloseOk,
    Garbage,
}

/// Result of feeding one frame to a lifecycle.
#[derive(Debug, PartialEq, Eq)]
pub struct Notified<C> {
    pub carry: C,
    /// User code asked for the whole server to stop.
    pub stop: bool,
}

impl<C> Notified<C> {
    pub(crate) fn proceed(carry: C) -> Self {
        Self { carry, stop: false }
    }
}

#[derive(Debug)]
pub struct ClientLifecycle {
    client: Client,
    state: LifecycleState,
    heartbeat: Duration,
    last_heartbeat: Instant,
    peer: Option<ProcessName>,
}

impl ClientLifecycle {
    /// Send `ConnectionStart` to a freshly accepted client.
    ///
    /// The client is closed if the greeting can't be sent.
    pub fn start(mut client: Client, heartbeat: Duration) -> Result<Self, TransportError> {
        if let Err(e) = client.send(&Control::ConnectionStart.message()) {
            let _ = client.close();
            return Err(e);
        }

        Ok(Self {
            client,
            state: LifecycleState::PendingStartOk,
            heartbeat,
            last_heartbeat: Instant::now(),
            peer: None,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_garbage(&self) -> bool {
        self.state == LifecycleState::Garbage
    }

    /// Name the peer introduced itself with, if it sent a greeting.
    pub fn peer(&self) -> Option<&ProcessName> {
        self.peer.as_ref()
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Read one frame and apply it to the state machine.
    ///
    /// Application messages received while `AwaitingMessage` are acknowledged
    /// then handed to `callback`; only a failing callback is reported.
    pub fn notify<C, F>(&mut self, carry: C, callback: &mut F) -> Result<Notified<C>, CallbackError>
    where
        F: FnMut(Message, Continuation<C>) -> Result<Continuation<C>, CallbackError>,
    {
        if self.is_garbage() {
            return Ok(Notified::proceed(carry));
        }

        let message = match self.client.read() {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("peer {} went away", self.label());
                self.discard();
                return Ok(Notified::proceed(carry));
            }
            Err(e) => {
                warn!("failed to read from {}: {e}", self.label());
                self.discard();
                return Ok(Notified::proceed(carry));
            }
        };
        self.last_heartbeat = Instant::now();

        match (self.state, Control::of(&message)) {
            (LifecycleState::PendingStartOk, Some(Control::ConnectionStartOk)) => {
                debug!("connection started");
                self.state = LifecycleState::AwaitingMessage;
            }
            (LifecycleState::AwaitingMessage, Some(Control::ConnectionClose)) => {
                if let Err(e) = self.client.send(&Control::ConnectionCloseOk.message()) {
                    debug!("failed to acknowledge close of {}: {e}", self.label());
                }
                self.discard();
            }
            (LifecycleState::AwaitingMessage, None) => {
                return self.forward(message, carry, callback);
            }
            (LifecycleState::PendingCloseOk, Some(Control::ConnectionCloseOk)) => {
                debug!("connection with {} closed", self.label());
                self.discard();
            }
            (state, _) => trace!("ignoring {} message while {state:?}", message.media_type()),
        }

        Ok(Notified::proceed(carry))
    }

    fn forward<C, F>(
        &mut self,
        message: Message,
        carry: C,
        callback: &mut F,
    ) -> Result<Notified<C>, CallbackError>
    where
        F: FnMut(Message, Continuation<C>) -> Result<Continuation<C>, CallbackError>,
    {
        if let Err(e) = self.client.send(&Control::MessageReceived.message()) {
            warn!("failed to acknowledge message from {}: {e}", self.label());
            self.discard();
            return Ok(Notified::proceed(carry));
        }

        if message.is_greeting() {
            self.peer = message.greeting_name();
            debug!("connection labelled as {}", self.label());
            return Ok(Notified::proceed(carry));
        }

        let (carry, outcome) = callback(message, Continuation::start(carry))?.into_parts();
        let mut stop = false;

        match outcome {
            Outcome::Continue => {}
            Outcome::Respond(reply) => {
                if let Err(e) = self.client.send(&reply) {
                    warn!("failed to respond to {}: {e}", self.label());
                    self.discard();
                }
            }
            Outcome::Close => self.shutdown(),
            Outcome::Stop => stop = true,
        }

        Ok(Notified { carry, stop })
    }

    /// Ping the peer when nothing was exchanged for a whole heartbeat interval.
    ///
    /// A failed send is ignored, the connection is reclaimed on its next read.
    pub fn heartbeat(&mut self) {
        if self.is_garbage() || self.last_heartbeat.elapsed() < self.heartbeat {
            return;
        }

        self.last_heartbeat = Instant::now();
        if let Err(e) = self.client.send(&Control::Heartbeat.message()) {
            debug!("heartbeat to {} failed: {e}", self.label());
        }
    }

    /// Start the closing handshake from this side.
    ///
    /// A connection that can't even send `ConnectionClose` is discarded.
    pub fn shutdown(&mut self) {
        match self.state {
            LifecycleState::PendingStartOk | LifecycleState::AwaitingMessage => {
                match self.client.send(&Control::ConnectionClose.message()) {
                    Ok(()) => self.state = LifecycleState::PendingCloseOk,
                    Err(e) => {
                        debug!("failed to close {}: {e}", self.label());
                        self.discard();
                    }
                }
            }
            LifecycleState::PendingCloseOk | LifecycleState::Garbage => {}
        }
    }

    /// Close the stream without any handshake.
    pub fn discard(&mut self) {
        if !self.client.closed() {
            let _ = self.client.close();
        }
        self.state = LifecycleState::Garbage;
    }

    fn label(&self) -> &str {
        self.peer.as_ref().map_or("client", |p| p.as_str())
    }
}
