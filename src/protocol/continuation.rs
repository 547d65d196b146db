//! What user code wants done after handling a message.
//!
//! The server hands every application message to a callback together with a
//! [`Continuation`] holding the value returned by the previous call (the
//! *carry*). The callback returns a continuation telling the server how to
//! proceed, which makes the whole server loop a fold over received messages:
//!
//! ```rust
//! use namedipc::{Continuation, Message};
//!
//! fn count(_: Message, continuation: Continuation<usize>) -> Continuation<usize> {
//!     let seen = *continuation.carry() + 1;
//!     if seen == 3 {
//!         continuation.stop(seen)
//!     } else {
//!         continuation.continue_with(seen)
//!     }
//! }
//! # let message = Message::generic("text/plain", "").unwrap();
//! # assert_eq!(*count(message, Continuation::start(2)).carry(), 3);
//! ```
use std::error::Error;

use crate::message::Message;

/// Failure raised by user code, fatal to the server loop.
pub type CallbackError = Box<dyn Error + Send + Sync>;

/// Action requested for the connection the message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the connection open and move on.
    Continue,
    /// Send a reply on the same connection.
    Respond(Message),
    /// Start the closing handshake for this connection only.
    Close,
    /// Shut the whole server down.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation<C> {
    carry: C,
    outcome: Outcome,
}

impl<C> Continuation<C> {
    pub fn start(carry: C) -> Self {
        Self {
            carry,
            outcome: Outcome::Continue,
        }
    }

    pub fn carry(&self) -> &C {
        &self.carry
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn continue_with(self, carry: C) -> Self {
        Self {
            carry,
            outcome: Outcome::Continue,
        }
    }

    /// Reply to the sender, keeping the current carry.
    pub fn respond(self, message: Message) -> Self {
        Self {
            outcome: Outcome::Respond(message),
            ..self
        }
    }

    /// Close the sender's connection, keeping the current carry.
    pub fn close(self) -> Self {
        Self {
            outcome: Outcome::Close,
            ..self
        }
    }

    /// Stop the server, `carry` becomes its return value.
    pub fn stop(self, carry: C) -> Self {
        Self {
            carry,
            outcome: Outcome::Stop,
        }
    }

    pub fn into_parts(self) -> (C, Outcome) {
        (self.carry, self.outcome)
    }
}
