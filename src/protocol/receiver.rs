use std::ops::ControlFlow;

use log::debug;

use crate::{
    message::Message,
    process::{Address, ProcessName},
};

use super::{
    continuation::CallbackError,
    peer::{ClientConfig, ClientError, Peer},
};

/// Receives the messages a named process pushes to us.
#[derive(Debug, Clone)]
pub struct Receiver {
    own: ProcessName,
    from: Address,
    config: ClientConfig,
}

impl Receiver {
    pub fn new(own: ProcessName, from: Address, config: ClientConfig) -> Self {
        Self { own, from, config }
    }

    /// Connect and hand every application message to `callback`.
    ///
    /// Returns once the server closed the connection or the callback breaks,
    /// in which case the connection is closed from our side. Waiting longer
    /// than the configured timeout for a message is an error.
    pub fn listen<F>(&self, mut callback: F) -> Result<(), ClientError>
    where
        F: FnMut(Message, &ProcessName) -> Result<ControlFlow<()>, CallbackError>,
    {
        let mut peer = Peer::open(&self.from, &self.own, self.config.timeout)?;

        while let Some(message) = peer.next_message()? {
            match callback(message, self.from.name()) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    debug!("receiver stopped, closing connection to {}", self.from.name());
                    return peer.close();
                }
                Err(e) => {
                    peer.abandon();
                    return Err(ClientError::Callback(e));
                }
            }
        }

        debug!("{} closed the connection", self.from.name());
        Ok(())
    }
}
