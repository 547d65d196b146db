use std::collections::VecDeque;

use log::debug;

use crate::{
    message::{Control, Message},
    process::{Address, ProcessName},
};

use super::peer::{ClientConfig, ClientError, Peer};

/// Sends messages to a named process.
///
/// The connection is opened on the first [`send`](Sender::send), reused while
/// it stays open and transparently reopened once the server closed it. It is
/// closed with a proper handshake when the sender is dropped.
#[derive(Debug)]
pub struct Sender {
    from: ProcessName,
    to: Address,
    config: ClientConfig,
    peer: Option<Peer>,
    inbox: VecDeque<Message>,
}

impl Sender {
    pub fn new(from: ProcessName, to: Address, config: ClientConfig) -> Self {
        Self {
            from,
            to,
            config,
            peer: None,
            inbox: VecDeque::new(),
        }
    }

    pub fn to(&self) -> &Address {
        &self.to
    }

    pub fn connected(&self) -> bool {
        self.peer.as_ref().is_some_and(|peer| !peer.closed())
    }

    /// Send `message` and wait for the server to acknowledge it.
    pub fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let peer = self.connection()?;
        peer.send(message)?;
        peer.expect(Control::MessageReceived)
    }

    /// Next message the server sent back, waiting for one if none arrived yet.
    pub fn receive(&mut self) -> Result<Message, ClientError> {
        if let Some(message) = self.inbox.pop_front() {
            return Ok(message);
        }

        match self.peer.as_mut() {
            Some(peer) => peer.next_message()?.ok_or(ClientError::ConnectionClosed),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Messages the server sent back so far, without blocking.
    pub fn responses(&mut self) -> Vec<Message> {
        if let Some(peer) = self.peer.as_mut() {
            if let Err(e) = peer.drain() {
                debug!("connection to {} lost: {e}", self.to.name());
            }
            self.inbox.extend(peer.take_inbox());
        }

        self.inbox.drain(..).collect()
    }

    /// Close the connection, if any, with the closing handshake.
    pub fn close(&mut self) -> Result<(), ClientError> {
        let Some(mut peer) = self.peer.take() else {
            return Ok(());
        };

        let res = peer.close();
        self.inbox.extend(peer.take_inbox());
        res
    }

    fn connection(&mut self) -> Result<&mut Peer, ClientError> {
        if let Some(mut peer) = self.peer.take() {
            if let Err(e) = peer.drain() {
                debug!("connection to {} lost: {e}", self.to.name());
            }
            self.inbox.extend(peer.take_inbox());

            if !peer.closed() {
                return Ok(self.peer.insert(peer));
            }
        }

        debug!("connecting {} to {}", self.from, self.to.name());
        let peer = Peer::open(&self.to, &self.from, self.config.timeout)?;
        Ok(self.peer.insert(peer))
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("failed to close connection to {}: {e}", self.to.name());
        }
    }
}
