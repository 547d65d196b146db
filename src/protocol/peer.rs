//! Client side of the handshake, shared by [`Sender`](super::Sender) and
//! [`Receiver`](super::Receiver).
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use log::{debug, trace};
use thiserror::Error;

use crate::{
    message::{Control, Message},
    process::{Address, ProcessName},
};

use super::{client::Client, continuation::CallbackError, transport::TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("nothing received within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by the server")]
    ConnectionClosed,
    #[error("callback failed: {0}")]
    Callback(#[source] CallbackError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Longest wait for any expected frame.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[derive(Debug)]
pub(crate) enum Inbound {
    Control(Control),
    Message(Message),
    Closed,
}

/// Connection to a server that completed the opening handshake.
///
/// Every failure closes the stream before being returned.
#[derive(Debug)]
pub(crate) struct Peer {
    client: Client,
    timeout: Duration,
    inbox: VecDeque<Message>,
}

impl Peer {
    /// Connect, answer `ConnectionStart` and introduce ourselves as `own`.
    pub(crate) fn open(
        address: &Address,
        own: &ProcessName,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::connect(address.path())?;
        let mut peer = Self {
            client,
            timeout,
            inbox: VecDeque::new(),
        };

        peer.expect(Control::ConnectionStart)?;
        peer.send(&Control::ConnectionStartOk.message())?;
        peer.send(&Message::greeting(own))?;
        peer.expect(Control::MessageReceived)?;
        debug!("connected to {}", address.name());

        Ok(peer)
    }

    pub(crate) fn closed(&self) -> bool {
        self.client.closed()
    }

    pub(crate) fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        match self.client.send(message) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Wait for `expected`, keeping application messages for later.
    pub(crate) fn expect(&mut self, expected: Control) -> Result<(), ClientError> {
        loop {
            match self.receive()? {
                Inbound::Control(control) if control == expected => return Ok(()),
                Inbound::Control(control) => {
                    trace!("ignoring {control:?} while waiting for {expected:?}")
                }
                Inbound::Message(message) => self.inbox.push_back(message),
                Inbound::Closed => return Err(ClientError::ConnectionClosed),
            }
        }
    }

    /// Next application message, `None` once the server closed the connection.
    pub(crate) fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        if let Some(message) = self.inbox.pop_front() {
            return Ok(Some(message));
        }

        loop {
            match self.receive()? {
                Inbound::Message(message) => return Ok(Some(message)),
                Inbound::Control(control) => trace!("ignoring {control:?}"),
                Inbound::Closed => return Ok(None),
            }
        }
    }

    /// Process every frame already available without blocking.
    pub(crate) fn drain(&mut self) -> Result<(), ClientError> {
        while !self.closed() {
            match self.client.wait_readable(Duration::ZERO) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return self.fail(e),
            }

            match self.read_frame()? {
                Inbound::Message(message) => self.inbox.push_back(message),
                Inbound::Control(_) | Inbound::Closed => {}
            }
        }
        Ok(())
    }

    pub(crate) fn take_inbox(&mut self) -> VecDeque<Message> {
        std::mem::take(&mut self.inbox)
    }

    /// Closing handshake initiated from this side.
    pub(crate) fn close(&mut self) -> Result<(), ClientError> {
        if self.closed() {
            return Ok(());
        }

        self.send(&Control::ConnectionClose.message())?;
        loop {
            match self.receive()? {
                Inbound::Control(Control::ConnectionCloseOk) | Inbound::Closed => break,
                Inbound::Message(message) => self.inbox.push_back(message),
                Inbound::Control(_) => {}
            }
        }

        self.abandon();
        Ok(())
    }

    pub(crate) fn abandon(&mut self) {
        if !self.client.closed() {
            let _ = self.client.close();
        }
    }

    /// Next frame other than a heartbeat, within the configured timeout.
    fn receive(&mut self) -> Result<Inbound, ClientError> {
        if self.closed() {
            return Ok(Inbound::Closed);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.client.wait_readable(remaining) {
                Ok(true) => {}
                Ok(false) => return self.fail(ClientError::Timeout(self.timeout)),
                Err(e) => return self.fail(e),
            }

            match self.read_frame()? {
                Inbound::Control(Control::Heartbeat) => continue,
                inbound => return Ok(inbound),
            }
        }
    }

    /// Read one frame, answering a server-initiated close on the spot.
    fn read_frame(&mut self) -> Result<Inbound, ClientError> {
        let message = match self.client.read() {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.abandon();
                return Ok(Inbound::Closed);
            }
            Err(e) => return self.fail(e),
        };

        match Control::of(&message) {
            Some(Control::ConnectionClose) => {
                if let Err(e) = self.client.send(&Control::ConnectionCloseOk.message()) {
                    debug!("failed to acknowledge close: {e}");
                }
                self.abandon();
                Ok(Inbound::Closed)
            }
            Some(control) => Ok(Inbound::Control(control)),
            None => Ok(Inbound::Message(message)),
        }
    }

    fn fail<T>(&mut self, error: impl Into<ClientError>) -> Result<T, ClientError> {
        self.abandon();
        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use std::{os::unix::net::UnixListener, thread};

    use tempdir::TempDir;

    use crate::process::SocketDir;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Accept one connection and play the server's part of the handshake.
    fn serve<F>(temp: &TempDir, script: F) -> (Address, thread::JoinHandle<()>)
    where
        F: FnOnce(Client) + Send + 'static,
    {
        let name: ProcessName = "server".parse().unwrap();
        let address = SocketDir::new(temp.path()).address(&name);
        let listener = UnixListener::bind(address.path()).unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut client = Client::new(stream);
            client.send(&Control::ConnectionStart.message()).unwrap();
            assert_eq!(
                client.read().unwrap(),
                Some(Control::ConnectionStartOk.message())
            );
            let greeting = client.read().unwrap().unwrap();
            assert_eq!(greeting.greeting_name(), Some("client".parse().unwrap()));
            client.send(&Control::MessageReceived.message()).unwrap();
            script(client);
        });

        (address, handle)
    }

    fn own() -> ProcessName {
        "client".parse().unwrap()
    }

    #[test]
    fn default_config() {
        assert_eq!(ClientConfig::default().timeout, Duration::from_secs(60));
    }

    #[test]
    fn open_performs_the_handshake() {
        let temp = TempDir::new("peer").unwrap();
        let (address, server) = serve(&temp, |mut client| {
            client.send(&Control::Heartbeat.message()).unwrap();
            let hello = Message::generic("text/plain", "hello").unwrap();
            client.send(&hello).unwrap();
        });

        let mut peer = Peer::open(&address, &own(), TIMEOUT).unwrap();
        let message = peer.next_message().unwrap().unwrap();

        assert_eq!(message.text(), Some("hello"));
        assert_eq!(peer.next_message().unwrap(), None);
        assert!(peer.closed());
        server.join().unwrap();
    }

    #[test]
    fn server_close_is_acknowledged() {
        let temp = TempDir::new("peer").unwrap();
        let (address, server) = serve(&temp, |mut client| {
            client.send(&Control::ConnectionClose.message()).unwrap();
            assert_eq!(
                client.read().unwrap(),
                Some(Control::ConnectionCloseOk.message())
            );
        });

        let mut peer = Peer::open(&address, &own(), TIMEOUT).unwrap();

        assert!(matches!(
            peer.expect(Control::MessageReceived),
            Err(ClientError::ConnectionClosed)
        ));
        assert!(peer.closed());
        server.join().unwrap();
    }

    #[test]
    fn close_waits_for_close_ok() {
        let temp = TempDir::new("peer").unwrap();
        let (address, server) = serve(&temp, |mut client| {
            assert_eq!(
                client.read().unwrap(),
                Some(Control::ConnectionClose.message())
            );
            client.send(&Control::ConnectionCloseOk.message()).unwrap();
        });

        let mut peer = Peer::open(&address, &own(), TIMEOUT).unwrap();
        peer.close().unwrap();

        assert!(peer.closed());
        server.join().unwrap();
    }

    #[test]
    fn silence_times_out() {
        let temp = TempDir::new("peer").unwrap();
        let (address, server) = serve(&temp, |client| {
            thread::sleep(Duration::from_millis(500));
            drop(client);
        });

        let mut peer = Peer::open(&address, &own(), Duration::from_millis(100)).unwrap();

        assert!(matches!(
            peer.next_message(),
            Err(ClientError::Timeout(_))
        ));
        assert!(peer.closed());
        server.join().unwrap();
    }
}
