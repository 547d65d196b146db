use std::{
    io,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use nix::errno::Errno;
use thiserror::Error;

use crate::{message::Message, process::Address};

use super::{
    connections::{Connections, Ready},
    continuation::{CallbackError, Continuation},
    signals::Signals,
    transport::TransportError,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] io::Error),
    #[error("callback failed: {0}")]
    Callback(#[source] CallbackError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Idle time after which a connection is sent a heartbeat.
    pub heartbeat: Duration,
    /// Longest a single readiness poll may block.
    pub poll_interval: Duration,
    /// Shut down after this long without any readable socket.
    pub timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn with_heartbeat(self, heartbeat: Duration) -> Self {
        Self { heartbeat, ..self }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingConnection,
    ShuttingDown,
}

/// Server side of a named process.
///
/// Every call to [`listen`](Server::listen) binds the socket, serves clients
/// from a single thread until shut down, then removes the socket again.
#[derive(Debug, Clone)]
pub struct Server {
    address: Address,
    config: ServerConfig,
}

impl Server {
    pub fn new(address: Address, config: ServerConfig) -> Self {
        Self { address, config }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve clients, folding every application message into `carry`.
    ///
    /// The loop ends once a shutdown was requested (by the callback stopping,
    /// the idle timeout, or a termination signal) and every connection has
    /// completed its closing handshake. The last carry is returned.
    ///
    /// A failing callback closes every connection and the listener before
    /// the error is returned.
    pub fn listen<C, F>(&self, carry: C, mut callback: F) -> Result<C, ServerError>
    where
        F: FnMut(Message, Continuation<C>) -> Result<Continuation<C>, CallbackError>,
    {
        let signals = Signals::register().map_err(ServerError::Signal)?;
        let connections = Connections::open(&self.address, self.config.heartbeat)?;
        info!("process {} ready", self.address.name());

        let mut iteration = Iteration {
            config: &self.config,
            connections,
            state: State::AwaitingConnection,
            last_activity: Instant::now(),
        };

        let res = iteration.run(carry, &mut callback, &signals);
        debug!("process {} done", self.address.name());
        res
    }
}

struct Iteration<'a> {
    config: &'a ServerConfig,
    connections: Connections,
    state: State,
    last_activity: Instant,
}

impl Iteration<'_> {
    fn run<C, F>(&mut self, mut carry: C, callback: &mut F, signals: &Signals) -> Result<C, ServerError>
    where
        F: FnMut(Message, Continuation<C>) -> Result<Continuation<C>, CallbackError>,
    {
        loop {
            if signals.take() {
                info!("termination signal received");
                self.shutdown();
            }

            let ready = match self.connections.watch(self.config.poll_interval) {
                Ok(ready) => ready,
                Err(e) => match self.poll_failed(e) {
                    Some(ready) => ready,
                    None => return Ok(carry),
                },
            };

            if !ready.is_empty() {
                self.last_activity = Instant::now();
            }

            if ready.listener && self.state == State::AwaitingConnection {
                if let Err(e) = self.connections.accept() {
                    warn!("failed to accept connection: {e}");
                }
            }

            self.connections.heartbeat(&ready.connections);

            let mut stop = false;
            for id in ready.connections {
                match self.connections.notify(id, carry, callback) {
                    Ok(notified) => {
                        carry = notified.carry;
                        stop |= notified.stop;
                    }
                    Err(e) => {
                        warn!("callback failed, closing every connection");
                        self.connections.close();
                        return Err(ServerError::Callback(e));
                    }
                }
            }

            if stop {
                info!("stop requested by callback");
                self.shutdown();
            }

            if let Some(timeout) = self.config.timeout {
                if self.state == State::AwaitingConnection && self.last_activity.elapsed() > timeout
                {
                    info!("no activity for {timeout:?}");
                    self.shutdown();
                }
            }

            if self.state == State::ShuttingDown && self.connections.terminate() {
                return Ok(carry);
            }
        }
    }

    /// Nothing is ready after a failed poll while awaiting connections; while
    /// shutting down everything is torn down and `None` ends the loop.
    fn poll_failed(&mut self, error: Errno) -> Option<Ready> {
        match self.state {
            State::AwaitingConnection => {
                debug!("poll failed, retrying next cycle: {error}");
                Some(Ready::default())
            }
            State::ShuttingDown => {
                warn!("poll failed while shutting down, closing everything: {error}");
                self.connections.close();
                None
            }
        }
    }

    fn shutdown(&mut self) {
        if self.state == State::ShuttingDown {
            return;
        }

        info!("shutting down {} connection(s)", self.connections.len());
        self.state = State::ShuttingDown;
        self.connections.shutdown();
    }
}
