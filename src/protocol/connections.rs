//! Registry of open connections and readiness polling.
//!
//! [`Connections`] owns the listening socket and one [`ClientLifecycle`] per
//! accepted connection. The set of polled streams is always derived from the
//! registry itself, so a connection can't be polled without a lifecycle nor
//! hold a lifecycle without being polled. The listener is polled on top of
//! that until the registry starts shutting down.
use std::{
    collections::BTreeMap,
    fs, io,
    os::{
        fd::AsFd,
        unix::net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use nix::poll::{PollFd, PollFlags, poll};

use crate::{
    message::Message,
    process::{Address, SocketDir},
};

use super::{
    client::{Client, poll_timeout, readable},
    continuation::{CallbackError, Continuation},
    lifecycle::{ClientLifecycle, Notified},
};

const MIN_STREAM_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// Streams found readable by one [`Connections::watch`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ready {
    pub listener: bool,
    pub connections: Vec<ConnectionId>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        !self.listener && self.connections.is_empty()
    }
}

#[derive(Debug)]
pub struct Connections {
    listener: Option<UnixListener>,
    path: PathBuf,
    listening: bool,
    lifecycles: BTreeMap<ConnectionId, ClientLifecycle>,
    next_id: u64,
    heartbeat: Duration,
}

impl Connections {
    /// Bind the listening socket of `address`.
    ///
    /// A socket file left behind by a dead server is replaced, one still
    /// accepting connections makes this fail with [`io::ErrorKind::AddrInUse`].
    pub fn open(address: &Address, heartbeat: Duration) -> io::Result<Self> {
        let path = address.path();
        if let Some(dir) = path.parent() {
            SocketDir::new(dir).ensure()?;
        }

        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("process '{}' is already listening", address.name()),
                ));
            }
            debug!("removing stale socket {path:?}");
            fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        info!("listening at {path:?}");

        Ok(Self {
            listener: Some(listener),
            path: path.to_path_buf(),
            listening: true,
            lifecycles: BTreeMap::new(),
            next_id: 0,
            heartbeat,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lifecycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lifecycles.is_empty()
    }

    /// Whether the listener is part of the polled set.
    pub fn listening(&self) -> bool {
        self.listening && self.listener.is_some()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lifecycles.keys().copied().collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ClientLifecycle> {
        self.lifecycles.get(&id)
    }

    /// Wait up to `interval` for the listener or any connection to be readable.
    pub fn watch(&self, interval: Duration) -> nix::Result<Ready> {
        let mut fds = Vec::with_capacity(self.lifecycles.len() + 1);
        let mut ids = Vec::with_capacity(self.lifecycles.len());

        let listener = match &self.listener {
            Some(listener) if self.listening => {
                fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
                true
            }
            _ => false,
        };

        for (id, lifecycle) in &self.lifecycles {
            if let Some(fd) = lifecycle.client().fd() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
                ids.push(*id);
            }
        }

        poll(&mut fds, poll_timeout(interval))?;

        let mut revents = fds.iter().map(|fd| fd.revents().is_some_and(readable));
        let listener = listener && revents.next().unwrap_or(false);
        let connections = ids
            .into_iter()
            .zip(revents)
            .filter_map(|(id, ready)| ready.then_some(id))
            .collect();

        Ok(Ready {
            listener,
            connections,
        })
    }

    /// Accept one pending connection and start its lifecycle.
    ///
    /// `Ok(None)` when nothing was pending or the connection was discarded
    /// because `ConnectionStart` couldn't be sent.
    pub fn accept(&mut self) -> io::Result<Option<ConnectionId>> {
        let Some(listener) = &self.listener else {
            return Ok(None);
        };

        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };
        stream.set_nonblocking(false)?;
        // a peer stalling mid-frame or not reading must not block the whole loop
        let timeout = Some(self.heartbeat.max(MIN_STREAM_TIMEOUT));
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;

        match ClientLifecycle::start(Client::new(stream), self.heartbeat) {
            Ok(lifecycle) => {
                let id = self.add(lifecycle);
                debug!("accepted connection {id:?}");
                Ok(Some(id))
            }
            Err(e) => {
                warn!("discarding connection that couldn't be started: {e}");
                Ok(None)
            }
        }
    }

    pub fn add(&mut self, lifecycle: ClientLifecycle) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.lifecycles.insert(id, lifecycle);
        id
    }

    /// Heartbeat every connection that wasn't found ready.
    pub fn heartbeat(&mut self, ready: &[ConnectionId]) {
        for (id, lifecycle) in self.lifecycles.iter_mut() {
            if !ready.contains(id) {
                lifecycle.heartbeat();
            }
        }
    }

    /// Feed the next frame of `id` to its lifecycle, dropping the connection
    /// once it is fully closed.
    pub fn notify<C, F>(
        &mut self,
        id: ConnectionId,
        carry: C,
        callback: &mut F,
    ) -> Result<Notified<C>, CallbackError>
    where
        F: FnMut(Message, Continuation<C>) -> Result<Continuation<C>, CallbackError>,
    {
        let Some(lifecycle) = self.lifecycles.get_mut(&id) else {
            return Ok(Notified::proceed(carry));
        };

        let notified = lifecycle.notify(carry, callback);
        if lifecycle.is_garbage() {
            debug!("removing connection {id:?}");
            self.lifecycles.remove(&id);
        }
        notified
    }

    /// Stop accepting and start closing every connection.
    pub fn shutdown(&mut self) {
        self.listening = false;
        for lifecycle in self.lifecycles.values_mut() {
            lifecycle.shutdown();
        }
        self.lifecycles.retain(|_, lifecycle| !lifecycle.is_garbage());
    }

    /// Tear everything down without any handshake.
    pub fn close(&mut self) {
        for lifecycle in self.lifecycles.values_mut() {
            lifecycle.discard();
        }
        self.lifecycles.clear();
        self.close_listener();
    }

    /// Close the listener once no connection is left, returns whether it did.
    pub fn terminate(&mut self) -> bool {
        if !self.is_empty() {
            return false;
        }

        self.close_listener();
        true
    }

    fn close_listener(&mut self) {
        self.listening = false;
        if self.listener.take().is_none() {
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => info!("stopped listening at {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove socket {:?}: {e}", self.path),
        }
    }
}

impl Drop for Connections {
    fn drop(&mut self) {
        self.close_listener();
    }
}
