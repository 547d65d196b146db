//! Entry point tying names to sockets.
//!
//! # Example
//! ```rust,no_run
//! use namedipc::{ClientConfig, Ipc, Message, ServerConfig};
//!
//! let ipc = Ipc::default();
//! let server = ipc.listen(&"server".parse().unwrap(), ServerConfig::default());
//! let mut sender = ipc.sender(
//!     "client".parse().unwrap(),
//!     &"server".parse().unwrap(),
//!     ClientConfig::default(),
//! );
//!
//! sender
//!     .send(&Message::generic("text/plain", "hello world").unwrap())
//!     .unwrap();
//! ```
use std::{
    io, thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    process::{Address, ProcessName, SocketDir},
    protocol::{ClientConfig, Receiver, Sender, Server, ServerConfig},
};

const WAIT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
pub struct Ipc {
    sockets: SocketDir,
}

impl Ipc {
    pub fn new(sockets: SocketDir) -> Self {
        Self { sockets }
    }

    pub fn sockets(&self) -> &SocketDir {
        &self.sockets
    }

    pub fn address(&self, name: &ProcessName) -> Address {
        self.sockets.address(name)
    }

    /// Every process currently owning a socket.
    pub fn processes(&self) -> io::Result<Vec<ProcessName>> {
        self.sockets.processes()
    }

    pub fn exists(&self, name: &ProcessName) -> bool {
        self.sockets.exists(name)
    }

    /// Wait until `name` owns a socket, `None` if it didn't within `timeout`.
    pub fn wait(&self, name: &ProcessName, timeout: Duration) -> Option<Address> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.exists(name) {
                return Some(self.address(name));
            }
            if Instant::now() >= deadline {
                debug!("process {name} didn't show up within {timeout:?}");
                return None;
            }
            thread::sleep(WAIT_INTERVAL);
        }
    }

    pub fn listen(&self, name: &ProcessName, config: ServerConfig) -> Server {
        Server::new(self.address(name), config)
    }

    pub fn sender(&self, from: ProcessName, to: &ProcessName, config: ClientConfig) -> Sender {
        Sender::new(from, self.address(to), config)
    }

    pub fn receiver(&self, own: ProcessName, from: &ProcessName, config: ClientConfig) -> Receiver {
        Receiver::new(own, self.address(from), config)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn wait_for_a_process() {
        let temp = TempDir::new("ipc").unwrap();
        let ipc = Ipc::new(SocketDir::new(temp.path()));
        let name: ProcessName = "late".parse().unwrap();
        assert_eq!(ipc.sockets().path(), temp.path());

        assert_eq!(ipc.wait(&name, Duration::from_millis(20)), None);

        let _listener = UnixListener::bind(ipc.address(&name).path()).unwrap();
        assert_eq!(
            ipc.wait(&name, Duration::from_millis(20)),
            Some(ipc.address(&name))
        );
        assert_eq!(ipc.processes().unwrap(), vec![name]);
    }
}
