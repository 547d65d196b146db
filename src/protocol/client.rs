use std::{
    io,
    net::Shutdown,
    os::{
        fd::{AsFd, BorrowedFd},
        unix::net::UnixStream,
    },
    path::Path,
    time::{Duration, Instant},
};

use log::trace;
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};

use crate::message::Message;

use super::transport::{Codec, TransportError};

/// Poll flags meaning a read will not block.
pub(crate) fn readable(flags: PollFlags) -> bool {
    flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
}

/// Longest single poll, `poll(2)` takes its timeout in milliseconds.
pub(crate) fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX))
}

/// One end of a connection, framing [`Message`]s over a [`UnixStream`].
#[derive(Debug)]
pub struct Client {
    stream: Option<UnixStream>,
    codec: Codec,
}

impl Client {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream: Some(stream),
            codec: Codec::new(),
        }
    }

    pub fn connect(path: &Path) -> Result<Self, TransportError> {
        Ok(Self::new(UnixStream::connect(path)?))
    }

    /// Write one frame; fails without any I/O once the client is closed.
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        trace!("sending {} message", message.media_type());
        self.codec.write(stream, message)
    }

    /// Read one frame, `None` when the peer went away or sent garbage.
    pub fn read(&mut self) -> Result<Option<Message>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        self.codec.decode(stream)
    }

    /// Close the stream, a second call reports [`TransportError::Closed`].
    pub fn close(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.take().ok_or(TransportError::Closed)?;
        match stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn closed(&self) -> bool {
        self.stream.is_none()
    }

    pub(crate) fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.stream.as_ref().map(|s| s.as_fd())
    }

    /// Wait up to `timeout` for the stream to become readable.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
        let fd = self.fd().ok_or(TransportError::Closed)?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

            match poll(&mut fds, poll_timeout(remaining)) {
                Ok(0) if remaining.is_zero() => return Ok(false),
                Ok(0) => continue,
                Ok(_) => return Ok(fds[0].revents().is_some_and(readable)),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e).into()),
            }
        }
    }
}
