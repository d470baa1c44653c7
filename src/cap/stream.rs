use std::cmp;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Sender};

use super::engine::Intent;
use crate::Error;

/// Handle to one established CAP connection. Obtained from
/// [`CapSocket::connect`](crate::CapSocket::connect) or
/// [`CapSocket::accept`](crate::CapSocket::accept); every call posts an
/// intent to the socket's event loop and waits for its completion.
#[derive(Debug)]
pub struct CapStream {
    pub(crate) mailbox: Sender<Intent>,
    pub(crate) peer: SocketAddr,
    pub(crate) closed: bool,
}

impl CapStream {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Hand one whole message to the sender. Blocks while the send window is
    /// full, until every fragment has been admitted.
    pub fn sendto(&self, bytes: &[u8]) -> Result<(), Error> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Send {
                data: bytes.to_vec(),
                done,
            })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)?
    }

    /// Block until a complete message has been reassembled, then copy it into
    /// `buf` and return the byte count. A message longer than `buf` is
    /// truncated.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Recv { done })
            .map_err(|_| Error::Disconnected)?;

        let msg = wait.recv().map_err(|_| Error::Disconnected)??;

        let len = cmp::min(buf.len(), msg.len());
        buf[..len].copy_from_slice(&msg[..len]);

        Ok(len)
    }

    /// Initiate teardown. On the active side this sends the FIN (once the
    /// send buffer drains) and returns when the peer has acknowledged it; on
    /// the passive side the connection record is released immediately.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Close { done })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)?
    }
}

impl Drop for CapStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
