//! CAP, the Cumulative ACK Protocol: connection-oriented, unicast, reliable
//! message delivery over UDP. One active sender and one passive receiver per
//! connection; segmentation, cumulative acknowledgment, timeout-driven
//! retransmission and a three-way handshake do the rest.
//!
//! ```no_run
//! use cap::CapSocket;
//!
//! let socket = CapSocket::bind("127.0.0.1:9000".parse().unwrap()).unwrap();
//! let stream = socket.connect("127.0.0.1:9001".parse().unwrap()).unwrap();
//! stream.sendto(b"hello").unwrap();
//! ```

use std::net::SocketAddr;
use std::sync::mpsc::{self, Sender};

mod err;
pub use err::*;

mod cap;
pub use crate::cap::*;

use crate::cap::engine::{spawn_engine, Intent};

/// A CAP endpoint bound to a local UDP address. All protocol state lives on a
/// dedicated event-loop thread; this handle (and the [`CapStream`]s it hands
/// out) talk to it through a mailbox.
#[derive(Debug)]
pub struct CapSocket {
    mailbox: Sender<Intent>,
    local_addr: SocketAddr,
}

impl CapSocket {
    /// Bind the underlying datagram socket and start the event loop.
    pub fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let transport = UdpTransport::bind(addr)?;
        let local_addr = transport.local_addr()?;
        let mailbox = spawn_engine(transport);

        Ok(CapSocket {
            mailbox,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Active open: drive the three-way handshake, blocking until the
    /// connection is established or the handshake retries run out.
    pub fn connect(&self, peer: SocketAddr) -> Result<CapStream, Error> {
        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Connect { peer, done })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)??;

        Ok(CapStream {
            mailbox: self.mailbox.clone(),
            peer,
            closed: false,
        })
    }

    /// Passive open. Idempotent.
    pub fn listen(&self) -> Result<(), Error> {
        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Listen { done })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)?
    }

    /// Block until an incoming connection reaches ESTABLISHED.
    pub fn accept(&self) -> Result<CapStream, Error> {
        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::Accept { done })
            .map_err(|_| Error::Disconnected)?;

        let peer = wait.recv().map_err(|_| Error::Disconnected)??;

        Ok(CapStream {
            mailbox: self.mailbox.clone(),
            peer,
            closed: false,
        })
    }

    pub fn set_option(&self, opt: SockOpt) -> Result<(), Error> {
        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::SetOpt { opt, done })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)?
    }

    pub fn option(&self, key: SockOptKey) -> Result<SockOpt, Error> {
        let (done, wait) = mpsc::channel();
        self.mailbox
            .send(Intent::GetOpt { key, done })
            .map_err(|_| Error::Disconnected)?;

        wait.recv().map_err(|_| Error::Disconnected)?
    }
}

impl Drop for CapSocket {
    fn drop(&mut self) {
        let _ = self.mailbox.send(Intent::Shutdown);
    }
}
