use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Instant;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::Error;

/// The engine's view of the datagram substrate. `recv` returns `Ok(None)`
/// when the deadline passes without a datagram. Closing is dropping.
pub trait Transport {
    fn local_addr(&self) -> Result<SocketAddr, Error>;

    fn send(&mut self, peer: SocketAddr, buf: &[u8]) -> Result<(), Error>;

    fn recv(&mut self, deadline: Instant) -> Result<Option<(SocketAddr, Vec<u8>)>, Error>;
}

/// The only place that touches OS sockets.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                Error::AddressInUse
            } else {
                Error::Transport(e)
            }
        })?;

        socket.set_nonblocking(true)?;

        Ok(UdpTransport {
            socket,
            buf: vec![0u8; 64 * 1024],
        })
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    fn send(&mut self, peer: SocketAddr, buf: &[u8]) -> Result<(), Error> {
        self.socket.send_to(buf, peer)?;
        Ok(())
    }

    fn recv(&mut self, deadline: Instant) -> Result<Option<(SocketAddr, Vec<u8>)>, Error> {
        loop {
            let timeout = deadline
                .saturating_duration_since(Instant::now())
                .as_millis()
                .min(i32::MAX as u128) as i32;

            let mut pfd = [PollFd::new(self.socket.as_raw_fd(), PollFlags::POLLIN)];
            let ready = match poll(&mut pfd[..], timeout) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(Error::Transport(io::Error::from_raw_os_error(e as i32)));
                }
            };

            if ready == 0 {
                return Ok(None);
            }

            match self.socket.recv_from(&mut self.buf) {
                Ok((n, peer)) => return Ok(Some((peer, self.buf[..n].to_vec()))),
                // Another thread of control raced us to the datagram, or the
                // readiness was spurious; go back to waiting.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(Error::Transport(e)),
            }
        }
    }
}
