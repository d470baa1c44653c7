#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Address already in use")]
    AddressInUse,

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Socket is already connected")]
    AlreadyConnected,

    #[error("Handshake retries exhausted, peer did not answer")]
    ConnectTimeout,

    #[error("Retransmission retries exhausted, peer unreachable")]
    PeerUnreachable,

    #[error("Connection has been closed")]
    ConnectionClosed,

    #[error("Operation would block")]
    WouldBlock,

    #[error("Malformed segment: {0}")]
    MalformedSegment(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Socket engine has shut down")]
    Disconnected,
}

// A timer-driven failure unblocks every waiting call with the same error, so
// the engine needs to hand out copies.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::AddressInUse => Error::AddressInUse,
            Error::NotConnected => Error::NotConnected,
            Error::AlreadyConnected => Error::AlreadyConnected,
            Error::ConnectTimeout => Error::ConnectTimeout,
            Error::PeerUnreachable => Error::PeerUnreachable,
            Error::ConnectionClosed => Error::ConnectionClosed,
            Error::WouldBlock => Error::WouldBlock,
            Error::MalformedSegment(m) => Error::MalformedSegment(m),
            Error::Transport(e) => Error::Transport(std::io::Error::new(e.kind(), e.to_string())),
            Error::Disconnected => Error::Disconnected,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for Error {}
