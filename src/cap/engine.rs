use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{Conn, Event, Kind, Segment, SockOpt, SockOptKey, SockOpts, State, Transport};
use crate::Error;

/// Upper bound on one transport poll, so intents posted while the loop is
/// waiting for the network are still serviced promptly.
const TICK: Duration = Duration::from_millis(10);

pub(crate) type Reply<T> = Sender<Result<T, Error>>;

/// An application call, posted through the mailbox. Each variant carries the
/// completion sender its caller blocks on.
pub(crate) enum Intent {
    Connect { peer: SocketAddr, done: Reply<()> },
    Listen { done: Reply<()> },
    Accept { done: Reply<SocketAddr> },
    Send { data: Vec<u8>, done: Reply<()> },
    Recv { done: Reply<Vec<u8>> },
    Close { done: Reply<()> },
    SetOpt { opt: SockOpt, done: Reply<()> },
    GetOpt { key: SockOptKey, done: Reply<SockOpt> },
    Shutdown,
}

pub(crate) fn spawn_engine<T>(transport: T) -> Sender<Intent>
where
    T: Transport + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || Engine::new(transport, rx).run());

    tx
}

/// The single owner of all connection state for one socket. Application
/// threads never touch the connection record; they post intents and wait.
struct Engine<T: Transport> {
    transport: T,
    mailbox: Receiver<Intent>,
    opts: SockOpts,
    listening: bool,
    conn: Option<Conn>,

    connect_waiter: Option<Reply<()>>,
    accept_waiters: VecDeque<Reply<SocketAddr>>,
    /// FIFO of blocked `sendto` calls; `None` marks a non-blocking send that
    /// already returned but still owns one `MessageEnqueued` slot.
    send_waiters: VecDeque<Option<Reply<()>>>,
    recv_waiters: VecDeque<Reply<Vec<u8>>>,
    close_waiter: Option<Reply<()>>,
    /// A passive connection that reached ESTABLISHED before anyone called
    /// `accept`.
    pending_established: Option<SocketAddr>,
    shutdown: bool,
}

impl<T: Transport> Engine<T> {
    fn new(transport: T, mailbox: Receiver<Intent>) -> Self {
        Engine {
            transport,
            mailbox,
            opts: SockOpts::default(),
            listening: false,
            conn: None,
            connect_waiter: None,
            accept_waiters: VecDeque::new(),
            send_waiters: VecDeque::new(),
            recv_waiters: VecDeque::new(),
            close_waiter: None,
            pending_established: None,
            shutdown: false,
        }
    }

    /*
    One loop iteration:
        1. service the mailbox;
        2. wait on the transport until the earliest timer deadline (capped
           by TICK);
        3. if a datagram arrived, decode and hand it to the connection --
           state transition, buffer mutation and replies happen before the
           next input is consumed;
        4. fire expired timers;
        5. map connection events to intent completions.
    */
    fn run(mut self) {
        loop {
            loop {
                match self.mailbox.try_recv() {
                    Ok(intent) => {
                        self.handle_intent(intent);
                        self.drain_events();
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown = true;
                        break;
                    }
                }
            }

            if self.shutdown {
                debug!("engine shutting down");
                break;
            }

            let mut deadline = Instant::now() + TICK;
            if let Some(conn) = self.conn.as_mut() {
                if let Some(d) = conn.next_deadline() {
                    deadline = deadline.min(d);
                }
            }

            match self.transport.recv(deadline) {
                Ok(Some((from, bytes))) => self.dispatch_datagram(from, bytes),
                Ok(None) => {}
                Err(e) => warn!("transport receive failed: {e}"),
            }

            if let Some(conn) = self.conn.as_mut() {
                conn.on_tick(Instant::now(), &mut self.transport);
            }

            self.drain_events();
        }
    }

    /// The network is the fault domain here, not the caller: anything that
    /// does not decode, or arrives from an unexpected source, is dropped.
    fn dispatch_datagram(&mut self, from: SocketAddr, bytes: Vec<u8>) {
        let seg = match Segment::decode(&bytes) {
            Ok(seg) => seg,
            Err(e) => {
                debug!("dropping datagram from {from}: {e}");
                return;
            }
        };

        let Some(conn) = self.conn.as_mut() else {
            debug!("no connection, {:?} from {from} dropped", seg.kind);
            return;
        };

        if let Some(peer) = conn.peer() {
            if peer != from {
                debug!("{:?} from stranger {from} dropped (peer {peer})", seg.kind);
                return;
            }
        }

        conn.on_segment(from, seg, Instant::now(), &mut self.transport);
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Connect { peer, done } => self.on_connect(peer, done),
            Intent::Listen { done } => self.on_listen(done),
            Intent::Accept { done } => self.on_accept(done),
            Intent::Send { data, done } => self.on_send(data, done),
            Intent::Recv { done } => self.on_recv(done),
            Intent::Close { done } => self.on_close(done),
            Intent::SetOpt { opt, done } => {
                self.opts.set(opt);
                if let Some(conn) = self.conn.as_mut() {
                    conn.apply_opts(&self.opts);
                }
                let _ = done.send(Ok(()));
            }
            Intent::GetOpt { key, done } => {
                let _ = done.send(Ok(self.opts.get(key)));
            }
            Intent::Shutdown => self.shutdown = true,
        }
    }

    fn on_connect(&mut self, peer: SocketAddr, done: Reply<()>) {
        if self.listening || self.conn.is_some() {
            let _ = done.send(Err(Error::AlreadyConnected));
            return;
        }

        let conn = Conn::connect(peer, self.opts.clone(), Instant::now(), &mut self.transport);
        self.conn = Some(conn);
        self.connect_waiter = Some(done);
    }

    fn on_listen(&mut self, done: Reply<()>) {
        if self.listening {
            let _ = done.send(Ok(()));
            return;
        }
        if self.conn.is_some() {
            let _ = done.send(Err(Error::AlreadyConnected));
            return;
        }

        self.listening = true;
        self.conn = Some(Conn::listen(self.opts.clone()));
        let _ = done.send(Ok(()));
    }

    fn on_accept(&mut self, done: Reply<SocketAddr>) {
        if !self.listening {
            let _ = done.send(Err(Error::NotConnected));
            return;
        }

        if let Some(peer) = self.pending_established.take() {
            let _ = done.send(Ok(peer));
        } else if self.opts.nonblock {
            let _ = done.send(Err(Error::WouldBlock));
        } else {
            self.accept_waiters.push_back(done);
        }
    }

    fn on_send(&mut self, data: Vec<u8>, done: Reply<()>) {
        let Some(conn) = self.conn.as_mut() else {
            let _ = done.send(Err(Error::NotConnected));
            return;
        };

        if conn.state() != State::Estab || conn.is_closing() {
            let err = if conn.is_closing() {
                Error::ConnectionClosed
            } else {
                Error::NotConnected
            };
            let _ = done.send(Err(err));
            return;
        }

        if self.opts.nonblock {
            if conn.window_full() {
                let _ = done.send(Err(Error::WouldBlock));
                return;
            }
            // Accept the whole message now; the enqueue slot below keeps the
            // MessageEnqueued bookkeeping aligned.
            let _ = done.send(Ok(()));
            self.send_waiters.push_back(None);
        } else {
            self.send_waiters.push_back(Some(done));
        }

        conn.enqueue_message(&data, Instant::now(), &mut self.transport);
    }

    fn on_recv(&mut self, done: Reply<Vec<u8>>) {
        let Some(conn) = self.conn.as_mut() else {
            let _ = done.send(Err(Error::NotConnected));
            return;
        };

        // A stale handle whose connection was torn down and re-listened must
        // not block on the fresh, unrelated record.
        if matches!(
            conn.state(),
            State::Listen | State::SynSent | State::SynRcvd
        ) {
            let _ = done.send(Err(Error::NotConnected));
            return;
        }

        if let Some(msg) = conn.pop_message() {
            let _ = done.send(Ok(msg));
        } else if conn.at_eof() || conn.is_closing() || conn.state() == State::Closed {
            let _ = done.send(Err(Error::ConnectionClosed));
        } else if self.opts.nonblock {
            let _ = done.send(Err(Error::WouldBlock));
        } else {
            self.recv_waiters.push_back(done);
        }
    }

    fn on_close(&mut self, done: Reply<()>) {
        let Some(conn) = self.conn.as_mut() else {
            let _ = done.send(Ok(()));
            return;
        };

        match conn.state() {
            State::FinWait | State::TimeWait | State::Closed => {
                let _ = done.send(Ok(()));
                return;
            }
            State::Estab if conn.is_closing() => {
                let _ = done.send(Ok(()));
                return;
            }
            // A stream handle never owns the listening record; closing one
            // whose connection was already torn down must not kill it.
            State::Listen => {
                let _ = done.send(Ok(()));
                return;
            }
            _ => {}
        }

        // Closing cancels whatever the application still has in flight.
        for waiter in self.send_waiters.drain(..).flatten() {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }
        for waiter in self.recv_waiters.drain(..) {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }

        self.close_waiter = Some(done);
        conn.request_close(Instant::now(), &mut self.transport);
    }

    /// Translate what the connection did into completions for blocked calls.
    fn drain_events(&mut self) {
        let events = match self.conn.as_mut() {
            Some(conn) => conn.take_events(),
            None => return,
        };

        for event in events {
            match event {
                Event::Established => {
                    let conn = self.conn.as_ref().unwrap();
                    match conn.kind() {
                        Kind::Active => {
                            if let Some(done) = self.connect_waiter.take() {
                                let _ = done.send(Ok(()));
                            }
                        }
                        Kind::Passive => {
                            let peer = conn.peer().expect("established without a peer");
                            if let Some(done) = self.accept_waiters.pop_front() {
                                let _ = done.send(Ok(peer));
                            } else {
                                self.pending_established = Some(peer);
                            }
                        }
                    }
                }
                Event::MessageEnqueued => {
                    if let Some(Some(done)) = self.send_waiters.pop_front() {
                        let _ = done.send(Ok(()));
                    }
                }
                Event::MessageReady => {
                    if let Some(done) = self.recv_waiters.pop_front() {
                        let msg = self
                            .conn
                            .as_mut()
                            .and_then(|c| c.pop_message())
                            .expect("MessageReady without a message");
                        let _ = done.send(Ok(msg));
                    }
                }
                Event::Eof => {
                    // Hand out whatever completed before the FIN, then fail
                    // the rest: nothing further will arrive.
                    while let Some(done) = self.recv_waiters.pop_front() {
                        match self.conn.as_mut().and_then(|c| c.pop_message()) {
                            Some(msg) => {
                                let _ = done.send(Ok(msg));
                            }
                            None => {
                                let _ = done.send(Err(Error::ConnectionClosed));
                            }
                        }
                    }
                }
                Event::CloseDone => {
                    if let Some(done) = self.close_waiter.take() {
                        let _ = done.send(Ok(()));
                    }
                }
                Event::Failed(err) => self.fail_waiters(err),
                Event::Released => {}
            }
        }

        if self.conn.as_ref().is_some_and(|c| c.is_released()) {
            debug!("connection record released");
            self.conn = None;
            self.pending_established = None;
            if self.listening {
                self.conn = Some(Conn::listen(self.opts.clone()));
            }
        }
    }

    /// A timer-driven failure unblocks every waiting call with the error.
    /// Accept waiters survive: they are waiting for a future connection.
    fn fail_waiters(&mut self, err: Error) {
        if let Some(done) = self.connect_waiter.take() {
            let _ = done.send(Err(err.clone()));
        }
        for waiter in self.send_waiters.drain(..).flatten() {
            let _ = waiter.send(Err(err.clone()));
        }
        for waiter in self.recv_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        if let Some(done) = self.close_waiter.take() {
            let _ = done.send(Err(err));
        }
    }
}
