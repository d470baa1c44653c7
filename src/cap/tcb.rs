use std::collections::VecDeque;
use std::mem;
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, trace, warn};

use super::{
    is_between_wrapped, random_isn, wrapping_lt, RttEstimator, Segment, SegmentKind, SockOpts,
    TimerId, TimerKind, Timers, Transport,
};
use crate::Error;

/*
                          +--------+   connect() / snd SYN
            listen()      | CLOSED |------------------+
           +--------------+--------+                  |
           |                  ^  ^                    |
           v                  |  |                    v
      +--------+   retries    |  |  retries      +----------+
      | LISTEN |<---exhausted-+--+--exhausted----| SYN_SENT |
      +--------+   (passive)     |  (active)     +----------+
           | rcv SYN             |                    |
           | snd SYN_ACK         |                    | rcv SYN_ACK
           v                     |                    | snd ACK
      +----------+               |                    v
      | SYN_RCVD |---------------+--------------->+-------+
      +----------+  rcv ACK of SYN_ACK            | ESTAB |
                                                  +-------+
                                                   |     |
                             close() / snd FIN     |     |  rcv FIN / snd FIN_ACK
                          +------------------------+     +------------+
                          v                                           v
                    +----------+  rcv FIN_ACK   +-----------+   +------------+
                    | FIN_WAIT |--------------->| TIME_WAIT |   | CLOSE_WAIT |
                    +----------+  snd final ACK +-----------+   +------------+
                                                      |               | close()
                                    TimeWait elapses  v               v
                                                  +--------+      +--------+
                                                  | CLOSED |      | CLOSED |
                                                  +--------+      +--------+
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Estab,
    FinWait,
    CloseWait,
    TimeWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Active,
    Passive,
}

/// What a segment arrival or timer expiry did, surfaced to the event loop so
/// it can complete blocked application calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake finished; `connect`/`accept` can return.
    Established,
    /// One queued message has been fully admitted into the send window; the
    /// oldest blocked `sendto` can return.
    MessageEnqueued,
    /// A complete message is waiting in the ready queue.
    MessageReady,
    /// Peer's FIN processed; no further messages will arrive.
    Eof,
    /// Our side of the teardown is done; `close` can return.
    CloseDone,
    /// Retry bounds exhausted; every blocked call fails with this error.
    Failed(Error),
    /// State returned to CLOSED; the connection record can be dropped.
    Released,
}

/// One unacknowledged segment in the send window.
#[derive(Debug, Clone)]
struct SendSlot {
    seq: u32,
    payload: Vec<u8>,
    last_sent_at: Instant,
    /// Karn flag: once retransmitted, this slot never feeds the RTT estimator.
    retransmitted: bool,
    retries: u32,
    timer: TimerId,
}

/// A fragment waiting for window space, not yet holding a sequence number.
#[derive(Debug, Clone)]
struct Chunk {
    payload: Vec<u8>,
    last_of_message: bool,
}

/// The CAP connection block: one per `(local, peer)` pair, owned exclusively
/// by the socket's event loop.
#[derive(Debug)]
pub struct Conn {
    peer: Option<SocketAddr>,
    kind: Kind,
    state: State,
    opts: SockOpts,

    iss: u32,
    irs: u32,
    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,
    dup_acks: u32,

    slots: VecDeque<SendSlot>,
    unsent: VecDeque<Chunk>,
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    eof: bool,

    timers: Timers,
    rtt: RttEstimator,
    handshake_timer: Option<TimerId>,
    handshake_retries_left: u32,

    /// `close` requested; the FIN waits until the send buffer drains.
    closing: bool,
    fin_seq: Option<u32>,
    cached_synack: Option<Segment>,
    cached_final_ack: Option<Segment>,

    events: Vec<Event>,
}

impl Conn {
    fn new(kind: Kind, state: State, iss: u32, opts: SockOpts) -> Self {
        let rtt = RttEstimator::new(opts.rto_initial, opts.rto_min, opts.rto_max);
        let handshake_retries_left = opts.handshake_retries;

        Conn {
            peer: None,
            kind,
            state,
            opts,
            iss,
            irs: 0,
            snd_una: iss,
            snd_nxt: iss,
            rcv_nxt: 0,
            dup_acks: 0,
            slots: VecDeque::new(),
            unsent: VecDeque::new(),
            partial: Vec::new(),
            ready: VecDeque::new(),
            eof: false,
            timers: Timers::new(),
            rtt,
            handshake_timer: None,
            handshake_retries_left,
            closing: false,
            fin_seq: None,
            cached_synack: None,
            cached_final_ack: None,
            events: Vec::new(),
        }
    }

    /// Passive open. The peer is learned from the first SYN.
    pub fn listen(opts: SockOpts) -> Self {
        Conn::new(Kind::Passive, State::Listen, random_isn(), opts)
    }

    /// Active open: send the SYN and start the handshake-retry clock.
    pub fn connect(
        peer: SocketAddr,
        opts: SockOpts,
        now: Instant,
        tx: &mut dyn Transport,
    ) -> Self {
        let mut conn = Conn::new(Kind::Active, State::SynSent, random_isn(), opts);
        conn.peer = Some(peer);

        let syn = Segment::new(SegmentKind::Syn, conn.iss, 0);
        conn.snd_nxt = conn.iss.wrapping_add(1);

        debug!("state <- SynSent (iss={})", conn.iss);
        conn.emit(&syn, tx);
        conn.arm_handshake_retry(now);

        conn
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_released(&self) -> bool {
        self.state == State::Closed
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        mem::take(&mut self.events)
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// In-flight slot count has reached W.
    pub fn window_full(&self) -> bool {
        self.slots.len() >= self.opts.window
    }

    pub fn pop_message(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    pub fn at_eof(&self) -> bool {
        self.eof && self.ready.is_empty()
    }

    /// Re-clamp the live estimator after a `setsockopt`.
    pub fn apply_opts(&mut self, opts: &SockOpts) {
        self.opts.rto_min = opts.rto_min;
        self.opts.rto_max = opts.rto_max;
        self.opts.max_retries = opts.max_retries;
        self.opts.handshake_retries = opts.handshake_retries;
        self.opts.time_wait = opts.time_wait;
        self.rtt.set_clamps(opts.rto_min, opts.rto_max);
    }

    /// Fragment a message into the unsent queue and admit what fits into the
    /// window. The caller sees `MessageEnqueued` once the final fragment has a
    /// sequence number.
    pub fn enqueue_message(&mut self, bytes: &[u8], now: Instant, tx: &mut dyn Transport) {
        let max = self.opts.payload_max;

        for chunk in bytes.chunks(max) {
            self.unsent.push_back(Chunk {
                payload: chunk.to_vec(),
                last_of_message: false,
            });
        }

        // Short final segment marks end-of-message; a message that fills its
        // fragments exactly gets an empty trailer.
        if bytes.len() % max == 0 {
            self.unsent.push_back(Chunk {
                payload: Vec::new(),
                last_of_message: true,
            });
        } else {
            self.unsent.back_mut().unwrap().last_of_message = true;
        }

        self.fill_window(now, tx);
    }

    /// Application close. Active side: FIN once the send buffer drains.
    /// Passive side (peer FIN already seen): straight to CLOSED.
    pub fn request_close(&mut self, now: Instant, tx: &mut dyn Transport) {
        match self.state {
            State::Estab => {
                self.closing = true;
                self.maybe_send_fin(now, tx);
            }
            State::CloseWait => {
                debug!("state <- Closed");
                self.state = State::Closed;
                self.timers = Timers::new();
                self.events.push(Event::CloseDone);
                self.events.push(Event::Released);
            }
            State::Listen | State::SynSent | State::SynRcvd => {
                // Abort an embryonic connection.
                debug!("state <- Closed (aborted before establishment)");
                self.state = State::Closed;
                self.timers = Timers::new();
                self.events.push(Event::CloseDone);
                self.events.push(Event::Released);
            }
            State::FinWait | State::TimeWait | State::Closed => {}
        }
    }

    /// Fire every expired timer. Called on each loop iteration.
    pub fn on_tick(&mut self, now: Instant, tx: &mut dyn Transport) {
        for kind in self.timers.poll_expired(now) {
            self.on_timer(kind, now, tx);
            if self.state == State::Closed {
                break;
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind, now: Instant, tx: &mut dyn Transport) {
        match kind {
            TimerKind::Retransmit(seq) => self.on_retransmit_timer(seq, now, tx),
            TimerKind::HandshakeRetry => self.on_handshake_retry(now, tx),
            TimerKind::TimeWait => {
                debug!("TimeWait elapsed, state <- Closed");
                self.state = State::Closed;
                self.timers = Timers::new();
                self.events.push(Event::Released);
            }
        }
    }

    fn on_retransmit_timer(&mut self, seq: u32, now: Instant, tx: &mut dyn Transport) {
        let Some(idx) = self.slots.iter().position(|s| s.seq == seq) else {
            // Acked between arming and expiry.
            return;
        };

        if self.slots[idx].retries >= self.opts.max_retries {
            warn!("seq {} exceeded {} retries", seq, self.opts.max_retries);
            self.teardown(Error::PeerUnreachable);
            return;
        }

        {
            let slot = &mut self.slots[idx];
            slot.retries += 1;
            slot.retransmitted = true;
            slot.last_sent_at = now;
        }

        self.rtt.backoff();
        trace!(
            "retransmit seq {} (retry {}, rto {:?})",
            seq,
            self.slots[idx].retries,
            self.rtt.rto()
        );

        let seg = Segment::data(seq, self.slots[idx].payload.clone());
        self.emit(&seg, tx);

        self.slots[idx].timer = self.timers.arm(TimerKind::Retransmit(seq), self.rtt.rto(), now);
    }

    fn on_handshake_retry(&mut self, now: Instant, tx: &mut dyn Transport) {
        self.handshake_timer = None;

        match self.state {
            State::SynSent => {
                if self.handshake_retries_left == 0 {
                    warn!("handshake retries exhausted in SynSent");
                    self.teardown(Error::ConnectTimeout);
                    return;
                }
                self.handshake_retries_left -= 1;
                self.rtt.backoff();

                debug!("resend SYN ({} retries left)", self.handshake_retries_left);
                let syn = Segment::new(SegmentKind::Syn, self.iss, 0);
                self.emit(&syn, tx);
                self.arm_handshake_retry(now);
            }
            State::SynRcvd => {
                if self.handshake_retries_left == 0 {
                    debug!("handshake retries exhausted in SynRcvd, back to Listen");
                    self.reset_to_listen();
                    return;
                }
                self.handshake_retries_left -= 1;
                self.rtt.backoff();

                debug!("resend SYN_ACK ({} retries left)", self.handshake_retries_left);
                if let Some(synack) = self.cached_synack.clone() {
                    self.emit(&synack, tx);
                }
                self.arm_handshake_retry(now);
            }
            State::FinWait => {
                if self.handshake_retries_left == 0 {
                    warn!("FIN retries exhausted");
                    self.teardown(Error::PeerUnreachable);
                    return;
                }
                self.handshake_retries_left -= 1;
                self.rtt.backoff();

                debug!("resend FIN ({} retries left)", self.handshake_retries_left);
                if let Some(fin_seq) = self.fin_seq {
                    let fin = Segment::new(SegmentKind::Fin, fin_seq, 0);
                    self.emit(&fin, tx);
                }
                self.arm_handshake_retry(now);
            }
            // A state transition raced the expiry; nothing left to retry.
            _ => {}
        }
    }

    /// Dispatch one inbound segment. The caller has already matched the
    /// source address against the connection's peer.
    pub fn on_segment(
        &mut self,
        from: SocketAddr,
        seg: Segment,
        now: Instant,
        tx: &mut dyn Transport,
    ) {
        trace!("<- {:?} seq={} ack={} ({} bytes) in {:?}", seg.kind, seg.seq, seg.ack, seg.payload.len(), self.state);

        match self.state {
            State::Listen => self.segment_in_listen(from, seg, now, tx),
            State::SynSent => self.segment_in_syn_sent(seg, now, tx),
            State::SynRcvd => self.segment_in_syn_rcvd(seg, now, tx),
            State::Estab => self.segment_in_estab(seg, now, tx),
            State::FinWait => self.segment_in_fin_wait(seg, now, tx),
            State::CloseWait => self.segment_in_close_wait(seg, now, tx),
            State::TimeWait => self.segment_in_time_wait(seg, now, tx),
            State::Closed => {
                debug!("segment in Closed dropped");
            }
        }
    }

    fn segment_in_listen(
        &mut self,
        from: SocketAddr,
        seg: Segment,
        now: Instant,
        tx: &mut dyn Transport,
    ) {
        if seg.kind != SegmentKind::Syn {
            debug!("non-SYN {:?} in Listen dropped", seg.kind);
            return;
        }

        self.peer = Some(from);
        self.irs = seg.seq;
        self.rcv_nxt = seg.seq.wrapping_add(1);

        let synack = Segment::new(SegmentKind::SynAck, self.iss, self.rcv_nxt);
        self.snd_nxt = self.iss.wrapping_add(1);
        self.cached_synack = Some(synack.clone());

        debug!("state <- SynRcvd (iss={}, irs={})", self.iss, self.irs);
        self.state = State::SynRcvd;
        self.emit(&synack, tx);
        self.arm_handshake_retry(now);
    }

    fn segment_in_syn_sent(&mut self, seg: Segment, _now: Instant, tx: &mut dyn Transport) {
        if seg.kind != SegmentKind::SynAck {
            debug!("{:?} in SynSent dropped", seg.kind);
            return;
        }

        if !is_between_wrapped(self.snd_una, seg.ack, self.snd_nxt.wrapping_add(1)) {
            debug!("SYN_ACK with unacceptable ack {} dropped", seg.ack);
            return;
        }

        self.snd_una = seg.ack;
        self.irs = seg.seq;
        self.rcv_nxt = seg.seq.wrapping_add(1);
        self.cancel_handshake_retry();

        debug!("state <- Estab");
        self.state = State::Estab;

        let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
        self.emit(&ack, tx);

        self.events.push(Event::Established);
    }

    fn segment_in_syn_rcvd(&mut self, seg: Segment, now: Instant, tx: &mut dyn Transport) {
        match seg.kind {
            SegmentKind::DataAck
                if is_between_wrapped(self.snd_una, seg.ack, self.snd_nxt.wrapping_add(1)) =>
            {
                self.establish_passive();
            }
            SegmentKind::DataAck => {
                debug!("ACK {} outside window in SynRcvd dropped", seg.ack);
            }
            // The third ack was lost but the peer has clearly established:
            // promote, then process as usual.
            SegmentKind::Data | SegmentKind::Fin => {
                self.establish_passive();
                self.segment_in_estab(seg, now, tx);
            }
            // Duplicate SYN: our SYN_ACK got lost or delayed.
            SegmentKind::Syn => {
                if let Some(synack) = self.cached_synack.clone() {
                    debug!("duplicate SYN, resending SYN_ACK");
                    self.emit(&synack, tx);
                }
            }
            _ => {
                debug!("{:?} in SynRcvd dropped", seg.kind);
            }
        }
    }

    fn establish_passive(&mut self) {
        self.snd_una = self.snd_nxt;
        self.cancel_handshake_retry();

        debug!("state <- Estab");
        self.state = State::Estab;
        self.events.push(Event::Established);
    }

    fn segment_in_estab(&mut self, seg: Segment, now: Instant, tx: &mut dyn Transport) {
        match seg.kind {
            SegmentKind::Data => self.accept_data(seg, tx),
            SegmentKind::DataAck => self.process_ack(seg.ack, now, tx),
            // Our third handshake ack got lost and the passive side is still
            // retrying its SYN_ACK.
            SegmentKind::SynAck => {
                debug!("SYN_ACK in Estab, re-acking");
                let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
                self.emit(&ack, tx);
            }
            // Duplicate SYN after establishment: answer from the cache.
            SegmentKind::Syn => {
                if let Some(synack) = self.cached_synack.clone() {
                    debug!("duplicate SYN in Estab, resending SYN_ACK");
                    self.emit(&synack, tx);
                }
            }
            SegmentKind::Fin => self.accept_fin(seg, tx),
            SegmentKind::FinAck => {
                debug!("FIN_ACK in Estab dropped");
            }
        }
    }

    fn segment_in_fin_wait(&mut self, seg: Segment, now: Instant, tx: &mut dyn Transport) {
        match seg.kind {
            SegmentKind::FinAck
                if is_between_wrapped(self.snd_una, seg.ack, self.snd_nxt.wrapping_add(1)) =>
            {
                self.snd_una = seg.ack;
                self.cancel_handshake_retry();

                let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
                self.cached_final_ack = Some(ack.clone());
                self.emit(&ack, tx);

                debug!("state <- TimeWait");
                self.state = State::TimeWait;
                self.timers.arm(TimerKind::TimeWait, self.opts.time_wait, now);
                self.events.push(Event::CloseDone);
            }
            // Stale acks for data can still trickle in while the FIN is
            // outstanding.
            SegmentKind::DataAck => self.process_ack(seg.ack, now, tx),
            // End-of-output was declared; inbound data is dropped.
            SegmentKind::Data => {
                debug!("data in FinWait dropped");
            }
            _ => {
                debug!("{:?} in FinWait dropped", seg.kind);
            }
        }
    }

    fn segment_in_close_wait(&mut self, seg: Segment, now: Instant, tx: &mut dyn Transport) {
        match seg.kind {
            // Our FIN_ACK was lost; the peer is retransmitting its FIN.
            SegmentKind::Fin => {
                debug!("retransmitted FIN in CloseWait, re-acking");
                let finack = Segment::new(SegmentKind::FinAck, self.snd_nxt, self.rcv_nxt);
                self.emit(&finack, tx);
            }
            // Acks for our own in-flight data are still meaningful here.
            SegmentKind::DataAck => self.process_ack(seg.ack, now, tx),
            // Duplicated data from the wire still elicits a cumulative ack.
            SegmentKind::Data => {
                let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
                self.emit(&ack, tx);
            }
            _ => {
                debug!("{:?} in CloseWait dropped", seg.kind);
            }
        }
    }

    fn segment_in_time_wait(&mut self, seg: Segment, now: Instant, tx: &mut dyn Transport) {
        match seg.kind {
            // A stray FIN or FIN_ACK means our final ack was lost: answer
            // from the cache and restart the hold-down.
            SegmentKind::Fin | SegmentKind::FinAck => {
                if let Some(ack) = self.cached_final_ack.clone() {
                    debug!("stray {:?} in TimeWait, resending final ack", seg.kind);
                    self.emit(&ack, tx);
                }
                self.timers = Timers::new();
                self.timers.arm(TimerKind::TimeWait, self.opts.time_wait, now);
            }
            _ => {
                debug!("{:?} in TimeWait dropped", seg.kind);
            }
        }
    }

    /// In-order reassembly. Every Data segment elicits a cumulative ack, and
    /// only `seq == rcv_nxt` is accepted: duplicates are never re-delivered,
    /// later segments are dropped for the sender to retransmit.
    fn accept_data(&mut self, seg: Segment, tx: &mut dyn Transport) {
        if seg.seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            let short = seg.payload.len() < self.opts.payload_max;
            self.partial.extend_from_slice(&seg.payload);

            if short {
                let msg = mem::take(&mut self.partial);
                trace!("message complete ({} bytes)", msg.len());
                self.ready.push_back(msg);
                self.events.push(Event::MessageReady);
            }
        } else if wrapping_lt(seg.seq, self.rcv_nxt) {
            debug!("duplicate data seq {} (rcv_nxt {})", seg.seq, self.rcv_nxt);
        } else {
            debug!("out-of-order data seq {} (rcv_nxt {}) dropped", seg.seq, self.rcv_nxt);
        }

        let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
        self.emit(&ack, tx);
    }

    fn accept_fin(&mut self, seg: Segment, tx: &mut dyn Transport) {
        if seg.seq != self.rcv_nxt {
            // The FIN overtook retransmitted data; ack what we have so the
            // peer retransmits the gap first.
            debug!("FIN seq {} ahead of rcv_nxt {}, dropped", seg.seq, self.rcv_nxt);
            let ack = Segment::new(SegmentKind::DataAck, self.snd_nxt, self.rcv_nxt);
            self.emit(&ack, tx);
            return;
        }

        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        let finack = Segment::new(SegmentKind::FinAck, self.snd_nxt, self.rcv_nxt);
        self.emit(&finack, tx);

        debug!("state <- CloseWait");
        self.state = State::CloseWait;
        self.eof = true;
        self.events.push(Event::Eof);
    }

    /// Cumulative acknowledgment: drop every slot below `ack`, take RTT
    /// samples per Karn's rule, refill the window, and let a deferred FIN out
    /// once the buffer is dry.
    fn process_ack(&mut self, ack: u32, now: Instant, tx: &mut dyn Transport) {
        if is_between_wrapped(self.snd_una, ack, self.snd_nxt.wrapping_add(1)) {
            while let Some(front) = self.slots.front() {
                if !wrapping_lt(front.seq, ack) {
                    break;
                }

                let slot = self.slots.pop_front().unwrap();
                self.timers.cancel(slot.timer);

                if !slot.retransmitted {
                    self.rtt.sample(now.saturating_duration_since(slot.last_sent_at));
                }
            }

            self.snd_una = ack;
            self.dup_acks = 0;

            self.fill_window(now, tx);
            if self.closing && self.state == State::Estab {
                self.maybe_send_fin(now, tx);
            }
        } else if ack == self.snd_una {
            // Counted only; this profile has no fast retransmit.
            self.dup_acks += 1;
            trace!("duplicate ack {} (count {})", ack, self.dup_acks);
        } else {
            debug!("ack {} outside [{}, {}] dropped", ack, self.snd_una, self.snd_nxt);
        }
    }

    fn fill_window(&mut self, now: Instant, tx: &mut dyn Transport) {
        if self.state != State::Estab {
            return;
        }

        while self.slots.len() < self.opts.window {
            let Some(chunk) = self.unsent.pop_front() else {
                break;
            };

            let seq = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);

            let seg = Segment::data(seq, chunk.payload.clone());
            self.emit(&seg, tx);

            let timer = self.timers.arm(TimerKind::Retransmit(seq), self.rtt.rto(), now);
            self.slots.push_back(SendSlot {
                seq,
                payload: chunk.payload,
                last_sent_at: now,
                retransmitted: false,
                retries: 0,
                timer,
            });

            if chunk.last_of_message {
                self.events.push(Event::MessageEnqueued);
            }
        }
    }

    fn maybe_send_fin(&mut self, now: Instant, tx: &mut dyn Transport) {
        if !self.slots.is_empty() || !self.unsent.is_empty() {
            return;
        }

        let fin_seq = self.snd_nxt;
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.fin_seq = Some(fin_seq);

        let fin = Segment::new(SegmentKind::Fin, fin_seq, 0);
        debug!("state <- FinWait (fin_seq={})", fin_seq);
        self.state = State::FinWait;
        self.emit(&fin, tx);

        self.handshake_retries_left = self.opts.handshake_retries;
        self.arm_handshake_retry(now);
    }

    /// Retry bounds exhausted: unblock everyone and release the record.
    fn teardown(&mut self, err: Error) {
        debug!("state <- Closed ({err})");
        self.state = State::Closed;
        self.slots.clear();
        self.unsent.clear();
        self.timers = Timers::new();
        self.events.push(Event::Failed(err));
        self.events.push(Event::Released);
    }

    fn reset_to_listen(&mut self) {
        let opts = self.opts.clone();
        let events = mem::take(&mut self.events);
        *self = Conn::listen(opts);
        self.events = events;
        debug!("state <- Listen");
    }

    fn arm_handshake_retry(&mut self, now: Instant) {
        let id = self.timers.arm(TimerKind::HandshakeRetry, self.rtt.rto(), now);
        self.handshake_timer = Some(id);
    }

    fn cancel_handshake_retry(&mut self) {
        if let Some(id) = self.handshake_timer.take() {
            self.timers.cancel(id);
        }
    }

    /// Transport send failures are transient here: the retransmit machinery
    /// is the retry path, and repeated failures run into the retry bounds.
    fn emit(&self, seg: &Segment, tx: &mut dyn Transport) {
        let Some(peer) = self.peer else {
            debug!("no peer yet, {:?} not sent", seg.kind);
            return;
        };

        trace!("-> {:?} seq={} ack={} ({} bytes)", seg.kind, seg.seq, seg.ack, seg.payload.len());
        if let Err(e) = tx.send(peer, &seg.encode()) {
            debug!("transport send failed: {e}");
        }
    }
}
