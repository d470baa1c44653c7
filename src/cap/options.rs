use std::time::Duration;

/// `setsockopt` / `getsockopt` keys. All tuning is programmatic; CAP reads no
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOpt {
    /// Send-buffer slot count W: the number of segments allowed in flight.
    Window(usize),
    /// Per-segment payload cap. Both peers must agree on the same value.
    PayloadMax(usize),
    /// RTO before the first round-trip measurement.
    RtoInitial(Duration),
    RtoMin(Duration),
    RtoMax(Duration),
    /// Per-segment retransmission bound; exceeding it tears the connection down.
    MaxRetries(u32),
    /// SYN / SYN_ACK / FIN retry bound.
    HandshakeRetries(u32),
    /// TIME_WAIT hold before the connection record is released.
    TimeWait(Duration),
    /// Make `sendto`, `recv` and `accept` fail with `WouldBlock` instead of
    /// blocking.
    Nonblock(bool),
}

/// Key half of [`SockOpt`], for `getsockopt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOptKey {
    Window,
    PayloadMax,
    RtoInitial,
    RtoMin,
    RtoMax,
    MaxRetries,
    HandshakeRetries,
    TimeWait,
    Nonblock,
}

#[derive(Debug, Clone)]
pub struct SockOpts {
    pub window: usize,
    pub payload_max: usize,
    pub rto_initial: Duration,
    pub rto_min: Duration,
    pub rto_max: Duration,
    pub max_retries: u32,
    pub handshake_retries: u32,
    pub time_wait: Duration,
    pub nonblock: bool,
}

impl Default for SockOpts {
    fn default() -> Self {
        SockOpts {
            window: 32,
            payload_max: 1024,
            rto_initial: Duration::from_secs(1),
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(60),
            max_retries: 8,
            handshake_retries: 5,
            time_wait: Duration::from_secs(2),
            nonblock: false,
        }
    }
}

impl SockOpts {
    pub fn set(&mut self, opt: SockOpt) {
        match opt {
            SockOpt::Window(w) => self.window = w,
            SockOpt::PayloadMax(p) => self.payload_max = p,
            SockOpt::RtoInitial(d) => self.rto_initial = d,
            SockOpt::RtoMin(d) => self.rto_min = d,
            SockOpt::RtoMax(d) => self.rto_max = d,
            SockOpt::MaxRetries(n) => self.max_retries = n,
            SockOpt::HandshakeRetries(n) => self.handshake_retries = n,
            SockOpt::TimeWait(d) => self.time_wait = d,
            SockOpt::Nonblock(b) => self.nonblock = b,
        }
    }

    pub fn get(&self, key: SockOptKey) -> SockOpt {
        match key {
            SockOptKey::Window => SockOpt::Window(self.window),
            SockOptKey::PayloadMax => SockOpt::PayloadMax(self.payload_max),
            SockOptKey::RtoInitial => SockOpt::RtoInitial(self.rto_initial),
            SockOptKey::RtoMin => SockOpt::RtoMin(self.rto_min),
            SockOptKey::RtoMax => SockOpt::RtoMax(self.rto_max),
            SockOptKey::MaxRetries => SockOpt::MaxRetries(self.max_retries),
            SockOptKey::HandshakeRetries => SockOpt::HandshakeRetries(self.handshake_retries),
            SockOptKey::TimeWait => SockOpt::TimeWait(self.time_wait),
            SockOptKey::Nonblock => SockOpt::Nonblock(self.nonblock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let opts = SockOpts::default();

        assert_eq!(opts.window, 32);
        assert_eq!(opts.payload_max, 1024);
        assert_eq!(opts.rto_initial, Duration::from_secs(1));
        assert_eq!(opts.rto_min, Duration::from_millis(200));
        assert_eq!(opts.rto_max, Duration::from_secs(60));
        assert_eq!(opts.max_retries, 8);
        assert_eq!(opts.handshake_retries, 5);
        assert_eq!(opts.time_wait, Duration::from_secs(2));
        assert!(!opts.nonblock);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut opts = SockOpts::default();

        opts.set(SockOpt::Window(4));
        opts.set(SockOpt::Nonblock(true));

        assert_eq!(opts.get(SockOptKey::Window), SockOpt::Window(4));
        assert_eq!(opts.get(SockOptKey::Nonblock), SockOpt::Nonblock(true));
    }
}
