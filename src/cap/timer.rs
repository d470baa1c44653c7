use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Retransmission deadline for the in-flight slot with this sequence number.
    Retransmit(u32),
    /// SYN / SYN_ACK / FIN retry during connection setup and teardown.
    HandshakeRetry,
    /// Hold-down before releasing the connection after the final ack.
    TimeWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// One-shot named timers over monotonic time.
///
/// A min-heap of `(deadline, id)` orders expiry; the id -> kind map holds the
/// armed set. `cancel` only removes the map entry; the orphaned heap entry is
/// a tombstone discarded when it surfaces, so cancellation stays O(log n).
#[derive(Debug, Default)]
pub struct Timers {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    armed: HashMap<u64, TimerKind>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Timers::default()
    }

    pub fn arm(&mut self, kind: TimerKind, delay: Duration, now: Instant) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;

        self.heap.push(Reverse((now + delay, id)));
        self.armed.insert(id, kind);

        TimerId(id)
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.armed.remove(&id.0);
    }

    /// Earliest live deadline. Tombstones at the top of the heap are dropped
    /// on the way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.armed.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }

        None
    }

    /// Pop every timer whose deadline has passed. Each fires at most once per
    /// arming.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();

        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();

            if let Some(kind) = self.armed.remove(&id) {
                fired.push(kind);
            }
        }

        fired
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
