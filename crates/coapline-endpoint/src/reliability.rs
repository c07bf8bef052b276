//! Confirmable-message reliability: the per-exchange retransmission state
//! machine and the server-side duplicate cache.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use coapline_message::{Message, MessageType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tracing::trace;

use crate::config::TransmissionParams;

/// Where an outbound confirmable exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    AwaitingAck,
    Acked,
    Reset,
    TimedOut,
}

/// How an inbound message relates to the exchange in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Not an ACK or RST for this exchange.
    Unrelated,
    /// ACK with the in-flight message ID.
    Acknowledged,
    /// RST with the in-flight message ID.
    Rejected,
}

/// Retransmission state for one outbound confirmable message.
///
/// The caller drives the machine: [`Transaction::next_attempt`] says whether
/// to (re)send and how long to wait, [`Transaction::correlate`] feeds each
/// inbound message back in.
#[derive(Debug, Clone)]
pub struct Transaction {
    message_id: u16,
    state: TransactionState,
    transmissions: u32,
    timeout: Duration,
    max_retransmit: u32,
}

impl Transaction {
    pub fn new<R: Rng + ?Sized>(
        message_id: u16,
        params: &TransmissionParams,
        rng: &mut R,
    ) -> Self {
        Self {
            message_id,
            state: TransactionState::Idle,
            transmissions: 0,
            timeout: params.initial_timeout(rng),
            max_retransmit: params.max_retransmit,
        }
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Sends made so far.
    pub fn transmissions(&self) -> u32 {
        self.transmissions
    }

    /// Advance to the next send.
    ///
    /// Returns the wait to arm after sending, or `None` once the exchange is
    /// finished. The first call starts the exchange; each later call while
    /// still awaiting an ACK is a retransmission with a doubled wait. After
    /// `max_retransmit` retransmissions the next call moves to
    /// [`TransactionState::TimedOut`].
    pub fn next_attempt(&mut self) -> Option<Duration> {
        match self.state {
            TransactionState::Idle => {
                self.state = TransactionState::AwaitingAck;
                self.transmissions = 1;
                Some(self.timeout)
            }
            TransactionState::AwaitingAck if self.transmissions <= self.max_retransmit => {
                self.transmissions += 1;
                self.timeout = self.timeout.saturating_mul(2);
                trace!(
                    message_id = self.message_id,
                    attempt = self.transmissions,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "retransmission armed"
                );
                Some(self.timeout)
            }
            TransactionState::AwaitingAck => {
                self.state = TransactionState::TimedOut;
                None
            }
            TransactionState::Acked | TransactionState::Reset | TransactionState::TimedOut => None,
        }
    }

    /// Match an inbound message against this exchange.
    pub fn correlate(&mut self, msg: &Message) -> Correlation {
        if self.state != TransactionState::AwaitingAck || msg.message_id != self.message_id {
            return Correlation::Unrelated;
        }
        match msg.message_type {
            MessageType::Acknowledgement => {
                self.state = TransactionState::Acked;
                Correlation::Acknowledged
            }
            MessageType::Reset => {
                self.state = TransactionState::Reset;
                Correlation::Rejected
            }
            MessageType::Confirmable | MessageType::NonConfirmable => Correlation::Unrelated,
        }
    }
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dedup {
    /// First sighting inside the window; the ID is now reserved.
    New,
    /// Already handled. Carries the encoded response if one was recorded.
    Duplicate(Option<Bytes>),
}

#[derive(Debug)]
struct DedupEntry {
    response: Option<Bytes>,
    recorded: Instant,
}

impl DedupEntry {
    fn reserved() -> Self {
        Self {
            response: None,
            recorded: Instant::now(),
        }
    }
}

/// Confirmable message IDs seen per remote endpoint, with their responses.
#[derive(Debug)]
pub struct DedupCache {
    entries: DashMap<(SocketAddr, u16), DedupEntry>,
    window: Duration,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Look up `(peer, message_id)` and reserve it if unseen or expired.
    ///
    /// Check and reservation happen under the same shard lock, so of two
    /// concurrent callers with the same key exactly one sees [`Dedup::New`].
    pub fn check(&self, peer: SocketAddr, message_id: u16) -> Dedup {
        match self.entries.entry((peer, message_id)) {
            Entry::Occupied(mut entry) => {
                if entry.get().recorded.elapsed() < self.window {
                    return Dedup::Duplicate(entry.get().response.clone());
                }
                entry.insert(DedupEntry::reserved());
                Dedup::New
            }
            Entry::Vacant(entry) => {
                entry.insert(DedupEntry::reserved());
                Dedup::New
            }
        }
    }

    /// Attach the encoded response to a reserved entry.
    pub fn record_response(&self, peer: SocketAddr, message_id: u16, response: Bytes) {
        if let Some(mut entry) = self.entries.get_mut(&(peer, message_id)) {
            entry.response = Some(response);
        }
    }

    /// Drop entries older than the window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries
            .retain(|_, entry| entry.recorded.elapsed() < window);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
