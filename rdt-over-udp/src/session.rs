//! Per-connection counters and packet construction.
//!
//! [`Session`] is the mutable state of one connection.  It does **not**
//! touch the socket; [`crate::connection::Connection`] calls these methods
//! and owns the actual send/receive loops.
//!
//! # Counter contract
//! - `sent` counts packets this side has had confirmed (control + data).
//!   The next packet always carries `seq = sent + 1`.
//! - `accepted` counts packets accepted in order from the peer.  Every
//!   outgoing packet advertises it as `ack`.
//! - Both only move forward, and only once a step is fully confirmed.

use std::net::SocketAddr;

use crate::packet::{flags, Packet};
use crate::state::ConnectionState;
use crate::timer::RetryCounter;

#[derive(Debug, Clone)]
pub struct Session {
    pub state: ConnectionState,
    /// Recorded once the handshake identifies the peer.
    pub peer: Option<SocketAddr>,
    pub sent: u32,
    pub accepted: u32,
    pub retries: RetryCounter,
}

impl Session {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            peer: None,
            sent: 0,
            accepted: 0,
            retries: RetryCounter::new(retry_limit),
        }
    }

    /// Forget the previous peer and restart both counters at zero.
    pub fn reset(&mut self) {
        *self = Self::new(self.retries.limit());
    }

    /// Sequence number of the next packet this side transmits.
    pub fn next_seq(&self) -> u32 {
        self.sent.wrapping_add(1)
    }

    /// `true` when `seq` is the next packet expected from the peer.
    pub fn is_next_from_peer(&self, seq: u32) -> bool {
        seq == self.accepted.wrapping_add(1)
    }

    /// Record one packet accepted in order from the peer.
    pub fn on_accepted(&mut self) {
        self.accepted = self.accepted.wrapping_add(1);
    }

    /// Record `n` of our packets as confirmed by the peer.
    pub fn on_confirmed(&mut self, n: u32) {
        self.sent = self.sent.wrapping_add(n);
    }

    fn control(&self, flags: u8) -> Packet {
        Packet::control(self.next_seq(), self.accepted, flags)
    }

    pub fn syn(&self) -> Packet {
        self.control(flags::SYN)
    }

    pub fn syn_ack(&self) -> Packet {
        self.control(flags::SYN | flags::ACK)
    }

    /// Pure acknowledgment of everything accepted so far.
    pub fn ack(&self) -> Packet {
        self.control(flags::ACK)
    }

    pub fn fin(&self) -> Packet {
        self.control(flags::FIN)
    }

    pub fn fin_ack(&self) -> Packet {
        self.control(flags::FIN | flags::ACK)
    }

    pub fn data(&self, payload: Vec<u8>) -> Packet {
        Packet::data(self.next_seq(), self.accepted, payload)
    }

    /// Data packet for position `index` of a batch that starts at
    /// [`next_seq`](Self::next_seq).
    pub fn batch_data(&self, index: usize, payload: Vec<u8>) -> Packet {
        let seq = self.sent.wrapping_add(index as u32).wrapping_add(1);
        Packet::data(seq, self.accepted, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session() {
        let s = Session::new(5);
        assert_eq!(s.state, ConnectionState::Idle);
        assert_eq!(s.peer, None);
        assert_eq!((s.sent, s.accepted), (0, 0));
        assert_eq!(s.next_seq(), 1);
    }

    #[test]
    fn control_packets_carry_next_seq_and_accepted() {
        let mut s = Session::new(5);
        s.on_confirmed(3);
        s.on_accepted();
        s.on_accepted();

        let syn = s.syn();
        assert_eq!((syn.seq, syn.ack), (4, 2));
        assert!(syn.is_syn() && !syn.is_ack());

        let sa = s.syn_ack();
        assert!(sa.is_syn() && sa.is_ack());

        let fa = s.fin_ack();
        assert!(fa.is_fin() && fa.is_ack());
        assert!(!fa.has_payload());

        assert!(s.ack().is_pure_ack());
        assert!(s.fin().is_fin() && !s.fin().is_ack());
    }

    #[test]
    fn batch_sequence_numbers_follow_sent() {
        let mut s = Session::new(5);
        s.on_confirmed(10);
        let seqs: Vec<u32> = (0..3).map(|i| s.batch_data(i, vec![]).seq).collect();
        assert_eq!(seqs, vec![11, 12, 13]);
        assert_eq!(s.batch_data(0, vec![]), s.data(vec![]));
    }

    #[test]
    fn next_from_peer() {
        let mut s = Session::new(5);
        assert!(s.is_next_from_peer(1));
        s.on_accepted();
        assert!(!s.is_next_from_peer(1));
        assert!(s.is_next_from_peer(2));
        assert!(!s.is_next_from_peer(3));
    }

    #[test]
    fn reset_keeps_retry_limit() {
        let mut s = Session::new(7);
        s.on_confirmed(4);
        s.on_accepted();
        s.state = ConnectionState::Closed;
        s.peer = Some("127.0.0.1:9".parse().unwrap());
        s.reset();
        assert_eq!((s.sent, s.accepted), (0, 0));
        assert_eq!(s.state, ConnectionState::Idle);
        assert_eq!(s.peer, None);
        assert_eq!(s.retries.limit(), 7);
    }
}
