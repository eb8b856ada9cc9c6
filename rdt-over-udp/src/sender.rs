//! Outbound data transfer: stop-and-wait [`Connection::send`] and pipelined
//! [`Connection::send_batch`].
//!
//! # Batch contract
//!
//! - Every message of a batch is transmitted back-to-back; message `i`
//!   carries `seq = sent + i + 1` and the same `ack` snapshot.
//! - ACKs are **cumulative**: `ack = K` means the peer has accepted every
//!   packet of ours up to and including `seq = K`.
//! - An ACK that does not move the [`BatchCursor`] means the peer is missing
//!   the packet right after it, so everything from there to the end of the
//!   batch is sent again (go back N).
//! - On timeout the same go-back-N retransmission happens.

use crate::connection::{check_payload, ConnError, Connection};
use crate::packet::Packet;

// ---------------------------------------------------------------------------
// BatchCursor
// ---------------------------------------------------------------------------

/// How one acknowledgment relates to an in-flight batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckVerdict {
    /// Older than the batch; left over from an earlier exchange.
    Stale,
    /// Confirmed `newly` more packets of the batch.
    Advanced { newly: u32 },
    /// No progress; resend from batch offset `offset`.
    Repeat { offset: usize },
    /// Acknowledges packets that were never sent.
    Overshoot,
}

/// Cumulative-acknowledgment progress through one batch.
///
/// ```text
///  base        confirmed             base + len
///   │              │                     │
///  ─┼──────────────┼─────────────────────┼──▶ seq space
///   │ <─ acked ──▶ │ <── in flight ────▶ │
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCursor {
    base: u32,
    confirmed: u32,
    len: u32,
}

impl BatchCursor {
    /// `base` is the sender's `sent` count before the batch went out.
    pub fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            confirmed: base,
            len: len as u32,
        }
    }

    pub fn on_ack(&mut self, ack: u32) -> AckVerdict {
        if ack < self.base {
            return AckVerdict::Stale;
        }
        if ack > self.end() {
            return AckVerdict::Overshoot;
        }
        if ack > self.confirmed {
            let newly = ack - self.confirmed;
            self.confirmed = ack;
            return AckVerdict::Advanced { newly };
        }
        AckVerdict::Repeat {
            offset: self.offset(),
        }
    }

    /// Index of the first unconfirmed message.
    pub fn offset(&self) -> usize {
        (self.confirmed - self.base) as usize
    }

    pub fn is_complete(&self) -> bool {
        self.confirmed == self.end()
    }

    fn end(&self) -> u32 {
        self.base + self.len
    }
}

// ---------------------------------------------------------------------------
// Connection send paths
// ---------------------------------------------------------------------------

impl Connection {
    /// Send one message and wait until the peer confirms it.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ConnError> {
        let peer = self.require_established()?;
        check_payload(message.len())?;

        let packet = self.session.data(message.to_vec());
        self.transmit(&packet, peer).await?;

        loop {
            let Some(reply) = self.read_from(peer).await? else {
                self.on_lost("DATA")?;
                self.transmit(&packet, peer).await?;
                continue;
            };
            self.session.retries.reset();
            self.hold_if_next(&reply);

            // Only an ack covering `packet.seq` confirms it; stale acks keep
            // the wait going.
            if reply.ack >= packet.seq {
                break;
            }
            if reply.is_syn() || reply.has_payload() {
                // The peer is retransmitting something we already accepted,
                // so our acknowledgment of it was lost.
                self.transmit(&self.session.ack(), peer).await?;
            }
        }

        self.session.on_confirmed(1);
        Ok(())
    }

    /// Send every message back-to-back and wait until the peer has
    /// confirmed all of them.
    pub async fn send_batch<M: AsRef<[u8]>>(&mut self, messages: &[M]) -> Result<(), ConnError> {
        let peer = self.require_established()?;
        for m in messages {
            check_payload(m.as_ref().len())?;
        }
        if messages.is_empty() {
            return Ok(());
        }

        let packets: Vec<Packet> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| self.session.batch_data(i, m.as_ref().to_vec()))
            .collect();
        let mut cursor = BatchCursor::new(self.session.sent, packets.len());
        self.transmit_from(&packets, 0, peer).await?;

        while !cursor.is_complete() {
            let Some(reply) = self.read_from(peer).await? else {
                self.on_lost("batch")?;
                self.transmit_from(&packets, cursor.offset(), peer).await?;
                continue;
            };
            self.hold_if_next(&reply);

            match cursor.on_ack(reply.ack) {
                AckVerdict::Stale => {
                    self.transmit(&self.session.ack(), peer).await?;
                }
                AckVerdict::Advanced { newly } => {
                    self.session.retries.reset();
                    log::debug!(
                        "[rdt] batch: {newly} confirmed, {}/{} done",
                        cursor.offset(),
                        packets.len()
                    );
                }
                AckVerdict::Repeat { offset } => {
                    self.session.retries.reset();
                    self.transmit_from(&packets, offset, peer).await?;
                }
                AckVerdict::Overshoot => {
                    return Err(ConnError::ProtocolViolation(format!(
                        "batch of {} starting after {}: ack {} acknowledges unsent packets",
                        packets.len(),
                        self.session.sent,
                        reply.ack
                    )));
                }
            }
        }

        self.session.on_confirmed(packets.len() as u32);
        Ok(())
    }

    async fn transmit_from(
        &self,
        packets: &[Packet],
        offset: usize,
        peer: std::net::SocketAddr,
    ) -> Result<(), ConnError> {
        if offset > 0 || packets.len() > 1 {
            log::debug!(
                "[rdt] sending batch messages {offset}..{}",
                packets.len()
            );
        }
        for packet in &packets[offset..] {
            self.transmit(packet, peer).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_cursor() {
        let c = BatchCursor::new(7, 3);
        assert_eq!(c.offset(), 0);
        assert!(!c.is_complete());
    }

    #[test]
    fn empty_batch_is_complete() {
        assert!(BatchCursor::new(4, 0).is_complete());
    }

    #[test]
    fn acks_advance_one_by_one() {
        let mut c = BatchCursor::new(1, 3);
        assert_eq!(c.on_ack(2), AckVerdict::Advanced { newly: 1 });
        assert_eq!(c.on_ack(3), AckVerdict::Advanced { newly: 1 });
        assert_eq!(c.offset(), 2);
        assert_eq!(c.on_ack(4), AckVerdict::Advanced { newly: 1 });
        assert!(c.is_complete());
    }

    #[test]
    fn cumulative_ack_skips_ahead() {
        let mut c = BatchCursor::new(10, 20);
        assert_eq!(c.on_ack(25), AckVerdict::Advanced { newly: 15 });
        assert_eq!(c.offset(), 15);
    }

    #[test]
    fn repeated_ack_requests_resend_from_cursor() {
        let mut c = BatchCursor::new(1, 5);
        c.on_ack(3);
        assert_eq!(c.on_ack(3), AckVerdict::Repeat { offset: 2 });
        // An ack behind the cursor but inside the batch also repeats.
        assert_eq!(c.on_ack(2), AckVerdict::Repeat { offset: 2 });
        assert_eq!(c.offset(), 2);
    }

    #[test]
    fn ack_equal_to_base_repeats_whole_batch() {
        let mut c = BatchCursor::new(1, 5);
        assert_eq!(c.on_ack(1), AckVerdict::Repeat { offset: 0 });
    }

    #[test]
    fn ack_before_batch_is_stale() {
        let mut c = BatchCursor::new(5, 5);
        assert_eq!(c.on_ack(4), AckVerdict::Stale);
        assert_eq!(c.on_ack(0), AckVerdict::Stale);
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn ack_past_batch_end_is_overshoot() {
        let mut c = BatchCursor::new(1, 3);
        assert_eq!(c.on_ack(5), AckVerdict::Overshoot);
        assert_eq!(c.offset(), 0, "overshoot must not move the cursor");
        assert_eq!(c.on_ack(4), AckVerdict::Advanced { newly: 3 });
    }
}
