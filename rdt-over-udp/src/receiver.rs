//! Inbound data path: [`Connection::receive`].
//!
//! - Only the **next in-order** packet (`seq == accepted + 1`) is accepted.
//! - Out-of-order and duplicate packets are discarded together with
//!   whatever else is already queued, and the current cumulative ACK is
//!   sent again so the peer knows where to resume.
//! - Pure ACKs carry nothing for the application and are skipped.
//! - An in-order FIN starts the passive half of the teardown and ends the
//!   stream with [`Delivery::Closed`].

use std::net::SocketAddr;

use crate::connection::{ConnError, Connection, Delivery};
use crate::packet::Packet;
use crate::session::Session;
use crate::state::ConnectionState;

/// What an inbound packet means to the receive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Acknowledgment only; nothing to deliver.
    PureAck,
    /// Not the next expected packet (gap or duplicate).
    OutOfOrder,
    /// The peer's in-order teardown request.
    Fin,
    /// The next in-order message.
    Data(Vec<u8>),
    /// In order, but meaningless at this point of the connection.
    Unexpected,
}

/// Classify `packet` against the session's receive position.
pub fn classify(session: &Session, packet: Packet) -> Inbound {
    if packet.is_pure_ack() {
        return Inbound::PureAck;
    }
    if !session.is_next_from_peer(packet.seq) {
        return Inbound::OutOfOrder;
    }
    if packet.is_syn() {
        return Inbound::Unexpected;
    }
    if packet.is_fin() {
        return Inbound::Fin;
    }
    match packet.payload {
        Some(payload) => Inbound::Data(payload),
        None => Inbound::Unexpected,
    }
}

impl Connection {
    /// Receive the next in-order message from the peer.
    ///
    /// Returns [`Delivery::Closed`] once the peer has closed the connection;
    /// after that every call fails with [`ConnError::NotConnected`].
    pub async fn receive(&mut self) -> Result<Delivery, ConnError> {
        let peer = self.require_receivable()?;

        loop {
            let packet = match self.held.take() {
                Some(packet) => packet,
                None => self.next_from(peer).await?,
            };
            let seq = packet.seq;

            match classify(&self.session, packet) {
                Inbound::PureAck => continue,
                Inbound::OutOfOrder => {
                    let shed = self.socket.drain(self.config.drain_timeout).await;
                    log::debug!(
                        "[rdt] out-of-order seq={seq} (want {}), shed {shed} queued",
                        self.session.accepted.wrapping_add(1)
                    );
                    self.transmit(&self.session.ack(), peer).await?;
                }
                Inbound::Fin => {
                    self.session.on_accepted();
                    self.passive_close(peer).await?;
                    return Ok(Delivery::Closed);
                }
                Inbound::Data(payload) => {
                    self.session.on_accepted();
                    self.transmit(&self.session.ack(), peer).await?;
                    return Ok(Delivery::Data(payload));
                }
                Inbound::Unexpected => {
                    return Err(ConnError::ProtocolViolation(format!(
                        "in-order packet seq={seq} is neither data nor FIN"
                    )));
                }
            }
        }
    }

    /// Answer the peer's FIN and wait for its final ACK.
    ///
    /// Only an ACK of the FIN+ACK itself completes the teardown; late
    /// acknowledgments from the data phase are ignored.
    ///
    /// The closer leaves as soon as it has sent that ACK, so running out of
    /// retries here means it was lost and the connection is closed anyway.
    async fn passive_close(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.session.state = ConnectionState::Closing;
        let fin_ack = self.session.fin_ack();
        self.transmit(&fin_ack, peer).await?;

        loop {
            let Some(reply) = self.read_from(peer).await? else {
                if self.session.retries.on_timeout().is_err() {
                    log::warn!("[rdt] final ACK from {peer} never arrived; closing anyway");
                    break;
                }
                self.transmit(&fin_ack, peer).await?;
                continue;
            };
            self.session.retries.reset();

            if reply.is_fin() {
                // Our FIN+ACK was lost; the closer is repeating its FIN.
                self.transmit(&fin_ack, peer).await?;
                continue;
            }
            if reply.is_pure_ack() && reply.ack == fin_ack.seq {
                break;
            }
            log::debug!("[rdt] ignoring stale {reply} during close");
        }

        self.session.on_confirmed(1);
        self.session.state = ConnectionState::Closed;
        self.deadline = None;
        self.held = None;
        log::debug!("[rdt] connection closed by {peer}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    fn session_at(accepted: u32) -> Session {
        let mut s = Session::new(5);
        s.accepted = accepted;
        s
    }

    #[test]
    fn in_order_data_is_delivered() {
        let s = session_at(4);
        assert_eq!(
            classify(&s, Packet::data(5, 0, b"hello".to_vec())),
            Inbound::Data(b"hello".to_vec())
        );
    }

    #[test]
    fn empty_payload_is_still_data() {
        let s = session_at(0);
        assert_eq!(classify(&s, Packet::data(1, 0, Vec::new())), Inbound::Data(Vec::new()));
    }

    #[test]
    fn duplicate_and_future_packets_are_out_of_order() {
        let s = session_at(4);
        assert_eq!(classify(&s, Packet::data(4, 0, b"old".to_vec())), Inbound::OutOfOrder);
        assert_eq!(classify(&s, Packet::data(7, 0, b"new".to_vec())), Inbound::OutOfOrder);
        assert_eq!(
            classify(&s, Packet::control(1, 1, flags::SYN | flags::ACK)),
            Inbound::OutOfOrder
        );
    }

    #[test]
    fn pure_ack_is_skipped_even_when_in_order() {
        // The handshake's closing ACK shares its seq with the first message.
        let s = session_at(1);
        assert_eq!(classify(&s, Packet::control(2, 1, flags::ACK)), Inbound::PureAck);
    }

    #[test]
    fn in_order_fin_is_teardown() {
        let s = session_at(9);
        assert_eq!(classify(&s, Packet::control(10, 3, flags::FIN)), Inbound::Fin);
    }

    #[test]
    fn in_order_syn_or_bare_control_is_unexpected() {
        let s = session_at(0);
        assert_eq!(classify(&s, Packet::control(1, 0, flags::SYN)), Inbound::Unexpected);
        assert_eq!(classify(&s, Packet::control(1, 0, 0)), Inbound::Unexpected);
    }
}
