//! Connection setup and active teardown.
//!
//! ```text
//!  Client (connect)                          Server (accept)
//!      │  SYN      seq=1 ack=0                    │
//!      │─────────────────────────────────────────▶│  accepted=1
//!      │  SYN+ACK  seq=1 ack=1                    │
//!      │◀─────────────────────────────────────────│
//!  accepted=1, sent=1                             │
//!      │  ACK      seq=2 ack=1                    │
//!      │─────────────────────────────────────────▶│  sent=1
//!      ▼ ESTABLISHED                              ▼ ESTABLISHED
//!
//!  Closer (close)                            Peer (receive)
//!      │  FIN      seq=s+1 ack=a                  │
//!      │─────────────────────────────────────────▶│
//!      │  FIN+ACK  ack=s+1                        │
//!      │◀─────────────────────────────────────────│
//!      │  ACK                                     │
//!      │─────────────────────────────────────────▶│
//!      ▼ CLOSED                                   ▼ CLOSED
//! ```
//!
//! Every wait except the listener's first read is bounded by the RTO and
//! retransmits on timeout until the retry limit runs out.  The peer's half
//! of the teardown lives in [`crate::receiver`], since a FIN can arrive in
//! the middle of ordinary data.

use std::net::SocketAddr;

use crate::connection::{violation, ConnError, Connection};
use crate::packet::Packet;
use crate::socket::SocketError;
use crate::state::ConnectionState;

impl Connection {
    /// Active open: run the three-way handshake against `peer`.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.begin_open()?;
        self.deadline = Some(self.config.rto);

        let result = self.active_open(peer).await;
        if let Err(e) = &result {
            log::warn!("[rdt] connect to {peer} failed: {e}");
            self.abort_open();
        }
        result
    }

    /// Passive open: wait for one peer's SYN and complete the handshake.
    ///
    /// The wait for the SYN is unbounded and never subject to simulated
    /// loss.  Returns the peer's address.
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        self.begin_open()?;
        self.deadline = None;

        let result = self.passive_open().await;
        if let Err(e) = &result {
            log::warn!("[rdt] accept failed: {e}");
            self.abort_open();
        }
        result
    }

    /// Active close: FIN, wait for FIN+ACK, final ACK.
    ///
    /// The connection ends up `Closed` whether or not the peer answered.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        let peer = self.require_established()?;
        self.session.state = ConnectionState::Closing;

        let result = self.active_close(peer).await;
        if let Err(e) = &result {
            log::warn!("[rdt] close failed, abandoning connection: {e}");
        }

        self.session.state = ConnectionState::Closed;
        self.deadline = None;
        self.held = None;
        result
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn begin_open(&mut self) -> Result<(), ConnError> {
        let state = self.session.state;
        if !state.can_open() {
            return Err(ConnError::AlreadyConnected { state });
        }
        self.session.reset();
        self.held = None;
        self.session.state = ConnectionState::Handshaking;
        Ok(())
    }

    fn abort_open(&mut self) {
        self.session.reset();
        self.held = None;
        self.deadline = None;
    }

    async fn active_open(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        let syn = self.session.syn();
        self.transmit(&syn, peer).await?;

        loop {
            let Some(reply) = self.read_from(peer).await? else {
                self.on_lost("SYN")?;
                self.transmit(&syn, peer).await?;
                continue;
            };
            self.session.retries.reset();

            if reply.is_syn() && reply.is_ack() && reply.ack == syn.seq {
                self.session.on_accepted();
                break;
            }
            return Err(violation("awaiting SYN+ACK", &reply));
        }

        self.session.on_confirmed(1);
        let ack = self.session.ack();
        self.transmit(&ack, peer).await?;

        self.establish(peer);
        Ok(())
    }

    async fn passive_open(&mut self) -> Result<SocketAddr, ConnError> {
        let (syn, peer) = self.listen().await?;
        if !(syn.is_syn() && self.session.is_next_from_peer(syn.seq)) {
            return Err(violation("awaiting SYN", &syn));
        }
        self.session.on_accepted();
        log::debug!("[rdt] SYN from {peer}");

        let syn_ack = self.session.syn_ack();
        self.deadline = Some(self.config.rto);
        self.transmit(&syn_ack, peer).await?;

        loop {
            let Some(reply) = self.read_from(peer).await? else {
                self.on_lost("SYN+ACK")?;
                self.transmit(&syn_ack, peer).await?;
                continue;
            };
            self.session.retries.reset();

            if reply.is_syn() {
                // Our SYN+ACK was lost; the peer is still retrying its SYN.
                self.transmit(&syn_ack, peer).await?;
                continue;
            }
            // Anything newer than the SYN means the peer is established.
            // Data it already sent is kept for the first receive.
            if reply.seq > self.session.accepted {
                self.hold_if_next(&reply);
                break;
            }
            log::debug!("[rdt] ignoring stale {reply} during handshake");
        }

        self.session.on_confirmed(1);
        self.establish(peer);
        Ok(peer)
    }

    async fn active_close(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        let fin = self.session.fin();
        self.transmit(&fin, peer).await?;

        loop {
            let Some(reply) = self.read_from(peer).await? else {
                self.on_lost("FIN")?;
                self.transmit(&fin, peer).await?;
                continue;
            };
            self.session.retries.reset();

            if reply.is_fin() && reply.is_ack() {
                if reply.ack != fin.seq {
                    return Err(violation("awaiting FIN+ACK", &reply));
                }
                self.session.on_accepted();
                break;
            }
            if reply.is_syn() {
                return Err(violation("awaiting FIN+ACK", &reply));
            }
            // Late acknowledgments and retransmissions from the data phase.
            log::debug!("[rdt] ignoring stale {reply} during close");
        }

        self.session.on_confirmed(1);
        let ack = self.session.ack();
        self.transmit(&ack, peer).await?;
        log::debug!("[rdt] connection to {peer} closed");
        Ok(())
    }

    /// Unbounded read for the first packet of a new connection.
    ///
    /// Undecodable datagrams are skipped; only OS errors end the wait.
    async fn listen(&self) -> Result<(Packet, SocketAddr), ConnError> {
        loop {
            match self.socket.recv_from(None).await {
                Ok((packet, from)) => {
                    log::debug!("[rdt] ← {packet} from {from}");
                    return Ok((packet, from));
                }
                Err(SocketError::Io(e)) => return Err(ConnError::Socket(e)),
                Err(e) => log::debug!("[rdt] listener skipping datagram: {e}"),
            }
        }
    }

    fn establish(&mut self, peer: SocketAddr) {
        self.session.peer = Some(peer);
        self.session.state = ConnectionState::Established;
        log::debug!(
            "[rdt] established with {peer} (sent={}, accepted={})",
            self.session.sent,
            self.session.accepted
        );
    }
}
