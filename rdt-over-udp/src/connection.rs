//! Per-connection engine.
//!
//! A [`Connection`] owns the complete state for one peer-to-peer session:
//! the [`Socket`], the [`Session`] counters and the current receive
//! deadline.  Its public operations are spread over three modules:
//!
//! | Module                  | Operations                         |
//! |-------------------------|------------------------------------|
//! | [`crate::handshake`]    | `connect`, `accept`, `close`       |
//! | [`crate::sender`]       | `send`, `send_batch`               |
//! | [`crate::receiver`]     | `receive` (and the peer's teardown)|
//!
//! This module holds the constructor, accessors, and the helpers every
//! step shares: transmitting a packet and reading the peer's next packet
//! under the bounded retry budget.
//!
//! Every operation takes `&mut self`.  One connection is driven by one
//! caller at a time; wrap it in a mutex or give it its own task if several
//! need to share it.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{Packet, PacketError, MAX_PAYLOAD};
use crate::session::Session;
use crate::simulator::FaultInjector;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::timer::TimerConfig;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Errors surfaced by [`Connection`] operations.
///
/// Timeouts and undecodable datagrams never appear here; they are absorbed
/// by the retry budget and only show up as [`ConnError::PeerUnresponsive`]
/// once it is spent.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The operation needs a connection in a different state.
    #[error("not connected (state is {state})")]
    NotConnected { state: ConnectionState },
    /// `connect` / `accept` called while a connection is open.
    #[error("a connection is already open (state is {state})")]
    AlreadyConnected { state: ConnectionState },
    /// The retry limit was exceeded while waiting on the peer.
    #[error("peer unresponsive after {attempts} timeouts")]
    PeerUnresponsive { attempts: u32 },
    /// The peer sent something the current step cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A message does not fit in one datagram.
    #[error("message of {0} bytes does not fit in one datagram")]
    PayloadTooLarge(usize),
    /// Non-recoverable OS-level socket failure.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

impl From<SocketError> for ConnError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Io(e) => Self::Socket(e),
            SocketError::Packet(PacketError::PayloadTooLarge(n)) => Self::PayloadTooLarge(n),
            SocketError::Packet(e) => Self::ProtocolViolation(e.to_string()),
            SocketError::Timeout => Self::Socket(std::io::ErrorKind::TimedOut.into()),
        }
    }
}

/// What [`Connection::receive`] hands back to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The next in-order message.
    Data(Vec<u8>),
    /// The peer closed the connection; no more data will follow.
    Closed,
}

impl Delivery {
    /// The payload, or `None` once the connection is closed.
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Self::Data(d) => Some(d),
            Self::Closed => None,
        }
    }
}

pub(crate) fn violation(step: &str, got: &Packet) -> ConnError {
    ConnError::ProtocolViolation(format!("{step}: unexpected {got}"))
}

pub(crate) fn check_payload(len: usize) -> Result<(), ConnError> {
    if len > MAX_PAYLOAD {
        return Err(ConnError::PayloadTooLarge(len));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A reliable, ordered connection to exactly one peer over UDP.
#[derive(Debug)]
pub struct Connection {
    pub(crate) socket: Socket,
    pub(crate) session: Session,
    pub(crate) config: TimerConfig,
    /// Deadline for reads from the peer; `None` waits indefinitely.
    pub(crate) deadline: Option<Duration>,
    /// An in-order packet from the peer that arrived while a different step
    /// was waiting; handed to the next `receive`.
    pub(crate) held: Option<Packet>,
}

impl Connection {
    /// Wrap an already bound socket using the default [`TimerConfig`].
    pub fn new(socket: Socket) -> Self {
        Self::with_config(socket, TimerConfig::default())
    }

    pub fn with_config(mut socket: Socket, config: TimerConfig) -> Self {
        socket.set_max_datagram(config.max_datagram);
        Self {
            socket,
            session: Session::new(config.retry_limit),
            config,
            deadline: None,
            held: None,
        }
    }

    /// Bind a socket to `local_addr` (an ephemeral wildcard port when
    /// `None`) and wrap it.
    pub async fn bind(
        local_addr: Option<SocketAddr>,
        config: TimerConfig,
    ) -> Result<Self, ConnError> {
        let addr = local_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        let socket = Socket::bind(addr).await?;
        Ok(Self::with_config(socket, config))
    }

    /// Replace the socket's fault injector.
    pub fn set_fault_injector(&mut self, faults: Box<dyn FaultInjector>) {
        self.socket.set_fault_injector(faults);
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// Packets of ours the peer has confirmed.
    pub fn sent(&self) -> u32 {
        self.session.sent
    }

    /// Packets accepted in order from the peer.
    pub fn accepted(&self) -> u32 {
        self.session.accepted
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.session.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    pub(crate) fn require_established(&self) -> Result<SocketAddr, ConnError> {
        let state = self.session.state;
        match self.session.peer {
            Some(peer) if state.can_send() => Ok(peer),
            _ => Err(ConnError::NotConnected { state }),
        }
    }

    pub(crate) fn require_receivable(&self) -> Result<SocketAddr, ConnError> {
        let state = self.session.state;
        match self.session.peer {
            Some(peer) if state.can_receive() => Ok(peer),
            _ => Err(ConnError::NotConnected { state }),
        }
    }

    // -----------------------------------------------------------------------
    // Shared I/O helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn transmit(&self, packet: &Packet, dest: SocketAddr) -> Result<(), ConnError> {
        log::debug!("[rdt] → {packet}");
        self.socket.send_to(packet, dest).await?;
        Ok(())
    }

    /// One bounded read, filtered to datagrams from `peer`.
    ///
    /// Returns `Ok(None)` when the datagram should count as lost: the read
    /// timed out, the fault injector dropped it, it did not decode, or it
    /// came from somebody else.
    pub(crate) async fn read_from(&self, peer: SocketAddr) -> Result<Option<Packet>, ConnError> {
        match self.socket.recv_from(self.deadline).await {
            Ok((packet, from)) if from == peer => {
                log::debug!("[rdt] ← {packet}");
                Ok(Some(packet))
            }
            Ok((packet, from)) => {
                log::warn!("[rdt] discarding {packet} from stray address {from}");
                Ok(None)
            }
            Err(SocketError::Timeout) => Ok(None),
            Err(SocketError::Packet(e)) => {
                log::debug!("[rdt] discarding corrupt datagram: {e}");
                Ok(None)
            }
            Err(SocketError::Io(e)) if is_transient_io_error(&e) => {
                log::debug!("[rdt] transient socket error treated as loss: {e}");
                Ok(None)
            }
            Err(SocketError::Io(e)) => Err(ConnError::Socket(e)),
        }
    }

    /// Read until the peer's next packet arrives, absorbing up to
    /// `retry_limit` consecutive losses.  Nothing is retransmitted.
    pub(crate) async fn next_from(&mut self, peer: SocketAddr) -> Result<Packet, ConnError> {
        loop {
            if let Some(packet) = self.read_from(peer).await? {
                self.session.retries.reset();
                return Ok(packet);
            }
            self.on_lost("receive")?;
        }
    }

    /// Charge one loss against the retry budget.
    pub(crate) fn on_lost(&mut self, step: &str) -> Result<(), ConnError> {
        match self.session.retries.on_timeout() {
            Ok(n) => {
                log::debug!("[rdt] {step}: timeout {n}/{}", self.config.retry_limit);
                Ok(())
            }
            Err(exhausted) => {
                log::warn!(
                    "[rdt] {step}: peer unresponsive after {} timeouts",
                    exhausted.attempts
                );
                Err(ConnError::PeerUnresponsive {
                    attempts: exhausted.attempts,
                })
            }
        }
    }

    /// Keep `packet` for the next `receive` if it is the peer's next
    /// in-order packet and carries something for the receive path.
    pub(crate) fn hold_if_next(&mut self, packet: &Packet) {
        if self.held.is_none()
            && !packet.is_pure_ack()
            && !packet.is_syn()
            && self.session.is_next_from_peer(packet.seq)
        {
            log::debug!("[rdt] holding {packet} for the receive path");
            self.held = Some(packet.clone());
        }
    }
}

/// Errors after which the socket is still usable; reported as loss.
fn is_transient_io_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}
