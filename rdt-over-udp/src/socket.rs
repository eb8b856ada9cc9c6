//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O, receive deadlines and the
//! [`FaultInjector`] hook.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::packet::{Packet, PacketError};
use crate::simulator::{FaultInjector, NoFaults};

/// Default receive buffer size (theoretical UDP limit).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No datagram arrived before the deadline (or one was dropped by the
    /// fault injector).
    #[error("receive timed out")]
    Timeout,
    /// The datagram could not be encoded or decoded.
    #[error("packet codec error: {0}")]
    Packet(#[from] PacketError),
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket.
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    faults: Box<dyn FaultInjector>,
    max_datagram: usize,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .field("max_datagram", &self.max_datagram)
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Bind a new socket to `local_addr` with no fault injection.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        Self::bind_with_faults(local_addr, Box::new(NoFaults)).await
    }

    /// Bind a new socket whose bounded reads consult `faults`.
    pub async fn bind_with_faults(
        local_addr: SocketAddr,
        faults: Box<dyn FaultInjector>,
    ) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            faults,
            max_datagram: MAX_DATAGRAM,
        })
    }

    /// Replace the fault injector.
    pub fn set_fault_injector(&mut self, faults: Box<dyn FaultInjector>) {
        self.faults = faults;
    }

    /// Change the receive buffer size.
    pub fn set_max_datagram(&mut self, max_datagram: usize) {
        self.max_datagram = max_datagram.max(crate::packet::HEADER_LEN);
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        let bytes = packet.encode()?;
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// With `deadline = Some(d)` the read fails with [`SocketError::Timeout`]
    /// when nothing arrives within `d`, and a datagram that does arrive may
    /// still be dropped by the fault injector (reported the same way).  With
    /// `None` the read waits indefinitely and is never dropped.
    ///
    /// Returns `(packet, sender_address)`.  Datagrams that fail to decode are
    /// returned as `Err`; the caller decides whether to retry.
    pub async fn recv_from(
        &self,
        deadline: Option<Duration>,
    ) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; self.max_datagram];
        let (n, addr) = match deadline {
            Some(d) => timeout(d, self.inner.recv_from(&mut buf))
                .await
                .map_err(|_elapsed| SocketError::Timeout)??,
            None => self.inner.recv_from(&mut buf).await?,
        };

        if self.faults.maybe_drop(deadline.is_some()) {
            log::trace!("[rdt] simulated loss of {n} byte datagram from {addr}");
            return Err(SocketError::Timeout);
        }

        let packet = Packet::decode(&buf[..n])?;
        Ok((packet, addr))
    }

    /// Discard every datagram already queued on the socket.
    ///
    /// Reads until nothing arrives within `per_datagram`.  Best effort: an
    /// I/O error simply ends the sweep.  Returns how many datagrams were
    /// discarded.
    pub async fn drain(&self, per_datagram: Duration) -> usize {
        let mut buf = vec![0u8; self.max_datagram];
        let mut discarded = 0;
        while let Ok(Ok((n, addr))) = timeout(per_datagram, self.inner.recv_from(&mut buf)).await {
            log::trace!("[rdt] drained {n} byte datagram from {addr}");
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;
    use crate::simulator::ScriptedLoss;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn send_and_receive_packet() {
        let a = Socket::bind(loopback()).await.unwrap();
        let b = Socket::bind(loopback()).await.unwrap();

        let pkt = Packet::data(1, 0, b"hi".to_vec());
        a.send_to(&pkt, b.local_addr).await.unwrap();

        let (got, from) = b
            .recv_from(Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(got, pkt);
        assert_eq!(from, a.local_addr);
    }

    #[tokio::test]
    async fn bounded_read_times_out() {
        let a = Socket::bind(loopback()).await.unwrap();
        let err = a
            .recv_from(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, SocketError::Timeout));
    }

    #[tokio::test]
    async fn injected_drop_reports_timeout_and_consumes_datagram() {
        let a = Socket::bind(loopback()).await.unwrap();
        let b = Socket::bind_with_faults(loopback(), Box::new(ScriptedLoss::drop_first(1)))
            .await
            .unwrap();

        a.send_to(&Packet::control(1, 0, flags::SYN), b.local_addr)
            .await
            .unwrap();
        a.send_to(&Packet::control(2, 0, flags::ACK), b.local_addr)
            .await
            .unwrap();

        let deadline = Some(Duration::from_secs(1));
        assert!(matches!(
            b.recv_from(deadline).await,
            Err(SocketError::Timeout)
        ));
        let (got, _) = b.recv_from(deadline).await.unwrap();
        assert_eq!(got.seq, 2);
    }

    #[tokio::test]
    async fn unbounded_read_is_never_dropped() {
        let a = Socket::bind(loopback()).await.unwrap();
        let b = Socket::bind_with_faults(loopback(), Box::new(|_: bool| true))
            .await
            .unwrap();

        a.send_to(&Packet::control(1, 0, flags::SYN), b.local_addr)
            .await
            .unwrap();
        let (got, _) = b.recv_from(None).await.unwrap();
        assert!(got.is_syn());
    }

    #[tokio::test]
    async fn corrupt_datagram_is_a_packet_error() {
        let raw = UdpSocket::bind(loopback()).await.unwrap();
        let b = Socket::bind(loopback()).await.unwrap();
        raw.send_to(b"nonsense", b.local_addr).await.unwrap();

        let err = b
            .recv_from(Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SocketError::Packet(_)));
    }

    #[tokio::test]
    async fn drain_discards_queued_datagrams() {
        let a = Socket::bind(loopback()).await.unwrap();
        let b = Socket::bind(loopback()).await.unwrap();
        for seq in 0..5 {
            a.send_to(&Packet::control(seq, 0, flags::ACK), b.local_addr)
                .await
                .unwrap();
        }
        // Give loopback a moment to queue everything.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(b.drain(Duration::from_millis(20)).await, 5);
        assert!(matches!(
            b.recv_from(Some(Duration::from_millis(20))).await,
            Err(SocketError::Timeout)
        ));
    }
}
