//! Connection finite-state machine (FSM) types.
//!
//! Transitions are driven by [`crate::connection::Connection`]; this module
//! only names the states and the guards every public operation checks.
//!
//! ```text
//!  Idle ──connect/accept──▶ Handshaking ──SYN/SYN-ACK/ACK──▶ Established
//!   ▲                            │                               │
//!   └──────── handshake failed ──┘              close / peer FIN │
//!                                                                ▼
//!  (new connect/accept) ◀──────────── Closed ◀──FIN/FIN-ACK/ACK── Closing
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection yet; initial state.
    #[default]
    Idle,
    /// SYN sent or received; the three-way handshake is in progress.
    Handshaking,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent or received; the teardown handshake is in progress.
    Closing,
    /// Teardown complete.  Terminal for this connection; the socket may be
    /// reused for a new one.
    Closed,
}

impl ConnectionState {
    /// States from which a new handshake may start.
    pub fn can_open(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// States in which `send` / `send_batch` / `close` are legal.
    pub fn can_send(self) -> bool {
        self == Self::Established
    }

    /// States in which `receive` is legal.
    pub fn can_receive(self) -> bool {
        matches!(self, Self::Established | Self::Closing)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Handshaking => "HANDSHAKING",
            Self::Established => "ESTABLISHED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
