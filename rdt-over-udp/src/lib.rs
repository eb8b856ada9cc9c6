//! `rdt-over-udp`: a minimal TCP-like reliable, ordered transport over UDP.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ connect / accept / send / send_batch / receive / close
//!  ┌───▼───────────────────────────────────────────┐
//!  │                 Connection                    │
//!  │  handshake ─ sender ─ receiver                │
//!  │  (owns Session counters + deadline + socket)  │
//!  └───┬───────────────────────────────────────────┘
//!      │ Packet
//!  ┌───▼──────┐   maybe_drop   ┌───────────────┐
//!  │  Socket  │───────────────▶│ FaultInjector │
//!  └───┬──────┘                └───────────────┘
//!      │ raw UDP datagrams
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`simulator`]: pluggable packet-loss injection
//! - [`socket`]: async UDP socket with deadlines and draining
//! - [`state`]: finite-state-machine tag
//! - [`session`]: sequence / acknowledgment counters, packet builders
//! - [`timer`]: receive deadline and retry budget
//! - [`connection`]: the engine type and its shared helpers
//! - [`handshake`]: connect, accept, close
//! - [`sender`]: single and pipelined sends
//! - [`receiver`]: in-order delivery and the peer's teardown
//!
//! ```ignore
//! let mut conn = Connection::bind(None, TimerConfig::default()).await?;
//! conn.connect(server).await?;
//! conn.send(b"Give me 20 strings").await?;
//! while let Delivery::Data(msg) = conn.receive().await? {
//!     println!("{}", String::from_utf8_lossy(&msg));
//! }
//! ```

pub mod connection;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use connection::{ConnError, Connection, Delivery};
pub use packet::Packet;
pub use simulator::{FaultInjector, NoFaults, RandomLoss, ScriptedLoss, SimulatorConfig};
pub use socket::Socket;
pub use state::ConnectionState;
pub use timer::TimerConfig;
