//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  The two modes are the demonstration endpoints: the client asks for
//! twenty strings, the server sends them as one pipelined batch and closes.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use rdt_over_udp::{Connection, Delivery, SimulatorConfig, TimerConfig};

const REQUEST: &str = "Give me 20 strings";
const REPLY_COUNT: usize = 20;

/// Reliable, ordered messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Receive deadline in milliseconds.
    #[arg(long, default_value_t = 200, global = true)]
    rto_ms: u64,
    /// Consecutive timeouts tolerated before giving up on the peer.
    #[arg(long, default_value_t = 5, global = true)]
    retries: u32,
    /// Simulated loss probability for bounded receives (0.0 disables it).
    #[arg(long, default_value_t = 0.0, global = true)]
    loss: f64,
    /// Seed for the loss simulator.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one connection and answer its request.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:8888")]
        bind: SocketAddr,
    },
    /// Connect to a server, request the strings and print them.
    Client {
        /// Remote server address.
        #[arg(short, long, default_value = "127.0.0.1:8888")]
        server: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = TimerConfig {
        rto: Duration::from_millis(cli.tuning.rto_ms),
        retry_limit: cli.tuning.retries,
        ..TimerConfig::default()
    };
    let faults = SimulatorConfig {
        loss_rate: cli.tuning.loss,
        seed: cli.tuning.seed,
    };

    match cli.mode {
        Mode::Server { bind } => {
            let mut conn = Connection::bind(Some(bind), config).await?;
            conn.set_fault_injector(faults.build());
            log::info!("Starting server on {}", conn.local_addr());
            run_server(&mut conn).await
        }
        Mode::Client { server } => {
            let mut conn = Connection::bind(None, config).await?;
            conn.set_fault_injector(faults.build());
            log::info!("Starting client, connecting to {server}");
            run_client(&mut conn, server).await
        }
    }
}

async fn run_server(conn: &mut Connection) -> Result<()> {
    let peer = conn.accept().await.context("accept")?;
    log::info!("Accepted connection from {peer}");

    let request = match conn.receive().await.context("receive request")? {
        Delivery::Data(bytes) => bytes,
        Delivery::Closed => bail!("client closed before sending a request"),
    };

    match String::from_utf8_lossy(&request).as_ref() {
        REQUEST => {
            let replies: Vec<String> = (0..REPLY_COUNT).map(|i| format!("String {i}")).collect();
            conn.send_batch(&replies).await.context("send replies")?;
        }
        other => bail!("unknown request {other:?}"),
    }

    conn.close().await.context("close")?;
    log::info!("Connection closed");
    Ok(())
}

async fn run_client(conn: &mut Connection, server: SocketAddr) -> Result<()> {
    conn.connect(server).await.context("connect")?;
    conn.send(REQUEST.as_bytes()).await.context("send request")?;

    while let Delivery::Data(message) = conn.receive().await.context("receive")? {
        println!("{}", String::from_utf8_lossy(&message));
    }
    log::info!("Server closed the connection");
    Ok(())
}
