//! Room relay server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──TCP──▶ net::listener ──▶ ws::session (one task per connection)
//!                                          │  http::request   (request head)
//!                                          │  ws::handshake   (101 / 400 / JSON 200)
//!                                          │  ws::codec       (frames)
//!                                          │  ws::message     (reassembly)
//!                                          ▼
//!                                     rooms::router ──▶ member queues ──▶ writer tasks
//!                                          │                                   │
//!                                     rooms::registry                      TCP ──▶ Clients
//!                                     (room → members, join order)
//! ```

use std::path::PathBuf;

use clap::Parser;

use room_relay::lifecycle::{signals, startup, Shutdown};
use room_relay::observability::{logging, metrics};
use room_relay::RelayServer;

/// WebSocket room relay.
#[derive(Debug, Parser)]
#[command(name = "room-relay", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = startup::resolve_config(cli.config.as_deref(), cli.bind.as_deref())?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "room-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        violation_policy = ?config.websocket.violation_policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = startup::bind(&config).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = RelayServer::new(&config);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = signals::wait_for_termination() => {
            shutdown.trigger();
            server_task.await??;
        }
        result = &mut server_task => result??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
