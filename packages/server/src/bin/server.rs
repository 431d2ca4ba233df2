//! Line-oriented TCP chat server with broadcast functionality.
//!
//! Relays every line a client sends to all other connected clients.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kairo-server
//! cargo run --bin kairo-server -- --host :: --port 3000
//! ```

use clap::Parser;

use kairo_server::{ChatServer, ServerConfig, manager::DEFAULT_BACKLOG, signal::shutdown_signal};
use kairo_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kairo-server")]
#[command(about = "TCP chat server with broadcast support", long_about = None)]
struct Args {
    /// IPv4 or IPv6 address to bind the server to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,

    /// Listen backlog
    #[arg(short = 'b', long, default_value_t = DEFAULT_BACKLOG)]
    backlog: i32,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        backlog: args.backlog,
    };

    let server = match ChatServer::from_config(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = server.start() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    shutdown_signal().await;

    // stop() joins every connection thread
    if let Err(e) = tokio::task::spawn_blocking(move || server.stop()).await {
        tracing::error!("Shutdown failed: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
}
