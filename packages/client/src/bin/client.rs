//! Terminal chat client.
//!
//! Connects to a Kairo chat server, prints everything the server relays and
//! sends each line typed at the ">" prompt. Type `/quit` (or press Ctrl+C /
//! Ctrl+D) to leave.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kairo-client
//! cargo run --bin kairo-client -- --host ::1 --port 3000
//! ```

use clap::Parser;

use kairo_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "kairo-client")]
#[command(about = "TCP chat client for the Kairo chat server", long_about = None)]
struct Args {
    /// Server IPv4 or IPv6 address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,
}

fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();

    if let Err(e) = kairo_client::run_client(&args.host, args.port) {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
