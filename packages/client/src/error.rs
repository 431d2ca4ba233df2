//! Error types for the chat client.

use kairo_server::SocketError;
use rustyline::error::ReadlineError;
use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting to or talking with the server failed
    #[error("Connection error: {0}")]
    Connection(#[from] SocketError),

    /// Terminal input could not be read
    #[error("Input error: {0}")]
    Input(#[from] ReadlineError),

    /// The receiving thread could not be started
    #[error("Failed to spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}
