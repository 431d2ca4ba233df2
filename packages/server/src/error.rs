//! Error types for the Kairo chat server.

use std::io;

use thiserror::Error;

/// Transport socket errors
#[derive(Debug, Error)]
pub enum SocketError {
    /// Address family or socket kind is not supported
    #[error("Invalid socket configuration: {0}")]
    ConfigInvalid(String),

    /// The OS refused to allocate a socket
    #[error("Failed to create socket: {0}")]
    SocketCreateFailed(#[source] io::Error),

    /// Address literal does not parse for the socket's family
    #[error("Invalid {family} address: {address}")]
    InvalidAddress { family: &'static str, address: String },

    #[error("Bind failed: {0}")]
    BindFailed(#[source] io::Error),

    #[error("Listen failed: {0}")]
    ListenFailed(#[source] io::Error),

    /// Operation is only meaningful for stream sockets
    #[error("{0} is only supported on stream sockets")]
    WrongSocketKind(&'static str),

    #[error("Accept failed: {0}")]
    AcceptFailed(#[source] io::Error),

    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// The socket was shut down, possibly while a call was blocked on it
    #[error("Socket is closed")]
    SocketClosed,

    #[error("Send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] io::Error),
}

/// Connection manager and server facade errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or listening on the server socket failed
    #[error("Failed to start server: {0}")]
    StartFailed(#[source] SocketError),

    /// `start` was called on a manager that is not in the `Created` state
    #[error("Failed to start server: manager is {0}")]
    InvalidState(&'static str),

    /// The accept thread could not be spawned
    #[error("Failed to spawn accept thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// No handler in the chain claimed the message
    #[error("No handler claimed message from connection {connection}")]
    UnhandledMessage { connection: uuid::Uuid },
}

impl From<SocketError> for ServerError {
    fn from(err: SocketError) -> Self {
        ServerError::StartFailed(err)
    }
}
