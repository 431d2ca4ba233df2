//! Line-oriented TCP chat server.
//!
//! Every line a client sends is relayed to all other connected clients. Each
//! connection is served by its own OS thread; shutdown works by forcing the
//! sockets those threads block on closed.

pub mod connection;
pub mod error;
pub mod handler;
pub mod line;
pub mod manager;
pub mod server;
pub mod signal;
pub mod socket;

pub use connection::{Connection, ConnectionRef, ConnectionRegistry};
pub use error::{ServerError, SocketError};
pub use handler::{BroadcastHandler, ChainedHandler, MessageHandler};
pub use manager::{ConnectionLifecycle, ConnectionManager, ManagerState};
pub use server::{ChatServer, ServerConfig, broadcast_manager};
pub use socket::{SocketConfig, TransportSocket};
