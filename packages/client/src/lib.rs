//! Terminal client for the Kairo chat server.

mod error;
mod session;

pub use error::ClientError;
pub use session::{outgoing_line, run_client};
