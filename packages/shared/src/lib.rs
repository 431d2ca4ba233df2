//! Utilities shared by the Kairo server and client binaries.

pub mod logger;
pub mod time;
