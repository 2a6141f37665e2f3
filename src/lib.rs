#![recursion_limit = "256"]

// Library crate for emergent-mcp

pub mod client;
pub mod config;
pub mod error;
pub mod operations;
pub mod server;
pub mod tools;
pub mod transport;
