//! relaypool - Outbound connection pooling for message delivery

pub mod client;
pub mod config;
pub mod pool;
pub mod registry;

pub use client::ClientManager;
pub use config::Config;
pub use pool::{Connection, Destination, PoolError};
