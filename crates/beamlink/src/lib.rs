pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use client::ChainClient;
pub use session::{ConnectionState, SessionRef, SessionStatus};
