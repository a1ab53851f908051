//! # courier-server
//!
//! Accepted WebSocket connections and the pool that indexes them.
//!
//! - [`Server`]: one connection with its reader task and send methods
//! - [`ServerPool`]: address and identity indexes, fan-out sends, the axum
//!   upgrade route
//! - [`ShutdownCoordinator`]: closes the pool on shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod handlers;
pub mod pool;
pub mod server;
pub mod shutdown;
mod transport;

pub use config::ServerConfig;
pub use handlers::ServerHandlers;
pub use pool::{IdentityCheck, ServerPool, header_identity};
pub use server::Server;
pub use shutdown::ShutdownCoordinator;
