//! # courier-client
//!
//! Outbound WebSocket connections with two request styles layered over one
//! socket:
//!
//! - **sync**: write a raw frame, block until the next raw frame or timeout
//! - **async**: write `<uuid>:<payload>`, get a callback when the matching
//!   reply arrives, or a send failure when it does not
//!
//! Clients are grouped in a [`ClientInstance`] and groups in a
//! [`ClientInstancePool`].

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod handlers;
pub mod instance;
pub mod pool;
mod transport;

pub use client::{AsyncCallback, Client};
pub use config::ClientConfig;
pub use handlers::ClientHandlers;
pub use instance::ClientInstance;
pub use pool::ClientInstancePool;
