//! # courier-core
//!
//! Shared vocabulary for Courier client and server connections.
//!
//! - **Message**: the correlation envelope (`<id>:<payload>` or raw payload)
//! - **Frame**: closed set of transport frames the read loops dispatch on
//! - **Registry**: lock-protected, insertion-ordered map behind the client
//!   group and instance tables
//! - **Errors**: `WsError` taxonomy via `thiserror`
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod logging;
pub mod message;
pub mod registry;
pub mod status;

pub use errors::{Result, WsError};
pub use frame::Frame;
pub use message::Message;
pub use registry::Registry;
pub use status::ConnStatus;
