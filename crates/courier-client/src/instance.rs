//! Named collection of clients.

use courier_core::{Registry, Result, WsError};
use tracing::{debug, warn};

use crate::client::Client;

/// Clients of one group, keyed by client name.
#[derive(Debug)]
pub struct ClientInstance {
    name: String,
    connections: Registry<String, Client>,
}

impl ClientInstance {
    /// Create an empty instance.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connections: Registry::new(),
        }
    }

    /// Instance (group) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `client` under its name.
    pub fn append(&self, client: Client) -> Result<()> {
        let name = client.name().to_owned();
        if !self.connections.insert_if_absent(name.clone(), client) {
            return Err(WsError::ClientExist(name));
        }
        debug!(group = %self.name, client = %name, "client appended");
        Ok(())
    }

    /// Deregister a client without closing it.
    pub fn remove(&self, name: &str) -> Result<Client> {
        self.connections
            .remove_by_key(&name.to_owned())
            .ok_or_else(|| WsError::ClientNotExist(name.to_owned()))
    }

    /// Look up a client.
    pub fn get(&self, name: &str) -> Result<Client> {
        self.connections
            .get(&name.to_owned())
            .ok_or_else(|| WsError::ClientNotExist(name.to_owned()))
    }

    /// Whether a client is registered under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.connections.has_key(&name.to_owned())
    }

    /// Registered client names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.connections.keys()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close one client and deregister it.
    ///
    /// The client is deregistered even when closing it fails; the close
    /// error is returned.
    pub async fn close(&self, name: &str) -> Result<()> {
        let client = self.remove(name)?;
        client.close().await
    }

    /// Close every client.
    ///
    /// Clients that close cleanly are deregistered. Failures are collected
    /// and the failing clients stay registered.
    pub async fn clean(&self) -> Vec<WsError> {
        let mut errors = Vec::new();
        for (name, client) in self.connections.snapshot() {
            match client.close().await {
                Ok(()) => {
                    let _ = self.connections.remove_by_key(&name);
                }
                Err(err) => {
                    warn!(group = %self.name, client = %name, error = %err, "close failed during clean");
                    errors.push(err);
                }
            }
        }
        errors
    }
}
