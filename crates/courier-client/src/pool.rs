//! Registry of client groups.
//!
//! Create one [`ClientInstancePool`] at startup and share it (`Arc`) with
//! whatever needs to reach a group.

use std::sync::Arc;

use courier_core::{Registry, Result, WsError};
use tracing::{debug, warn};

use crate::instance::ClientInstance;

/// Client groups keyed by group name.
#[derive(Debug, Default)]
pub struct ClientInstancePool {
    groups: Registry<String, Arc<ClientInstance>>,
}

impl ClientInstancePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instance` under its name.
    pub fn append(&self, instance: ClientInstance) -> Result<Arc<ClientInstance>> {
        let name = instance.name().to_owned();
        let instance = Arc::new(instance);
        if !self.groups.insert_if_absent(name.clone(), Arc::clone(&instance)) {
            return Err(WsError::ClientExist(name));
        }
        debug!(group = %name, "group appended");
        Ok(instance)
    }

    /// Deregister a group without closing its clients.
    pub fn remove(&self, name: &str) -> Result<Arc<ClientInstance>> {
        self.groups
            .remove_by_key(&name.to_owned())
            .ok_or_else(|| WsError::ClientNotExist(name.to_owned()))
    }

    /// Look up a group.
    pub fn get(&self, name: &str) -> Result<Arc<ClientInstance>> {
        self.groups
            .get(&name.to_owned())
            .ok_or_else(|| WsError::ClientNotExist(name.to_owned()))
    }

    /// Whether a group is registered under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.groups.has_key(&name.to_owned())
    }

    /// Registered group names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.groups.keys()
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups are registered.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Close every client of one group and deregister the group.
    ///
    /// Returns the per-client close failures.
    pub async fn close(&self, name: &str) -> Result<Vec<WsError>> {
        let instance = self.remove(name)?;
        Ok(instance.clean().await)
    }

    /// Close every group.
    ///
    /// Groups whose clients all close cleanly are deregistered; the rest stay
    /// registered with their failing clients. All failures are returned.
    pub async fn clean(&self) -> Vec<WsError> {
        let mut errors = Vec::new();
        for (name, instance) in self.groups.snapshot() {
            let failures = instance.clean().await;
            if failures.is_empty() {
                let _ = self.groups.remove_by_key(&name);
            } else {
                warn!(group = %name, failures = failures.len(), "group clean incomplete");
                errors.extend(failures);
            }
        }
        errors
    }
}
