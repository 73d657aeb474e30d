//! [`Registry`] – ordered, name-unique collection of connections or devices.
//!
//! A robot keeps one registry of each. Insertion order is the lifecycle
//! order: connections connect and devices start in the order they were
//! added, and unwind in reverse. Lookups resolve against each item's current
//! name.

use std::sync::Arc;

use robokit_types::BotError;

use crate::connection::Connection;
use crate::device::Device;

/// Anything a [`Registry`] can hold.
pub trait Named {
    fn registry_name(&self) -> String;
}

impl Named for dyn Connection {
    fn registry_name(&self) -> String {
        self.name()
    }
}

impl Named for dyn Device {
    fn registry_name(&self) -> String {
        self.name()
    }
}

pub type ConnectionRegistry = Registry<dyn Connection>;
pub type DeviceRegistry = Registry<dyn Device>;

pub struct Registry<T: ?Sized + Named> {
    kind: &'static str,
    items: Vec<Arc<T>>,
}

impl ConnectionRegistry {
    pub fn connections() -> Self {
        Self::new("connection")
    }
}

impl DeviceRegistry {
    pub fn devices() -> Self {
        Self::new("device")
    }
}

impl<T: ?Sized + Named> Registry<T> {
    /// `kind` is used in duplicate-name errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    /// Append `item`.
    ///
    /// # Errors
    ///
    /// [`BotError::DuplicateName`] if an item with the same name is present.
    pub fn add(&mut self, item: Arc<T>) -> Result<(), BotError> {
        let name = item.registry_name();
        if self.contains(&name) {
            return Err(BotError::DuplicateName {
                kind: self.kind.to_string(),
                name,
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.items
            .iter()
            .find(|item| item.registry_name() == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|item| item.registry_name() == name)
    }

    /// Items in insertion order.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.items.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.registry_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: ?Sized + Named> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConnection, SimDevice};

    #[test]
    fn preserves_insertion_order() {
        let mut registry = ConnectionRegistry::connections();
        for name in ["c", "a", "b"] {
            registry.add(SimConnection::named(name)).unwrap();
        }
        assert_eq!(registry.names(), ["c", "a", "b"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ConnectionRegistry::connections();
        registry.add(SimConnection::named("bus")).unwrap();

        let err = registry.add(SimConnection::named("bus")).unwrap_err();
        assert_eq!(
            err,
            BotError::DuplicateName {
                kind: "connection".into(),
                name: "bus".into()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_follows_renames() {
        let conn = SimConnection::named("bus");
        let mut devices = DeviceRegistry::devices();
        let led = SimDevice::builder("led", conn).build();
        devices.add(led.clone()).unwrap();

        led.set_name("status-led");
        assert!(devices.get("led").is_none());
        assert!(devices.get("status-led").is_some());
    }
}
