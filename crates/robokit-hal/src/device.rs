//! The [`Device`] trait – a driver bound to exactly one [`Connection`].
//!
//! A device is unusable until `start` succeeds, and `halt` must be safe on a
//! device that never started. Devices expose behaviour to the outside world
//! by embedding a [`Commander`] and events by embedding an [`Eventer`].

use std::sync::Arc;

use async_trait::async_trait;
use robokit_middleware::{Commander, Eventer};
use robokit_types::BotError;

use crate::connection::Connection;

#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    async fn start(&self) -> Result<(), BotError>;

    async fn halt(&self) -> Result<(), BotError>;

    /// The connection this device talks through.
    fn connection(&self) -> Arc<dyn Connection>;

    /// Human-readable driver type for introspection.
    fn type_name(&self) -> Option<String> {
        None
    }

    fn commander(&self) -> Option<&Commander> {
        None
    }

    fn eventer(&self) -> Option<&Eventer> {
        None
    }
}
