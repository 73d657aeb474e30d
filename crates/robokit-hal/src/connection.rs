//! The [`Connection`] trait – a live handle to a piece of hardware.
//!
//! A connection is either disconnected or connected. `connect` must be
//! idempotent and `finalize` must leave the hardware quiescent whatever state
//! it finds it in. A single connection may be shared by several devices; it
//! is responsible for serialising its own bus access.

use async_trait::async_trait;
use parking_lot::RwLock;
use robokit_types::BotError;

use crate::capability::{AnalogReader, DigitalReader, DigitalWriter, PwmWriter};

/// A hardware adaptor: serial port, I²C bus, GPIO controller, BLE peripheral.
#[async_trait]
pub trait Connection: Send + Sync {
    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    /// Open the underlying hardware. Calling it again while connected is a no-op.
    async fn connect(&self) -> Result<(), BotError>;

    /// Release the hardware.
    async fn finalize(&self) -> Result<(), BotError>;

    /// Port or address the connection talks to, if it has one.
    fn port(&self) -> Option<String> {
        None
    }

    /// Human-readable adaptor type for introspection.
    fn type_name(&self) -> Option<String> {
        None
    }

    async fn reconnect(&self) -> Result<(), BotError> {
        self.finalize().await?;
        self.connect().await
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        Err(BotError::Unsupported(format!(
            "{} does not support disconnect",
            self.name()
        )))
    }

    fn digital_reader(&self) -> Option<&dyn DigitalReader> {
        None
    }

    fn digital_writer(&self) -> Option<&dyn DigitalWriter> {
        None
    }

    fn pwm_writer(&self) -> Option<&dyn PwmWriter> {
        None
    }

    fn analog_reader(&self) -> Option<&dyn AnalogReader> {
        None
    }
}

/// Interior-mutable name storage for connection and device implementations,
/// which only ever see `&self`.
#[derive(Debug, Default)]
pub struct NameCell(RwLock<String>);

impl NameCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self(RwLock::new(name.into()))
    }

    pub fn get(&self) -> String {
        self.0.read().clone()
    }

    pub fn set(&self, name: &str) {
        *self.0.write() = name.to_string();
    }
}
