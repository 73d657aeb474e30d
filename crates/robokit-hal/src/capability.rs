//! Optional pin-level capabilities a [`Connection`][crate::Connection] may
//! offer to the drivers bound to it.
//!
//! The runtime never looks at these. Drivers discover them through the
//! accessor methods on [`Connection`][crate::Connection] and fail their
//! `start` with [`BotError::Unsupported`] when a required one is missing.
//!
//! Pins are named by string (`"13"`, `"P1_7"`, `"GPIO4"`) because pin naming
//! is board-specific.

use robokit_types::BotError;

/// Read a digital level (0 or 1) from a pin.
pub trait DigitalReader: Send + Sync {
    fn digital_read(&self, pin: &str) -> Result<u8, BotError>;
}

/// Drive a pin to a digital level.
pub trait DigitalWriter: Send + Sync {
    fn digital_write(&self, pin: &str, level: u8) -> Result<(), BotError>;
}

/// Write an 8-bit PWM duty cycle to a pin.
pub trait PwmWriter: Send + Sync {
    fn pwm_write(&self, pin: &str, duty: u8) -> Result<(), BotError>;
}

/// Read a raw analog sample from a pin.
pub trait AnalogReader: Send + Sync {
    fn analog_read(&self, pin: &str) -> Result<i32, BotError>;
}
