//! `robokit-hal` – the capability model every piece of hardware satisfies.
//!
//! The runtime only ever talks to hardware through two traits:
//!
//! - [`Connection`] – an adaptor (serial port, bus, GPIO controller).
//! - [`Device`] – a driver bound to one connection.
//!
//! Pin-level access is offered by connections through the optional
//! [`capability`] traits and discovered by drivers, never by the runtime.
//!
//! # Modules
//!
//! - [`capability`] – `DigitalReader`, `DigitalWriter`, `PwmWriter`,
//!   `AnalogReader`.
//! - [`registry`] – ordered, name-unique collections used by robots.
//! - [`sim`] – in-memory connection and device for tests and dry runs.
//! - [`gpio`] – LED and button drivers written against the capabilities.

pub mod capability;
pub mod connection;
pub mod device;
pub mod gpio;
pub mod registry;
pub mod sim;

pub use capability::{AnalogReader, DigitalReader, DigitalWriter, PwmWriter};
pub use connection::{Connection, NameCell};
pub use device::Device;
pub use gpio::{ButtonDriver, LedDriver};
pub use registry::{ConnectionRegistry, DeviceRegistry, Named, Registry};
pub use sim::{Journal, SimConnection, SimDevice};
