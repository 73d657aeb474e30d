//! `robokit-runtime` – drives robots through their lifecycle.
//!
//! # Modules
//!
//! - [`robot`] – [`Robot`]: connections, devices and work with ordered
//!   start, rollback on failure, and idempotent halt.
//! - [`manager`] – [`Manager`]: a fleet of robots started and stopped
//!   together, optionally held open until an interrupt.
//! - [`work`] – `Every`/`After` scheduling with cooperative cancellation,
//!   per-owner registries and drain groups, plus process-wide helpers.
//! - [`signal`] – interrupt traps, injectable for tests.
//! - [`projection`] – JSON views of connections and devices.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging with an optional OTLP span exporter.

pub mod manager;
pub mod projection;
pub mod robot;
pub mod signal;
pub mod telemetry;
pub mod work;

pub use manager::Manager;
pub use robot::{Robot, RobotState, WorkFn};
pub use signal::{SignalTrap, Trigger};
pub use work::{RobotWork, Scheduler, WorkKind, WorkRegistry, after_with, every_with};
