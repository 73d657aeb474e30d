//! `robokit-middleware` – the wiring between drivers.
//!
//! Carries values between devices, robots and external clients without caring
//! about what the values mean.
//!
//! # Modules
//!
//! - [`event`] – a single best-effort fan-out topic with one-slot buffering
//!   per subscriber.
//! - [`eventer`] – a named table of topics, embedded by anything that emits
//!   events.
//! - [`commander`] – a named table of JSON-in/JSON-out operations, embedded
//!   by anything that exposes commands.

pub mod commander;
pub mod event;
pub mod eventer;

pub use commander::{CommandFn, Commander};
pub use event::{Callback, DEFAULT_GRACE, Event, SubscriptionId};
pub use eventer::Eventer;
