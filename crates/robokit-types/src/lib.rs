//! `robokit-types` – shared vocabulary of the robokit runtime.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`error`] – [`BotError`], the single error enum spanning lifecycle,
//!   lookup and driver failures, and [`MultiError`], the ordered aggregate
//!   returned wherever several things can fail at once.
//! - [`json`] – the serialisable projection of managers, robots, devices and
//!   connections served by the HTTP API.
//! - [`naming`] – deterministic default names (`Robot-0001`, …).
//! - [`retry`] – connect retry policy.
//! - [`scale`] – range mapping helpers used by drivers.

pub mod error;
pub mod json;
pub mod naming;
pub mod retry;
pub mod scale;

pub use error::{BotError, MultiError};
pub use json::{JsonConnection, JsonDevice, JsonManager, JsonRobot};
pub use naming::{NameGenerator, default_name};
pub use retry::RetryPolicy;
pub use scale::{from_scale, to_scale};

/// Argument mapping handed to every command: a JSON object.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Well-known event topic on which drivers publish background errors.
pub const ERROR_EVENT: &str = "error";
