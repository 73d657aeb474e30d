//! Error taxonomy.
//!
//! [`BotError`] names every failure the runtime distinguishes. Lifecycle
//! failures wrap the driver's own error so the cause survives aggregation:
//!
//! | Variant | Raised when |
//! |---|---|
//! | [`BotError::ConnectFailed`] | a connection's `connect` fails |
//! | [`BotError::StartFailed`] | a device's `start` fails |
//! | [`BotError::HaltFailed`] | a device's `halt` fails |
//! | [`BotError::FinalizeFailed`] | a connection's `finalize` fails |
//! | `Unknown*` | a lookup by name misses |
//!
//! [`MultiError`] collects several of them in insertion order.

use std::fmt;

use thiserror::Error;

/// Every error the robot runtime can surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BotError {
    #[error("connection {name:?}: connect failed: {source}")]
    ConnectFailed { name: String, source: Box<BotError> },

    #[error("device {name:?}: start failed: {source}")]
    StartFailed { name: String, source: Box<BotError> },

    #[error("device {name:?}: halt failed: {source}")]
    HaltFailed { name: String, source: Box<BotError> },

    #[error("connection {name:?}: finalize failed: {source}")]
    FinalizeFailed { name: String, source: Box<BotError> },

    #[error("No Robot found with the name {0}")]
    UnknownRobot(String),

    #[error("No Device found with the name {0}")]
    UnknownDevice(String),

    #[error("No Connection found with the name {0}")]
    UnknownConnection(String),

    #[error("Unknown Command {0}")]
    UnknownCommand(String),

    #[error("Event {0} does not exist")]
    UnknownEvent(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("duplicate {kind} name {name:?}")]
    DuplicateName { kind: String, name: String },

    #[error("hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("robot {robot:?}: {source}")]
    Robot { robot: String, source: Box<BotError> },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl BotError {
    /// Shorthand for a [`BotError::Hardware`] fault raised by a driver.
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Hardware {
            component: component.into(),
            details: details.into(),
        }
    }

    /// Strip lifecycle and robot wrappers, returning the innermost cause.
    pub fn root_cause(&self) -> &BotError {
        match self {
            Self::ConnectFailed { source, .. }
            | Self::StartFailed { source, .. }
            | Self::HaltFailed { source, .. }
            | Self::FinalizeFailed { source, .. }
            | Self::Robot { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// `true` for the `Unknown*` lookup-miss family.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::UnknownRobot(_)
                | Self::UnknownDevice(_)
                | Self::UnknownConnection(_)
                | Self::UnknownCommand(_)
                | Self::UnknownEvent(_)
        )
    }
}

/// An ordered collection of errors.
///
/// An empty `MultiError` means "no error"; use [`MultiError::into_result`] to
/// turn an accumulator into a `Result` at the end of a multi-step operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiError {
    errors: Vec<BotError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one error.
    pub fn push(&mut self, err: BotError) {
        self.errors.push(err);
    }

    /// Append every error of `other`, preserving its order.
    pub fn append(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[BotError] {
        &self.errors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BotError> {
        self.errors.iter()
    }

    /// Wrap every contained error with the name of the robot it came from.
    pub fn for_robot(self, robot: &str) -> Self {
        self.errors
            .into_iter()
            .map(|e| BotError::Robot {
                robot: robot.to_string(),
                source: Box::new(e),
            })
            .collect()
    }

    /// `Ok(())` when empty, `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "1 error occurred:\n\t* {}", self.errors[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for err in &self.errors {
                    write!(f, "\n\t* {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

impl From<BotError> for MultiError {
    fn from(err: BotError) -> Self {
        Self { errors: vec![err] }
    }
}

impl FromIterator<BotError> for MultiError {
    fn from_iter<I: IntoIterator<Item = BotError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MultiError {
    type Item = BotError;
    type IntoIter = std::vec::IntoIter<BotError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a MultiError {
    type Item = &'a BotError;
    type IntoIter = std::slice::Iter<'a, BotError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
