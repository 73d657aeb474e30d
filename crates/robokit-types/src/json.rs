//! Serialisable projection of the runtime served by the HTTP API.
//!
//! The projection is pure data: it is built from names and type names only
//! and never calls into a driver.

use serde::{Deserialize, Serialize};

/// Driver type reported for devices that do not name their type.
pub const UNKNOWN_DRIVER: &str = "Driver";

/// Adaptor type reported for connections that do not name their type.
pub const UNKNOWN_ADAPTOR: &str = "Adaptor";

/// JSON view of a manager: its robots and its own command names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonManager {
    pub robots: Vec<JsonRobot>,
    pub commands: Vec<String>,
}

/// JSON view of a robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRobot {
    pub name: String,
    pub commands: Vec<String>,
    pub connections: Vec<JsonConnection>,
    pub devices: Vec<JsonDevice>,
}

/// JSON view of a device and the connection it is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDevice {
    pub name: String,
    pub driver: String,
    pub connection: JsonConnection,
    pub commands: Vec<String>,
}

/// JSON view of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonConnection {
    pub name: String,
    pub port: Option<String>,
    pub adaptor: String,
}
