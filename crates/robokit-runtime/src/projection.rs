//! Build the JSON projection from the capability traits alone.

use robokit_hal::{Connection, Device};
use robokit_types::json::{UNKNOWN_ADAPTOR, UNKNOWN_DRIVER};
use robokit_types::{JsonConnection, JsonDevice};

pub fn connection_json(conn: &dyn Connection) -> JsonConnection {
    JsonConnection {
        name: conn.name(),
        port: conn.port(),
        adaptor: conn
            .type_name()
            .unwrap_or_else(|| UNKNOWN_ADAPTOR.to_string()),
    }
}

pub fn device_json(device: &dyn Device) -> JsonDevice {
    JsonDevice {
        name: device.name(),
        driver: device
            .type_name()
            .unwrap_or_else(|| UNKNOWN_DRIVER.to_string()),
        connection: connection_json(device.connection().as_ref()),
        commands: device
            .commander()
            .map(|c| c.command_names())
            .unwrap_or_default(),
    }
}
