//! In-process simulated hardware for tests and hardware-free runs.
//!
//! [`SimConnection`] is a GPIO-style adaptor backed by an in-memory pin map.
//! [`SimDevice`] is a generic driver with a [`Commander`] and an
//! [`Eventer`]. Both count their lifecycle calls, can be told to fail, and can
//! share a [`Journal`] so tests can assert cross-object ordering.
//!
//! # Example
//!
//! ```rust
//! use robokit_hal::sim::{Journal, SimConnection, SimDevice};
//!
//! let journal = Journal::default();
//! let bus = SimConnection::builder("bus").journal(&journal).build();
//! let led = SimDevice::builder("led", bus.clone())
//!     .journal(&journal)
//!     .echo()
//!     .build();
//! assert_eq!(led.start_calls(), 0);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use robokit_middleware::{Commander, Eventer};
use robokit_types::{BotError, Params};
use serde_json::Value;

use crate::capability::{AnalogReader, DigitalReader, DigitalWriter, PwmWriter};
use crate::connection::{Connection, NameCell};
use crate::device::Device;

// ────────────────────────────────────────────────────────────────────────────
// Journal
// ────────────────────────────────────────────────────────────────────────────

/// Shared, append-only log of lifecycle calls such as `"connect:bus"`.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated connection
// ────────────────────────────────────────────────────────────────────────────

/// A GPIO adaptor whose pins live in memory.
pub struct SimConnection {
    name: NameCell,
    port: Option<String>,
    connected: AtomicBool,
    digital: Mutex<HashMap<String, u8>>,
    pwm: Mutex<HashMap<String, u8>>,
    analog: Mutex<HashMap<String, i32>>,
    fail_connect: Option<String>,
    fail_finalize: Option<String>,
    connect_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    journal: Option<Journal>,
}

/// Builder for [`SimConnection`].
pub struct SimConnectionBuilder {
    name: String,
    port: Option<String>,
    fail_connect: Option<String>,
    fail_finalize: Option<String>,
    journal: Option<Journal>,
}

impl SimConnectionBuilder {
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Make every `connect` fail with `details`.
    pub fn failing_connect(mut self, details: impl Into<String>) -> Self {
        self.fail_connect = Some(details.into());
        self
    }

    /// Make every `finalize` fail with `details`.
    pub fn failing_finalize(mut self, details: impl Into<String>) -> Self {
        self.fail_finalize = Some(details.into());
        self
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    pub fn build(self) -> Arc<SimConnection> {
        Arc::new(SimConnection {
            name: NameCell::new(self.name),
            port: self.port,
            connected: AtomicBool::new(false),
            digital: Mutex::new(HashMap::new()),
            pwm: Mutex::new(HashMap::new()),
            analog: Mutex::new(HashMap::new()),
            fail_connect: self.fail_connect,
            fail_finalize: self.fail_finalize,
            connect_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            journal: self.journal,
        })
    }
}

impl SimConnection {
    pub fn builder(name: impl Into<String>) -> SimConnectionBuilder {
        SimConnectionBuilder {
            name: name.into(),
            port: None,
            fail_connect: None,
            fail_finalize: None,
            journal: None,
        }
    }

    /// A connection with default behaviour. An empty name lets the robot
    /// assign one.
    pub fn named(name: impl Into<String>) -> Arc<Self> {
        Self::builder(name).build()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    /// Simulate an external signal on a digital input.
    pub fn set_digital(&self, pin: &str, level: u8) {
        self.digital.lock().insert(pin.to_string(), level);
    }

    pub fn digital_level(&self, pin: &str) -> Option<u8> {
        self.digital.lock().get(pin).copied()
    }

    pub fn pwm_duty(&self, pin: &str) -> Option<u8> {
        self.pwm.lock().get(pin).copied()
    }

    /// Simulate an analog sensor reading.
    pub fn set_analog(&self, pin: &str, value: i32) {
        self.analog.lock().insert(pin.to_string(), value);
    }

    fn record(&self, action: &str) {
        if let Some(journal) = &self.journal {
            journal.record(format!("{action}:{}", self.name.get()));
        }
    }

    fn ensure_connected(&self) -> Result<(), BotError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BotError::hardware(self.name.get(), "not connected"))
        }
    }
}

#[async_trait]
impl Connection for SimConnection {
    fn name(&self) -> String {
        self.name.get()
    }

    fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    async fn connect(&self) -> Result<(), BotError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.record("connect");
        if let Some(details) = &self.fail_connect {
            return Err(BotError::hardware(self.name.get(), details.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<(), BotError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.record("finalize");
        // Pins are released even when finalize reports a failure.
        self.connected.store(false, Ordering::SeqCst);
        match &self.fail_finalize {
            Some(details) => Err(BotError::hardware(self.name.get(), details.clone())),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), BotError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn port(&self) -> Option<String> {
        self.port.clone()
    }

    fn type_name(&self) -> Option<String> {
        Some("SimConnection".to_string())
    }

    fn digital_reader(&self) -> Option<&dyn DigitalReader> {
        Some(self)
    }

    fn digital_writer(&self) -> Option<&dyn DigitalWriter> {
        Some(self)
    }

    fn pwm_writer(&self) -> Option<&dyn PwmWriter> {
        Some(self)
    }

    fn analog_reader(&self) -> Option<&dyn AnalogReader> {
        Some(self)
    }
}

impl DigitalReader for SimConnection {
    fn digital_read(&self, pin: &str) -> Result<u8, BotError> {
        self.ensure_connected()?;
        Ok(self.digital_level(pin).unwrap_or(0))
    }
}

impl DigitalWriter for SimConnection {
    fn digital_write(&self, pin: &str, level: u8) -> Result<(), BotError> {
        self.ensure_connected()?;
        self.set_digital(pin, level);
        Ok(())
    }
}

impl PwmWriter for SimConnection {
    fn pwm_write(&self, pin: &str, duty: u8) -> Result<(), BotError> {
        self.ensure_connected()?;
        self.pwm.lock().insert(pin.to_string(), duty);
        Ok(())
    }
}

impl AnalogReader for SimConnection {
    fn analog_read(&self, pin: &str) -> Result<i32, BotError> {
        self.ensure_connected()?;
        Ok(self.analog.lock().get(pin).copied().unwrap_or(0))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated device
// ────────────────────────────────────────────────────────────────────────────

/// A driver that does nothing on its own but records what was asked of it.
pub struct SimDevice {
    name: NameCell,
    connection: Arc<dyn Connection>,
    commander: Commander,
    eventer: Eventer,
    started: AtomicBool,
    fail_start: Option<String>,
    fail_halt: Option<String>,
    start_calls: AtomicUsize,
    halt_calls: AtomicUsize,
    journal: Option<Journal>,
}

/// Builder for [`SimDevice`].
pub struct SimDeviceBuilder {
    name: String,
    connection: Arc<dyn Connection>,
    commander: Commander,
    eventer: Eventer,
    fail_start: Option<String>,
    fail_halt: Option<String>,
    journal: Option<Journal>,
}

impl SimDeviceBuilder {
    /// Register an `echo` command that returns its arguments unchanged.
    pub fn echo(self) -> Self {
        self.command("echo", |params| Ok(Value::Object(params)))
    }

    pub fn command<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(Params) -> Result<Value, BotError> + Send + Sync + 'static,
    {
        self.commander.add_command(name, f);
        self
    }

    pub fn event(self, name: &str) -> Self {
        self.eventer.add_event(name);
        self
    }

    /// Make every `start` fail with `details`.
    pub fn failing_start(mut self, details: impl Into<String>) -> Self {
        self.fail_start = Some(details.into());
        self
    }

    /// Make every `halt` fail with `details`.
    pub fn failing_halt(mut self, details: impl Into<String>) -> Self {
        self.fail_halt = Some(details.into());
        self
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    pub fn build(self) -> Arc<SimDevice> {
        Arc::new(SimDevice {
            name: NameCell::new(self.name),
            connection: self.connection,
            commander: self.commander,
            eventer: self.eventer,
            started: AtomicBool::new(false),
            fail_start: self.fail_start,
            fail_halt: self.fail_halt,
            start_calls: AtomicUsize::new(0),
            halt_calls: AtomicUsize::new(0),
            journal: self.journal,
        })
    }
}

impl SimDevice {
    pub fn builder(name: impl Into<String>, connection: Arc<dyn Connection>) -> SimDeviceBuilder {
        SimDeviceBuilder {
            name: name.into(),
            connection,
            commander: Commander::new(),
            eventer: Eventer::new(),
            fail_start: None,
            fail_halt: None,
            journal: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn halt_calls(&self) -> usize {
        self.halt_calls.load(Ordering::SeqCst)
    }

    fn record(&self, action: &str) {
        if let Some(journal) = &self.journal {
            journal.record(format!("{action}:{}", self.name.get()));
        }
    }
}

#[async_trait]
impl Device for SimDevice {
    fn name(&self) -> String {
        self.name.get()
    }

    fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    async fn start(&self) -> Result<(), BotError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        if let Some(details) = &self.fail_start {
            return Err(BotError::hardware(self.name.get(), details.clone()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn halt(&self) -> Result<(), BotError> {
        self.halt_calls.fetch_add(1, Ordering::SeqCst);
        self.record("halt");
        self.started.store(false, Ordering::SeqCst);
        match &self.fail_halt {
            Some(details) => Err(BotError::hardware(self.name.get(), details.clone())),
            None => Ok(()),
        }
    }

    fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }

    fn type_name(&self) -> Option<String> {
        Some("SimDevice".to_string())
    }

    fn commander(&self) -> Option<&Commander> {
        Some(&self.commander)
    }

    fn eventer(&self) -> Option<&Eventer> {
        Some(&self.eventer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn connect_is_idempotent_and_counted() {
        let conn = SimConnection::named("bus");
        conn.connect().await.unwrap();
        conn.connect().await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.connect_calls(), 2);

        conn.finalize().await.unwrap();
        assert!(!conn.is_connected());
        assert_eq!(conn.finalize_calls(), 1);
    }

    #[tokio::test]
    async fn failing_connect_leaves_connection_closed() {
        let conn = SimConnection::builder("bus").failing_connect("no such port").build();
        let err = conn.connect().await.unwrap_err();

        assert_eq!(err, BotError::hardware("bus", "no such port"));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn pins_require_a_connection() {
        let conn = SimConnection::named("gpio");
        let writer = conn.digital_writer().unwrap();
        assert!(writer.digital_write("13", 1).is_err());

        conn.connect().await.unwrap();
        writer.digital_write("13", 1).unwrap();
        assert_eq!(conn.digital_level("13"), Some(1));

        conn.set_analog("A0", 512);
        assert_eq!(conn.analog_reader().unwrap().analog_read("A0").unwrap(), 512);
    }

    #[tokio::test]
    async fn device_records_lifecycle_in_journal() {
        let journal = Journal::default();
        let conn = SimConnection::builder("bus").journal(&journal).build();
        let dev = SimDevice::builder("led", conn.clone()).journal(&journal).build();

        conn.connect().await.unwrap();
        dev.start().await.unwrap();
        dev.halt().await.unwrap();
        conn.finalize().await.unwrap();

        assert_eq!(
            journal.entries(),
            ["connect:bus", "start:led", "halt:led", "finalize:bus"]
        );
    }

    #[tokio::test]
    async fn halt_is_safe_before_start() {
        let dev = SimDevice::builder("led", SimConnection::named("bus")).build();
        dev.halt().await.unwrap();
        assert_eq!(dev.halt_calls(), 1);
        assert!(!dev.is_started());
    }

    #[test]
    fn echo_command_returns_arguments() {
        let dev = SimDevice::builder("d", SimConnection::named("bus"))
            .echo()
            .build();
        let commander = dev.commander().unwrap();
        let mut params = Params::new();
        params.insert("msg".into(), json!("hi"));

        assert_eq!(commander.execute("echo", params), Ok(json!({"msg": "hi"})));
    }
}
