//! Two reference GPIO drivers built only on the capability traits.
//!
//! | Driver | Needs | Commands | Events |
//! |---|---|---|---|
//! | [`LedDriver`] | [`DigitalWriter`], [`PwmWriter`] for brightness | `On`, `Off`, `Toggle`, `Brightness` | – |
//! | [`ButtonDriver`] | [`DigitalReader`] | – | `push`, `release`, `error` |
//!
//! [`DigitalWriter`]: crate::capability::DigitalWriter
//! [`PwmWriter`]: crate::capability::PwmWriter
//! [`DigitalReader`]: crate::capability::DigitalReader

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use robokit_middleware::{Commander, Eventer};
use robokit_types::{BotError, ERROR_EVENT, Params};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, NameCell};
use crate::device::Device;

pub const PUSH_EVENT: &str = "push";
pub const RELEASE_EVENT: &str = "release";

// ────────────────────────────────────────────────────────────────────────────
// LED
// ────────────────────────────────────────────────────────────────────────────

/// A single LED on a digital (optionally PWM-capable) pin.
pub struct LedDriver {
    name: NameCell,
    pin: String,
    connection: Arc<dyn Connection>,
    commander: Commander,
    high: AtomicBool,
}

impl LedDriver {
    pub fn new(connection: Arc<dyn Connection>, pin: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<LedDriver>| {
            let commander = Commander::new();
            Self::register(&commander, "On", me, |led, _| led.on().map(|()| Value::Null));
            Self::register(&commander, "Off", me, |led, _| led.off().map(|()| Value::Null));
            Self::register(&commander, "Toggle", me, |led, _| {
                led.toggle().map(|()| json!(led.state()))
            });
            Self::register(&commander, "Brightness", me, |led, params| {
                let level = params
                    .get("level")
                    .and_then(Value::as_u64)
                    .filter(|level| *level <= u64::from(u8::MAX))
                    .ok_or_else(|| {
                        BotError::InvalidArgument("level must be an integer in 0..=255".into())
                    })?;
                led.brightness(level as u8).map(|()| Value::Null)
            });
            Self {
                name: NameCell::new(""),
                pin: pin.into(),
                connection,
                commander,
                high: AtomicBool::new(false),
            }
        })
    }

    fn register<F>(commander: &Commander, name: &str, me: &Weak<Self>, f: F)
    where
        F: Fn(&LedDriver, Params) -> Result<Value, BotError> + Send + Sync + 'static,
    {
        let me = me.clone();
        commander.add_command(name, move |params| {
            let led = me
                .upgrade()
                .ok_or_else(|| BotError::Unsupported("LED driver was dropped".into()))?;
            f(&led, params)
        });
    }

    /// Current logical state.
    pub fn state(&self) -> bool {
        self.high.load(Ordering::SeqCst)
    }

    pub fn on(&self) -> Result<(), BotError> {
        self.write(1)
    }

    pub fn off(&self) -> Result<(), BotError> {
        self.write(0)
    }

    pub fn toggle(&self) -> Result<(), BotError> {
        if self.state() { self.off() } else { self.on() }
    }

    pub fn brightness(&self, duty: u8) -> Result<(), BotError> {
        let writer = self.connection.pwm_writer().ok_or_else(|| {
            BotError::Unsupported(format!("{} cannot write PWM", self.connection.name()))
        })?;
        writer.pwm_write(&self.pin, duty)?;
        self.high.store(duty > 0, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, level: u8) -> Result<(), BotError> {
        let writer = self.connection.digital_writer().ok_or_else(|| {
            BotError::Unsupported(format!("{} cannot write digital pins", self.connection.name()))
        })?;
        writer.digital_write(&self.pin, level)?;
        self.high.store(level > 0, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Device for LedDriver {
    fn name(&self) -> String {
        self.name.get()
    }

    fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    async fn start(&self) -> Result<(), BotError> {
        if self.connection.digital_writer().is_none() {
            return Err(BotError::Unsupported(format!(
                "{} cannot write digital pins",
                self.connection.name()
            )));
        }
        Ok(())
    }

    async fn halt(&self) -> Result<(), BotError> {
        Ok(())
    }

    fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }

    fn type_name(&self) -> Option<String> {
        Some("LedDriver".to_string())
    }

    fn commander(&self) -> Option<&Commander> {
        Some(&self.commander)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Button
// ────────────────────────────────────────────────────────────────────────────

/// A push button polled on a digital input.
///
/// Publishes `push` when the pin goes high, `release` when it goes low, and
/// `error` with the error text when a read fails.
pub struct ButtonDriver {
    name: NameCell,
    pin: String,
    interval: Duration,
    connection: Arc<dyn Connection>,
    eventer: Arc<Eventer>,
    poller: Mutex<Option<CancellationToken>>,
    pressed: Arc<AtomicU8>,
}

impl ButtonDriver {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(connection: Arc<dyn Connection>, pin: impl Into<String>) -> Arc<Self> {
        Self::with_interval(connection, pin, Self::DEFAULT_INTERVAL)
    }

    pub fn with_interval(
        connection: Arc<dyn Connection>,
        pin: impl Into<String>,
        interval: Duration,
    ) -> Arc<Self> {
        let eventer = Arc::new(Eventer::new());
        for topic in [PUSH_EVENT, RELEASE_EVENT, ERROR_EVENT] {
            eventer.add_event(topic);
        }
        Arc::new(Self {
            name: NameCell::new(""),
            pin: pin.into(),
            interval,
            connection,
            eventer,
            poller: Mutex::new(None),
            pressed: Arc::new(AtomicU8::new(0)),
        })
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed.load(Ordering::SeqCst) == 1
    }
}

#[async_trait]
impl Device for ButtonDriver {
    fn name(&self) -> String {
        self.name.get()
    }

    fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    async fn start(&self) -> Result<(), BotError> {
        if self.connection.digital_reader().is_none() {
            return Err(BotError::Unsupported(format!(
                "{} cannot read digital pins",
                self.connection.name()
            )));
        }
        let token = CancellationToken::new();
        if let Some(previous) = self.poller.lock().replace(token.clone()) {
            previous.cancel();
        }

        let connection = Arc::clone(&self.connection);
        let eventer = Arc::clone(&self.eventer);
        let pressed = Arc::clone(&self.pressed);
        let pin = self.pin.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(reader) = connection.digital_reader() else {
                    break;
                };
                let publish = |topic: &str, value: Value| {
                    if let Err(err) = eventer.publish(topic, value) {
                        warn!(%err, "button event dropped");
                    }
                };
                match reader.digital_read(&pin) {
                    Ok(level) => {
                        let level = u8::from(level > 0);
                        if pressed.swap(level, Ordering::SeqCst) != level {
                            let topic = if level == 1 { PUSH_EVENT } else { RELEASE_EVENT };
                            publish(topic, json!(level));
                        }
                    }
                    Err(err) => publish(ERROR_EVENT, json!(err.to_string())),
                }
            }
            debug!(pin = %pin, "button poller stopped");
        });
        Ok(())
    }

    async fn halt(&self) -> Result<(), BotError> {
        if let Some(token) = self.poller.lock().take() {
            token.cancel();
        }
        Ok(())
    }

    fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }

    fn type_name(&self) -> Option<String> {
        Some("ButtonDriver".to_string())
    }

    fn eventer(&self) -> Option<&Eventer> {
        Some(&self.eventer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimConnection;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn led_commands_drive_the_pin() {
        let conn = SimConnection::named("gpio");
        conn.connect().await.unwrap();
        let led = LedDriver::new(conn.clone(), "13");
        led.start().await.unwrap();

        let commander = led.commander().unwrap();
        commander.execute("On", Params::new()).unwrap();
        assert_eq!(conn.digital_level("13"), Some(1));

        let toggled = commander.execute("Toggle", Params::new()).unwrap();
        assert_eq!(toggled, json!(false));
        assert_eq!(conn.digital_level("13"), Some(0));

        let mut params = Params::new();
        params.insert("level".into(), json!(128));
        commander.execute("Brightness", params).unwrap();
        assert_eq!(conn.pwm_duty("13"), Some(128));
        assert!(led.state());
    }

    #[tokio::test]
    async fn led_rejects_out_of_range_brightness() {
        let conn = SimConnection::named("gpio");
        conn.connect().await.unwrap();
        let led = LedDriver::new(conn, "13");

        let mut params = Params::new();
        params.insert("level".into(), json!(300));
        let err = led.commander().unwrap().execute("Brightness", params);
        assert!(matches!(err, Err(BotError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn led_write_fails_when_disconnected() {
        let led = LedDriver::new(SimConnection::named("gpio"), "13");
        assert!(led.on().is_err());
        assert!(!led.state());
    }

    #[tokio::test]
    async fn button_publishes_push_and_release() {
        let conn = SimConnection::named("gpio");
        conn.connect().await.unwrap();
        let button = ButtonDriver::with_interval(conn.clone(), "2", Duration::from_millis(5));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let push_tx = tx.clone();
        let eventer = button.eventer().unwrap();
        eventer
            .on(PUSH_EVENT, move |_| {
                let _ = push_tx.send("push");
            })
            .unwrap();
        eventer
            .on(RELEASE_EVENT, move |_| {
                let _ = tx.send("release");
            })
            .unwrap();

        button.start().await.unwrap();
        conn.set_digital("2", 1);
        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first, Some("push"));
        assert!(button.is_pressed());

        conn.set_digital("2", 0);
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(second, Some("release"));

        button.halt().await.unwrap();
    }

    #[tokio::test]
    async fn button_reports_read_errors() {
        let conn = SimConnection::named("gpio");
        let button = ButtonDriver::with_interval(conn, "2", Duration::from_millis(5));
        let (tx, mut rx) = mpsc::unbounded_channel();
        button
            .eventer()
            .unwrap()
            .once(ERROR_EVENT, move |v| {
                let _ = tx.send(v);
            })
            .unwrap();

        // Never connected, so every read fails.
        button.start().await.unwrap();
        let got = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(got.as_str().unwrap().contains("not connected"));
        button.halt().await.unwrap();
    }
}
