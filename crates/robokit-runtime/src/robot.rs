//! [`Robot`] – a named bundle of connections, devices and a work function.
//!
//! # Lifecycle
//!
//! ```text
//! stopped ──start──▶ starting ──▶ running ──halt──▶ halting ──▶ stopped
//!                       │                                          ▲
//!                       └────────── failure / rollback ────────────┘
//! ```
//!
//! `start` connects every connection in declaration order, then starts every
//! device in declaration order. A failure in either phase is recorded and the
//! phase runs to the end so every failure is reported; the robot then rolls
//! back whatever succeeded (halting devices and finalizing connections in
//! reverse order) and returns to `stopped`.
//!
//! `halt` cancels the robot's context, waits for its `Every` and `After`
//! groups to drain, halts devices in reverse order and finalizes connections
//! in reverse order. Failures are collected and never stop the unwind.
//! Halting a stopped robot is a no-op.
//!
//! No lock is held across a driver call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use robokit_hal::{Connection, ConnectionRegistry, Device, DeviceRegistry};
use robokit_middleware::{Commander, Eventer};
use robokit_types::{BotError, JsonRobot, MultiError, RetryPolicy, default_name};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::projection::{connection_json, device_json};
use crate::signal::{self, SignalTrap};
use crate::work::{RobotWork, Scheduler, WorkRegistry};

/// User work, run once each time the robot reaches `running`.
pub type WorkFn = Arc<dyn Fn(Arc<Robot>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotState {
    Stopped,
    Starting,
    Running,
    Halting,
}

struct Lifecycle {
    state: RobotState,
    context: CancellationToken,
}

pub struct Robot {
    name: String,
    connections: RwLock<ConnectionRegistry>,
    devices: RwLock<DeviceRegistry>,
    work: Option<WorkFn>,
    commander: Commander,
    eventer: Eventer,
    lifecycle: Mutex<Lifecycle>,
    scheduler: Scheduler,
    trap: SignalTrap,
    connect_retry: RetryPolicy,
}

impl Robot {
    /// Create a stopped robot. An empty name is replaced by a generated one.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            default_name("Robot")
        } else {
            name
        };
        Self {
            name,
            connections: RwLock::new(ConnectionRegistry::connections()),
            devices: RwLock::new(DeviceRegistry::devices()),
            work: None,
            commander: Commander::new(),
            eventer: Eventer::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: RobotState::Stopped,
                context: CancellationToken::new(),
            }),
            scheduler: Scheduler::new(),
            trap: signal::interrupt(),
            connect_retry: RetryPolicy::default(),
        }
    }

    /// Set the work function.
    pub fn with_work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn(Arc<Robot>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.work = Some(Arc::new(move |robot| work(robot).boxed()));
        self
    }

    /// Replace the trap awaited by `start(true)`.
    pub fn with_trap(mut self, trap: SignalTrap) -> Self {
        self.trap = trap;
        self
    }

    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RobotState {
        self.lifecycle.lock().state
    }

    pub fn running(&self) -> bool {
        self.state() == RobotState::Running
    }

    /// Token cancelled when the current run halts.
    pub fn context(&self) -> CancellationToken {
        self.lifecycle.lock().context.clone()
    }

    pub fn commander(&self) -> &Commander {
        &self.commander
    }

    pub fn eventer(&self) -> &Eventer {
        &self.eventer
    }

    /// Work scheduled through this robot that has not finished yet.
    pub fn work(&self) -> &WorkRegistry {
        self.scheduler.registry()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ── Membership ──────────────────────────────────────────────────────────

    /// Append a connection. An unnamed connection gets a generated name.
    ///
    /// # Errors
    ///
    /// [`BotError::DuplicateName`] if the robot already has one by that name.
    pub fn add_connection(&self, conn: Arc<dyn Connection>) -> Result<(), BotError> {
        if conn.name().is_empty() {
            conn.set_name(&default_name("Connection"));
        }
        self.connections.write().add(conn)
    }

    /// Append a device. An unnamed device gets a generated name.
    ///
    /// # Errors
    ///
    /// [`BotError::UnknownConnection`] if the device's connection has not been
    /// added to this robot, [`BotError::DuplicateName`] on a name clash.
    pub fn add_device(&self, device: Arc<dyn Device>) -> Result<(), BotError> {
        let conn = device.connection();
        let known = self
            .connections
            .read()
            .get(&conn.name())
            .is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(&c), Arc::as_ptr(&conn)));
        if !known {
            return Err(BotError::UnknownConnection(conn.name()));
        }
        if device.name().is_empty() {
            device.set_name(&default_name("Device"));
        }
        self.devices.write().add(device)
    }

    pub fn connection(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().get(name)
    }

    pub fn device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices.read().get(name)
    }

    /// Connections in declaration order.
    pub fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.read().all()
    }

    /// Devices in declaration order.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.read().all()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Bring the robot up.
    ///
    /// With `auto_run` the call then blocks until the signal trap fires or
    /// the robot is halted from elsewhere, and halts the robot before
    /// returning.
    ///
    /// A halt requested while starting unwinds the start and counts as
    /// success.
    #[instrument(skip_all, fields(robot = %self.name))]
    pub async fn start(self: &Arc<Self>, auto_run: bool) -> Result<(), MultiError> {
        let ctx = {
            let mut lc = self.lifecycle.lock();
            if lc.state != RobotState::Stopped {
                return Err(BotError::AlreadyRunning(self.name.clone()).into());
            }
            lc.state = RobotState::Starting;
            lc.context = CancellationToken::new();
            lc.context.clone()
        };
        info!("starting robot");

        let connections = self.connections();
        let mut errors = MultiError::new();
        let mut connected: Vec<Arc<dyn Connection>> = Vec::with_capacity(connections.len());
        for conn in &connections {
            debug!(connection = %conn.name(), "connecting");
            match self.connect_with_retry(conn.as_ref()).await {
                Ok(()) => connected.push(Arc::clone(conn)),
                Err(source) => {
                    error!(connection = %conn.name(), %source, "connect failed");
                    errors.push(BotError::ConnectFailed {
                        name: conn.name(),
                        source: Box::new(source),
                    });
                }
            }
        }
        if !errors.is_empty() || ctx.is_cancelled() {
            errors.append(finalize_all(connected.iter().rev()).await);
            return self.abort_start(errors);
        }

        let devices = self.devices();
        let mut started: Vec<Arc<dyn Device>> = Vec::with_capacity(devices.len());
        for device in &devices {
            debug!(device = %device.name(), "starting device");
            match device.start().await {
                Ok(()) => started.push(Arc::clone(device)),
                Err(source) => {
                    error!(device = %device.name(), %source, "start failed");
                    errors.push(BotError::StartFailed {
                        name: device.name(),
                        source: Box::new(source),
                    });
                }
            }
        }
        if !errors.is_empty() || ctx.is_cancelled() {
            errors.append(halt_all(started.iter().rev()).await);
            errors.append(finalize_all(connections.iter().rev()).await);
            return self.abort_start(errors);
        }

        if !self.enter_running(&ctx) {
            errors.append(halt_all(started.iter().rev()).await);
            errors.append(finalize_all(connections.iter().rev()).await);
            return self.abort_start(errors);
        }
        info!(
            connections = connections.len(),
            devices = devices.len(),
            "robot running"
        );

        if let Some(work) = &self.work {
            debug!("launching work");
            tokio::spawn(work(Arc::clone(self)));
        }

        if auto_run {
            let trap = (self.trap)();
            tokio::select! {
                _ = trap => info!("shutdown signal received"),
                _ = ctx.cancelled() => {}
            }
            self.halt().await?;
        }
        Ok(())
    }

    /// Move from `starting` to `running` unless a halt cancelled `ctx`.
    /// Checked under the lifecycle lock that `halt` cancels under.
    fn enter_running(&self, ctx: &CancellationToken) -> bool {
        let mut lc = self.lifecycle.lock();
        if ctx.is_cancelled() {
            return false;
        }
        lc.state = RobotState::Running;
        true
    }

    fn abort_start(&self, errors: MultiError) -> Result<(), MultiError> {
        self.lifecycle.lock().state = RobotState::Stopped;
        if errors.is_empty() {
            info!("start abandoned: {}", BotError::ShutdownRequested);
            return Ok(());
        }
        warn!(errors = errors.len(), "start failed; rolled back");
        Err(errors)
    }

    async fn connect_with_retry(&self, conn: &dyn Connection) -> Result<(), BotError> {
        let attempts = self.connect_retry.max_attempts();
        let mut attempt = 1;
        loop {
            match conn.connect().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < attempts => {
                    let delay = self.connect_retry.delay_after(attempt);
                    warn!(connection = %conn.name(), attempt, ?delay, %err, "connect failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Bring the robot down. Calling it on a stopped robot returns `Ok`.
    #[instrument(skip_all, fields(robot = %self.name))]
    pub async fn halt(&self) -> Result<(), MultiError> {
        let ctx = {
            let mut lc = self.lifecycle.lock();
            match lc.state {
                RobotState::Stopped | RobotState::Halting => return Ok(()),
                RobotState::Starting => {
                    lc.context.cancel();
                    return Ok(());
                }
                RobotState::Running => {
                    lc.state = RobotState::Halting;
                    lc.context.clone()
                }
            }
        };
        info!("halting robot");
        ctx.cancel();
        self.scheduler.wait_every().await;
        self.scheduler.wait_after().await;

        let mut errors = halt_all(self.devices().iter().rev()).await;
        errors.append(finalize_all(self.connections().iter().rev()).await);

        self.lifecycle.lock().state = RobotState::Stopped;
        if errors.is_empty() {
            info!("robot stopped");
        } else {
            warn!(errors = errors.len(), "robot stopped with errors");
        }
        errors.into_result()
    }

    // ── Scheduling ──────────────────────────────────────────────────────────

    /// Run `f` every `period` until the robot halts or the handle is cancelled.
    ///
    /// # Errors
    ///
    /// [`BotError::NotRunning`] unless the robot is running.
    pub fn every<F>(&self, period: Duration, f: F) -> Result<RobotWork, BotError>
    where
        F: FnMut() + Send + 'static,
    {
        let ctx = self.running_context()?;
        self.scheduler.every(&ctx, period, f)
    }

    /// Run `f` once after `delay` unless the robot halts first.
    pub fn after<F>(&self, delay: Duration, f: F) -> Result<RobotWork, BotError>
    where
        F: FnOnce() + Send + 'static,
    {
        let ctx = self.running_context()?;
        Ok(self.scheduler.after(&ctx, delay, f))
    }

    /// Like [`Robot::every`] but also stops when `ctx` is cancelled.
    pub fn every_with<F>(
        &self,
        ctx: &CancellationToken,
        period: Duration,
        f: F,
    ) -> Result<RobotWork, BotError>
    where
        F: FnMut() + Send + 'static,
    {
        let child = self.linked_context(ctx)?;
        self.scheduler.every(&child, period, f)
    }

    /// Like [`Robot::after`] but also skipped when `ctx` is cancelled first.
    /// A halt still cancels it, whatever `ctx` does.
    pub fn after_with<F>(
        &self,
        ctx: &CancellationToken,
        delay: Duration,
        f: F,
    ) -> Result<RobotWork, BotError>
    where
        F: FnOnce() + Send + 'static,
    {
        let child = self.linked_context(ctx)?;
        Ok(self.scheduler.after(&child, delay, f))
    }

    /// A child of the running context that `ctx` also cancels.
    fn linked_context(&self, ctx: &CancellationToken) -> Result<CancellationToken, BotError> {
        let child = self.running_context()?.child_token();
        let outer = ctx.clone();
        let link = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = outer.cancelled() => link.cancel(),
                _ = link.cancelled() => {}
            }
        });
        Ok(child)
    }

    fn running_context(&self) -> Result<CancellationToken, BotError> {
        let lc = self.lifecycle.lock();
        if lc.state == RobotState::Running {
            Ok(lc.context.clone())
        } else {
            Err(BotError::NotRunning(self.name.clone()))
        }
    }

    // ── Projection ──────────────────────────────────────────────────────────

    pub fn to_json(&self) -> JsonRobot {
        JsonRobot {
            name: self.name.clone(),
            commands: self.commander.command_names(),
            connections: self
                .connections()
                .iter()
                .map(|c| connection_json(c.as_ref()))
                .collect(),
            devices: self
                .devices()
                .iter()
                .map(|d| device_json(d.as_ref()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Robot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Robot")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("connections", &*self.connections.read())
            .field("devices", &*self.devices.read())
            .finish_non_exhaustive()
    }
}

async fn halt_all<'a, I>(devices: I) -> MultiError
where
    I: Iterator<Item = &'a Arc<dyn Device>>,
{
    let mut errors = MultiError::new();
    for device in devices {
        debug!(device = %device.name(), "halting device");
        if let Err(source) = device.halt().await {
            error!(device = %device.name(), %source, "halt failed");
            errors.push(BotError::HaltFailed {
                name: device.name(),
                source: Box::new(source),
            });
        }
    }
    errors
}

async fn finalize_all<'a, I>(connections: I) -> MultiError
where
    I: Iterator<Item = &'a Arc<dyn Connection>>,
{
    let mut errors = MultiError::new();
    for conn in connections {
        debug!(connection = %conn.name(), "finalizing connection");
        if let Err(source) = conn.finalize().await {
            error!(connection = %conn.name(), %source, "finalize failed");
            errors.push(BotError::FinalizeFailed {
                name: conn.name(),
                source: Box::new(source),
            });
        }
    }
    errors
}
