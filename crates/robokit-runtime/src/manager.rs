//! [`Manager`] – owner of a fleet of robots.
//!
//! The manager starts its robots without letting them block on signals
//! themselves. With auto-run enabled it then waits on its own signal trap and
//! stops the whole fleet, or returns as soon as [`Manager::stop`] is called. Both `start` and `stop` visit every robot and report
//! all failures, each tagged with the robot it came from.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use robokit_middleware::{Commander, Eventer};
use robokit_types::{BotError, JsonManager, MultiError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::robot::Robot;
use crate::signal::{self, SignalTrap};

pub struct Manager {
    robots: RwLock<Vec<Arc<Robot>>>,
    auto_run: bool,
    running: AtomicBool,
    trap: SignalTrap,
    /// Cancelled by `stop`; replaced on every `start`.
    stopped: Mutex<CancellationToken>,
    commander: Commander,
    eventer: Eventer,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// A manager with auto-run enabled and the process interrupt as its trap.
    pub fn new() -> Self {
        Self {
            robots: RwLock::new(Vec::new()),
            auto_run: true,
            running: AtomicBool::new(false),
            trap: signal::interrupt(),
            stopped: Mutex::new(CancellationToken::new()),
            commander: Commander::new(),
            eventer: Eventer::new(),
        }
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }

    pub fn with_trap(mut self, trap: SignalTrap) -> Self {
        self.trap = trap;
        self
    }

    pub fn auto_run(&self) -> bool {
        self.auto_run
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn commander(&self) -> &Commander {
        &self.commander
    }

    pub fn eventer(&self) -> &Eventer {
        &self.eventer
    }

    /// Take ownership of `robot`.
    ///
    /// # Errors
    ///
    /// [`BotError::DuplicateName`] if a robot with the same name is present.
    pub fn add_robot(&self, robot: Robot) -> Result<Arc<Robot>, BotError> {
        let mut robots = self.robots.write();
        if robots.iter().any(|r| r.name() == robot.name()) {
            return Err(BotError::DuplicateName {
                kind: "robot".into(),
                name: robot.name().to_string(),
            });
        }
        let robot = Arc::new(robot);
        robots.push(Arc::clone(&robot));
        Ok(robot)
    }

    pub fn robot(&self, name: &str) -> Option<Arc<Robot>> {
        self.robots.read().iter().find(|r| r.name() == name).cloned()
    }

    /// Robots in insertion order.
    pub fn robots(&self) -> Vec<Arc<Robot>> {
        self.robots.read().clone()
    }

    /// Start every robot.
    ///
    /// If any robot fails, every robot is stopped again and the collected
    /// errors are returned. With auto-run the call blocks until the trap
    /// fires and then stops the fleet. An explicit [`stop`](Self::stop)
    /// releases it too; the stop errors then go to the caller of `stop`.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<(), MultiError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BotError::AlreadyRunning("manager".into()).into());
        }
        let stopped = {
            let mut slot = self.stopped.lock();
            *slot = CancellationToken::new();
            slot.clone()
        };
        let robots = self.robots();
        info!(robots = robots.len(), "starting manager");

        let mut errors = MultiError::new();
        for robot in &robots {
            if let Err(errs) = robot.start(false).await {
                errors.append(errs.for_robot(robot.name()));
            }
        }
        if !errors.is_empty() {
            warn!(errors = errors.len(), "manager start failed; stopping fleet");
            if let Err(stop_errs) = self.stop().await {
                errors.append(stop_errs);
            }
            return Err(errors);
        }

        if self.auto_run {
            tokio::select! {
                _ = (self.trap)() => {
                    info!("shutdown signal received");
                    return self.stop().await;
                }
                _ = stopped.cancelled() => info!("manager stopped while waiting for a signal"),
            }
        }
        Ok(())
    }

    /// Halt every robot in insertion order, collecting every failure.
    #[instrument(skip_all)]
    pub async fn stop(&self) -> Result<(), MultiError> {
        let mut errors = MultiError::new();
        for robot in self.robots() {
            if let Err(errs) = robot.halt().await {
                errors.append(errs.for_robot(robot.name()));
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.stopped.lock().cancel();
        info!("manager stopped");
        errors.into_result()
    }

    pub fn to_json(&self) -> JsonManager {
        JsonManager {
            robots: self.robots().iter().map(|r| r.to_json()).collect(),
            commands: self.commander.command_names(),
        }
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.robots().iter().map(|r| r.name().to_string()).collect();
        f.debug_struct("Manager")
            .field("robots", &names)
            .field("auto_run", &self.auto_run)
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::RobotState;
    use robokit_hal::{SimConnection, SimDevice};
    use std::time::Duration;

    fn sim_robot(name: &str, conns: usize) -> (Robot, Vec<Arc<SimConnection>>) {
        let robot = Robot::new(name);
        let conns: Vec<_> = (0..conns)
            .map(|i| SimConnection::named(format!("{name}-c{i}")))
            .collect();
        for c in &conns {
            robot.add_connection(c.clone()).unwrap();
        }
        (robot, conns)
    }

    #[tokio::test]
    async fn interrupt_stops_every_robot() {
        let (trap, trigger) = signal::manual();
        let manager = Arc::new(Manager::new().with_trap(trap));
        let mut all_conns = Vec::new();
        for name in ["alpha", "beta"] {
            let (robot, conns) = sim_robot(name, 2);
            manager.add_robot(robot).unwrap();
            all_conns.extend(conns);
        }

        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.robots().iter().all(|r| r.running()));

        trigger.fire();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result, Ok(()));
        assert!(manager.robots().iter().all(|r| r.state() == RobotState::Stopped));
        assert_eq!(all_conns.len(), 4);
        assert!(all_conns.iter().all(|c| c.finalize_calls() == 1));
        assert!(!manager.running());
    }

    #[tokio::test]
    async fn explicit_stop_releases_a_waiting_start() {
        let (trap, trigger) = signal::manual();
        let manager = Arc::new(Manager::new().with_trap(trap));
        let (robot, conns) = sim_robot("solo", 1);
        manager.add_robot(robot).unwrap();

        let runner = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.running());
        assert!(!runner.is_finished());

        manager.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("start still waiting after stop")
            .unwrap();

        assert_eq!(result, Ok(()));
        assert!(!trigger.fired());
        assert_eq!(conns[0].finalize_calls(), 1);
        assert!(!manager.running());
    }

    #[tokio::test]
    async fn restart_after_stop_waits_for_the_trap_again() {
        let (trap, trigger) = signal::manual();
        let manager = Arc::new(Manager::new().with_trap(trap));
        manager.add_robot(Robot::new("again")).unwrap();

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        assert!(manager.running());

        trigger.fire();
        let result = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
        assert!(!manager.running());
    }

    #[tokio::test]
    async fn robot_names_are_unique() {
        let manager = Manager::new();
        manager.add_robot(Robot::new("bot")).unwrap();
        let err = manager.add_robot(Robot::new("bot")).unwrap_err();
        assert_eq!(
            err,
            BotError::DuplicateName {
                kind: "robot".into(),
                name: "bot".into()
            }
        );
        assert_eq!(manager.robots().len(), 1);
    }

    #[tokio::test]
    async fn failed_robot_stops_the_fleet() {
        let manager = Manager::new().with_auto_run(false);
        let (good, good_conns) = sim_robot("good", 1);
        manager.add_robot(good).unwrap();

        let (bad, bad_conns) = sim_robot("bad", 1);
        bad.add_device(
            SimDevice::builder("motor", bad_conns[0].clone())
                .failing_start("stalled")
                .build(),
        )
        .unwrap();
        manager.add_robot(bad).unwrap();

        let errs = manager.start().await.unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(matches!(&errs.errors()[0], BotError::Robot { robot, .. } if robot == "bad"));
        assert_eq!(good_conns[0].finalize_calls(), 1);
        assert!(manager.robots().iter().all(|r| !r.running()));
        assert!(!manager.running());
    }

    #[tokio::test]
    async fn stop_collects_errors_from_every_robot() {
        let manager = Manager::new().with_auto_run(false);
        for name in ["one", "two"] {
            let robot = Robot::new(name);
            robot
                .add_connection(SimConnection::builder("c").failing_finalize("stuck").build())
                .unwrap();
            manager.add_robot(robot).unwrap();
        }
        manager.start().await.unwrap();

        let errs = manager.stop().await.unwrap_err();
        let robots: Vec<_> = errs
            .iter()
            .map(|e| match e {
                BotError::Robot { robot, .. } => robot.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(robots, ["one", "two"]);
    }

    #[tokio::test]
    async fn json_lists_robots_and_commands() {
        let manager = Manager::new().with_auto_run(false);
        manager.add_robot(Robot::new("a")).unwrap();
        manager.add_robot(Robot::new("b")).unwrap();
        manager
            .commander()
            .add_command("HelloWorld", |_| Ok(serde_json::json!("hello")));

        let json = manager.to_json();
        assert_eq!(json.robots.len(), 2);
        assert_eq!(json.robots[1].name, "b");
        assert_eq!(json.commands, ["HelloWorld"]);
        assert!(manager.robot("a").is_some());
        assert!(manager.robot("zzz").is_none());
    }
}
