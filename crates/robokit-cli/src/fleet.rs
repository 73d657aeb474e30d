//! Turns a [`FleetConfig`] into a [`Manager`] of simulated robots.

use std::sync::Arc;
use std::time::Duration;

use robokit_hal::{ButtonDriver, Connection, Device, LedDriver, SimConnection, SimDevice};
use robokit_runtime::{Manager, Robot};
use robokit_types::{BotError, Params};
use tracing::{debug, warn};

use crate::config::{BlinkConfig, DeviceConfig, DriverKind, FleetConfig, RobotConfig};

pub fn build_manager(cfg: &FleetConfig) -> Result<Manager, BotError> {
    let manager = Manager::new().with_auto_run(cfg.auto_run);
    for robot in &cfg.robots {
        manager.add_robot(build_robot(robot)?)?;
    }
    Ok(manager)
}

fn build_robot(cfg: &RobotConfig) -> Result<Robot, BotError> {
    let mut robot = Robot::new(cfg.name.as_str());
    if let Some(blink) = &cfg.blink {
        robot = with_blink(robot, blink.clone());
    }

    let mut connections: Vec<Arc<dyn Connection>> = Vec::with_capacity(cfg.connections.len());
    for c in &cfg.connections {
        let mut builder = SimConnection::builder(c.name.as_str());
        if let Some(port) = &c.port {
            builder = builder.port(port.as_str());
        }
        let conn: Arc<dyn Connection> = builder.build();
        robot.add_connection(Arc::clone(&conn))?;
        connections.push(conn);
    }

    for d in &cfg.devices {
        let conn = match &d.connection {
            Some(name) => connections.iter().find(|c| c.name() == *name),
            None => connections.first(),
        }
        .cloned()
        .ok_or_else(|| {
            BotError::UnknownConnection(d.connection.clone().unwrap_or_default())
        })?;

        let device = build_device(d, conn)?;
        robot.add_device(device)?;
    }

    debug!(
        robot = robot.name(),
        connections = cfg.connections.len(),
        devices = cfg.devices.len(),
        "robot assembled"
    );
    Ok(robot)
}

fn build_device(cfg: &DeviceConfig, conn: Arc<dyn Connection>) -> Result<Arc<dyn Device>, BotError> {
    let pin = || {
        cfg.pin.clone().ok_or_else(|| {
            BotError::Config(format!("device {:?}: {:?} driver needs a pin", cfg.name, cfg.driver))
        })
    };
    let device: Arc<dyn Device> = match cfg.driver {
        DriverKind::Led => LedDriver::new(conn, pin()?),
        DriverKind::Button => match cfg.interval_ms {
            Some(ms) => ButtonDriver::with_interval(conn, pin()?, Duration::from_millis(ms)),
            None => ButtonDriver::new(conn, pin()?),
        },
        DriverKind::Echo => SimDevice::builder(cfg.name.as_str(), conn).echo().build(),
    };
    if !cfg.name.is_empty() {
        device.set_name(&cfg.name);
    }
    Ok(device)
}

/// Toggle `blink.device` every `blink.period_ms` once the robot runs.
fn with_blink(robot: Robot, blink: BlinkConfig) -> Robot {
    let period = Duration::from_millis(blink.period_ms);
    robot.with_work(move |robot: Arc<Robot>| {
        let target = blink.device.clone();
        async move {
            let Some(device) = robot.device(&target) else {
                warn!(robot = robot.name(), device = %target, "blink target not found");
                return;
            };
            let scheduled = robot.every(period, move || {
                let toggled = device
                    .commander()
                    .map(|c| c.execute("Toggle", Params::new()));
                if let Some(Err(e)) = toggled {
                    warn!(device = %device.name(), error = %e, "blink failed");
                }
            });
            if let Err(e) = scheduled {
                warn!(robot = robot.name(), error = %e, "blink not scheduled");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(raw: &str) -> FleetConfig {
        FleetConfig::from_toml(raw).unwrap()
    }

    #[test]
    fn builds_robots_in_declaration_order() {
        let manager = build_manager(&fleet(
            r#"
            [[robots]]
            name = "bench"
            [[robots.connections]]
            name = "gpio"
            [[robots.devices]]
            name = "status"
            driver = "led"
            pin = "13"
            [[robots.devices]]
            name = "sensor"
            driver = "echo"

            [[robots]]
            "#,
        ))
        .unwrap();

        let robots = manager.robots();
        assert_eq!(robots.len(), 2);
        assert!(robots[1].name().starts_with("Robot-"));

        let json = robots[0].to_json();
        let names: Vec<_> = json.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["status", "sensor"]);
        assert_eq!(json.devices[1].commands, ["echo"]);
        assert_eq!(json.devices[1].connection.name, "gpio");
    }

    #[test]
    fn device_without_a_connection_fails() {
        let err = build_manager(&fleet(
            r#"
            [[robots]]
            [[robots.devices]]
            driver = "echo"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BotError::UnknownConnection(_)));

        let err = build_manager(&fleet(
            r#"
            [[robots]]
            [[robots.connections]]
            name = "a"
            [[robots.devices]]
            driver = "echo"
            connection = "b"
            "#,
        ))
        .unwrap_err();
        assert_eq!(err, BotError::UnknownConnection("b".into()));
    }

    #[test]
    fn led_requires_a_pin() {
        let err = build_manager(&fleet(
            r#"
            [[robots]]
            [[robots.connections]]
            [[robots.devices]]
            driver = "led"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }

    #[test]
    fn duplicate_robot_names_fail() {
        let err = build_manager(&fleet(
            r#"
            [[robots]]
            name = "twin"
            [[robots]]
            name = "twin"
            "#,
        ))
        .unwrap_err();
        assert!(matches!(err, BotError::DuplicateName { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blink_toggles_while_running() {
        let manager = build_manager(&fleet(
            r#"
            auto_run = false
            [[robots]]
            name = "bench"
            blink = { device = "status", period_ms = 10 }
            [[robots.connections]]
            [[robots.devices]]
            name = "status"
            driver = "led"
            pin = "13"
            "#,
        ))
        .unwrap();
        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let robot = manager.robot("bench").unwrap();
        let work = robot.work().all();
        assert_eq!(work.len(), 1);
        assert!(work[0].tick_count() >= 2);

        manager.stop().await.unwrap();
        assert!(robot.work().is_empty());
    }
}
