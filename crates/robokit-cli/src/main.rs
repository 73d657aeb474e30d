//! `robokit` – runs a fleet of robots described by a TOML file.
//!
//! ```text
//! robokit run   [-c robokit.toml] [--port 3000] [--no-api]
//! robokit check [-c robokit.toml]
//! ```
//!
//! `run` builds every robot, serves the HTTP API and holds the fleet open
//! until Ctrl-C or SIGTERM. `check` builds the fleet without starting it and
//! prints its JSON description.
//!
//! Exit codes: `0` clean shutdown, `1` the fleet failed to start or stop,
//! `2` the fleet file or API configuration is invalid.

mod config;
mod fleet;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use robokit_cockpit::ApiServer;
use robokit_runtime::telemetry;
use robokit_types::{BotError, MultiError};
use tracing::{error, info, warn};

use config::FleetConfig;

const DEFAULT_FLEET_FILE: &str = "robokit.toml";

#[derive(Parser)]
#[command(name = "robokit")]
#[command(about = "robokit - run robots and inspect them over HTTP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fleet and serve the API until interrupted
    Run {
        /// Fleet file
        #[arg(short = 'c', long = "config", default_value = DEFAULT_FLEET_FILE)]
        config: PathBuf,

        /// Override the API port
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Do not serve the HTTP API
        #[arg(long = "no-api")]
        no_api: bool,
    },
    /// Build the fleet without starting it and print it as JSON
    Check {
        /// Fleet file
        #[arg(short = 'c', long = "config", default_value = DEFAULT_FLEET_FILE)]
        config: PathBuf,
    },
}

#[derive(Debug)]
enum Failure {
    Config(BotError),
    Fleet(MultiError),
}

impl Failure {
    fn code(&self) -> u8 {
        match self {
            Self::Fleet(_) => 1,
            Self::Config(_) => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = telemetry::init_tracing("robokit");

    let outcome = match cli.command {
        Commands::Run {
            config,
            port,
            no_api,
        } => run(&config, port, no_api).await,
        Commands::Check { config } => check(&config),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            match &failure {
                Failure::Config(e) => {
                    error!(error = %e, "invalid configuration");
                    eprintln!("{}: {e}", "Config error".red().bold());
                }
                Failure::Fleet(errs) => {
                    error!(errors = errs.len(), "fleet failed");
                    eprintln!("{}: {errs}", "Fleet error".red().bold());
                }
            }
            ExitCode::from(failure.code())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

async fn run(path: &Path, port: Option<u16>, no_api: bool) -> Result<(), Failure> {
    print_banner();

    let mut cfg = load(path)?;
    if let Some(port) = port {
        cfg.api.port = port;
    }
    let manager = Arc::new(fleet::build_manager(&cfg).map_err(Failure::Config)?);

    let api = if no_api {
        None
    } else {
        let handle = ApiServer::new(Arc::clone(&manager), cfg.api.clone())
            .start()
            .await
            .map_err(Failure::Config)?;
        println!(
            "  API listening on {}",
            format!("http://{}/api/", handle.local_addr()).bright_blue()
        );
        Some(handle)
    };

    println!(
        "  Starting {} robot(s){}\n",
        manager.robots().len(),
        if cfg.auto_run { "; Ctrl-C to stop" } else { "" }
    );
    let mut result = manager.start().await;
    if result.is_ok() && !manager.auto_run() {
        info!("auto_run disabled; stopping after a successful start");
        result = manager.stop().await;
    }

    if let Some(api) = api
        && let Err(e) = api.shutdown().await
    {
        warn!(error = %e, "API did not shut down cleanly");
    }

    match result {
        Ok(()) => {
            println!("{}", "  ✓ Fleet stopped.".green());
            Ok(())
        }
        Err(errs) => Err(Failure::Fleet(errs)),
    }
}

fn check(path: &Path) -> Result<(), Failure> {
    let cfg = load(path)?;
    let manager = fleet::build_manager(&cfg).map_err(Failure::Config)?;
    let json = serde_json::to_string_pretty(&manager.to_json())
        .map_err(|e| Failure::Config(BotError::Config(e.to_string())))?;
    println!("{json}");
    Ok(())
}

fn load(path: &Path) -> Result<FleetConfig, Failure> {
    match FleetConfig::load_from(path).map_err(Failure::Config)? {
        Some(cfg) => {
            info!(path = %path.display(), robots = cfg.robots.len(), "fleet file loaded");
            Ok(cfg)
        }
        None => {
            println!(
                "  {} {} not found; running an empty fleet.",
                "!".yellow().bold(),
                path.display().to_string().bold()
            );
            let mut cfg = FleetConfig::default();
            cfg.api.apply_env_overrides();
            Ok(cfg)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"            __         __   _ __ "#.bold().cyan());
    println!("{}", r#"   _______ / /  ___   / /__(_) /_"#.bold().cyan());
    println!("{}", r#"  / __/ _ \/ _ \/ _ \ /  '_/ / __/"#.bold().cyan());
    println!("{}", r#" /_/  \___/_.__/\___//_/\_\_/\__/ "#.bold().cyan());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_fleet_file_in_cwd() {
        let cli = Cli::try_parse_from(["robokit", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                config,
                port,
                no_api,
            } => {
                assert_eq!(config, PathBuf::from(DEFAULT_FLEET_FILE));
                assert_eq!(port, None);
                assert!(!no_api);
            }
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn check_accepts_a_config_path() {
        let cli = Cli::try_parse_from(["robokit", "check", "-c", "fleet.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { config } if config == Path::new("fleet.toml")));
    }

    #[test]
    fn failures_map_to_exit_codes() {
        assert_eq!(Failure::Fleet(MultiError::new()).code(), 1);
        assert_eq!(Failure::Config(BotError::Config("x".into())).code(), 2);
    }

    #[tokio::test]
    async fn run_without_auto_run_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robokit.toml");
        std::fs::write(
            &path,
            r#"
            auto_run = false
            [[robots]]
            name = "bench"
            [[robots.connections]]
            [[robots.devices]]
            driver = "echo"
            "#,
        )
        .unwrap();

        assert!(run(&path, None, true).await.is_ok());
    }

    #[tokio::test]
    async fn run_rejects_unknown_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robokit.toml");
        std::fs::write(
            &path,
            r#"
            [[robots]]
            [[robots.devices]]
            driver = "echo"
            connection = "missing"
            "#,
        )
        .unwrap();

        let err = run(&path, None, true).await.unwrap_err();
        assert!(matches!(err, Failure::Config(BotError::UnknownConnection(_))));
    }
}
