//! `robokit-cockpit` – remote introspection and control over HTTP.
//!
//! Exposes a [`Manager`](robokit_runtime::Manager) as a JSON API: list robots,
//! devices and connections, run commands with a JSON object as arguments, and
//! follow device events as server-sent events.
//!
//! # Modules
//!
//! - [`server`] – [`ApiServer`], the axum [`router`] and its handlers.
//! - [`config`] – [`ApiConfig`]: bind address, credentials, CORS, static files.
//! - [`cors`] – wildcard origin matching.
//! - [`auth`] – HTTP basic authentication middleware.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use robokit_cockpit::{ApiConfig, ApiServer};
//! use robokit_runtime::Manager;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = Arc::new(Manager::new());
//!     let api = ApiServer::new(Arc::clone(&manager), ApiConfig::default())
//!         .start()
//!         .await
//!         .expect("API failed to bind");
//!     manager.start().await.expect("fleet failed to start");
//!     api.shutdown().await.expect("API shutdown failed");
//! }
//! ```

pub mod auth;
pub mod config;
pub mod cors;
pub mod server;

pub use config::{ApiConfig, CorsConfig};
pub use server::{ApiError, ApiHandle, ApiServer, AppState, router, router_with_shutdown};
