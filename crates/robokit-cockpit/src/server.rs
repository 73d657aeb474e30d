//! [`ApiServer`] – the HTTP + JSON introspection API over a [`Manager`].
//!
//! # Routes
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | GET | `/api/` | `{"MCP": manager}` |
//! | GET | `/api/commands` | `{"commands": [...]}` |
//! | GET/POST | `/api/commands/:command` | `{"result": ...}` |
//! | GET | `/api/robots` | `{"robots": [...]}` |
//! | GET | `/api/robots/:robot` | `{"robot": ...}` |
//! | GET | `/api/robots/:robot/commands` | `{"commands": [...]}` |
//! | GET/POST | `/api/robots/:robot/commands/:command` | `{"result": ...}` |
//! | GET | `/api/robots/:robot/devices` | `{"devices": [...]}` |
//! | GET | `/api/robots/:robot/devices/:device` | `{"device": ...}` |
//! | GET | `/api/robots/:robot/devices/:device/events/:event` | SSE stream |
//! | GET | `/api/robots/:robot/devices/:device/commands` | `{"commands": [...]}` |
//! | GET/POST | `/api/robots/:robot/devices/:device/commands/:command` | `{"result": ...}` |
//! | GET | `/api/robots/:robot/connections` | `{"connections": [...]}` |
//! | GET | `/api/robots/:robot/connections/:connection` | `{"connection": ...}` |
//!
//! Unknown robots, devices, connections and events answer 404 with
//! `{"error": "..."}`. An unknown command is not an HTTP error: it answers
//! 200 with `{"result": "Unknown Command"}`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum::routing::get;
use futures_util::{Stream, StreamExt};
use robokit_hal::{Connection, Device};
use robokit_middleware::{CommandFn, SubscriptionId};
use robokit_runtime::projection::{connection_json, device_json};
use robokit_runtime::{Manager, Robot};
use robokit_types::{BotError, Params};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::auth::{self, BasicAuth};
use crate::config::ApiConfig;
use crate::cors;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const UNKNOWN_COMMAND: &str = "Unknown Command";

/// Events buffered per stream before further deliveries are dropped.
const STREAM_BUFFER: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Responses
// ────────────────────────────────────────────────────────────────────────────

/// A JSON body with an explicit charset.
struct JsonReply(StatusCode, Value);

impl JsonReply {
    fn ok(body: Value) -> Self {
        Self(StatusCode::OK, body)
    }
}

impl IntoResponse for JsonReply {
    fn into_response(self) -> Response {
        (
            self.0,
            [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
            self.1.to_string(),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<BotError> for ApiError {
    fn from(err: BotError) -> Self {
        if err.is_lookup_miss() {
            Self::NotFound(err.to_string())
        } else if matches!(err, BotError::InvalidArgument(_)) {
            Self::BadRequest(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        JsonReply(status, json!({ "error": message })).into_response()
    }
}

type ApiResult = Result<JsonReply, ApiError>;

// ────────────────────────────────────────────────────────────────────────────
// Router
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    /// Ends every open event stream once cancelled.
    pub shutdown: CancellationToken,
}

/// Build the full application: API routes, optional static files, auth,
/// request logging and CORS, as configured.
pub fn router(manager: Arc<Manager>, config: &ApiConfig) -> Router {
    router_with_shutdown(manager, config, CancellationToken::new())
}

/// [`router`] whose event streams end when `shutdown` is cancelled.
pub fn router_with_shutdown(
    manager: Arc<Manager>,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Router {
    let mut app = api_routes().with_state(AppState { manager, shutdown });

    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    if let Some((user, pass)) = config.credentials() {
        app = app.layer(middleware::from_fn_with_state(
            BasicAuth::new(user, pass),
            auth::require_basic_auth,
        ));
    }
    if config.debug {
        app = app.layer(middleware::from_fn(log_requests));
    }
    if let Some(cors) = cors::layer(&config.cors) {
        app = app.layer(cors);
    }
    app
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/", get(mcp))
        .route("/api/commands", get(mcp_commands))
        .route("/api/commands/:command", get(mcp_command).post(mcp_command))
        .route("/api/robots", get(robots))
        .route("/api/robots/:robot", get(robot))
        .route("/api/robots/:robot/commands", get(robot_commands))
        .route(
            "/api/robots/:robot/commands/:command",
            get(robot_command).post(robot_command),
        )
        .route("/api/robots/:robot/devices", get(robot_devices))
        .route("/api/robots/:robot/devices/:device", get(robot_device))
        .route(
            "/api/robots/:robot/devices/:device/events/:event",
            get(robot_device_events),
        )
        .route(
            "/api/robots/:robot/devices/:device/commands",
            get(robot_device_commands),
        )
        .route(
            "/api/robots/:robot/devices/:device/commands/:command",
            get(robot_device_command).post(robot_device_command),
        )
        .route("/api/robots/:robot/connections", get(robot_connections))
        .route(
            "/api/robots/:robot/connections/:connection",
            get(robot_connection),
        )
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "api request"
    );
    response
}

// ────────────────────────────────────────────────────────────────────────────
// Lookups
// ────────────────────────────────────────────────────────────────────────────

fn find_robot(state: &AppState, name: &str) -> Result<Arc<Robot>, ApiError> {
    state
        .manager
        .robot(name)
        .ok_or_else(|| BotError::UnknownRobot(name.to_string()).into())
}

fn find_device(robot: &Robot, name: &str) -> Result<Arc<dyn Device>, ApiError> {
    robot
        .device(name)
        .ok_or_else(|| BotError::UnknownDevice(name.to_string()).into())
}

fn find_connection(robot: &Robot, name: &str) -> Result<Arc<dyn Connection>, ApiError> {
    robot
        .connection(name)
        .ok_or_else(|| BotError::UnknownConnection(name.to_string()).into())
}

// ────────────────────────────────────────────────────────────────────────────
// Manager
// ────────────────────────────────────────────────────────────────────────────

async fn mcp(State(state): State<AppState>) -> JsonReply {
    JsonReply::ok(json!({ "MCP": state.manager.to_json() }))
}

async fn mcp_commands(State(state): State<AppState>) -> JsonReply {
    JsonReply::ok(json!({ "commands": state.manager.commander().command_names() }))
}

async fn mcp_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let found = state.manager.commander().command(&command);
    execute(&command, found, &headers, &body).await
}

// ────────────────────────────────────────────────────────────────────────────
// Robots
// ────────────────────────────────────────────────────────────────────────────

async fn robots(State(state): State<AppState>) -> JsonReply {
    let robots: Vec<_> = state.manager.robots().iter().map(|r| r.to_json()).collect();
    JsonReply::ok(json!({ "robots": robots }))
}

async fn robot(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    Ok(JsonReply::ok(json!({ "robot": robot.to_json() })))
}

async fn robot_commands(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    Ok(JsonReply::ok(json!({ "commands": robot.commander().command_names() })))
}

async fn robot_command(
    State(state): State<AppState>,
    Path((name, command)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let found = robot.commander().command(&command);
    execute(&command, found, &headers, &body).await
}

async fn robot_connections(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let connections: Vec<_> = robot
        .connections()
        .iter()
        .map(|c| connection_json(c.as_ref()))
        .collect();
    Ok(JsonReply::ok(json!({ "connections": connections })))
}

async fn robot_connection(
    State(state): State<AppState>,
    Path((name, connection)): Path<(String, String)>,
) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let connection = find_connection(&robot, &connection)?;
    Ok(JsonReply::ok(json!({ "connection": connection_json(connection.as_ref()) })))
}

// ────────────────────────────────────────────────────────────────────────────
// Devices
// ────────────────────────────────────────────────────────────────────────────

async fn robot_devices(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let devices: Vec<_> = robot.devices().iter().map(|d| device_json(d.as_ref())).collect();
    Ok(JsonReply::ok(json!({ "devices": devices })))
}

async fn robot_device(
    State(state): State<AppState>,
    Path((name, device)): Path<(String, String)>,
) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let device = find_device(&robot, &device)?;
    Ok(JsonReply::ok(json!({ "device": device_json(device.as_ref()) })))
}

async fn robot_device_commands(
    State(state): State<AppState>,
    Path((name, device)): Path<(String, String)>,
) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let device = find_device(&robot, &device)?;
    let commands = device.commander().map(|c| c.command_names()).unwrap_or_default();
    Ok(JsonReply::ok(json!({ "commands": commands })))
}

async fn robot_device_command(
    State(state): State<AppState>,
    Path((name, device, command)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let robot = find_robot(&state, &name)?;
    let device = find_device(&robot, &device)?;
    let found = device.commander().and_then(|c| c.command(&command));
    execute(&command, found, &headers, &body).await
}

/// Stream every publication on a device event as an SSE frame.
///
/// The subscription lives as long as the response body; when the client
/// goes away, or the server shuts down, the stream is dropped and the
/// subscriber removed.
async fn robot_device_events(
    State(state): State<AppState>,
    Path((name, device, event)): Path<(String, String, String)>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let robot = find_robot(&state, &name)?;
    let device = find_device(&robot, &device)?;
    let eventer = device
        .eventer()
        .ok_or_else(|| BotError::UnknownEvent(event.clone()))?;

    let (tx, rx) = mpsc::channel::<Value>(STREAM_BUFFER);
    let id = eventer.on(&event, move |value| {
        if tx.try_send(value).is_err() {
            debug!("event stream full or closed; dropping delivery");
        }
    })?;
    debug!(robot = %name, device = %device.name(), %event, "event stream opened");

    let subscription = StreamSubscription {
        device: Arc::clone(&device),
        event,
        id,
    };
    let stream = futures_util::stream::unfold((rx, subscription), |(mut rx, sub)| async move {
        let value = rx.recv().await?;
        let frame = SseEvent::default().data(value.to_string());
        Some((Ok::<_, Infallible>(frame), (rx, sub)))
    })
    .take_until(state.shutdown.clone().cancelled_owned());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct StreamSubscription {
    device: Arc<dyn Device>,
    event: String,
    id: SubscriptionId,
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(eventer) = self.device.eventer() {
            eventer.unsubscribe(&self.event, self.id);
        }
        debug!(event = %self.event, "event stream closed");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Command execution
// ────────────────────────────────────────────────────────────────────────────

async fn execute(
    name: &str,
    command: Option<CommandFn>,
    headers: &HeaderMap,
    body: &Bytes,
) -> ApiResult {
    let Some(command) = command else {
        return Ok(JsonReply::ok(json!({ "result": UNKNOWN_COMMAND })));
    };
    let params = parse_params(headers, body)?;

    // Commands are plain blocking functions; keep them off the reactor.
    let outcome = tokio::task::spawn_blocking(move || command(params))
        .await
        .map_err(|e| {
            error!(command = name, error = %e, "command panicked");
            ApiError::Internal(format!("command {name} panicked"))
        })?;

    Ok(JsonReply::ok(match outcome {
        Ok(value) => json!({ "result": value }),
        Err(err) => {
            warn!(command = name, error = %err, "command failed");
            json!({ "result": { "error": err.to_string() } })
        }
    }))
}

/// An empty body means no arguments. Anything else must be a JSON object
/// sent as `application/json`.
fn parse_params(headers: &HeaderMap, body: &Bytes) -> Result<Params, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::new());
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"));
    if !is_json {
        return Err(ApiError::BadRequest(
            "command arguments must be sent as application/json".into(),
        ));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(_) => Err(ApiError::BadRequest("command arguments must be a JSON object".into())),
        Err(e) => Err(ApiError::BadRequest(format!("invalid JSON body: {e}"))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Server
// ────────────────────────────────────────────────────────────────────────────

/// Serves the API for one manager.
///
/// ```rust,no_run
/// # async fn run(manager: std::sync::Arc<robokit_runtime::Manager>) -> Result<(), robokit_types::BotError> {
/// use robokit_cockpit::{ApiConfig, ApiServer};
///
/// let handle = ApiServer::new(manager, ApiConfig::default()).start().await?;
/// println!("listening on {}", handle.local_addr());
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ApiServer {
    manager: Arc<Manager>,
    config: ApiConfig,
}

impl ApiServer {
    pub fn new(manager: Arc<Manager>, config: ApiConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.manager), &self.config)
    }

    /// Bind and serve in the background.
    ///
    /// Returns once the listener is bound, so a port of `0` can be resolved
    /// through [`ApiHandle::local_addr`].
    ///
    /// # Errors
    ///
    /// [`BotError::Config`] for an unparsable address, [`BotError::Io`] if
    /// the bind fails.
    pub async fn start(self) -> Result<ApiHandle, BotError> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BotError::Io(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BotError::Io(format!("local address: {e}")))?;

        let shutdown = CancellationToken::new();
        let app = router_with_shutdown(Arc::clone(&self.manager), &self.config, shutdown.clone());
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!(%local_addr, "API listening");
        Ok(ApiHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// A running server.
pub struct ApiHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl ApiHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, end open event streams and wait for
    /// in-flight requests.
    pub async fn shutdown(self) -> Result<(), BotError> {
        self.shutdown.cancel();
        match self.task.await {
            Ok(served) => served.map_err(|e| BotError::Io(format!("serve: {e}"))),
            Err(e) => Err(BotError::Io(format!("server task: {e}"))),
        }
    }
}
