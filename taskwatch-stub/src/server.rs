//! Stub server core: shared state, WebSocket handler, HTTP task API, and
//! broadcast of task and stats updates.
//!
//! Every WebSocket client receives an `initial_data` frame on connect and
//! then every `task_update`/`stats_update` broadcast. A `ping` text frame is
//! answered with `pong`. Tasks live in memory, newest first.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use taskwatch_proto::frame::{self, PING, PONG, ServerFrame};
use taskwatch_proto::task::{NewTask, Stats, Task, TaskId, TaskStatus};

/// Default `limit` for task listings and the `initial_data` frame.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Accepted priority range for new tasks.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

/// Errors returned by the HTTP API as `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// No task with that id.
    #[error("Task not found")]
    NotFound,
    /// The request body failed validation.
    #[error("{0}")]
    Invalid(String),
    /// HTTP failures were switched on with [`StubState::set_http_failure`].
    #[error("Service unavailable")]
    Unavailable,
}

impl IntoResponse for StubError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Shared server state: task store and connected WebSocket clients.
#[derive(Default)]
pub struct StubState {
    /// Tasks, newest first.
    tasks: Mutex<Vec<Task>>,
    /// Writer channels of connected WebSocket clients.
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_client: AtomicU64,
    pings: AtomicUsize,
    fail_http: AtomicBool,
}

impl StubState {
    /// Empty store, no clients.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `tasks` (given newest first).
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            ..Self::default()
        }
    }

    /// Copy of the newest `limit` tasks.
    #[must_use]
    pub fn tasks(&self, limit: usize) -> Vec<Task> {
        self.tasks.lock().iter().take(limit).cloned().collect()
    }

    /// One task by id.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.lock().iter().find(|t| &t.task_id == id).cloned()
    }

    /// Stats over the whole store.
    #[must_use]
    pub fn stats(&self) -> Stats {
        Stats::from_tasks(self.tasks.lock().iter())
    }

    /// Validates `new`, stores it as a pending task and broadcasts it.
    ///
    /// # Errors
    ///
    /// [`StubError::Invalid`] for an empty name or a priority outside 1–10.
    pub fn create_task(&self, new: NewTask) -> Result<Task, StubError> {
        if new.name.trim().is_empty() {
            return Err(StubError::Invalid("name must not be empty".into()));
        }
        if !PRIORITY_RANGE.contains(&new.priority) {
            return Err(StubError::Invalid(format!(
                "priority must be between {} and {}",
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end()
            )));
        }
        let now = Utc::now();
        let task = Task {
            task_id: TaskId::new(uuid::Uuid::new_v4().to_string()),
            name: new.name,
            task_type: new.task_type,
            status: TaskStatus::Pending,
            payload: new.payload,
            priority: new.priority,
            created_at: now,
            updated_at: Some(now),
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            progress: 0,
        };
        tracing::info!(task_id = %task.task_id, name = %task.name, "task created");
        self.upsert_task(task.clone());
        Ok(task)
    }

    /// Replaces the task with the same id (or adds it at the front) and
    /// broadcasts a `task_update`.
    pub fn upsert_task(&self, task: Task) {
        {
            let mut tasks = self.tasks.lock();
            if let Some(existing) = tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                *existing = task.clone();
            } else {
                tasks.insert(0, task.clone());
            }
        }
        let stats = self.stats();
        self.broadcast(&ServerFrame::TaskUpdate { stats, task });
    }

    /// Applies `change` to the stored task and broadcasts the result.
    ///
    /// Returns the updated task, or `None` if the id is unknown.
    pub fn update_task(&self, id: &TaskId, change: impl FnOnce(&mut Task)) -> Option<Task> {
        let updated = {
            let mut tasks = self.tasks.lock();
            let task = tasks.iter_mut().find(|t| &t.task_id == id)?;
            change(task);
            task.updated_at = Some(Utc::now());
            task.clone()
        };
        self.upsert_task(updated.clone());
        Some(updated)
    }

    /// Broadcasts a `stats_update`.
    pub fn broadcast_stats(&self) {
        let stats = self.stats();
        self.broadcast(&ServerFrame::StatsUpdate { stats });
    }

    /// Sends `frame` to every connected client.
    pub fn broadcast(&self, frame: &ServerFrame) {
        match frame::encode(frame) {
            Ok(text) => self.broadcast_text(&text),
            Err(e) => tracing::error!(error = %e, "failed to encode frame"),
        }
    }

    /// Sends raw text to every connected client.
    pub fn broadcast_text(&self, text: &str) {
        let clients = self.clients.lock();
        tracing::debug!(clients = clients.len(), len = text.len(), "broadcasting");
        for sender in clients.values() {
            let _ = sender.send(Message::Text(text.to_owned().into()));
        }
    }

    /// Send a WebSocket Close frame to all connected clients.
    pub fn close_all_connections(&self) {
        let clients = self.clients.lock();
        for (id, sender) in clients.iter() {
            tracing::info!(client = id, "sending close frame to client");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Makes every HTTP endpoint answer 503 while `failing` is set.
    pub fn set_http_failure(&self, failing: bool) {
        self.fail_http.store(failing, Ordering::Relaxed);
    }

    /// Number of `ping` frames received since start.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::Relaxed)
    }

    /// Number of connected WebSocket clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn check_http(&self) -> Result<(), StubError> {
        if self.fail_http.load(Ordering::Relaxed) {
            Err(StubError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Queues an `initial_data` frame on `sender` and registers it for
    /// broadcasts.
    ///
    /// The task lock is held across both steps, so every change lands either
    /// in the snapshot or in a later broadcast to this client.
    pub fn subscribe(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let tasks = self.tasks.lock();
        let initial = ServerFrame::InitialData {
            stats: Stats::from_tasks(tasks.iter()),
            tasks: tasks.iter().take(DEFAULT_LIST_LIMIT).cloned().collect(),
        };
        match frame::encode(&initial) {
            Ok(text) => {
                let _ = sender.send(Message::Text(text.into()));
            }
            Err(e) => tracing::error!(error = %e, "failed to encode initial_data"),
        }
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().insert(id, sender);
        drop(tasks);
        id
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().remove(&id);
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// 1. Queue an `initial_data` frame and register the client atomically.
/// 2. Forward broadcasts through a writer task.
/// 3. Answer `ping` with `pong` until the client leaves.
/// 4. Unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<StubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let client = state.subscribe(tx.clone());
    tracing::info!(client, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(client, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) if text.as_str() == PING => {
                    reader_state.pings.fetch_add(1, Ordering::Relaxed);
                    let _ = tx.send(Message::Text(PONG.into()));
                }
                Message::Text(text) => {
                    tracing::debug!(client, text = %text.as_str(), "ignoring client text");
                }
                Message::Close(_) => {
                    tracing::info!(client, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(client);
    tracing::info!(client, "client disconnected");
}

/// Query string of the task listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum number of tasks.
    pub limit: Option<usize>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<StubState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn list_tasks(
    State(state): State<Arc<StubState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Task>>, StubError> {
    state.check_http()?;
    Ok(Json(state.tasks(query.limit.unwrap_or(DEFAULT_LIST_LIMIT))))
}

async fn create_task(
    State(state): State<Arc<StubState>>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), StubError> {
    state.check_http()?;
    let Json(new) = body.map_err(|e| StubError::Invalid(e.body_text()))?;
    let task = state.create_task(new)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<Arc<StubState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, StubError> {
    state.check_http()?;
    state
        .task(&TaskId::new(task_id))
        .map(Json)
        .ok_or(StubError::NotFound)
}

async fn stats_overview(State(state): State<Arc<StubState>>) -> Result<Json<Stats>, StubError> {
    state.check_http()?;
    Ok(Json(state.stats()))
}

/// Builds the router for `state`.
pub fn router(state: Arc<StubState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/tasks/", get(list_tasks).post(create_task))
        .route("/api/tasks/stats/overview", get(stats_overview))
        .route("/api/tasks/{task_id}", get(get_task))
        .with_state(state)
}

/// Starts the stub server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_state(addr, Arc::new(StubState::new())).await
}

/// Starts the stub server with a pre-built [`StubState`], so tests can keep a
/// handle for broadcasting and inspection.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StubState>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "stub server error");
        }
    });

    Ok((bound_addr, handle))
}
