//! HTTP boundary: task listing, stats overview and task creation.
//!
//! The session only needs the [`DashboardApi`] trait; [`HttpApi`] is the
//! reqwest-backed implementation used by the binary.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use taskwatch_proto::task::{NewTask, Stats, Task, TaskId};

/// Default number of tasks requested by a refresh.
pub const DEFAULT_TASK_LIMIT: usize = 100;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Could not build an endpoint URL.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request failed or the response body did not decode.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// The server's `detail` message.
        detail: String,
    },

    /// The task payload is not a JSON object.
    #[error("invalid payload JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Stats and tasks fetched together.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Stats overview.
    pub stats: Stats,
    /// Most recent tasks, newest first.
    pub tasks: Vec<Task>,
}

/// Requests the session makes over HTTP.
pub trait DashboardApi: Send + Sync + 'static {
    /// `GET /api/tasks/?limit=N`.
    fn fetch_tasks(&self, limit: usize)
    -> impl Future<Output = Result<Vec<Task>, ApiError>> + Send;

    /// `GET /api/tasks/stats/overview`.
    fn fetch_stats(&self) -> impl Future<Output = Result<Stats, ApiError>> + Send;

    /// `POST /api/tasks/`.
    fn create_task(&self, task: &NewTask) -> impl Future<Output = Result<Task, ApiError>> + Send;
}

/// Fetches tasks and stats concurrently. Fails unless both succeed.
///
/// # Errors
///
/// Returns the first failing request's error.
pub async fn fetch_snapshot<A: DashboardApi>(api: &A, limit: usize) -> Result<Snapshot, ApiError> {
    let (tasks, stats) = tokio::join!(api.fetch_tasks(limit), api.fetch_stats());
    Ok(Snapshot {
        tasks: tasks?,
        stats: stats?,
    })
}

/// reqwest-backed [`DashboardApi`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base: Url,
}

impl HttpApi {
    /// Creates a client for the server at `base` (e.g. `http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Client`] if the TLS backend fails to initialise.
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self, ApiError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { http, base })
    }

    /// The server base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// `GET /api/tasks/{task_id}`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Rejected`] with status 404 when the task does not exist.
    pub async fn fetch_task(&self, id: &TaskId) -> Result<Task, ApiError> {
        let url = self.endpoint(&format!("api/tasks/{id}"))?;
        tracing::debug!(%url, "fetching task");
        decode(self.http.get(url).send().await?).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }
}

impl DashboardApi for HttpApi {
    async fn fetch_tasks(&self, limit: usize) -> Result<Vec<Task>, ApiError> {
        let url = self.endpoint("api/tasks/")?;
        tracing::debug!(%url, limit, "fetching tasks");
        let response = self
            .http
            .get(url)
            .query(&[("limit", limit)])
            .send()
            .await?;
        decode(response).await
    }

    async fn fetch_stats(&self) -> Result<Stats, ApiError> {
        let url = self.endpoint("api/tasks/stats/overview")?;
        tracing::debug!(%url, "fetching stats");
        decode(self.http.get(url).send().await?).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let url = self.endpoint("api/tasks/")?;
        tracing::info!(%url, name = %task.name, task_type = %task.task_type, "creating task");
        let response = self.http.post(url).json(task).send().await?;
        let created: Task = decode(response).await?;
        tracing::info!(task_id = %created.task_id, "task created");
        Ok(created)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned());
    tracing::warn!(status = status.as_u16(), %detail, "request rejected");
    Err(ApiError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

/// Extracts `detail` from an error body. A string is used as is; a
/// validation list is rendered as its messages joined by `; `.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_owned(),
                    None => item.to_string(),
                })
                .collect();
            Some(messages.join("; "))
        }
        other => Some(other.to_string()),
    }
}
