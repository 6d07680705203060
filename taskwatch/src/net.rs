//! Live-sync session driver.
//!
//! A [`SyncSession`] runs on one tokio task and owns everything mutable:
//! the [`ConnectionManager`], the current [`Link`], and the [`Reconciler`].
//! Link events, timer deadlines, [`SyncCommand`]s and finished HTTP
//! refreshes are multiplexed with `tokio::select!` and handled one at a
//! time, so reconciliation never runs concurrently and frames are applied
//! in arrival order.
//!
//! # Architecture
//!
//! ```text
//! caller ── SyncCommand ──▶ SyncSession ──▶ NotificationSink
//!                             │   ▲
//!              Connector/Link │   │ LinkEvent
//!                             ▼   │
//!                            server
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, OptionFuture};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use taskwatch_proto::frame::{self, Classified, PING, PONG};
use taskwatch_proto::task::{NewTask, Stats, Task};

use crate::api::{self, ApiError, DashboardApi, HttpApi, Snapshot};
use crate::connection::{
    ConnectionManager, ConnectionState, HeartbeatPolicy, Notice, ReconnectPolicy,
};
use crate::reconcile::Reconciler;
use crate::sink::{ChannelSink, NoticeLevel, NotificationSink, SyncEvent};
use crate::transport::ws::WsConnector;
use crate::transport::{Connector, Link, LinkEvent, TransportError};

/// Default capacity of the command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SyncCommand {
    /// Re-fetch tasks and stats over HTTP and apply them as a snapshot.
    Refresh,
    /// Create a task; the outcome goes to `reply` only.
    CreateTask {
        /// Task to create.
        task: NewTask,
        /// Receives the created task or the failure.
        reply: oneshot::Sender<Result<Task, ApiError>>,
    },
    /// Read the current connection state, stats and tasks.
    CurrentView {
        /// Receives the view.
        reply: oneshot::Sender<DashboardView>,
    },
    /// Close the link and stop the session.
    Shutdown,
}

/// A copy of the session's state at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    /// Connection state.
    pub connection: ConnectionState,
    /// Server-reported stats.
    pub stats: Stats,
    /// Tasks, front first.
    pub tasks: Vec<Task>,
}

/// Behaviour knobs for a session, independent of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Probe interval while connected.
    pub heartbeat: HeartbeatPolicy,
    /// Delay policy between reconnect attempts.
    pub reconnect: ReconnectPolicy,
    /// `limit` used by refreshes.
    pub task_limit: usize,
    /// Capacity of the command channel.
    pub command_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            task_limit: api::DEFAULT_TASK_LIMIT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// Everything needed to run a session against a real server.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// HTTP base URL.
    pub server_url: Url,
    /// WebSocket URL.
    pub ws_url: Url,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Session behaviour.
    pub session: SessionOptions,
}

/// Start a session against a real server.
///
/// Returns the command sender and the event receiver. The session stops on
/// [`SyncCommand::Shutdown`] or when every command sender is dropped.
///
/// # Errors
///
/// Returns [`ApiError::Client`] if the HTTP client cannot be built.
pub fn spawn_sync(
    config: SyncConfig,
) -> Result<(mpsc::Sender<SyncCommand>, mpsc::UnboundedReceiver<SyncEvent>), ApiError> {
    let api = HttpApi::new(config.server_url, config.request_timeout)?;
    let connector = WsConnector::new(config.ws_url).with_connect_timeout(config.connect_timeout);
    let (sink, events) = ChannelSink::channel();
    let (commands, _handle) = spawn_session(connector, api, sink, config.session);
    Ok((commands, events))
}

/// Start a session over any transport, API and sink.
pub fn spawn_session<C, A, S>(
    connector: C,
    api: A,
    sink: S,
    options: SessionOptions,
) -> (mpsc::Sender<SyncCommand>, JoinHandle<()>)
where
    C: Connector,
    A: DashboardApi,
    S: NotificationSink,
{
    let (tx, rx) = mpsc::channel(options.command_capacity.max(1));
    let session = SyncSession::new(connector, api, sink, options, rx);
    (tx, tokio::spawn(session.run()))
}

/// One pass through the event loop.
enum Step<L> {
    Command(Option<SyncCommand>),
    Refreshed(Result<Snapshot, ApiError>),
    Attempt(Result<L, TransportError>),
    Link(LinkEvent),
    Timers,
}

/// The session state machine. See the module docs.
pub struct SyncSession<C: Connector, A, S> {
    connector: Arc<C>,
    api: Arc<A>,
    sink: S,
    manager: ConnectionManager,
    reconciler: Reconciler,
    task_limit: usize,
    commands: mpsc::Receiver<SyncCommand>,
    refresh_tx: mpsc::UnboundedSender<Result<Snapshot, ApiError>>,
    refresh_rx: mpsc::UnboundedReceiver<Result<Snapshot, ApiError>>,
    link: Option<C::Link>,
    attempt: Option<BoxFuture<'static, Result<C::Link, TransportError>>>,
}

impl<C, A, S> SyncSession<C, A, S>
where
    C: Connector,
    A: DashboardApi,
    S: NotificationSink,
{
    /// Creates a session reading commands from `commands`.
    pub fn new(
        connector: C,
        api: A,
        sink: S,
        options: SessionOptions,
        commands: mpsc::Receiver<SyncCommand>,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            api: Arc::new(api),
            sink,
            manager: ConnectionManager::new(options.reconnect, options.heartbeat),
            reconciler: Reconciler::new(),
            task_limit: options.task_limit,
            commands,
            refresh_tx,
            refresh_rx,
            link: None,
            attempt: None,
        }
    }

    /// Runs until shutdown.
    pub async fn run(mut self) {
        tracing::info!("sync session starting");
        if self.manager.connect() {
            self.start_attempt();
        }

        loop {
            let step = self.next_step().await;
            match step {
                Step::Command(None | Some(SyncCommand::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Refreshed(result) => self.handle_refresh(result),
                Step::Attempt(result) => self.handle_attempt(result),
                Step::Link(event) => self.handle_link_event(event),
                Step::Timers => self.handle_timers().await,
            }
        }

        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        tracing::info!("sync session stopped");
    }

    async fn next_step(&mut self) -> Step<C::Link> {
        let deadline = self.manager.next_deadline();
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        let link_open = self.link.is_some();
        let attempting = self.attempt.is_some();

        tokio::select! {
            biased;

            Some(event) = OptionFuture::from(self.link.as_mut().map(Link::recv)), if link_open => {
                Step::Link(event)
            }
            Some(result) = OptionFuture::from(self.attempt.as_mut()), if attempting => {
                Step::Attempt(result)
            }
            () = tokio::time::sleep_until(sleep_until), if deadline.is_some() => Step::Timers,
            Some(result) = self.refresh_rx.recv() => Step::Refreshed(result),
            command = self.commands.recv() => Step::Command(command),
        }
    }

    fn start_attempt(&mut self) {
        let connector = Arc::clone(&self.connector);
        self.attempt = Some(async move { connector.connect().await }.boxed());
    }

    fn handle_attempt(&mut self, result: Result<C::Link, TransportError>) {
        self.attempt = None;
        let now = Instant::now();
        match result {
            Ok(link) => {
                self.link = Some(link);
                if let Some(notice) = self.manager.on_open(now) {
                    self.emit(notice);
                }
            }
            Err(e) => {
                self.manager.on_error(&e.to_string());
                if let Some(notice) = self.manager.on_close(now) {
                    self.emit(notice);
                }
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message(text) => self.handle_message(&text),
            LinkEvent::Error(reason) => self.manager.on_error(&reason),
            LinkEvent::Closed => {
                self.link = None;
                if let Some(notice) = self.manager.on_close(Instant::now()) {
                    self.emit(notice);
                }
            }
        }
    }

    fn handle_message(&mut self, text: &str) {
        if text == PONG {
            tracing::trace!("pong");
            return;
        }
        if !self.manager.accepts_messages() {
            tracing::debug!(state = %self.manager.state(), "dropping message outside connected state");
            return;
        }
        match frame::classify(text) {
            Classified::Snapshot { stats, tasks } => {
                self.reconciler.apply_snapshot(stats, tasks);
                let (stats, tasks) = self.reconciler.current_view();
                self.sink.snapshot_applied(stats, tasks);
            }
            Classified::TaskDelta { stats, task } => {
                let task_id = task.task_id.clone();
                let outcome = self.reconciler.apply_task_delta(stats, *task);
                if let Some(task) = self.reconciler.task(&task_id) {
                    self.sink
                        .task_changed(self.reconciler.stats(), task, outcome.change);
                }
                if outcome.bring_into_view {
                    self.sink.bring_into_view(&task_id);
                }
            }
            Classified::StatsDelta { stats } => {
                self.reconciler.apply_stats_delta(stats);
                self.sink.stats_changed(self.reconciler.stats());
            }
            Classified::Unrecognized(reason) => {
                tracing::warn!(%reason, "dropping unrecognized frame");
            }
        }
    }

    async fn handle_timers(&mut self) {
        for notice in self.manager.poll_timers(Instant::now()) {
            match notice {
                Notice::SendProbe => {
                    if let Some(link) = self.link.as_mut()
                        && let Err(e) = link.send_text(PING).await
                    {
                        tracing::debug!(err = %e, "heartbeat probe not sent");
                    }
                }
                Notice::Reconnecting { .. } => {
                    self.start_attempt();
                    self.emit(notice);
                }
                Notice::Status { .. } => self.emit(notice),
            }
        }
    }

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Refresh => {
                let api = Arc::clone(&self.api);
                let tx = self.refresh_tx.clone();
                let limit = self.task_limit;
                tokio::spawn(async move {
                    let result = api::fetch_snapshot(&*api, limit).await;
                    let _ = tx.send(result);
                });
            }
            SyncCommand::CreateTask { task, reply } => {
                let api = Arc::clone(&self.api);
                tokio::spawn(async move {
                    let result = api.create_task(&task).await;
                    if let Err(e) = &result {
                        tracing::warn!(err = %e, name = %task.name, "task creation failed");
                    }
                    let _ = reply.send(result);
                });
            }
            SyncCommand::CurrentView { reply } => {
                let (stats, tasks) = self.reconciler.current_view();
                let _ = reply.send(DashboardView {
                    connection: self.manager.state(),
                    stats: *stats,
                    tasks: tasks.to_vec(),
                });
            }
            SyncCommand::Shutdown => {}
        }
    }

    fn handle_refresh(&mut self, result: Result<Snapshot, ApiError>) {
        match result {
            Ok(Snapshot { stats, tasks }) => {
                tracing::info!(tasks = tasks.len(), "refresh applied");
                self.reconciler.apply_snapshot(stats, tasks);
                let (stats, tasks) = self.reconciler.current_view();
                self.sink.snapshot_applied(stats, tasks);
                self.sink.notify(NoticeLevel::Success, "Tasks refreshed");
            }
            Err(e) => {
                tracing::warn!(err = %e, "refresh failed");
                self.sink
                    .notify(NoticeLevel::Error, &format!("Failed to refresh tasks: {e}"));
            }
        }
    }

    fn emit(&mut self, notice: Notice) {
        match notice {
            Notice::Status { connected } => self.sink.connection_status(connected),
            Notice::Reconnecting { attempt } => self.sink.reconnecting(attempt),
            Notice::SendProbe => {}
        }
    }
}
