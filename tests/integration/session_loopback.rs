// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::future_not_send,
    clippy::too_many_lines
)]

//! Deterministic session tests over the loopback transport.
//!
//! Time is paused, so reconnect delays and heartbeat intervals elapse
//! instantly and exactly. The loopback server decides attempt by attempt
//! whether the session gets a link, and each accepted [`LoopbackPeer`]
//! plays the server end of that link.
//!
//! A `CurrentView` round trip doubles as a barrier: the session handles
//! pending link events before commands, so once the view arrives every
//! frame pushed before it has been applied.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use taskwatch::api::{ApiError, DashboardApi};
use taskwatch::connection::{ConnectionState, HeartbeatPolicy, ReconnectPolicy};
use taskwatch::net::{self, DashboardView, SessionOptions, SyncCommand};
use taskwatch::reconcile::TaskChange;
use taskwatch::sink::{ChannelSink, NoticeLevel, SyncEvent};
use taskwatch::transport::loopback::{LoopbackConnector, LoopbackPeer, LoopbackServer};
use taskwatch_proto::frame::{self, ServerFrame};
use taskwatch_proto::task::{NewTask, Stats, Task, TaskId, TaskStatus, TaskType};

// =============================================================================
// Fake HTTP boundary
// =============================================================================

#[derive(Default)]
struct FakeState {
    tasks: Vec<Task>,
    stats: Stats,
    failing: bool,
    created: Vec<NewTask>,
}

/// In-memory [`DashboardApi`]; clones share state.
#[derive(Clone, Default)]
struct FakeApi {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    fn serve(&self, stats: Stats, tasks: Vec<Task>) {
        let mut state = self.inner.lock();
        state.stats = stats;
        state.tasks = tasks;
    }

    fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    fn created(&self) -> Vec<NewTask> {
        self.inner.lock().created.clone()
    }
}

fn unavailable() -> ApiError {
    ApiError::Rejected {
        status: 503,
        detail: "Service unavailable".into(),
    }
}

impl DashboardApi for FakeApi {
    async fn fetch_tasks(&self, limit: usize) -> Result<Vec<Task>, ApiError> {
        let state = self.inner.lock();
        if state.failing {
            return Err(unavailable());
        }
        Ok(state.tasks.iter().take(limit).cloned().collect())
    }

    async fn fetch_stats(&self) -> Result<Stats, ApiError> {
        let state = self.inner.lock();
        if state.failing {
            return Err(unavailable());
        }
        Ok(state.stats)
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        if !(1..=10).contains(&task.priority) {
            return Err(ApiError::Rejected {
                status: 422,
                detail: "priority must be between 1 and 10".into(),
            });
        }
        self.inner.lock().created.push(task.clone());
        Ok(Task {
            task_id: TaskId::new(format!("created-{}", task.name)),
            name: task.name.clone(),
            task_type: task.task_type,
            status: TaskStatus::Pending,
            payload: task.payload.clone(),
            priority: task.priority,
            created_at: Utc::now(),
            updated_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            progress: 0,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn task(id: &str, status: TaskStatus, progress: u8) -> Task {
    Task {
        task_id: TaskId::new(id),
        name: format!("task {id}"),
        task_type: TaskType::DataProcessing,
        status,
        payload: serde_json::Map::new(),
        priority: 5,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        updated_at: None,
        started_at: None,
        completed_at: None,
        error: None,
        retry_count: 0,
        progress,
    }
}

fn stats(total: u64, processing: u64) -> Stats {
    Stats {
        total,
        pending: total - processing,
        processing,
        ..Stats::default()
    }
}

fn initial_data(stats: Stats, tasks: Vec<Task>) -> String {
    frame::encode(&ServerFrame::InitialData { stats, tasks }).unwrap()
}

fn task_update(stats: Stats, task: Task) -> String {
    frame::encode(&ServerFrame::TaskUpdate { stats, task }).unwrap()
}

fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.task_id.as_str()).collect()
}

fn options() -> SessionOptions {
    SessionOptions {
        heartbeat: HeartbeatPolicy::new(Duration::from_secs(30)),
        reconnect: ReconnectPolicy::Fixed {
            interval: Duration::from_secs(5),
        },
        ..SessionOptions::default()
    }
}

struct Harness {
    commands: mpsc::Sender<SyncCommand>,
    events: mpsc::UnboundedReceiver<SyncEvent>,
    server: LoopbackServer,
    api: FakeApi,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(options: SessionOptions) -> Self {
        let (connector, server) = LoopbackConnector::pair();
        let (sink, events) = ChannelSink::channel();
        let api = FakeApi::default();
        let (commands, handle) = net::spawn_session(connector, api.clone(), sink, options);
        Self {
            commands,
            events,
            server,
            api,
            handle,
        }
    }

    /// Start a session and accept its first attempt.
    async fn connected() -> (Self, LoopbackPeer) {
        let mut h = Self::start(options());
        let peer = h.server.accept().await.unwrap();
        assert_eq!(
            h.next_event().await,
            SyncEvent::ConnectionStatus { connected: true }
        );
        (h, peer)
    }

    async fn next_event(&mut self) -> SyncEvent {
        tokio::time::timeout(Duration::from_secs(600), self.events.recv())
            .await
            .expect("timed out waiting for a sync event")
            .expect("event channel closed")
    }

    async fn view(&self) -> DashboardView {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::CurrentView { reply })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    /// Events already emitted, without waiting.
    fn drain(&mut self) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn delta_close_reconnect_then_snapshot_replaces_collection() {
    let (mut h, peer) = Harness::connected().await;
    assert_eq!(h.view().await.connection, ConnectionState::Connected);

    peer.send_text(
        r#"{"type":"task_update",
            "stats":{"total_tasks":1,"pending":0,"processing":1,"completed":0,"failed":0,"retrying":0},
            "task":{"task_id":"t1","name":"resize","task_type":"file_conversion","status":"processing",
                    "priority":5,"created_at":"2024-05-01T10:00:00","progress":40}}"#,
    );
    match h.next_event().await {
        SyncEvent::TaskChanged {
            stats,
            task,
            change,
        } => {
            assert_eq!(task.task_id.as_str(), "t1");
            assert_eq!(task.progress, 40);
            assert_eq!(change, TaskChange::Inserted);
            assert_eq!(stats.processing, 1);
        }
        other => panic!("expected TaskChanged, got {other:?}"),
    }
    let view = h.view().await;
    assert_eq!(ids(&view.tasks), ["t1"]);
    assert_eq!(view.tasks[0].progress, 40);

    peer.close();
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );
    assert_eq!(h.view().await.connection, ConnectionState::Disconnected);

    let closed_at = Instant::now();
    let peer = h.server.accept().await.unwrap();
    assert_eq!(closed_at.elapsed(), Duration::from_secs(5));
    assert_eq!(h.next_event().await, SyncEvent::Reconnecting { attempt: 1 });
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: true }
    );

    let fresh = vec![
        task("t2", TaskStatus::Pending, 0),
        task("t3", TaskStatus::Completed, 100),
    ];
    peer.send_text(initial_data(stats(2, 0), fresh.clone()));
    match h.next_event().await {
        SyncEvent::SnapshotApplied { stats: s, tasks } => {
            assert_eq!(s, stats(2, 0));
            assert_eq!(tasks, fresh);
        }
        other => panic!("expected SnapshotApplied, got {other:?}"),
    }

    let view = h.view().await;
    assert_eq!(view.connection, ConnectionState::Connected);
    assert_eq!(ids(&view.tasks), ["t2", "t3"]);
    assert_eq!(view.stats, stats(2, 0));
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_retry_on_a_fixed_interval() {
    let mut h = Harness::start(options());

    let started = Instant::now();
    assert!(h.server.refuse().await);
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );

    assert!(h.server.refuse().await);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(h.next_event().await, SyncEvent::Reconnecting { attempt: 1 });
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );

    let peer = h.server.accept().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(h.next_event().await, SyncEvent::Reconnecting { attempt: 2 });
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: true }
    );

    // A successful open resets the attempt counter.
    peer.close();
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );
    let _peer = h.server.accept().await.unwrap();
    assert_eq!(h.next_event().await, SyncEvent::Reconnecting { attempt: 1 });
}

#[tokio::test(start_paused = true)]
async fn error_then_close_arms_a_single_reconnect() {
    let (mut h, peer) = Harness::connected().await;

    peer.fail("connection reset");
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );

    // Leave the retry unanswered for several intervals.
    tokio::time::sleep(Duration::from_secs(22)).await;
    let _ = h.view().await;
    assert_eq!(h.drain(), [SyncEvent::Reconnecting { attempt: 1 }]);
    assert_eq!(h.server.pending_attempts().await, 1);

    let _peer = h.server.accept().await.unwrap();
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: true }
    );
    assert_eq!(h.view().await.connection, ConnectionState::Connected);
}

// =============================================================================
// Heartbeat
// =============================================================================

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_on_the_interval_while_connected() {
    let (mut h, mut peer) = Harness::connected().await;
    let opened = Instant::now();

    assert_eq!(peer.recv_text().await.as_deref(), Some("ping"));
    assert_eq!(opened.elapsed(), Duration::from_secs(30));
    assert_eq!(peer.recv_text().await.as_deref(), Some("ping"));
    assert_eq!(opened.elapsed(), Duration::from_secs(60));

    // `pong` replies are not frames.
    peer.send_text("pong");
    let _ = h.view().await;
    assert!(h.drain().is_empty());

    peer.close();
    assert_eq!(
        h.next_event().await,
        SyncEvent::ConnectionStatus { connected: false }
    );

    // Stay down for a while, then come back: the old heartbeat must not
    // have survived, so the new link sees its first ping a full interval
    // after opening and no sooner.
    assert!(h.server.refuse().await);
    assert!(h.server.refuse().await);
    let mut peer = h.server.accept().await.unwrap();
    let reopened = Instant::now();
    assert_eq!(peer.recv_text().await.as_deref(), Some("ping"));
    assert_eq!(reopened.elapsed(), Duration::from_secs(30));
    assert!(peer.try_recv_text().is_none());
}

// =============================================================================
// Frames
// =============================================================================

#[tokio::test(start_paused = true)]
async fn malformed_frames_leave_the_collection_alone() {
    let (mut h, peer) = Harness::connected().await;
    let tasks = vec![task("a", TaskStatus::Pending, 0)];
    peer.send_text(initial_data(stats(1, 0), tasks.clone()));
    let _ = h.next_event().await;
    let before = h.view().await;

    for junk in [
        "not json",
        "[]",
        r#"{"stats":{}}"#,
        r#"{"type":"mystery"}"#,
        r#"{"type":"task_update","stats":{"total_tasks":1}}"#,
        r#"{"type":"initial_data","stats":{"total_tasks":1,"pending":1,"processing":0,"completed":0,"failed":0,"retrying":0},"tasks":[{"task_id":"x","status":"weird"}]}"#,
    ] {
        assert!(peer.send_text(junk));
    }

    let after = h.view().await;
    assert_eq!(after, before);
    assert!(h.drain().is_empty());

    // Still processing frames after the junk.
    peer.send_text(task_update(stats(2, 1), task("b", TaskStatus::Processing, 10)));
    assert!(matches!(
        h.next_event().await,
        SyncEvent::TaskChanged {
            change: TaskChange::Inserted,
            ..
        }
    ));
    assert_eq!(ids(&h.view().await.tasks), ["b", "a"]);
}

#[tokio::test(start_paused = true)]
async fn processing_update_of_known_task_is_brought_into_view() {
    let (mut h, peer) = Harness::connected().await;
    peer.send_text(initial_data(
        stats(2, 0),
        vec![task("a", TaskStatus::Pending, 0), task("b", TaskStatus::Pending, 0)],
    ));
    let _ = h.next_event().await;

    peer.send_text(task_update(stats(2, 1), task("b", TaskStatus::Processing, 20)));
    match h.next_event().await {
        SyncEvent::TaskChanged { task, change, .. } => {
            assert_eq!(task.status, TaskStatus::Processing);
            assert_eq!(change, TaskChange::Replaced { position: 1 });
        }
        other => panic!("expected TaskChanged, got {other:?}"),
    }
    assert_eq!(
        h.next_event().await,
        SyncEvent::BringIntoView {
            task_id: TaskId::new("b")
        }
    );

    // Position is stable; only the record changed.
    let view = h.view().await;
    assert_eq!(ids(&view.tasks), ["a", "b"]);
    assert_eq!(view.tasks[1].progress, 20);
    assert_eq!(view.stats.processing, 1);
}

#[tokio::test(start_paused = true)]
async fn stats_update_replaces_stats_only() {
    let (mut h, peer) = Harness::connected().await;
    peer.send_text(initial_data(stats(1, 0), vec![task("a", TaskStatus::Pending, 0)]));
    let _ = h.next_event().await;

    let reported = Stats {
        total: 40,
        completed: 39,
        pending: 1,
        ..Stats::default()
    };
    peer.send_text(frame::encode(&ServerFrame::StatsUpdate { stats: reported }).unwrap());
    assert_eq!(
        h.next_event().await,
        SyncEvent::StatsChanged { stats: reported }
    );

    let view = h.view().await;
    assert_eq!(view.stats, reported);
    assert_eq!(ids(&view.tasks), ["a"]);
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test(start_paused = true)]
async fn refresh_applies_snapshot_and_reports_success() {
    let (mut h, _peer) = Harness::connected().await;
    let served = vec![
        task("n", TaskStatus::Pending, 0),
        task("m", TaskStatus::Completed, 100),
    ];
    h.api.serve(stats(2, 0), served.clone());

    h.commands.send(SyncCommand::Refresh).await.unwrap();
    match h.next_event().await {
        SyncEvent::SnapshotApplied { tasks, .. } => assert_eq!(tasks, served),
        other => panic!("expected SnapshotApplied, got {other:?}"),
    }
    assert_eq!(
        h.next_event().await,
        SyncEvent::Notice {
            level: NoticeLevel::Success,
            message: "Tasks refreshed".into()
        }
    );
    assert_eq!(ids(&h.view().await.tasks), ["n", "m"]);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_notifies_and_changes_nothing() {
    let (mut h, peer) = Harness::connected().await;
    peer.send_text(initial_data(stats(1, 0), vec![task("a", TaskStatus::Pending, 0)]));
    let _ = h.next_event().await;
    let before = h.view().await;

    h.api.set_failing(true);
    h.commands.send(SyncCommand::Refresh).await.unwrap();
    match h.next_event().await {
        SyncEvent::Notice { level, message } => {
            assert_eq!(level, NoticeLevel::Error);
            assert!(message.starts_with("Failed to refresh tasks:"), "{message}");
            assert!(message.contains("Service unavailable"), "{message}");
        }
        other => panic!("expected an error notice, got {other:?}"),
    }
    assert_eq!(h.view().await, before);
}

#[tokio::test(start_paused = true)]
async fn refresh_works_while_disconnected() {
    let mut h = Harness::start(options());
    h.api.serve(stats(1, 0), vec![task("a", TaskStatus::Pending, 0)]);

    h.commands.send(SyncCommand::Refresh).await.unwrap();
    assert!(matches!(
        h.next_event().await,
        SyncEvent::SnapshotApplied { .. }
    ));
    let view = h.view().await;
    assert_eq!(view.connection, ConnectionState::Connecting);
    assert_eq!(ids(&view.tasks), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn create_task_replies_to_the_caller_only() {
    let (mut h, _peer) = Harness::connected().await;

    let (reply, rx) = oneshot::channel();
    let new = NewTask::new("weekly report", TaskType::ReportGeneration).with_priority(7);
    h.commands
        .send(SyncCommand::CreateTask { task: new, reply })
        .await
        .unwrap();
    let created = rx.await.unwrap().unwrap();
    assert_eq!(created.name, "weekly report");
    assert_eq!(created.priority, 7);
    assert_eq!(h.api.created().len(), 1);

    let (reply, rx) = oneshot::channel();
    let rejected = NewTask::new("bad", TaskType::Email).with_priority(99);
    h.commands
        .send(SyncCommand::CreateTask {
            task: rejected,
            reply,
        })
        .await
        .unwrap();
    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "priority must be between 1 and 10");

    // Neither outcome touches the collection or the sink.
    assert!(h.view().await.tasks.is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_link() {
    let (h, mut peer) = Harness::connected().await;

    h.commands.send(SyncCommand::Shutdown).await.unwrap();
    h.handle.await.unwrap();
    assert_eq!(peer.recv_text().await, None);
    assert!(!peer.send_text("late"));
}

#[tokio::test(start_paused = true)]
async fn dropping_every_sender_stops_the_session() {
    let (h, _peer) = Harness::connected().await;
    let Harness {
        commands, handle, ..
    } = h;
    drop(commands);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
