//! Where the session reports what happened.
//!
//! The session calls a [`NotificationSink`] after every state change. The
//! sink is the only way out of the session apart from
//! [`SyncCommand::CurrentView`](crate::net::SyncCommand::CurrentView), so a
//! renderer, a logger, or a test recorder all plug in here.

use tokio::sync::mpsc;

use taskwatch_proto::task::{Stats, Task, TaskId};

use crate::reconcile::{TaskChange, TaskCollection};

/// Severity of a transient user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// The requested operation succeeded.
    Success,
    /// The requested operation failed; state is unchanged.
    Error,
}

/// Receives session output.
pub trait NotificationSink: Send + 'static {
    /// The channel opened (`true`) or closed (`false`).
    fn connection_status(&mut self, connected: bool);

    /// A reconnect attempt is starting.
    fn reconnecting(&mut self, attempt: u32);

    /// A snapshot replaced the whole view.
    fn snapshot_applied(&mut self, stats: &Stats, tasks: &TaskCollection);

    /// One task was inserted or replaced.
    fn task_changed(&mut self, stats: &Stats, task: &Task, change: TaskChange);

    /// Stats changed without a task change.
    fn stats_changed(&mut self, stats: &Stats);

    /// A listed task started processing and should be scrolled into view.
    fn bring_into_view(&mut self, task_id: &TaskId);

    /// A transient notice.
    fn notify(&mut self, level: NoticeLevel, message: &str);
}

/// Owned form of every sink callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// See [`NotificationSink::connection_status`].
    ConnectionStatus {
        /// Whether the channel is open.
        connected: bool,
    },
    /// See [`NotificationSink::reconnecting`].
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// See [`NotificationSink::snapshot_applied`].
    SnapshotApplied {
        /// New stats.
        stats: Stats,
        /// New tasks, front first.
        tasks: Vec<Task>,
    },
    /// See [`NotificationSink::task_changed`].
    TaskChanged {
        /// New stats.
        stats: Stats,
        /// The task's new record.
        task: Box<Task>,
        /// Inserted or replaced.
        change: TaskChange,
    },
    /// See [`NotificationSink::stats_changed`].
    StatsChanged {
        /// New stats.
        stats: Stats,
    },
    /// See [`NotificationSink::bring_into_view`].
    BringIntoView {
        /// Task to reveal.
        task_id: TaskId,
    },
    /// See [`NotificationSink::notify`].
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Text for the user.
        message: String,
    },
}

/// Forwards every callback as a [`SyncEvent`] over an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver for its events.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("sync event receiver dropped");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn connection_status(&mut self, connected: bool) {
        self.emit(SyncEvent::ConnectionStatus { connected });
    }

    fn reconnecting(&mut self, attempt: u32) {
        self.emit(SyncEvent::Reconnecting { attempt });
    }

    fn snapshot_applied(&mut self, stats: &Stats, tasks: &TaskCollection) {
        self.emit(SyncEvent::SnapshotApplied {
            stats: *stats,
            tasks: tasks.to_vec(),
        });
    }

    fn task_changed(&mut self, stats: &Stats, task: &Task, change: TaskChange) {
        self.emit(SyncEvent::TaskChanged {
            stats: *stats,
            task: Box::new(task.clone()),
            change,
        });
    }

    fn stats_changed(&mut self, stats: &Stats) {
        self.emit(SyncEvent::StatsChanged { stats: *stats });
    }

    fn bring_into_view(&mut self, task_id: &TaskId) {
        self.emit(SyncEvent::BringIntoView {
            task_id: task_id.clone(),
        });
    }

    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.emit(SyncEvent::Notice {
            level,
            message: message.to_owned(),
        });
    }
}
