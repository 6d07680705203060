//! Merges snapshots and deltas into the local view.
//!
//! The [`Reconciler`] is a plain value: it does no I/O and holds no locks.
//! Feeding it the same frames in the same order always produces the same
//! collection. Stats are stored exactly as the server reports them.
//!
//! There is no per-task version, so a stale `task_update` that arrives after
//! a newer one for the same task rolls that task back until the next update.

pub mod collection;

use taskwatch_proto::task::{Stats, Task, TaskId, TaskStatus};

pub use collection::{TaskChange, TaskCollection};

/// Result of applying one task delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// How the collection changed.
    pub change: TaskChange,
    /// Presentation hint: an already-listed task started processing.
    pub bring_into_view: bool,
}

/// Holds the current [`Stats`] and [`TaskCollection`].
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    stats: Stats,
    tasks: TaskCollection,
}

impl Reconciler {
    /// Empty collection, zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces stats and tasks wholesale, keeping the server's order.
    pub fn apply_snapshot(&mut self, stats: Stats, tasks: Vec<Task>) {
        let received = tasks.len();
        self.stats = stats;
        self.tasks = TaskCollection::from_tasks(tasks);
        if self.tasks.len() != received {
            tracing::debug!(
                received,
                kept = self.tasks.len(),
                "snapshot contained duplicate task ids"
            );
        }
        tracing::debug!(tasks = self.tasks.len(), total = stats.total, "snapshot applied");
    }

    /// Replaces stats and upserts one task.
    pub fn apply_task_delta(&mut self, stats: Stats, task: Task) -> DeltaOutcome {
        self.stats = stats;
        let status = task.status;
        let task_id = task.task_id.clone();
        let change = self.tasks.upsert_front(task);
        let bring_into_view =
            matches!(change, TaskChange::Replaced { .. }) && status == TaskStatus::Processing;
        tracing::trace!(%task_id, %status, ?change, "task delta applied");
        DeltaOutcome {
            change,
            bring_into_view,
        }
    }

    /// Replaces stats only.
    pub fn apply_stats_delta(&mut self, stats: Stats) {
        self.stats = stats;
    }

    /// Current stats and tasks.
    #[must_use]
    pub const fn current_view(&self) -> (&Stats, &TaskCollection) {
        (&self.stats, &self.tasks)
    }

    /// Current stats.
    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Current tasks.
    #[must_use]
    pub const fn tasks(&self) -> &TaskCollection {
        &self.tasks
    }

    /// Record for `id`.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }
}
