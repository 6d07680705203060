//! Ordered, duplicate-free task collection.

use std::collections::{BTreeMap, HashMap};

use taskwatch_proto::task::{Task, TaskId};

/// How an upsert changed the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskChange {
    /// The task was unseen and now sits at the front.
    Inserted,
    /// An existing record was overwritten in place.
    Replaced {
        /// Unchanged position of the record.
        position: usize,
    },
}

/// Tasks in display order (front first), keyed by `task_id`.
///
/// Order is kept as sort keys in a `BTreeMap`; inserting at the front takes
/// a key below the current minimum, so existing keys never move. The id
/// index maps each `task_id` to its sort key.
#[derive(Debug, Clone, Default)]
pub struct TaskCollection {
    order: BTreeMap<i64, Task>,
    index: HashMap<TaskId, i64>,
}

impl TaskCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a collection preserving the order of `tasks`.
    ///
    /// A `task_id` repeated in the input keeps its first position and its
    /// last record.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut collection = Self::new();
        let mut next_key = 0_i64;
        for task in tasks {
            if let Some(&key) = collection.index.get(&task.task_id) {
                collection.order.insert(key, task);
            } else {
                collection.index.insert(task.task_id.clone(), next_key);
                collection.order.insert(next_key, task);
                next_key += 1;
            }
        }
        collection
    }

    /// Record for `id`.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).and_then(|key| self.order.get(key))
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Zero-based position of `id`.
    #[must_use]
    pub fn position(&self, id: &TaskId) -> Option<usize> {
        let key = *self.index.get(id)?;
        Some(self.order.range(..key).count())
    }

    /// Tasks front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.values()
    }

    /// Ids front to back.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.order.values().map(|task| &task.task_id)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Cloned tasks front to back.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Task> {
        self.order.values().cloned().collect()
    }

    /// Overwrites the record for `task.task_id` in place, or inserts it at
    /// the front when unseen.
    pub fn upsert_front(&mut self, task: Task) -> TaskChange {
        if let Some(&key) = self.index.get(&task.task_id) {
            let position = self.order.range(..key).count();
            self.order.insert(key, task);
            return TaskChange::Replaced { position };
        }
        let key = self
            .order
            .first_key_value()
            .map_or(0, |(&first, _)| first - 1);
        self.index.insert(task.task_id.clone(), key);
        self.order.insert(key, task);
        TaskChange::Inserted
    }
}

impl<'a> IntoIterator for &'a TaskCollection {
    type Item = &'a Task;
    type IntoIter = std::collections::btree_map::Values<'a, i64, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.values()
    }
}
