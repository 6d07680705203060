//! Task simulation: moves stored tasks through their lifecycle and
//! broadcasts each step, so a client sees realistic live traffic.
//!
//! Per tick, every processing task gains progress (or fails with
//! `failure_rate` probability), every retrying task goes back to
//! processing, and the oldest pending task starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use taskwatch_proto::task::{Task, TaskStatus};

use crate::server::StubState;

/// Progress gained per step.
const PROGRESS_STEP: u8 = 10;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Time between steps.
    pub tick: Duration,
    /// Chance that a processing task fails at a step.
    pub failure_rate: f64,
    /// Retries before a failing task stays failed.
    pub max_retries: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            failure_rate: 0.05,
            max_retries: 3,
        }
    }
}

/// Runs the simulation until the task is aborted.
pub async fn run(state: Arc<StubState>, config: SimulationConfig) {
    tracing::info!(tick = ?config.tick, failure_rate = config.failure_rate, "simulation started");
    let mut interval = tokio::time::interval(config.tick);
    loop {
        interval.tick().await;
        step(&state, &config, &mut rand::rng());
        state.broadcast_stats();
    }
}

/// Advances every task by one step.
pub fn step(state: &StubState, config: &SimulationConfig, rng: &mut impl Rng) {
    let tasks = state.tasks(usize::MAX);

    for task in tasks.iter().filter(|t| t.status == TaskStatus::Processing) {
        let fails = config.failure_rate > 0.0 && rng.random_bool(config.failure_rate);
        state.update_task(&task.task_id, |t| {
            if fails {
                fail(t, config.max_retries);
            } else {
                advance(t);
            }
        });
    }

    for task in tasks.iter().filter(|t| t.status == TaskStatus::Retrying) {
        state.update_task(&task.task_id, start);
    }

    // Newest first in the store, so the oldest pending task is last.
    if let Some(task) = tasks.iter().rev().find(|t| t.status == TaskStatus::Pending) {
        state.update_task(&task.task_id, start);
    }
}

fn start(task: &mut Task) {
    task.status = TaskStatus::Processing;
    task.progress = 0;
    task.started_at = Some(Utc::now());
}

fn advance(task: &mut Task) {
    task.progress = task.progress.saturating_add(PROGRESS_STEP).min(100);
    if task.progress == 100 {
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
    }
}

fn fail(task: &mut Task, max_retries: u32) {
    task.error = Some(format!("{} step failed", task.task_type.label()));
    if task.retry_count < max_retries {
        task.retry_count += 1;
        task.status = TaskStatus::Retrying;
        tracing::debug!(task_id = %task.task_id, retry = task.retry_count, "task will retry");
    } else {
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        tracing::debug!(task_id = %task.task_id, "task failed");
    }
}
