//! `taskwatch`: follow a task-queue server from the terminal.
//!
//! Connects to the server's live channel and prints connection changes,
//! stats and task updates as they arrive. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskwatch/config.toml`).
//!
//! ```bash
//! # Follow the live stream (default subcommand)
//! cargo run --bin taskwatch -- --server-url http://127.0.0.1:8000
//!
//! # Create a task
//! cargo run --bin taskwatch -- create --name "weekly report" \
//!     --task-type report_generation --priority 7 --payload '{"week": 12}'
//!
//! # One-shot listing
//! TASKWATCH_SERVER_URL=http://127.0.0.1:8000 cargo run --bin taskwatch -- list
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing_appender::non_blocking::WorkerGuard;

use taskwatch::api::{self, ApiError, HttpApi};
use taskwatch::config::{CliArgs, ClientConfig, Command};
use taskwatch::net::{self, SyncCommand, SyncConfig};
use taskwatch::reconcile::TaskChange;
use taskwatch::sink::{NoticeLevel, SyncEvent};
use taskwatch_proto::task::{NewTask, Stats, Task, TaskId, TaskType};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    // A broken config file is fatal; falling back would drop the CLI settings.
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout is for dashboard output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let sync_config = match config.to_sync_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(server = %sync_config.server_url, ws = %sync_config.ws_url, "taskwatch starting");

    let result = match cli.command.clone().unwrap_or(Command::Watch) {
        Command::Watch => watch(sync_config).await,
        Command::Create {
            name,
            task_type,
            priority,
            payload,
        } => create(&sync_config, name, task_type, priority, &payload).await,
        Command::Get { task_id } => get(&sync_config, TaskId::new(task_id)).await,
        Command::List => list(&sync_config).await,
    };

    tracing::info!("taskwatch exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskwatch.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn http_api(config: &SyncConfig) -> Result<HttpApi, String> {
    HttpApi::new(config.server_url.clone(), config.request_timeout).map_err(|e| format!("Error: {e}"))
}

/// Follow the live stream until `quit`, end of input, or Ctrl-C.
async fn watch(config: SyncConfig) -> Result<(), String> {
    let (commands, mut events) = net::spawn_sync(config).map_err(|e| format!("Error: {e}"))?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!("Commands: refresh | create <task_type> <name> | quit");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_input(line.trim(), &commands).await {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = commands.send(SyncCommand::Shutdown).await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_input(line: &str, commands: &mpsc::Sender<SyncCommand>) -> bool {
    let mut words = line.splitn(3, ' ');
    match words.next().unwrap_or_default() {
        "" => {}
        "quit" | "exit" => return false,
        "refresh" => {
            let _ = commands.send(SyncCommand::Refresh).await;
        }
        "create" => {
            let (Some(kind), Some(name)) = (words.next(), words.next()) else {
                println!("usage: create <task_type> <name>");
                return true;
            };
            let task_type = match kind.parse::<TaskType>() {
                Ok(t) => t,
                Err(e) => {
                    println!("{e}");
                    return true;
                }
            };
            let (reply, result) = oneshot::channel();
            let task = NewTask::new(name, task_type);
            if commands
                .send(SyncCommand::CreateTask { task, reply })
                .await
                .is_ok()
            {
                // Reply is printed when it arrives; the stream keeps flowing.
                tokio::spawn(async move {
                    match result.await {
                        Ok(Ok(task)) => println!("Task created: {}", task.task_id),
                        Ok(Err(e)) => println!("Failed to create task: {e}"),
                        Err(_) => {}
                    }
                });
            }
        }
        other => println!("unknown command: {other}"),
    }
    true
}

async fn create(
    config: &SyncConfig,
    name: String,
    task_type: TaskType,
    priority: i32,
    payload: &str,
) -> Result<(), String> {
    let api = http_api(config)?;
    let task = NewTask::new(name, task_type)
        .with_priority(priority)
        .with_payload_json(payload)
        .map_err(|e| format!("Failed to create task: {}", ApiError::from(e)))?;
    let created = api::DashboardApi::create_task(&api, &task)
        .await
        .map_err(|e| format!("Failed to create task: {e}"))?;
    println!("Task created: {}", created.task_id);
    println!("{}", task_line(&created));
    Ok(())
}

async fn get(config: &SyncConfig, id: TaskId) -> Result<(), String> {
    let api = http_api(config)?;
    let task = api
        .fetch_task(&id)
        .await
        .map_err(|e| format!("Failed to fetch task {id}: {e}"))?;
    println!("{}", task_line(&task));
    if !task.payload.is_empty() {
        println!("  payload: {}", serde_json::Value::Object(task.payload.clone()));
    }
    if let Some(error) = &task.error {
        println!("  error: {error}");
    }
    Ok(())
}

async fn list(config: &SyncConfig) -> Result<(), String> {
    let api = http_api(config)?;
    let snapshot = api::fetch_snapshot(&api, config.session.task_limit)
        .await
        .map_err(|e| format!("Failed to load tasks: {e}"))?;
    println!("{}", stats_line(&snapshot.stats));
    for task in &snapshot.tasks {
        println!("{}", task_line(task));
    }
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::ConnectionStatus { connected: true } => println!("[connected]"),
        SyncEvent::ConnectionStatus { connected: false } => println!("[disconnected]"),
        SyncEvent::Reconnecting { attempt } => println!("[reconnecting, attempt {attempt}]"),
        SyncEvent::SnapshotApplied { stats, tasks } => {
            println!("{}", stats_line(stats));
            for task in tasks {
                println!("{}", task_line(task));
            }
        }
        SyncEvent::TaskChanged {
            stats,
            task,
            change,
        } => {
            let marker = match change {
                TaskChange::Inserted => '+',
                TaskChange::Replaced { .. } => '~',
            };
            println!("{marker} {}", task_line(task));
            println!("{}", stats_line(stats));
        }
        SyncEvent::StatsChanged { stats } => println!("{}", stats_line(stats)),
        SyncEvent::BringIntoView { .. } => {}
        SyncEvent::Notice { level, message } => match level {
            NoticeLevel::Success => println!("ok: {message}"),
            NoticeLevel::Error => println!("error: {message}"),
        },
    }
}

fn stats_line(stats: &Stats) -> String {
    format!(
        "total {} | pending {} | processing {} | completed {} | failed {} | retrying {}",
        stats.total, stats.pending, stats.processing, stats.completed, stats.failed, stats.retrying
    )
}

fn task_line(task: &Task) -> String {
    let progress = task
        .visible_progress()
        .map_or_else(String::new, |p| format!(" {p:>3}%"));
    let retries = if task.retry_count > 0 {
        format!(" (retry {})", task.retry_count)
    } else {
        String::new()
    };
    format!(
        "{}  {:<10} {:<18} p{:<2} {}  {}{progress}{retries}",
        task.created_at.format("%Y-%m-%d %H:%M:%S"),
        task.status,
        task.task_type.label(),
        task.priority,
        task.task_id,
        task.name,
    )
}
