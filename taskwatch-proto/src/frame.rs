//! Server-to-client frames and their classification.
//!
//! Every inbound WebSocket text frame is a JSON object with a `type`
//! discriminator. [`classify`] turns raw text into a [`Classified`] value
//! without ever failing: anything it cannot understand becomes
//! [`Classified::Unrecognized`] with the reason attached, so a bad frame
//! can be logged and dropped without disturbing the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Stats, Task};

/// Keep-alive probe sent by the client while connected.
pub const PING: &str = "ping";

/// Keep-alive reply sent by the server.
pub const PONG: &str = "pong";

/// Discriminator values understood by [`classify`].
pub const KNOWN_TYPES: [&str; 3] = ["initial_data", "task_update", "stats_update"];

/// Frames pushed by the server over the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Complete state sent right after the channel opens.
    InitialData {
        /// Aggregate counts.
        stats: Stats,
        /// Tasks, newest first.
        tasks: Vec<Task>,
    },
    /// One task changed; carries its full record and fresh counts.
    TaskUpdate {
        /// Aggregate counts after the change.
        stats: Stats,
        /// The task's complete latest record.
        task: Task,
    },
    /// Counts changed without a specific task to report.
    StatsUpdate {
        /// Aggregate counts.
        stats: Stats,
    },
}

/// Error type for frame encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Serialization failed.
    #[error("frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Encodes a frame as JSON text.
///
/// # Errors
///
/// Returns [`FrameError::Serialization`] if the frame cannot be serialized.
pub fn encode(frame: &ServerFrame) -> Result<String, FrameError> {
    Ok(serde_json::to_string(frame)?)
}

/// Why a frame was not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unrecognized {
    /// The text is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    NotJson(String),
    /// JSON without a string `type` field.
    #[error("frame has no type discriminator")]
    MissingType,
    /// A `type` this protocol does not define.
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
    /// Known `type` but the remaining fields do not decode.
    #[error("malformed {kind} frame: {reason}")]
    InvalidFields {
        /// The frame's `type`.
        kind: String,
        /// Decoder message.
        reason: String,
    },
}

/// Result of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Full state replacement (`initial_data`).
    Snapshot {
        /// Aggregate counts.
        stats: Stats,
        /// Tasks in server order.
        tasks: Vec<Task>,
    },
    /// One task's latest record (`task_update`).
    TaskDelta {
        /// Aggregate counts.
        stats: Stats,
        /// Full task record.
        task: Box<Task>,
    },
    /// Counts only (`stats_update`).
    StatsDelta {
        /// Aggregate counts.
        stats: Stats,
    },
    /// Anything else; to be logged and dropped.
    Unrecognized(Unrecognized),
}

impl Classified {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::TaskDelta { .. } => "task_delta",
            Self::StatsDelta { .. } => "stats_delta",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

impl From<ServerFrame> for Classified {
    fn from(frame: ServerFrame) -> Self {
        match frame {
            ServerFrame::InitialData { stats, tasks } => Self::Snapshot { stats, tasks },
            ServerFrame::TaskUpdate { stats, task } => Self::TaskDelta {
                stats,
                task: Box::new(task),
            },
            ServerFrame::StatsUpdate { stats } => Self::StatsDelta { stats },
        }
    }
}

/// Classifies one inbound text frame. Pure; never fails.
#[must_use]
pub fn classify(text: &str) -> Classified {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Classified::Unrecognized(Unrecognized::NotJson(e.to_string())),
    };

    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Classified::Unrecognized(Unrecognized::MissingType);
    };

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Classified::Unrecognized(Unrecognized::UnknownType(kind));
    }

    match serde_json::from_value::<ServerFrame>(value) {
        Ok(frame) => frame.into(),
        Err(e) => Classified::Unrecognized(Unrecognized::InvalidFields {
            kind,
            reason: e.to_string(),
        }),
    }
}
