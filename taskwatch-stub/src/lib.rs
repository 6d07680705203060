//! In-memory task-queue server speaking the taskwatch protocol.
//!
//! Serves the live WebSocket channel and the task HTTP API from an
//! in-memory store. Used by integration tests and for local runs.

pub mod config;
pub mod server;
pub mod worker;
