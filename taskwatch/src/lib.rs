//! `taskwatch`: live-sync client for task-queue monitoring dashboards.

pub mod api;
pub mod config;
pub mod connection;
pub mod net;
pub mod reconcile;
pub mod sink;
pub mod transport;
