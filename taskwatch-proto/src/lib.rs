//! Shared protocol definitions for the taskwatch live channel and HTTP API.

pub mod frame;
pub mod task;
pub mod timestamp;
