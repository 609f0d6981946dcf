//! Runtime helpers
//!
//! Bridges blocking git and filesystem work onto the tokio runtime.

pub mod async_task;

pub use async_task::{AsyncTask, TaskError};
