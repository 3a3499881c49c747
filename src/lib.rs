//! Coding Agents Core - task lifecycle and live observation backend
//!
//! Tracks agent tasks in Redis, streams their progress over SSE and
//! WebSocket, and watches GitHub repositories for new issues.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod github;
pub mod middleware;
pub mod monitor;
pub mod openapi;
pub mod repository;
pub mod runner;
pub mod server;
pub mod service;
pub mod state;
pub mod store;
pub mod streaming;
pub mod telemetry;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
