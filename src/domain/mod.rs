//! Domain models

pub mod monitor;
pub mod task;
pub mod webhook;

pub use monitor::*;
pub use task::*;
pub use webhook::*;
