//! Business logic layer

pub mod task;

pub use task::TaskService;
