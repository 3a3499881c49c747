//! HTTP middleware
//!
//! - request id propagation and HTTP metrics
//! - credential-free request spans

pub mod metrics;
pub mod trace;

pub use metrics::ObservabilityLayer;
pub use trace::SanitizedMakeSpan;
