//! # Observability
//!
//! Prometheus metrics collection for the controller, plus `tracing`
//! initialization in [`logging`] (run before anything else at startup).

pub mod logging;
pub mod metrics;
