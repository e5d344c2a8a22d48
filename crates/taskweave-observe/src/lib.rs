//! Observability setup for Taskweave: structured `tracing` output and
//! optional OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, directive_for_verbosity, init_tracing, shutdown_tracing};
