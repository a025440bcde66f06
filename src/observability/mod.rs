//! Observability for the tracker simulator
//!
//! Structured logging only; the simulator has no metrics or health
//! endpoints.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
