//! Observability support: structured logging configuration

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
