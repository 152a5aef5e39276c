//! Logging bootstrap.

mod logging;

pub use logging::{init_tracing, LogConfig, LogFormat};
