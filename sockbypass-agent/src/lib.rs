//! Configuration and error types of the `sockbypass-agent` binary.

pub mod config;
pub mod error;

pub use config::{load_from_path, Config, LoggingConfig};
pub use error::{AgentError, Result};
