//! # ntodbg Utilities
//!
//! Logging and environment configuration shared by the ntodbg workspace.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError};
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
