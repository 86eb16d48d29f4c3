//! # Configuration
//!
//! Settings that come from the environment. Command-line flags override them.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `QNX_TARGET` | host copy of the target file system, searched for shared objects | `/opt/qnx/target/qnx` |
//! | `NTODBG_PROCFS_ROOT` | where `/proc` is mounted | `/proc` |
//! | `NTODBG_REMOTE_TIMEOUT` | seconds to wait for a pdebug reply | `10` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const QNX_TARGET_ENV: &str = "QNX_TARGET";
pub const PROCFS_ROOT_ENV: &str = "NTODBG_PROCFS_ROOT";
pub const REMOTE_TIMEOUT_ENV: &str = "NTODBG_REMOTE_TIMEOUT";

pub const DEFAULT_QNX_TARGET: &str = "/opt/qnx/target/qnx";
pub const DEFAULT_PROCFS_ROOT: &str = "/proc";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment configuration for the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config
{
    pub qnx_target: PathBuf,
    pub procfs_root: PathBuf,
    pub remote_timeout: Duration,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            qnx_target: PathBuf::from(DEFAULT_QNX_TARGET),
            procfs_root: PathBuf::from(DEFAULT_PROCFS_ROOT),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

impl Config
{
    /// Read the process environment.
    ///
    /// ## Errors
    ///
    /// [`ConfigError::InvalidTimeout`] when `NTODBG_REMOTE_TIMEOUT` is not a whole number of seconds.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    ///
    /// ## Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError>
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(root) = get(QNX_TARGET_ENV) {
            config.qnx_target = PathBuf::from(root);
        }
        if let Some(root) = get(PROCFS_ROOT_ENV) {
            config.procfs_root = PathBuf::from(root);
        }
        if let Some(secs) = get(REMOTE_TIMEOUT_ENV) {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(secs.clone()))?;
            config.remote_timeout = Duration::from_secs(secs);
        }
        tracing::debug!(?config, "loaded configuration");
        Ok(config)
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError
{
    #[error("Invalid {REMOTE_TIMEOUT_ENV} value {0:?}: expected seconds")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset()
    {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn test_values_from_environment()
    {
        let config = Config::from_lookup(lookup(&[
            (QNX_TARGET_ENV, "/home/me/qnx/target"),
            (PROCFS_ROOT_ENV, ""),
            (REMOTE_TIMEOUT_ENV, " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.qnx_target, PathBuf::from("/home/me/qnx/target"));
        assert_eq!(config.procfs_root, PathBuf::from(DEFAULT_PROCFS_ROOT));
        assert_eq!(config.remote_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_bad_timeout()
    {
        let err = Config::from_lookup(lookup(&[(REMOTE_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidTimeout("soon".into()));
    }
}
