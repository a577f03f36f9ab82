/// Collector configuration, read from the environment once at startup.
///
/// | Variable               | Default                   |
/// |------------------------|---------------------------|
/// | `CHECK_QSTAR_INTERVAL` | 300 (seconds)             |
/// | `CHECK_LOG_INTERVAL`   | 300 (seconds)             |
/// | `LOG_DATE_FMT`         | `%m/%d/%Y %H:%M:%S%.6f`   |
/// | `LOG_FILE_PATH`        | `/opt/QStar/log/syslog`   |
/// | `LOG_BUF_SIZE`         | 8192                      |
///
/// Empty variables count as unset.
use crate::log_tail::{self, LogConfig};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Resolved, validated configuration. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub qstar_interval: Duration,
    pub log_interval: Duration,
    pub log: LogConfig,
}

/// Invalid configuration; the collector refuses to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to something unusable.
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    /// The log date layout does not round-trip a reference timestamp.
    Layout { layout: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {var}={value:?}: {reason}")
            }
            ConfigError::Layout { layout, reason } => {
                write!(f, "invalid log date layout {layout:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl AgentConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        let qstar_interval = positive(&get, "CHECK_QSTAR_INTERVAL", DEFAULT_INTERVAL_SECS)?;
        let log_interval = positive(&get, "CHECK_LOG_INTERVAL", DEFAULT_INTERVAL_SECS)?;
        let window = positive(&get, "LOG_BUF_SIZE", log_tail::DEFAULT_WINDOW)?;
        let layout = get("LOG_DATE_FMT").unwrap_or_else(|| log_tail::DEFAULT_LAYOUT.to_string());
        let path = get("LOG_FILE_PATH").unwrap_or_else(|| log_tail::DEFAULT_PATH.to_string());

        Ok(Self {
            qstar_interval: Duration::from_secs(qstar_interval),
            log_interval: Duration::from_secs(log_interval),
            log: LogConfig::new(layout, path, window)?,
        })
    }
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value) = get(var) else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be a positive integer".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.qstar_interval, Duration::from_secs(300));
        assert_eq!(cfg.log_interval, Duration::from_secs(300));
        assert_eq!(cfg.log, LogConfig::default());
        assert_eq!(cfg.log.path(), Path::new("/opt/QStar/log/syslog"));
        assert_eq!(cfg.log.window(), 8192);
        assert_eq!(cfg.log.prefix_len(), 26);
    }

    #[test]
    fn empty_values_count_as_unset() {
        let cfg = load(&[("LOG_BUF_SIZE", ""), ("LOG_DATE_FMT", "")]).unwrap();
        assert_eq!(cfg.log.window(), 8192);
        assert_eq!(cfg.log.layout(), log_tail::DEFAULT_LAYOUT);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("CHECK_QSTAR_INTERVAL", "60"),
            ("CHECK_LOG_INTERVAL", "30"),
            ("LOG_FILE_PATH", "/var/log/qstar.log"),
            ("LOG_BUF_SIZE", "4096"),
            ("LOG_DATE_FMT", "%Y-%m-%d %H:%M:%S"),
        ])
        .unwrap();
        assert_eq!(cfg.qstar_interval, Duration::from_secs(60));
        assert_eq!(cfg.log_interval, Duration::from_secs(30));
        assert_eq!(cfg.log.path(), Path::new("/var/log/qstar.log"));
        assert_eq!(cfg.log.window(), 4096);
        assert_eq!(cfg.log.prefix_len(), 19);
    }

    #[test]
    fn buf_size_must_be_positive_integer() {
        for bad in ["0", "-5", "lots"] {
            let err = load(&[("LOG_BUF_SIZE", bad)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: "LOG_BUF_SIZE", .. }),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn bad_layout_is_rejected() {
        let err = load(&[("LOG_DATE_FMT", "%H:%M")]).unwrap_err();
        assert!(matches!(err, ConfigError::Layout { .. }));
        assert!(err.to_string().contains("%H:%M"));
    }

    #[test]
    fn bad_interval_is_rejected() {
        let err = load(&[("CHECK_QSTAR_INTERVAL", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "CHECK_QSTAR_INTERVAL",
                value: "soon".to_string(),
                reason: "must be a positive integer".to_string(),
            }
        );
    }
}
