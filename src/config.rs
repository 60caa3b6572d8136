use crate::logging::{LogFormat, DEFAULT_FILTER};
use std::path::PathBuf;

pub const ENV_LOG: &str = "PORTALD_LOG";
pub const ENV_LOG_FORMAT: &str = "PORTALD_LOG_FORMAT";
pub const ENV_WORKSPACE: &str = "PORTALD_WORKSPACE";

/// Process-level settings. Workspace settings live in the database (`setup.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub log_format: LogFormat,
    pub workspace: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Self {
            log_filter: non_empty(ENV_LOG).unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            log_format: non_empty(ENV_LOG_FORMAT)
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Text),
            workspace: non_empty(ENV_WORKSPACE).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let cfg = DaemonConfig::from_lookup(|_| None);
        assert_eq!(cfg.log_filter, DEFAULT_FILTER);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert!(cfg.workspace.is_none());
    }

    #[test]
    fn reads_overrides() {
        let env = HashMap::from([
            (ENV_LOG, "portald=debug"),
            (ENV_LOG_FORMAT, "json"),
            (ENV_WORKSPACE, "/tmp/school"),
        ]);
        let cfg = DaemonConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.log_filter, "portald=debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/school")));
    }
}
