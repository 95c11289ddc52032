//! WolfReplica Configuration
//!
//! This module provides configuration structures for the read replica
//! admission tool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::admission::{AdmissionSettings, AmbiguousRecoveryPolicy};

/// Main WolfReplica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfReplicaConfig {
    /// Metadata store configuration
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Administrative account used on every instance
    pub credentials: CredentialsConfig,

    /// Admission workflow tunables
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database holding the cluster metadata
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

/// Administrative credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    /// Administrative user
    pub user: String,

    /// Administrative password
    pub password: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Admission workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// How long to wait for a new replica to catch up (0 = don't wait)
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    /// Poll interval while waiting, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for a cloned instance to restart
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    /// What automatic recovery does when it cannot decide (fail, clone,
    /// incremental, prompt)
    #[serde(default)]
    pub ambiguous_recovery: AmbiguousRecoveryPolicy,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_metadata_path() -> PathBuf {
    PathBuf::from("/var/lib/wolfreplica/metadata.db")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_sync_timeout() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_restart_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: default_sync_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            restart_timeout_secs: default_restart_timeout(),
            ambiguous_recovery: AmbiguousRecoveryPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfReplicaConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfReplicaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.credentials.user.is_empty() {
            return Err(crate::Error::Config("credentials.user cannot be empty".into()));
        }

        if self.metadata.path.as_os_str().is_empty() {
            return Err(crate::Error::Config("metadata.path cannot be empty".into()));
        }

        if self.admission.poll_interval_ms == 0 {
            return Err(crate::Error::Config("admission.poll_interval_ms must be positive".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'compact', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Get the connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.credentials.connect_timeout_secs)
    }

    /// Admission tunables derived from the `[admission]` section
    pub fn admission_settings(&self) -> AdmissionSettings {
        AdmissionSettings {
            default_sync_timeout: Duration::from_secs(self.admission.sync_timeout_secs),
            poll_interval: Duration::from_millis(self.admission.poll_interval_ms),
            restart_timeout: Duration::from_secs(self.admission.restart_timeout_secs),
            ambiguous_recovery: self.admission.ambiguous_recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[metadata]
path = "/tmp/wolfreplica/metadata.db"

[credentials]
user = "clusteradmin"
password = "secret"

[admission]
sync_timeout_secs = 0
ambiguous_recovery = "clone"
"#;

        let config = WolfReplicaConfig::from_str(toml).unwrap();
        assert_eq!(config.credentials.user, "clusteradmin");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));

        let settings = config.admission_settings();
        assert!(settings.default_sync_timeout.is_zero());
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.ambiguous_recovery, AmbiguousRecoveryPolicy::Clone);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_defaults_and_validation() {
        let config = WolfReplicaConfig::from_str("[credentials]\nuser = \"admin\"\npassword = \"\"\n").unwrap();
        assert_eq!(config.admission.sync_timeout_secs, 300);
        assert_eq!(config.admission.ambiguous_recovery, AmbiguousRecoveryPolicy::Fail);
        assert_eq!(config.metadata.path, PathBuf::from("/var/lib/wolfreplica/metadata.db"));

        let err = WolfReplicaConfig::from_str("[credentials]\nuser = \"\"\npassword = \"x\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let err = WolfReplicaConfig::from_str("[credentials]\nuser = \"admin\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }
}
