//! Admission Options

use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provision::RecoveryProgress;
use crate::replication::ReplicationSources;

/// How the target receives the cluster's data, as requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMethod {
    /// Incremental when possible, clone otherwise
    #[default]
    Auto,
    Clone,
    Incremental,
}

impl FromStr for RecoveryMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(RecoveryMethod::Auto),
            "clone" => Ok(RecoveryMethod::Clone),
            "incremental" => Ok(RecoveryMethod::Incremental),
            other => Err(Error::InvalidOption(format!(
                "Invalid recovery method '{}', expected auto, clone or incremental",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMethod::Auto => write!(f, "auto"),
            RecoveryMethod::Clone => write!(f, "clone"),
            RecoveryMethod::Incremental => write!(f, "incremental"),
        }
    }
}

/// Concrete provisioning method after resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMethod {
    Clone,
    Incremental,
}

impl std::fmt::Display for ProvisioningMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningMethod::Clone => write!(f, "clone"),
            ProvisioningMethod::Incremental => write!(f, "incremental"),
        }
    }
}

/// What automatic recovery selection does when it cannot tell whether
/// incremental recovery is safe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousRecoveryPolicy {
    /// Refuse and ask for an explicit method
    #[default]
    Fail,
    Clone,
    Incremental,
    /// Ask the operator; fails when nobody can answer
    Prompt,
}

impl FromStr for AmbiguousRecoveryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(AmbiguousRecoveryPolicy::Fail),
            "clone" => Ok(AmbiguousRecoveryPolicy::Clone),
            "incremental" => Ok(AmbiguousRecoveryPolicy::Incremental),
            "prompt" => Ok(AmbiguousRecoveryPolicy::Prompt),
            other => Err(Error::Config(format!("Unknown ambiguous_recovery policy '{}'", other))),
        }
    }
}

/// Options of one admission
#[derive(Debug, Clone, Default)]
pub struct AdmissionOptions {
    pub sources: ReplicationSources,
    pub recovery: RecoveryMethod,
    /// Explicit clone donor, only valid with `RecoveryMethod::Clone`
    pub donor: Option<String>,
    /// Sync wait; `None` uses the configured default, zero skips the wait
    pub timeout: Option<Duration>,
    /// Validate and resolve only
    pub dry_run: bool,
    /// Label stored in the metadata, defaults to the canonical address
    pub label: Option<String>,
    /// Whether clone stages are reported while the copy runs
    pub recovery_progress: RecoveryProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_methods() {
        assert_eq!("Clone".parse::<RecoveryMethod>().unwrap(), RecoveryMethod::Clone);
        assert!("mysqldump".parse::<RecoveryMethod>().is_err());
        assert_eq!(
            "prompt".parse::<AmbiguousRecoveryPolicy>().unwrap(),
            AmbiguousRecoveryPolicy::Prompt
        );
        assert_eq!(AmbiguousRecoveryPolicy::default(), AmbiguousRecoveryPolicy::Fail);
        assert_eq!(AdmissionOptions::default().recovery_progress, RecoveryProgress::Text);
    }
}
