//! WolfReplica Error Types

use std::time::Duration;
use thiserror::Error;

use crate::topology::{AuthType, SslMode};

/// Result type alias for WolfReplica operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a replication source from a custom list was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceInvalidReason {
    /// Could not connect to the source
    Unreachable,
    /// Source is not registered as a member of the cluster
    NotClusterMember,
    /// Source is itself a read replica
    IsReplica,
    /// Source is not ONLINE
    NotOnline,
}

impl std::fmt::Display for SourceInvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceInvalidReason::Unreachable => write!(f, "instance is unreachable"),
            SourceInvalidReason::NotClusterMember => write!(f, "instance does not belong to the cluster"),
            SourceInvalidReason::IsReplica => write!(f, "instance is a read replica of the cluster"),
            SourceInvalidReason::NotOnline => write!(f, "instance is not ONLINE"),
        }
    }
}

/// Error classification used by the admission workflow to decide between
/// failing fast, rolling back, or only warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unreachable,
    AlreadyManaged,
    ConfigurationNonCompliant,
    IncompatibleVersion,
    InvalidRecoveryOption,
    IncompatibleDonor,
    UnsupportedSecurityMode,
    UnsupportedAuthMode,
    NoEligibleSecondary,
    SourceInvalid,
    IrrecoverableState,
    ProvisioningFailed,
    MetadataWriteFailed,
    SyncTimeout,
    InvalidOption,
    Replication,
    Cancelled,
    Config,
    Internal,
}

/// WolfReplica error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    // Connectivity errors
    #[error("Unable to connect to '{address}': {reason}")]
    Unreachable { address: String, reason: String },

    // Validation errors
    #[error("Incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("Target instance '{address}' is already part of {topology}")]
    AlreadyManaged { address: String, topology: String },

    #[error("Instance '{address}' is not compliant with the cluster requirements: {}", issues.join("; "))]
    ConfigurationNonCompliant { address: String, issues: Vec<String> },

    #[error("Invalid recovery option: {0}")]
    InvalidRecoveryOption(String),

    #[error("Instance '{donor}' cannot be used as donor: {reason}")]
    IncompatibleDonor { donor: String, reason: String },

    #[error("Unsupported cluster sslMode: {0}")]
    UnsupportedSecurityMode(SslMode),

    #[error("Unsupported cluster memberAuthType: '{0}'")]
    UnsupportedAuthMode(AuthType),

    #[error("No ONLINE SECONDARY members available")]
    NoEligibleSecondary,

    #[error("Unable to use '{address}' as a source: {reason}")]
    SourceInvalid { address: String, reason: SourceInvalidReason },

    // Provisioning errors
    #[error("Instance '{address}' cannot be recovered incrementally: {reason}")]
    IrrecoverableState { address: String, reason: String },

    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    // Metadata errors
    #[error("Metadata write failed: {0}")]
    MetadataWriteFailed(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Timeout waiting for '{address}' to synchronize with the cluster after {waited:?}")]
    SyncTimeout { address: String, waited: Duration },

    // Backend errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => ErrorKind::Config,
            Error::InvalidOption(_) => ErrorKind::InvalidOption,
            Error::Unreachable { .. } => ErrorKind::Unreachable,
            Error::IncompatibleVersion(_) => ErrorKind::IncompatibleVersion,
            Error::AlreadyManaged { .. } => ErrorKind::AlreadyManaged,
            Error::ConfigurationNonCompliant { .. } => ErrorKind::ConfigurationNonCompliant,
            Error::InvalidRecoveryOption(_) => ErrorKind::InvalidRecoveryOption,
            Error::IncompatibleDonor { .. } => ErrorKind::IncompatibleDonor,
            Error::UnsupportedSecurityMode(_) => ErrorKind::UnsupportedSecurityMode,
            Error::UnsupportedAuthMode(_) => ErrorKind::UnsupportedAuthMode,
            Error::NoEligibleSecondary => ErrorKind::NoEligibleSecondary,
            Error::SourceInvalid { .. } => ErrorKind::SourceInvalid,
            Error::IrrecoverableState { .. } => ErrorKind::IrrecoverableState,
            Error::ProvisioningFailed(_) => ErrorKind::ProvisioningFailed,
            Error::MetadataWriteFailed(_) => ErrorKind::MetadataWriteFailed,
            Error::Replication(_) => ErrorKind::Replication,
            Error::SyncTimeout { .. } => ErrorKind::SyncTimeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Metadata(_)
            | Error::Database(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Corrective action to show the operator, where one is known
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Unreachable { .. } => {
                Some("Verify the address and that the instance is running and accepting connections.")
            }
            Error::IncompatibleVersion(_) => {
                Some("Upgrade the target instance and all cluster members to 8.0.23 or newer.")
            }
            Error::AlreadyManaged { .. } => {
                Some("A read replica must be created on a standalone instance; remove it from its current topology first.")
            }
            Error::ConfigurationNonCompliant { .. } => {
                Some("Fix the reported settings on the target instance and retry.")
            }
            Error::InvalidRecoveryOption(_) => {
                Some("Set the recovery method explicitly to 'clone' or 'incremental'.")
            }
            Error::IncompatibleDonor { .. } => {
                Some("Use a different donor running the same version and platform as the target.")
            }
            Error::UnsupportedSecurityMode(_) => {
                Some("Change the cluster's sslMode to REQUIRED or DISABLED.")
            }
            Error::UnsupportedAuthMode(_) => {
                Some("Change the cluster's memberAuthType to PASSWORD.")
            }
            Error::NoEligibleSecondary => {
                Some("Use the 'primary' source mode or bring a SECONDARY member ONLINE.")
            }
            Error::SourceInvalid { .. } => {
                Some("Remove or fix the offending entry in the replication source list.")
            }
            Error::IrrecoverableState { .. } => Some("Use the 'clone' recovery method."),
            Error::SyncTimeout { .. } => {
                Some("Increase or disable the sync timeout; the read replica keeps catching up in the background.")
            }
            _ => None,
        }
    }

    /// Check if retrying the whole operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Unreachable { .. } | Error::SyncTimeout { .. } | Error::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_hint() {
        let err = Error::SourceInvalid {
            address: "10.0.0.5:3306".into(),
            reason: SourceInvalidReason::NotOnline,
        };
        assert_eq!(err.kind(), ErrorKind::SourceInvalid);
        assert!(err.hint().is_some());
        assert_eq!(
            err.to_string(),
            "Unable to use '10.0.0.5:3306' as a source: instance is not ONLINE"
        );

        let err = Error::Metadata("disk full".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.hint().is_none());
    }

    #[test]
    fn test_non_compliant_lists_every_issue() {
        let err = Error::ConfigurationNonCompliant {
            address: "db1:3306".into(),
            issues: vec!["gtid_mode must be ON".into(), "server_id must not be 0".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("gtid_mode must be ON; server_id must not be 0"));
    }
}
