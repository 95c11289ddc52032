//! Cluster Model
//!
//! The replicated cluster a read replica joins, its members and the
//! replication policy read replicas have to follow.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::node::{InstanceType, Version};
use crate::error::{Error, Result};

/// Encryption mode of the cluster's replication traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SslMode {
    Disabled,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disabled => "DISABLED",
            SslMode::Required => "REQUIRED",
            SslMode::VerifyCa => "VERIFY_CA",
            SslMode::VerifyIdentity => "VERIFY_IDENTITY",
        }
    }

    /// Whether the replication channel must be encrypted
    pub fn uses_tls(&self) -> bool {
        !matches!(self, SslMode::Disabled)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISABLED" | "NONE" => Ok(SslMode::Disabled),
            "REQUIRED" => Ok(SslMode::Required),
            "VERIFY_CA" => Ok(SslMode::VerifyCa),
            "VERIFY_IDENTITY" => Ok(SslMode::VerifyIdentity),
            other => Err(Error::Metadata(format!("Unknown sslMode '{}'", other))),
        }
    }
}

/// Authentication used between cluster members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    Password,
    CertIssuer,
    CertSubject,
    CertIssuerPassword,
    CertSubjectPassword,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Password => "PASSWORD",
            AuthType::CertIssuer => "CERT_ISSUER",
            AuthType::CertSubject => "CERT_SUBJECT",
            AuthType::CertIssuerPassword => "CERT_ISSUER_PASSWORD",
            AuthType::CertSubjectPassword => "CERT_SUBJECT_PASSWORD",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASSWORD" => Ok(AuthType::Password),
            "CERT_ISSUER" => Ok(AuthType::CertIssuer),
            "CERT_SUBJECT" => Ok(AuthType::CertSubject),
            "CERT_ISSUER_PASSWORD" => Ok(AuthType::CertIssuerPassword),
            "CERT_SUBJECT_PASSWORD" => Ok(AuthType::CertSubjectPassword),
            other => Err(Error::Metadata(format!("Unknown memberAuthType '{}'", other))),
        }
    }
}

/// Replication policy of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    pub ssl_mode: SslMode,
    pub auth_type: AuthType,
    /// The cluster's GTID set contains every transaction ever applied
    pub gtid_set_is_complete: bool,
    /// Clone-based provisioning is disabled for this cluster
    pub disable_clone: bool,
}

impl Default for ClusterPolicy {
    fn default() -> Self {
        Self {
            ssl_mode: SslMode::Required,
            auth_type: AuthType::Password,
            gtid_set_is_complete: false,
            disable_clone: false,
        }
    }
}

/// A member as recorded in the metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub server_uuid: String,
    pub server_id: u32,
    pub address: String,
    pub instance_type: InstanceType,
    /// Version recorded when the member was added
    pub version: Option<Version>,
    pub label: Option<String>,
}

/// A managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    /// Cluster set (federation) this cluster belongs to, if any
    pub cluster_set_id: Option<String>,
    /// Group replication group name
    pub group_name: String,
    /// Address of the current primary
    pub primary: String,
    pub members: Vec<ClusterMember>,
    pub policy: ClusterPolicy,
}

impl Cluster {
    /// Check if this cluster is part of a cluster set
    pub fn is_cluster_set_member(&self) -> bool {
        self.cluster_set_id.is_some()
    }

    pub fn member_by_uuid(&self, uuid: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.server_uuid.eq_ignore_ascii_case(uuid))
    }

    pub fn member_by_address(&self, address: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.address == address)
    }

    /// Group replication members (primary and secondaries)
    pub fn group_members(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members
            .iter()
            .filter(|m| m.instance_type == InstanceType::GroupMember)
    }

    /// Group replication members other than the primary
    pub fn secondaries(&self) -> impl Iterator<Item = &ClusterMember> {
        self.group_members().filter(move |m| m.address != self.primary)
    }

    /// Lowest version recorded among the group members
    pub fn lowest_version(&self) -> Option<Version> {
        self.group_members().filter_map(|m| m.version).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(uuid: &str, address: &str, kind: InstanceType, version: Version) -> ClusterMember {
        ClusterMember {
            server_uuid: uuid.to_string(),
            server_id: 1,
            address: address.to_string(),
            instance_type: kind,
            version: Some(version),
            label: None,
        }
    }

    #[test]
    fn test_cluster_queries() {
        let cluster = Cluster {
            id: "c1".into(),
            name: "prod".into(),
            cluster_set_id: None,
            group_name: "g".into(),
            primary: "db1:3306".into(),
            members: vec![
                member("u1", "db1:3306", InstanceType::GroupMember, Version::new(8, 0, 36)),
                member("u2", "db2:3306", InstanceType::GroupMember, Version::new(8, 0, 30)),
                member("u3", "rr1:3306", InstanceType::ReadReplica, Version::new(8, 0, 20)),
            ],
            policy: ClusterPolicy::default(),
        };

        assert_eq!(cluster.lowest_version(), Some(Version::new(8, 0, 30)));
        let secondaries: Vec<_> = cluster.secondaries().map(|m| m.address.as_str()).collect();
        assert_eq!(secondaries, vec!["db2:3306"]);
        assert!(cluster.member_by_uuid("U2").is_some());
        assert!(!cluster.is_cluster_set_member());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("verify_ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!("NONE".parse::<SslMode>().unwrap(), SslMode::Disabled);
        assert_eq!(AuthType::CertIssuerPassword.to_string(), "CERT_ISSUER_PASSWORD");
        assert!("KERBEROS".parse::<AuthType>().is_err());
    }
}
