//! Configuration Compliance
//!
//! Baseline settings an instance needs before it can replicate from the
//! cluster.

use async_trait::async_trait;

use crate::error::Result;
use crate::node::NodeSession;
use crate::topology::{Cluster, NodeIdentity};

/// Checks an instance's configuration against cluster requirements
#[async_trait]
pub trait ConfigurationChecker: Send + Sync {
    /// Returns every issue found; an empty list means compliant
    async fn check(
        &self,
        target: &dyn NodeSession,
        identity: &NodeIdentity,
        cluster: &Cluster,
    ) -> Result<Vec<String>>;
}

/// GTID settings, server identity uniqueness and absence of channels
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicComplianceChecker;

#[async_trait]
impl ConfigurationChecker for BasicComplianceChecker {
    async fn check(
        &self,
        target: &dyn NodeSession,
        identity: &NodeIdentity,
        cluster: &Cluster,
    ) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        let gtid_mode = target.sysvar("gtid_mode").await?.unwrap_or_default();
        if !gtid_mode.eq_ignore_ascii_case("ON") {
            issues.push(format!("gtid_mode must be ON (current: '{}')", gtid_mode));
        }

        if !target.sysvar_bool("enforce_gtid_consistency").await? {
            issues.push("enforce_gtid_consistency must be ON".to_string());
        }

        if identity.server_id == 0 {
            issues.push("server_id must be set to a non-zero value".to_string());
        } else if let Some(other) = cluster
            .members
            .iter()
            .find(|m| m.server_id == identity.server_id && !m.server_uuid.eq_ignore_ascii_case(&identity.server_uuid))
        {
            issues.push(format!(
                "server_id {} is already used by cluster member '{}'",
                identity.server_id, other.address
            ));
        }

        if let Some(other) = cluster.member_by_uuid(&identity.server_uuid) {
            issues.push(format!(
                "server_uuid {} is already used by cluster member '{}'",
                identity.server_uuid, other.address
            ));
        }

        let channels = target.replication_channels().await?;
        if !channels.is_empty() {
            issues.push(format!(
                "instance has existing replication channels: {}",
                channels.join(", ")
            ));
        }

        if !issues.is_empty() {
            tracing::warn!("{} is not compliant: {}", target.address(), issues.join("; "));
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeNode;
    use crate::topology::{ClusterMember, ClusterPolicy, InstanceType};

    fn cluster() -> Cluster {
        Cluster {
            id: "c1".into(),
            name: "prod".into(),
            cluster_set_id: None,
            group_name: "g".into(),
            primary: "db1:3306".into(),
            members: vec![ClusterMember {
                server_uuid: "uuid-p".into(),
                server_id: 1,
                address: "db1:3306".into(),
                instance_type: InstanceType::GroupMember,
                version: None,
                label: None,
            }],
            policy: ClusterPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_compliant_instance() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 42);
        let identity = target.identity().await.unwrap();
        let issues = BasicComplianceChecker
            .check(target.as_ref(), &identity, &cluster())
            .await
            .unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_reports_every_issue() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 1);
        target.set_sysvar_value("gtid_mode", "OFF_PERMISSIVE");
        target.set_sysvar_value("enforce_gtid_consistency", "WARN");
        target.update(|s| s.channels.push("legacy".into()));

        let identity = target.identity().await.unwrap();
        let issues = BasicComplianceChecker
            .check(target.as_ref(), &identity, &cluster())
            .await
            .unwrap();

        assert_eq!(issues.len(), 4);
        assert!(issues[0].contains("gtid_mode"));
        assert!(issues[2].contains("server_id 1"));
        assert!(issues[3].contains("legacy"));
    }
}
