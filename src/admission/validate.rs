//! Validation Pipeline
//!
//! Fail-fast checks run before anything is changed. Every check except
//! the source-list policy only talks to the target.

use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::node::{NodeConnector, NodeSession};
use crate::report::Reporter;
use crate::topology::{AuthType, Cluster, MemberState, NodeIdentity, SslMode, Version};

use super::compliance::ConfigurationChecker;
use super::options::{AdmissionOptions, RecoveryMethod};
use crate::replication::ReplicationSources;

/// Oldest server version that can run as a read replica
pub const MIN_READ_REPLICA_VERSION: Version = Version::new(8, 0, 23);

/// Oldest server version supporting clone provisioning
pub const MIN_CLONE_VERSION: Version = Version::new(8, 0, 17);

/// Runs the validation checks in order
pub struct Validator<'a> {
    pub store: &'a dyn MetadataStore,
    pub checker: &'a dyn ConfigurationChecker,
    pub connector: &'a dyn NodeConnector,
    pub reporter: &'a dyn Reporter,
}

impl<'a> Validator<'a> {
    /// Validate the admission of `target`. Returns true when the target
    /// is rejoining after a forced removal from this cluster (or its
    /// cluster set).
    pub async fn run(
        &self,
        target: &dyn NodeSession,
        identity: &NodeIdentity,
        cluster: &Cluster,
        options: &AdmissionOptions,
    ) -> Result<bool> {
        check_version(identity, cluster)?;
        let rejoin = self.check_standalone(target, identity, cluster).await?;
        self.check_compliance(target, identity, cluster).await?;
        check_recovery_options(identity, cluster, options)?;
        check_security(cluster, self.reporter)?;
        check_auth(cluster)?;
        self.check_source_policy(cluster, options).await?;
        Ok(rejoin)
    }

    async fn check_standalone(
        &self,
        target: &dyn NodeSession,
        identity: &NodeIdentity,
        cluster: &Cluster,
    ) -> Result<bool> {
        let cluster_set = match &cluster.cluster_set_id {
            Some(id) => self.store.cluster_set_members(id).await?,
            None => Vec::new(),
        };
        let in_cluster_set = |cluster_id: &str| cluster_set.iter().any(|c| c.cluster_id == cluster_id);

        if let Some(record) = self.store.member_by_uuid(&identity.server_uuid).await? {
            let topology = if record.cluster_id == cluster.id {
                format!("cluster '{}'", cluster.name)
            } else if in_cluster_set(&record.cluster_id) {
                "another cluster of the same cluster set".to_string()
            } else {
                "another managed topology".to_string()
            };
            return Err(Error::AlreadyManaged {
                address: target.address().to_string(),
                topology,
            });
        }

        let Some(local) = target.local_metadata().await? else {
            return Ok(false);
        };

        if local.cluster_id == cluster.id || in_cluster_set(&local.cluster_id) {
            self.reporter.info(&format!(
                "Instance '{}' still carries metadata of {} '{}' from a previous removal; it will be re-admitted",
                target.address(),
                local.topology,
                local.cluster_name
            ));
            return Ok(true);
        }

        Err(Error::AlreadyManaged {
            address: target.address().to_string(),
            topology: format!("{} '{}'", local.topology, local.cluster_name),
        })
    }

    async fn check_compliance(
        &self,
        target: &dyn NodeSession,
        identity: &NodeIdentity,
        cluster: &Cluster,
    ) -> Result<()> {
        let issues = self.checker.check(target, identity, cluster).await?;
        if issues.is_empty() {
            return Ok(());
        }
        Err(Error::ConfigurationNonCompliant {
            address: target.address().to_string(),
            issues,
        })
    }

    async fn check_source_policy(&self, cluster: &Cluster, options: &AdmissionOptions) -> Result<()> {
        if options.sources != ReplicationSources::Secondary {
            return Ok(());
        }

        for member in cluster.secondaries() {
            let session = match self.connector.connect(&member.address).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::debug!("Skipping secondary {}: {}", member.address, e);
                    continue;
                }
            };
            if session.member_state().await? == MemberState::Online {
                return Ok(());
            }
        }

        Err(Error::NoEligibleSecondary)
    }
}

fn check_version(identity: &NodeIdentity, cluster: &Cluster) -> Result<()> {
    if identity.version < MIN_READ_REPLICA_VERSION {
        return Err(Error::IncompatibleVersion(format!(
            "target runs {}, read replicas require {} or newer",
            identity.version, MIN_READ_REPLICA_VERSION
        )));
    }

    if let Some(lowest) = cluster.lowest_version() {
        if lowest < MIN_READ_REPLICA_VERSION {
            return Err(Error::IncompatibleVersion(format!(
                "cluster '{}' has members running {}, read replicas require {} or newer",
                cluster.name, lowest, MIN_READ_REPLICA_VERSION
            )));
        }
    }
    Ok(())
}

fn check_recovery_options(
    identity: &NodeIdentity,
    cluster: &Cluster,
    options: &AdmissionOptions,
) -> Result<()> {
    if options.donor.is_some() && options.recovery != RecoveryMethod::Clone {
        return Err(Error::InvalidRecoveryOption(
            "a donor can only be given with the 'clone' recovery method".into(),
        ));
    }

    if options.recovery == RecoveryMethod::Clone {
        if identity.version < MIN_CLONE_VERSION {
            return Err(Error::InvalidRecoveryOption(format!(
                "clone requires {} or newer, target runs {}",
                MIN_CLONE_VERSION, identity.version
            )));
        }
        if cluster.policy.disable_clone {
            return Err(Error::InvalidRecoveryOption(format!(
                "clone is disabled for cluster '{}'",
                cluster.name
            )));
        }
    }
    Ok(())
}

fn check_security(cluster: &Cluster, reporter: &dyn Reporter) -> Result<()> {
    match cluster.policy.ssl_mode {
        SslMode::Disabled => {
            reporter.info("Cluster sslMode is DISABLED; the replication channel will not be encrypted");
            Ok(())
        }
        SslMode::Required => {
            tracing::info!("Replication channel will use TLS (sslMode REQUIRED)");
            Ok(())
        }
        mode => Err(Error::UnsupportedSecurityMode(mode)),
    }
}

fn check_auth(cluster: &Cluster) -> Result<()> {
    match cluster.policy.auth_type {
        AuthType::Password => Ok(()),
        other => Err(Error::UnsupportedAuthMode(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ClusterPolicy;

    fn cluster(policy: ClusterPolicy) -> Cluster {
        Cluster {
            id: "c1".into(),
            name: "prod".into(),
            cluster_set_id: None,
            group_name: "g".into(),
            primary: "db1:3306".into(),
            members: Vec::new(),
            policy,
        }
    }

    fn identity(version: Version) -> NodeIdentity {
        NodeIdentity {
            server_uuid: "uuid-t".into(),
            server_id: 42,
            version,
            canonical_address: "rr1:3306".into(),
            platform: "Linux-x86_64".into(),
        }
    }

    #[test]
    fn test_version_gate() {
        let c = cluster(ClusterPolicy::default());
        assert!(check_version(&identity(Version::new(8, 0, 23)), &c).is_ok());
        let err = check_version(&identity(Version::new(8, 0, 22)), &c).unwrap_err();
        assert!(matches!(err, Error::IncompatibleVersion(_)));
    }

    #[test]
    fn test_recovery_option_coherence() {
        let c = cluster(ClusterPolicy::default());
        let id = identity(Version::new(8, 0, 36));

        let options = AdmissionOptions {
            donor: Some("db2:3306".into()),
            ..Default::default()
        };
        assert!(matches!(
            check_recovery_options(&id, &c, &options),
            Err(Error::InvalidRecoveryOption(_))
        ));

        let options = AdmissionOptions {
            recovery: RecoveryMethod::Clone,
            donor: Some("db2:3306".into()),
            ..Default::default()
        };
        assert!(check_recovery_options(&id, &c, &options).is_ok());

        let no_clone = cluster(ClusterPolicy {
            disable_clone: true,
            ..Default::default()
        });
        assert!(check_recovery_options(&id, &no_clone, &options).is_err());
    }

    #[test]
    fn test_security_and_auth() {
        let reporter = crate::report::TracingReporter;
        let strict = cluster(ClusterPolicy {
            ssl_mode: SslMode::VerifyIdentity,
            ..Default::default()
        });
        assert!(matches!(
            check_security(&strict, &reporter),
            Err(Error::UnsupportedSecurityMode(SslMode::VerifyIdentity))
        ));

        let cert = cluster(ClusterPolicy {
            auth_type: AuthType::CertSubject,
            ..Default::default()
        });
        assert!(matches!(check_auth(&cert), Err(Error::UnsupportedAuthMode(_))));
        assert!(check_auth(&cluster(ClusterPolicy::default())).is_ok());
    }
}
