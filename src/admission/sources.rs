//! Source Resolver
//!
//! Turns the requested replication sources into the canonical source
//! list the replica is configured with, and picks the donor.

use crate::error::{Error, Result, SourceInvalidReason};
use crate::metadata::MetadataStore;
use crate::node::NodeConnector;
use crate::replication::{ReplicationSources, SourceEntry, SourceList};
use crate::report::Reporter;
use crate::topology::{Cluster, InstanceType, MemberState, NodeIdentity, Version};

/// From this version on, clone works between patch releases of a series
pub const MIN_CROSS_VERSION_CLONE: Version = Version::new(8, 0, 37);

/// Donor chosen for the admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donor {
    pub address: String,
    pub identity: NodeIdentity,
}

/// Resolved source list and donor
#[derive(Debug, Clone)]
pub struct ResolvedSources {
    pub donor: Donor,
    pub sources: SourceList,
}

pub struct SourceResolver<'a> {
    pub connector: &'a dyn NodeConnector,
    pub store: &'a dyn MetadataStore,
    pub reporter: &'a dyn Reporter,
}

impl<'a> SourceResolver<'a> {
    pub async fn resolve(&self, cluster: &Cluster, requested: &ReplicationSources) -> Result<ResolvedSources> {
        match requested {
            ReplicationSources::Primary => Ok(ResolvedSources {
                donor: self.primary_donor(cluster).await?,
                sources: SourceList::Primary {
                    group_name: cluster.group_name.clone(),
                    primary: cluster.primary.clone(),
                },
            }),
            ReplicationSources::Secondary => Ok(ResolvedSources {
                donor: self.primary_donor(cluster).await?,
                sources: SourceList::Secondary {
                    group_name: cluster.group_name.clone(),
                    primary: cluster.primary.clone(),
                },
            }),
            ReplicationSources::Custom(entries) => self.resolve_custom(cluster, entries).await,
        }
    }

    async fn primary_donor(&self, cluster: &Cluster) -> Result<Donor> {
        let session = self.connector.connect(&cluster.primary).await?;
        Ok(Donor {
            address: cluster.primary.clone(),
            identity: session.identity().await?,
        })
    }

    async fn resolve_custom(&self, cluster: &Cluster, entries: &[SourceEntry]) -> Result<ResolvedSources> {
        let mut resolved = Vec::with_capacity(entries.len());
        let mut donor = None;

        for entry in entries {
            let identity = self.validate_source(cluster, &entry.address).await?;
            let canonical = identity.canonical_address.clone();

            if canonical != entry.address {
                tracing::info!("Source '{}' resolved to canonical address '{}'", entry.address, canonical);
            }
            if donor.is_none() {
                donor = Some(Donor {
                    address: canonical.clone(),
                    identity,
                });
            }
            resolved.push(SourceEntry::new(canonical, entry.weight));
        }

        let donor = donor.ok_or_else(|| Error::InvalidOption("Replication source list must not be empty".into()))?;
        Ok(ResolvedSources {
            donor,
            sources: SourceList::Custom(resolved),
        })
    }

    async fn validate_source(&self, cluster: &Cluster, address: &str) -> Result<NodeIdentity> {
        let invalid = |reason: SourceInvalidReason| {
            self.reporter.error(&format!("Unable to use '{}' as a source: {}", address, reason));
            Error::SourceInvalid {
                address: address.to_string(),
                reason,
            }
        };

        let session = match self.connector.connect(address).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Source {} unreachable: {}", address, e);
                return Err(invalid(SourceInvalidReason::Unreachable));
            }
        };
        let identity = session.identity().await?;

        let record = self.store.member_by_address(&identity.canonical_address).await?;
        let member = match record {
            Some(r) if r.cluster_id == cluster.id => r.member,
            _ => return Err(invalid(SourceInvalidReason::NotClusterMember)),
        };
        if member.instance_type == InstanceType::ReadReplica {
            return Err(invalid(SourceInvalidReason::IsReplica));
        }
        if session.member_state().await? != MemberState::Online {
            return Err(invalid(SourceInvalidReason::NotOnline));
        }

        Ok(identity)
    }

    /// Replace the resolved donor with an explicitly requested one
    pub async fn donor_override(&self, cluster: &Cluster, address: &str) -> Result<Donor> {
        let session = self.connector.connect(address).await?;
        let identity = session.identity().await?;
        let incompatible = |reason: &str| Error::IncompatibleDonor {
            donor: address.to_string(),
            reason: reason.to_string(),
        };

        match self.store.member_by_address(&identity.canonical_address).await? {
            Some(r) if r.cluster_id == cluster.id => {
                if r.member.instance_type == InstanceType::ReadReplica {
                    return Err(incompatible("instance is a read replica"));
                }
            }
            _ => return Err(incompatible("instance does not belong to the cluster")),
        }

        if session.member_state().await? != MemberState::Online {
            return Err(incompatible("instance is not ONLINE"));
        }

        Ok(Donor {
            address: identity.canonical_address.clone(),
            identity,
        })
    }
}

/// Check that `donor` can clone onto `target`
pub fn ensure_compatible_donor(donor: &Donor, target: &NodeIdentity) -> Result<()> {
    let incompatible = |reason: String| Error::IncompatibleDonor {
        donor: donor.address.clone(),
        reason,
    };
    let d = &donor.identity;

    if d.server_uuid.eq_ignore_ascii_case(&target.server_uuid) {
        return Err(incompatible("donor and target are the same instance".into()));
    }

    if d.platform != target.platform {
        return Err(incompatible(format!(
            "donor runs on {} but the target runs on {}",
            d.platform, target.platform
        )));
    }

    let cross_version_ok = d.version >= MIN_CROSS_VERSION_CLONE
        && target.version >= MIN_CROSS_VERSION_CLONE
        && d.version.same_series(&target.version);
    if d.version != target.version && !cross_version_ok {
        return Err(incompatible(format!(
            "donor version {} does not match target version {}",
            d.version, target.version
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor(uuid: &str, version: Version, platform: &str) -> Donor {
        Donor {
            address: "db1:3306".into(),
            identity: NodeIdentity {
                server_uuid: uuid.into(),
                server_id: 1,
                version,
                canonical_address: "db1:3306".into(),
                platform: platform.into(),
            },
        }
    }

    fn target(version: Version) -> NodeIdentity {
        NodeIdentity {
            server_uuid: "uuid-t".into(),
            server_id: 42,
            version,
            canonical_address: "rr1:3306".into(),
            platform: "Linux-x86_64".into(),
        }
    }

    #[test]
    fn test_donor_compatibility() {
        let v36 = Version::new(8, 0, 36);
        assert!(ensure_compatible_donor(&donor("uuid-p", v36, "Linux-x86_64"), &target(v36)).is_ok());

        let same = ensure_compatible_donor(&donor("UUID-T", v36, "Linux-x86_64"), &target(v36));
        assert!(matches!(same, Err(Error::IncompatibleDonor { .. })));

        let arch = ensure_compatible_donor(&donor("uuid-p", v36, "Linux-aarch64"), &target(v36));
        assert!(arch.is_err());

        let older = ensure_compatible_donor(&donor("uuid-p", Version::new(8, 0, 35), "Linux-x86_64"), &target(v36));
        assert!(older.is_err());
    }

    #[test]
    fn test_cross_patch_clone_from_8_0_37() {
        let d = donor("uuid-p", Version::new(8, 0, 40), "Linux-x86_64");
        assert!(ensure_compatible_donor(&d, &target(Version::new(8, 0, 37))).is_ok());
        assert!(ensure_compatible_donor(&d, &target(Version::new(8, 0, 36))).is_err());
        assert!(ensure_compatible_donor(&d, &target(Version::new(8, 4, 0))).is_err());
    }
}
