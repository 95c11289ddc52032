//! Provisioning Strategy
//!
//! Decides between incremental recovery and a full clone, and runs the
//! clone with its compensation in place.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gtid::GtidSet;
use crate::node::{NodeConnector, NodeSession};
use crate::provision::{reconnect_after_restart, Provisioner, RecoveryProgress};
use crate::replication::{ReplicationAccount, ReplicationControl};
use crate::report::Reporter;
use crate::topology::{Cluster, Version};

use super::options::{AmbiguousRecoveryPolicy, ProvisioningMethod, RecoveryMethod};
use super::undo::CompensationTracker;
use super::validate::MIN_CLONE_VERSION;
use super::AdmissionUndo;

/// Whether the target can catch up from the donor's binary logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recoverability {
    Recoverable,
    Irrecoverable(String),
    Ambiguous(String),
}

/// Compare the target's executed transactions with what the donor has
pub fn assess_recoverability(
    donor_executed: &GtidSet,
    donor_purged: &GtidSet,
    target_executed: &GtidSet,
    gtid_set_is_complete: bool,
) -> Recoverability {
    let errant = target_executed.subtract(donor_executed);
    if !errant.is_empty() {
        return Recoverability::Irrecoverable(format!(
            "target has transactions the cluster does not have: {}",
            errant
        ));
    }

    let missing = donor_executed.subtract(target_executed);
    let purged = missing.intersection(donor_purged);
    if !purged.is_empty() {
        return Recoverability::Irrecoverable(format!(
            "transactions the target is missing were already purged on the donor: {}",
            purged
        ));
    }

    if target_executed.is_empty() && !gtid_set_is_complete {
        return Recoverability::Ambiguous(
            "the target has no transactions and the cluster's GTID set is not known to be complete".into(),
        );
    }

    Recoverability::Recoverable
}

/// Check if clone provisioning can be used for this target
pub fn clone_available(cluster: &Cluster, target_version: Version) -> bool {
    !cluster.policy.disable_clone && target_version >= MIN_CLONE_VERSION
}

/// Pick the concrete provisioning method
pub fn resolve_method(
    requested: RecoveryMethod,
    recoverability: &Recoverability,
    clone_available: bool,
    policy: AmbiguousRecoveryPolicy,
    target: &str,
    reporter: &dyn Reporter,
) -> Result<ProvisioningMethod> {
    match requested {
        RecoveryMethod::Clone => Ok(ProvisioningMethod::Clone),
        RecoveryMethod::Incremental => match recoverability {
            Recoverability::Irrecoverable(reason) => Err(Error::IrrecoverableState {
                address: target.to_string(),
                reason: reason.clone(),
            }),
            Recoverability::Ambiguous(reason) => {
                reporter.warning(&format!(
                    "Incremental recovery of '{}' may miss transactions: {}",
                    target, reason
                ));
                Ok(ProvisioningMethod::Incremental)
            }
            Recoverability::Recoverable => Ok(ProvisioningMethod::Incremental),
        },
        RecoveryMethod::Auto => match recoverability {
            Recoverability::Recoverable => Ok(ProvisioningMethod::Incremental),
            Recoverability::Irrecoverable(reason) => {
                if clone_available {
                    reporter.info(&format!(
                        "Incremental recovery of '{}' is not possible ({}); using clone",
                        target, reason
                    ));
                    Ok(ProvisioningMethod::Clone)
                } else {
                    Err(Error::IrrecoverableState {
                        address: target.to_string(),
                        reason: format!("{} and clone is not available", reason),
                    })
                }
            }
            Recoverability::Ambiguous(reason) => {
                resolve_ambiguous(reason, clone_available, policy, target, reporter)
            }
        },
    }
}

fn resolve_ambiguous(
    reason: &str,
    clone_available: bool,
    policy: AmbiguousRecoveryPolicy,
    target: &str,
    reporter: &dyn Reporter,
) -> Result<ProvisioningMethod> {
    let fail = || {
        Err(Error::InvalidRecoveryOption(format!(
            "cannot choose a recovery method for '{}' automatically: {}",
            target, reason
        )))
    };

    match policy {
        AmbiguousRecoveryPolicy::Fail => fail(),
        AmbiguousRecoveryPolicy::Incremental => {
            reporter.warning(&format!("Using incremental recovery for '{}': {}", target, reason));
            Ok(ProvisioningMethod::Incremental)
        }
        AmbiguousRecoveryPolicy::Clone if clone_available => Ok(ProvisioningMethod::Clone),
        AmbiguousRecoveryPolicy::Clone => fail(),
        AmbiguousRecoveryPolicy::Prompt => {
            let question = if clone_available {
                format!("{}. Use clone to provision '{}'?", reason, target)
            } else {
                format!("{}. Continue with incremental recovery of '{}'?", reason, target)
            };
            match reporter.confirm(&question) {
                Some(true) if clone_available => Ok(ProvisioningMethod::Clone),
                Some(true) => Ok(ProvisioningMethod::Incremental),
                Some(false) if clone_available => Ok(ProvisioningMethod::Incremental),
                _ => fail(),
            }
        }
    }
}

/// Collaborators of a full copy
pub struct FullCopy<'a> {
    pub connector: &'a dyn NodeConnector,
    pub provisioner: &'a dyn Provisioner,
    pub replication: &'a dyn ReplicationControl,
    pub reporter: &'a dyn Reporter,
    pub restart_timeout: Duration,
    pub poll_interval: Duration,
}

impl<'a> FullCopy<'a> {
    /// Clone `donor` onto `target` and return a fresh session to the
    /// restarted target. The bookkeeping-schema compensation stays
    /// registered until the clone is verified.
    pub async fn run(
        &self,
        donor: &str,
        target: &str,
        account: &ReplicationAccount,
        progress: RecoveryProgress,
        tracker: &mut CompensationTracker<AdmissionUndo>,
    ) -> Result<Arc<dyn NodeSession>> {
        let handle = tracker.register(
            "drop provisioning metadata",
            AdmissionUndo::DropProvisioningMetadata {
                target: target.to_string(),
            },
        );

        {
            let session = self.connector.connect(target).await?;
            self.provisioner
                .clone_from(donor, session.as_ref(), account, progress, self.reporter)
                .await?;
        }

        let session =
            reconnect_after_restart(self.connector, target, self.restart_timeout, self.poll_interval).await?;
        self.provisioner.verify(session.as_ref()).await?;
        tracker.cancel(handle);

        let inherited = self.replication.stop_inherited_channels(session.as_ref()).await?;
        if !inherited.is_empty() {
            self.reporter.info(&format!(
                "Removed replication channels copied from the donor: {}",
                inherited.join(", ")
            ));
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::RecordingReporter;

    const A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
    const B: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";

    fn gtid(s: &str) -> GtidSet {
        s.parse().unwrap()
    }

    #[test]
    fn test_assess_recoverability() {
        let donor = gtid(&format!("{}:1-100", A));
        let purged = gtid(&format!("{}:1-20", A));

        let behind = gtid(&format!("{}:1-50", A));
        assert_eq!(assess_recoverability(&donor, &purged, &behind, false), Recoverability::Recoverable);

        let diverged = gtid(&format!("{}:1-50,{}:1", A, B));
        assert!(matches!(
            assess_recoverability(&donor, &purged, &diverged, false),
            Recoverability::Irrecoverable(_)
        ));

        let too_far = gtid(&format!("{}:1-10", A));
        assert!(matches!(
            assess_recoverability(&donor, &purged, &too_far, false),
            Recoverability::Irrecoverable(_)
        ));

        let empty = GtidSet::new();
        let nothing_purged = GtidSet::new();
        assert!(matches!(
            assess_recoverability(&donor, &nothing_purged, &empty, false),
            Recoverability::Ambiguous(_)
        ));
        assert_eq!(
            assess_recoverability(&donor, &nothing_purged, &empty, true),
            Recoverability::Recoverable
        );
    }

    #[test]
    fn test_resolve_method() {
        let reporter = RecordingReporter::new();
        let irrecoverable = Recoverability::Irrecoverable("purged".into());
        let ambiguous = Recoverability::Ambiguous("empty".into());

        let resolve = |req, rec: &Recoverability, clone, policy| {
            resolve_method(req, rec, clone, policy, "rr1:3306", reporter.as_ref())
        };
        let fail = AmbiguousRecoveryPolicy::Fail;

        assert_eq!(
            resolve(RecoveryMethod::Auto, &Recoverability::Recoverable, true, fail).unwrap(),
            ProvisioningMethod::Incremental
        );
        assert_eq!(resolve(RecoveryMethod::Auto, &irrecoverable, true, fail).unwrap(), ProvisioningMethod::Clone);
        assert!(matches!(
            resolve(RecoveryMethod::Auto, &irrecoverable, false, fail),
            Err(Error::IrrecoverableState { .. })
        ));
        assert!(matches!(
            resolve(RecoveryMethod::Incremental, &irrecoverable, true, fail),
            Err(Error::IrrecoverableState { .. })
        ));
        assert_eq!(
            resolve(RecoveryMethod::Incremental, &ambiguous, true, fail).unwrap(),
            ProvisioningMethod::Incremental
        );
        assert_eq!(reporter.warnings().len(), 1);

        let err = resolve(RecoveryMethod::Auto, &ambiguous, true, fail).unwrap_err();
        assert!(matches!(err, Error::InvalidRecoveryOption(_)));
        assert!(err.hint().is_some());

        assert_eq!(
            resolve(RecoveryMethod::Auto, &ambiguous, true, AmbiguousRecoveryPolicy::Clone).unwrap(),
            ProvisioningMethod::Clone
        );
    }

    #[test]
    fn test_prompt_policy() {
        let ambiguous = Recoverability::Ambiguous("empty".into());
        let prompt = AmbiguousRecoveryPolicy::Prompt;

        let yes = RecordingReporter::answering(true);
        assert_eq!(
            resolve_method(RecoveryMethod::Auto, &ambiguous, true, prompt, "rr1", yes.as_ref()).unwrap(),
            ProvisioningMethod::Clone
        );

        let no = RecordingReporter::answering(false);
        assert_eq!(
            resolve_method(RecoveryMethod::Auto, &ambiguous, true, prompt, "rr1", no.as_ref()).unwrap(),
            ProvisioningMethod::Incremental
        );

        // Nobody to ask
        let silent = RecordingReporter::new();
        assert!(resolve_method(RecoveryMethod::Auto, &ambiguous, true, prompt, "rr1", silent.as_ref()).is_err());
    }
}
