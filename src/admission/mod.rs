//! Read Replica Admission
//!
//! Admits a standalone instance into a cluster as an asynchronous,
//! read-only replica:
//!
//! 1. validate the target and the cluster policy (nothing to undo yet)
//! 2. resolve sources, donor and recovery method
//! 3. create the replication account on the primary
//! 4. provision the target (clone or incremental)
//! 5. record the replica in the metadata
//! 6. configure and start the replication channel
//! 7. wait for the replica to catch up
//!
//! Every durable step from 3 on registers a compensation. Any failure,
//! including cancellation, runs them in reverse before returning.

pub mod compliance;
pub mod metadata_txn;
pub mod options;
pub mod recovery;
pub mod sources;
pub mod sync;
pub mod undo;
pub mod validate;

pub use compliance::{BasicComplianceChecker, ConfigurationChecker};
pub use options::{AdmissionOptions, AmbiguousRecoveryPolicy, ProvisioningMethod, RecoveryMethod};
pub use sources::Donor;
pub use undo::{CompensationTracker, Reverter, UndoHandle, UnwindReport};

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{MetadataStore, SqlUndoList};
use crate::node::{NodeConnector, NodeSession};
use crate::provision::{drop_bookkeeping_schema, CloneProvisioner, Provisioner};
use crate::replication::{
    ReplicationControl, SourceList, SqlReplicationControl, READ_REPLICA_CHANNEL,
};
use crate::report::Reporter;
use crate::topology::{Cluster, InstanceType, NodeIdentity};

use metadata_txn::{record_read_replica, ReadReplicaRecord};
use recovery::{assess_recoverability, clone_available, resolve_method, FullCopy};
use sources::{ensure_compatible_donor, SourceResolver};
use validate::Validator;

/// Tunables of the admission workflow
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Sync wait used when the options do not give one
    pub default_sync_timeout: Duration,
    pub poll_interval: Duration,
    /// How long to wait for the target to come back after a clone
    pub restart_timeout: Duration,
    pub ambiguous_recovery: AmbiguousRecoveryPolicy,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            default_sync_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            restart_timeout: Duration::from_secs(300),
            ambiguous_recovery: AmbiguousRecoveryPolicy::Fail,
        }
    }
}

/// Reversal records of the durable admission steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionUndo {
    DropReplicationAccount {
        primary: String,
        user: String,
        host: String,
    },
    DropProvisioningMetadata {
        target: String,
    },
    RevertMetadata {
        undo: SqlUndoList,
    },
    RemoveReplicaChannel {
        target: String,
        channel: String,
    },
}

/// Resolved plan of an admission
#[derive(Debug, Clone)]
pub struct AdmissionPlan {
    /// Target address as given by the operator
    pub target: String,
    pub target_identity: NodeIdentity,
    pub donor: Donor,
    pub sources: SourceList,
    pub recovery: ProvisioningMethod,
    /// Target still carried metadata of this cluster or its cluster set
    pub rejoin: bool,
}

/// Result of the synchronization wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synchronized,
    /// No wait was requested (zero timeout or dry run)
    Skipped,
    /// Replica was admitted but had not caught up in time
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct AdmissionReport {
    pub plan: AdmissionPlan,
    pub dry_run: bool,
    pub sync: SyncOutcome,
}

/// Whether the durable steps were undone after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    /// Failed before any change was made
    NotRequired,
    Completed,
    /// Some compensations failed; see the unwind report
    Incomplete,
}

#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AdmissionFailure {
    pub error: Error,
    pub rollback: RollbackStatus,
    pub unwind: Option<UnwindReport>,
}

impl AdmissionFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    fn before_changes(error: Error) -> Self {
        Self {
            error,
            rollback: RollbackStatus::NotRequired,
            unwind: None,
        }
    }
}

/// Read replica admission workflow
pub struct ReplicaAdmission {
    connector: Arc<dyn NodeConnector>,
    store: Arc<dyn MetadataStore>,
    replication: Arc<dyn ReplicationControl>,
    provisioner: Arc<dyn Provisioner>,
    checker: Arc<dyn ConfigurationChecker>,
    reporter: Arc<dyn Reporter>,
    settings: AdmissionSettings,
}

impl ReplicaAdmission {
    pub fn new(
        connector: Arc<dyn NodeConnector>,
        store: Arc<dyn MetadataStore>,
        reporter: Arc<dyn Reporter>,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            connector,
            store,
            replication: Arc::new(SqlReplicationControl::new()),
            provisioner: Arc::new(CloneProvisioner::new()),
            checker: Arc::new(BasicComplianceChecker),
            reporter,
            settings,
        }
    }

    pub fn with_replication(mut self, replication: Arc<dyn ReplicationControl>) -> Self {
        self.replication = replication;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn ConfigurationChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    /// Admit `target` into `cluster` as a read replica
    pub async fn admit_replica(
        &self,
        target: &str,
        cluster: &Cluster,
        options: &AdmissionOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<AdmissionReport, AdmissionFailure> {
        tracing::info!("Admitting {} into cluster '{}' as a read replica", target, cluster.name);

        if cancel.is_cancelled() {
            self.reporter.error(&Error::Cancelled.to_string());
            return Err(AdmissionFailure::before_changes(Error::Cancelled));
        }

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = self.prepare(target, cluster, options) => r,
        };
        let plan = match prepared {
            Ok(plan) => plan,
            Err(error) => {
                self.reporter.error(&error.to_string());
                return Err(AdmissionFailure::before_changes(error));
            }
        };

        self.reporter.info(&format!(
            "Plan for {}: donor {}, sources {}, recovery {}",
            plan.target, plan.donor.address, plan.sources, plan.recovery
        ));

        if options.dry_run {
            self.reporter.info("Dry run: validation passed, no changes were made");
            return Ok(AdmissionReport {
                plan,
                dry_run: true,
                sync: SyncOutcome::Skipped,
            });
        }

        let mut tracker = CompensationTracker::new();
        let executed = {
            let work = self.execute(&plan, cluster, options, &mut tracker, cancel);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = work => r,
            }
        };

        match executed {
            Ok(sync) => {
                self.reporter.info(&format!(
                    "Instance '{}' was added to cluster '{}' as a read replica",
                    plan.target, cluster.name
                ));
                Ok(AdmissionReport {
                    plan,
                    dry_run: false,
                    sync,
                })
            }
            Err(error) => Err(self.rollback(error, &mut tracker).await),
        }
    }

    async fn rollback(
        &self,
        error: Error,
        tracker: &mut CompensationTracker<AdmissionUndo>,
    ) -> AdmissionFailure {
        self.reporter.error(&error.to_string());
        if tracker.is_empty() {
            return AdmissionFailure::before_changes(error);
        }

        self.reporter.info("Reverting changes...");
        let reverter = AdmissionReverter {
            connector: self.connector.as_ref(),
            store: self.store.as_ref(),
            replication: self.replication.as_ref(),
        };
        let unwind = tracker.run_all(&reverter).await;

        let rollback = if unwind.is_complete() {
            self.reporter.info("Changes successfully reverted");
            RollbackStatus::Completed
        } else {
            for (name, reason) in &unwind.failed {
                self.reporter.warning(&format!("Could not revert '{}': {}", name, reason));
            }
            RollbackStatus::Incomplete
        };

        AdmissionFailure {
            error,
            rollback,
            unwind: Some(unwind),
        }
    }

    /// Validation and resolution; changes nothing
    async fn prepare(
        &self,
        target: &str,
        cluster: &Cluster,
        options: &AdmissionOptions,
    ) -> Result<AdmissionPlan> {
        let session = self.connector.connect(target).await?;
        let identity = session.identity().await?;

        let rejoin = Validator {
            store: self.store.as_ref(),
            checker: self.checker.as_ref(),
            connector: self.connector.as_ref(),
            reporter: self.reporter.as_ref(),
        }
        .run(session.as_ref(), &identity, cluster, options)
        .await?;

        let resolver = SourceResolver {
            connector: self.connector.as_ref(),
            store: self.store.as_ref(),
            reporter: self.reporter.as_ref(),
        };
        let resolved = resolver.resolve(cluster, &options.sources).await?;

        let donor = match (&options.recovery, &options.donor) {
            (RecoveryMethod::Clone, Some(address)) => resolver.donor_override(cluster, address).await?,
            _ => resolved.donor,
        };
        if options.recovery != RecoveryMethod::Incremental {
            ensure_compatible_donor(&donor, &identity)?;
        }

        let recovery = if options.recovery == RecoveryMethod::Clone {
            ProvisioningMethod::Clone
        } else {
            let donor_session = self.connector.connect(&donor.address).await?;
            let recoverability = assess_recoverability(
                &donor_session.executed_gtid_set().await?,
                &donor_session.purged_gtid_set().await?,
                &session.executed_gtid_set().await?,
                cluster.policy.gtid_set_is_complete,
            );
            tracing::debug!("Recoverability of {}: {:?}", target, recoverability);
            resolve_method(
                options.recovery,
                &recoverability,
                clone_available(cluster, identity.version),
                self.settings.ambiguous_recovery,
                target,
                self.reporter.as_ref(),
            )?
        };

        Ok(AdmissionPlan {
            target: target.to_string(),
            target_identity: identity,
            donor,
            sources: resolved.sources,
            recovery,
            rejoin,
        })
    }

    /// Durable steps; every change registers its compensation first or
    /// right after it succeeds
    async fn execute(
        &self,
        plan: &AdmissionPlan,
        cluster: &Cluster,
        options: &AdmissionOptions,
        tracker: &mut CompensationTracker<AdmissionUndo>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        // Creation is several statements; any of them may be the last one run
        let (user, host) = self.replication.account_for(&plan.target_identity);
        tracker.register(
            "drop replication account",
            AdmissionUndo::DropReplicationAccount {
                primary: cluster.primary.clone(),
                user,
                host,
            },
        );
        let account = {
            let primary = self.connector.connect(&cluster.primary).await?;
            self.replication
                .create_replication_account(
                    primary.as_ref(),
                    &plan.target_identity,
                    plan.recovery == ProvisioningMethod::Clone,
                )
                .await?
        };

        let target: Arc<dyn NodeSession> = match plan.recovery {
            ProvisioningMethod::Clone => {
                FullCopy {
                    connector: self.connector.as_ref(),
                    provisioner: self.provisioner.as_ref(),
                    replication: self.replication.as_ref(),
                    reporter: self.reporter.as_ref(),
                    restart_timeout: self.settings.restart_timeout,
                    poll_interval: self.settings.poll_interval,
                }
                .run(&plan.donor.address, &plan.target, &account, options.recovery_progress, tracker)
                .await?
            }
            ProvisioningMethod::Incremental => self.connector.connect(&plan.target).await?,
        };

        let join_time = match target.query_string("SELECT CAST(NOW(3) AS CHAR)").await {
            Ok(Some(now)) => now,
            _ => chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let undo = record_read_replica(
            self.store.as_ref(),
            &ReadReplicaRecord {
                cluster_id: &cluster.id,
                identity: &plan.target_identity,
                label: options.label.as_deref(),
                join_time: &join_time,
                account: &account,
                sources: &plan.sources,
            },
        )
        .await?;
        tracker.register("revert metadata", AdmissionUndo::RevertMetadata { undo });

        tracker.register_deferred_last(
            "remove replication channel",
            AdmissionUndo::RemoveReplicaChannel {
                target: plan.target.clone(),
                channel: READ_REPLICA_CHANNEL.to_string(),
            },
        );
        self.replication
            .configure_channel(
                target.as_ref(),
                READ_REPLICA_CHANNEL,
                &plan.donor.address,
                &account,
                &plan.sources,
                cluster.policy.ssl_mode,
            )
            .await?;

        let timeout = options.timeout.unwrap_or(self.settings.default_sync_timeout);
        if timeout.is_zero() {
            self.reporter.info("Not waiting for the read replica to synchronize");
            return Ok(SyncOutcome::Skipped);
        }

        let expected = self
            .connector
            .connect(&cluster.primary)
            .await?
            .executed_gtid_set()
            .await?;

        self.reporter.info(&format!(
            "Waiting for '{}' to synchronize with the cluster...",
            plan.target
        ));
        match sync::wait_for_sync(
            target.as_ref(),
            InstanceType::ReadReplica,
            &expected,
            timeout,
            self.settings.poll_interval,
            cancel,
        )
        .await
        {
            Ok(()) => Ok(SyncOutcome::Synchronized),
            Err(e @ Error::SyncTimeout { .. }) => {
                self.reporter.warning(&format!(
                    "{}. The read replica was added and keeps replicating in the background",
                    e
                ));
                Ok(SyncOutcome::TimedOut)
            }
            Err(e) => Err(e),
        }
    }
}

/// Executes `AdmissionUndo` records, opening a fresh session for each
struct AdmissionReverter<'a> {
    connector: &'a dyn NodeConnector,
    store: &'a dyn MetadataStore,
    replication: &'a dyn ReplicationControl,
}

#[async_trait]
impl<'a> Reverter<AdmissionUndo> for AdmissionReverter<'a> {
    async fn revert(&self, action: &AdmissionUndo) -> Result<()> {
        match action {
            AdmissionUndo::DropReplicationAccount { primary, user, host } => {
                let session = self.connector.connect(primary).await?;
                self.replication
                    .drop_replication_account(session.as_ref(), user, host)
                    .await
            }
            AdmissionUndo::DropProvisioningMetadata { target } => {
                let session = self.connector.connect(target).await?;
                drop_bookkeeping_schema(session.as_ref()).await
            }
            AdmissionUndo::RevertMetadata { undo } => self.store.revert(undo).await,
            AdmissionUndo::RemoveReplicaChannel { target, channel } => {
                let session = self.connector.connect(target).await?;
                self.replication.remove_channel(session.as_ref(), channel).await
            }
        }
    }
}
