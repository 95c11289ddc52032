//! Provisioning Module
//!
//! Full data copy of a donor onto the target using the server's clone
//! plugin. The copy itself is done by the server; this module drives and
//! checks it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::node::{split_address, sql_quote, NodeConnector, NodeSession};
use crate::replication::ReplicationAccount;
use crate::report::Reporter;

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Stage currently running, as `STAGE: percent%`
const CLONE_PROGRESS_QUERY: &str = "SELECT CAST(CONCAT(STAGE, ': ', \
    ROUND(IFNULL(DATA * 100 / NULLIF(ESTIMATE, 0), 0)), '%') AS CHAR) \
    FROM performance_schema.clone_progress WHERE STATE = 'In Progress' ORDER BY ID LIMIT 1";

/// How much of a running clone is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryProgress {
    /// Start and finish only
    None,
    /// Every stage as it begins
    #[default]
    Text,
}

impl FromStr for RecoveryProgress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(RecoveryProgress::None),
            "text" | "1" => Ok(RecoveryProgress::Text),
            other => Err(Error::InvalidOption(format!(
                "Invalid recovery progress '{}', expected none or text",
                other
            ))),
        }
    }
}

/// Full-copy provisioning of a target from a donor
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Replace the target's data with a copy of the donor's. The target
    /// restarts afterwards, so `target` must not be reused.
    async fn clone_from(
        &self,
        donor: &str,
        target: &dyn NodeSession,
        account: &ReplicationAccount,
        progress: RecoveryProgress,
        reporter: &dyn Reporter,
    ) -> Result<()>;

    /// Confirm on a fresh session that the copy completed
    async fn verify(&self, _target: &dyn NodeSession) -> Result<()> {
        Ok(())
    }
}

/// Provisioner driving `CLONE INSTANCE`
#[derive(Debug, Clone, Copy)]
pub struct CloneProvisioner {
    progress_interval: Duration,
}

impl Default for CloneProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl CloneProvisioner {
    pub fn new() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// How often `performance_schema.clone_progress` is read
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Run `statement` on `target`, reporting each new clone stage
    async fn copy_with_progress(
        &self,
        target: &dyn NodeSession,
        statement: &str,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let copy = target.execute(statement);
        tokio::pin!(copy);
        let mut stage = String::new();

        loop {
            tokio::select! {
                biased;
                result = &mut copy => return result,
                _ = tokio::time::sleep(self.progress_interval) => {}
            }

            match target.query_string(CLONE_PROGRESS_QUERY).await {
                Ok(Some(line)) => {
                    let current = line.split_once(':').map_or(line.as_str(), |(s, _)| s);
                    if current != stage {
                        stage = current.to_string();
                        reporter.info(&format!("Clone stage {}", line));
                    }
                }
                Ok(None) => {}
                // The target may already be restarting
                Err(e) => tracing::debug!("Could not read clone progress on {}: {}", target.address(), e),
            }
        }
    }

    async fn ensure_plugin(target: &dyn NodeSession) -> Result<()> {
        let status = target
            .query_string(
                "SELECT CAST(PLUGIN_STATUS AS CHAR) FROM information_schema.plugins WHERE PLUGIN_NAME = 'clone'",
            )
            .await?;

        match status.as_deref() {
            Some("ACTIVE") => Ok(()),
            Some(other) => Err(Error::ProvisioningFailed(format!(
                "clone plugin on {} is {}",
                target.address(),
                other
            ))),
            None => {
                tracing::info!("Installing clone plugin on {}", target.address());
                target.execute("INSTALL PLUGIN clone SONAME 'mysql_clone.so'").await
            }
        }
    }

    /// The server drops the connection when it restarts after a clone
    fn is_restart(err: &Error) -> bool {
        match err {
            Error::Database(e) => {
                let msg = e.to_string();
                msg.contains("Lost connection") || msg.contains("2013") || msg.contains("server has gone away")
            }
            Error::Io(_) => true,
            _ => false,
        }
    }
}

#[async_trait]
impl Provisioner for CloneProvisioner {
    async fn clone_from(
        &self,
        donor: &str,
        target: &dyn NodeSession,
        account: &ReplicationAccount,
        progress: RecoveryProgress,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        Self::ensure_plugin(target).await?;
        target.set_sysvar("clone_valid_donor_list", donor).await?;

        let (host, port) = split_address(donor)?;
        reporter.info(&format!(
            "Cloning {} from {}; existing data on the target will be replaced",
            target.address(),
            donor
        ));

        let statement = format!(
            "CLONE INSTANCE FROM {}@{}:{} IDENTIFIED BY {}",
            sql_quote(&account.user),
            sql_quote(&host),
            port,
            sql_quote(&account.password)
        );

        let copied = match progress {
            RecoveryProgress::None => target.execute(&statement).await,
            RecoveryProgress::Text => self.copy_with_progress(target, &statement, reporter).await,
        };

        match copied {
            Ok(()) => {}
            Err(e) if Self::is_restart(&e) => {
                tracing::info!("{} is restarting after clone", target.address());
            }
            Err(e) => {
                return Err(Error::ProvisioningFailed(format!(
                    "clone of {} from {} failed: {}",
                    target.address(),
                    donor,
                    e
                )))
            }
        }

        reporter.info(&format!("Clone of {} from {} finished", target.address(), donor));
        Ok(())
    }

    async fn verify(&self, target: &dyn NodeSession) -> Result<()> {
        let state = target
            .query_string("SELECT CAST(STATE AS CHAR) FROM performance_schema.clone_status")
            .await?;

        match state.as_deref() {
            Some("Completed") => Ok(()),
            other => Err(Error::ProvisioningFailed(format!(
                "clone status on {} is {}",
                target.address(),
                other.unwrap_or("unknown")
            ))),
        }
    }
}

/// Drop the metadata schema from `target`, lifting `super_read_only`
/// for the drop and restoring it afterwards
pub async fn drop_bookkeeping_schema(target: &dyn NodeSession) -> Result<()> {
    let read_only = target.sysvar_bool("super_read_only").await?;
    if read_only {
        target.set_sysvar("super_read_only", "OFF").await?;
    }

    let dropped = target.drop_metadata_schema().await;

    let restored = if read_only {
        target.set_sysvar("super_read_only", "ON").await
    } else {
        Ok(())
    };

    dropped.and(restored)
}

/// Wait for a restarted instance to accept connections again
pub async fn reconnect_after_restart(
    connector: &dyn NodeConnector,
    address: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Arc<dyn NodeSession>> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match connector.connect(address).await {
            Ok(session) => return Ok(session),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(Error::ProvisioningFailed(format!(
                    "{} did not come back after restart: {}",
                    address, e
                )))
            }
            Err(e) => {
                tracing::debug!("Waiting for {} to restart: {}", address, e);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
