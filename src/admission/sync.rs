//! Synchronization Monitor
//!
//! Bounded wait for the new replica to apply everything the cluster had
//! when its channel started.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gtid::GtidSet;
use crate::node::NodeSession;
use crate::replication::READ_REPLICA_CHANNEL;
use crate::topology::InstanceType;

/// Poll `target` until its executed set contains `expected`
pub async fn wait_for_sync(
    target: &dyn NodeSession,
    role: InstanceType,
    expected: &GtidSet,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if role == InstanceType::ReadReplica {
            if let Some(status) = target.channel_status(READ_REPLICA_CHANNEL).await? {
                if let Some(err) = status.last_error {
                    return Err(Error::Replication(format!(
                        "channel '{}' on {} failed: {}",
                        READ_REPLICA_CHANNEL,
                        target.address(),
                        err
                    )));
                }
            }
        }

        let executed = target.executed_gtid_set().await?;
        if executed.contains(expected) {
            tracing::info!("{} is synchronized with the cluster", target.address());
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::SyncTimeout {
                address: target.address().to_string(),
                waited: now - started,
            });
        }

        tracing::debug!(
            "{} still missing {} transactions",
            target.address(),
            expected.subtract(&executed).count()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(poll_interval.min(deadline - now)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeNode;

    const A: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

    fn expected() -> GtidSet {
        format!("{}:1-100", A).parse().unwrap()
    }

    #[tokio::test]
    async fn test_already_synchronized() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 42);
        target.set_sysvar_value("gtid_executed", &format!("{}:1-120", A));

        wait_for_sync(
            target.as_ref(),
            InstanceType::ReadReplica,
            &expected(),
            Duration::from_secs(1),
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_timeout() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 42);
        target.set_sysvar_value("gtid_executed", &format!("{}:1-50", A));

        let err = wait_for_sync(
            target.as_ref(),
            InstanceType::ReadReplica,
            &expected(),
            Duration::from_millis(30),
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SyncTimeout { .. }));
    }

    #[tokio::test]
    async fn test_channel_error_fails_fast() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 42);
        target.update(|s| {
            s.channels.push(READ_REPLICA_CHANNEL.into());
            s.channel_error = Some("Error 1236 reading binlog".into());
        });

        let err = wait_for_sync(
            target.as_ref(),
            InstanceType::ReadReplica,
            &expected(),
            Duration::from_secs(5),
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Replication(_)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let target = FakeNode::new("rr1:3306", "uuid-t", 42);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_sync(
            target.as_ref(),
            InstanceType::ReadReplica,
            &expected(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
