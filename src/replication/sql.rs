//! SQL Replication Control
//!
//! Drives accounts, channels and asynchronous connection failover with
//! plain administrative statements over a `NodeSession`.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::{ReplicationAccount, ReplicationControl, SourceList};
use crate::error::Result;
use crate::node::{split_address, sql_quote, NodeSession};
use crate::topology::{NodeIdentity, SslMode};

const PASSWORD_LENGTH: usize = 32;

/// `ReplicationControl` implemented with SQL statements
#[derive(Debug, Clone)]
pub struct SqlReplicationControl {
    /// Prefix of generated account names
    user_prefix: String,
}

impl SqlReplicationControl {
    pub fn new() -> Self {
        Self {
            user_prefix: "wolfreplica_rr_".to_string(),
        }
    }

    fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect()
    }
}

impl Default for SqlReplicationControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationControl for SqlReplicationControl {
    fn account_for(&self, target: &NodeIdentity) -> (String, String) {
        (format!("{}{}", self.user_prefix, target.server_id), "%".to_string())
    }

    async fn create_replication_account(
        &self,
        primary: &dyn NodeSession,
        target: &NodeIdentity,
        for_clone: bool,
    ) -> Result<ReplicationAccount> {
        let (user, host) = self.account_for(target);
        let account = ReplicationAccount {
            user,
            host,
            password: Self::generate_password(),
        };
        let grantee = format!("{}@{}", sql_quote(&account.user), sql_quote(&account.host));

        primary.execute(&format!("DROP USER IF EXISTS {}", grantee)).await?;
        primary
            .execute(&format!(
                "CREATE USER {} IDENTIFIED BY {}",
                grantee,
                sql_quote(&account.password)
            ))
            .await?;
        primary
            .execute(&format!("GRANT REPLICATION SLAVE ON *.* TO {}", grantee))
            .await?;
        if for_clone {
            primary
                .execute(&format!("GRANT BACKUP_ADMIN ON *.* TO {}", grantee))
                .await?;
        }

        tracing::info!("Created replication account {} on {}", grantee, primary.address());
        Ok(account)
    }

    async fn drop_replication_account(
        &self,
        primary: &dyn NodeSession,
        user: &str,
        host: &str,
    ) -> Result<()> {
        primary
            .execute(&format!("DROP USER IF EXISTS {}@{}", sql_quote(user), sql_quote(host)))
            .await?;
        tracing::info!("Dropped replication account '{}'@'{}' on {}", user, host, primary.address());
        Ok(())
    }

    async fn configure_channel(
        &self,
        target: &dyn NodeSession,
        channel: &str,
        donor: &str,
        account: &ReplicationAccount,
        sources: &SourceList,
        ssl_mode: SslMode,
    ) -> Result<()> {
        let (host, port) = split_address(donor)?;
        let channel_q = sql_quote(channel);

        target
            .execute(&format!(
                "CHANGE REPLICATION SOURCE TO SOURCE_HOST={}, SOURCE_PORT={}, SOURCE_USER={}, \
                 SOURCE_PASSWORD={}, SOURCE_AUTO_POSITION=1, SOURCE_CONNECTION_AUTO_FAILOVER=1, \
                 SOURCE_SSL={}, GET_SOURCE_PUBLIC_KEY=1, SOURCE_CONNECT_RETRY=3, SOURCE_RETRY_COUNT=10 \
                 FOR CHANNEL {}",
                sql_quote(&host),
                port,
                sql_quote(&account.user),
                sql_quote(&account.password),
                u8::from(ssl_mode.uses_tls()),
                channel_q
            ))
            .await?;

        match sources {
            SourceList::Primary { group_name, primary } | SourceList::Secondary { group_name, primary } => {
                let (primary_weight, secondary_weight) = sources.managed_weights().unwrap_or((80, 60));
                let (host, port) = split_address(primary)?;
                target
                    .execute(&format!(
                        "SELECT asynchronous_connection_failover_add_managed({}, 'GroupReplication', {}, {}, {}, '', {}, {})",
                        channel_q,
                        sql_quote(group_name),
                        sql_quote(&host),
                        port,
                        primary_weight,
                        secondary_weight
                    ))
                    .await?;
            }
            SourceList::Custom(entries) => {
                for entry in entries {
                    let (host, port) = split_address(&entry.address)?;
                    target
                        .execute(&format!(
                            "SELECT asynchronous_connection_failover_add_source({}, {}, {}, '', {})",
                            channel_q,
                            sql_quote(&host),
                            port,
                            entry.weight
                        ))
                        .await?;
                }
            }
        }

        target
            .execute(&format!("START REPLICA FOR CHANNEL {}", channel_q))
            .await?;

        tracing::info!(
            "Channel '{}' on {} replicating from {} (sources: {})",
            channel,
            target.address(),
            donor,
            sources
        );
        Ok(())
    }

    async fn remove_channel(&self, target: &dyn NodeSession, channel: &str) -> Result<()> {
        let channels = target.replication_channels().await?;
        if !channels.iter().any(|c| c == channel) {
            // Failover sources may outlive a channel that never got created
            tracing::debug!("Channel '{}' not present on {}", channel, target.address());
            return self.reset_failover_config(target, channel).await;
        }

        let channel_q = sql_quote(channel);
        target.execute(&format!("STOP REPLICA FOR CHANNEL {}", channel_q)).await?;
        self.reset_failover_config(target, channel).await?;
        target.execute(&format!("RESET REPLICA ALL FOR CHANNEL {}", channel_q)).await?;

        tracing::info!("Removed channel '{}' from {}", channel, target.address());
        Ok(())
    }

    async fn reset_failover_config(&self, target: &dyn NodeSession, channel: &str) -> Result<()> {
        let channel_q = sql_quote(channel);
        target
            .execute(&format!(
                "DELETE FROM mysql.replication_asynchronous_connection_failover WHERE Channel_name = {}",
                channel_q
            ))
            .await?;
        target
            .execute(&format!(
                "DELETE FROM mysql.replication_asynchronous_connection_failover_managed WHERE Channel_name = {}",
                channel_q
            ))
            .await
    }

    async fn stop_inherited_channels(&self, target: &dyn NodeSession) -> Result<Vec<String>> {
        let channels = target.replication_channels().await?;
        for channel in &channels {
            let channel_q = sql_quote(channel);
            target.execute(&format!("STOP REPLICA FOR CHANNEL {}", channel_q)).await?;
            target.execute(&format!("RESET REPLICA ALL FOR CHANNEL {}", channel_q)).await?;
            tracing::info!("Reset channel '{}' inherited by {}", channel, target.address());
        }
        Ok(channels)
    }
}
