//! MySQL Session
//!
//! `NodeSession` backed by a small sqlx pool per instance.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{Executor, MySqlPool};

use super::{
    is_identifier, redact_sql, split_address, ChannelStatus, LocalMetadata, NodeConnector,
    NodeSession, TopologyType, METADATA_SCHEMA,
};
use crate::config::CredentialsConfig;
use crate::error::{Error, Result};
use crate::topology::{MemberState, NodeIdentity};

/// Opens `MySqlSession`s with the administrative account from the config
#[derive(Clone)]
pub struct MySqlConnector {
    credentials: CredentialsConfig,
}

impl MySqlConnector {
    pub fn new(credentials: CredentialsConfig) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl NodeConnector for MySqlConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeSession>> {
        let session = MySqlSession::connect(address, &self.credentials).await?;
        Ok(Arc::new(session))
    }
}

/// Session to a single MySQL instance
pub struct MySqlSession {
    address: String,
    pool: MySqlPool,
}

impl MySqlSession {
    /// Connect to `address`
    pub async fn connect(address: &str, credentials: &CredentialsConfig) -> Result<Self> {
        let (host, port) = split_address(address)?;
        let options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&credentials.user)
            .password(&credentials.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(credentials.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| Error::Unreachable {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Connected to {}", address);

        Ok(Self {
            address: address.to_string(),
            pool,
        })
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl NodeSession for MySqlSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn identity(&self) -> Result<NodeIdentity> {
        let row: (String, String, String, String, String, String, String) = sqlx::query_as(
            "SELECT CAST(@@server_uuid AS CHAR), CAST(@@server_id AS CHAR), \
             CAST(@@version AS CHAR), CAST(COALESCE(@@report_host, @@hostname) AS CHAR), \
             CAST(COALESCE(@@report_port, @@port) AS CHAR), \
             CAST(@@version_compile_os AS CHAR), CAST(@@version_compile_machine AS CHAR)",
        )
        .fetch_one(&self.pool)
        .await?;

        let (uuid, server_id, version, host, port, os, machine) = row;
        let server_id = server_id
            .parse()
            .map_err(|_| Error::Internal(format!("Invalid server_id '{}' on {}", server_id, self.address)))?;

        Ok(NodeIdentity {
            server_uuid: uuid,
            server_id,
            version: version.parse()?,
            canonical_address: format!("{}:{}", host, port),
            platform: format!("{}-{}", os, machine),
        })
    }

    async fn member_state(&self) -> Result<MemberState> {
        let state: Option<String> = sqlx::query_scalar(
            "SELECT CAST(MEMBER_STATE AS CHAR) FROM performance_schema.replication_group_members \
             WHERE MEMBER_ID = @@server_uuid",
        )
        .fetch_optional(&self.pool)
        .await?;

        match state {
            Some(s) => s.parse(),
            None => Ok(MemberState::Offline),
        }
    }

    async fn sysvar(&self, name: &str) -> Result<Option<String>> {
        if !is_identifier(name) {
            return Err(Error::InvalidOption(format!("Invalid system variable '{}'", name)));
        }
        let value: Option<Option<String>> =
            sqlx::query_scalar(&format!("SELECT CAST(@@GLOBAL.{} AS CHAR)", name))
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    async fn set_sysvar(&self, name: &str, value: &str) -> Result<()> {
        if !is_identifier(name) {
            return Err(Error::InvalidOption(format!("Invalid system variable '{}'", name)));
        }
        tracing::debug!("SET GLOBAL {} on {}", name, self.address);
        sqlx::query(&format!("SET GLOBAL {} = ?", name))
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        tracing::debug!("Executing on {}: {}", self.address, redact_sql(sql));
        // Plain text protocol, several admin statements cannot be prepared
        (&self.pool).execute(sql).await?;
        Ok(())
    }

    async fn query_string(&self, sql: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = sqlx::query_scalar(sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.flatten())
    }

    async fn replication_channels(&self) -> Result<Vec<String>> {
        let channels: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(CHANNEL_NAME AS CHAR) FROM performance_schema.replication_connection_configuration \
             WHERE CHANNEL_NAME NOT LIKE 'group\\_replication\\_%'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    async fn channel_status(&self, channel: &str) -> Result<Option<ChannelStatus>> {
        let row: Option<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT CAST(c.SERVICE_STATE AS CHAR), CAST(a.SERVICE_STATE AS CHAR), \
             CAST(NULLIF(c.LAST_ERROR_MESSAGE, '') AS CHAR), \
             (SELECT CAST(MAX(NULLIF(w.LAST_ERROR_MESSAGE, '')) AS CHAR) \
                FROM performance_schema.replication_applier_status_by_worker w \
               WHERE w.CHANNEL_NAME = c.CHANNEL_NAME) \
             FROM performance_schema.replication_connection_status c \
             JOIN performance_schema.replication_applier_status a USING (CHANNEL_NAME) \
             WHERE c.CHANNEL_NAME = ?",
        )
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(receiver, applier, receiver_error, applier_error)| ChannelStatus {
            channel: channel.to_string(),
            receiver_running: receiver == "ON",
            applier_running: applier == "ON",
            last_error: receiver_error.or(applier_error),
        }))
    }

    async fn local_metadata(&self) -> Result<Option<LocalMetadata>> {
        if !self.schema_exists(METADATA_SCHEMA).await? {
            return Ok(None);
        }

        let row: Option<(String, String, String)> = sqlx::query_as(&format!(
            "SELECT CAST(c.topology_type AS CHAR), CAST(c.cluster_id AS CHAR), CAST(c.cluster_name AS CHAR) \
             FROM `{0}`.`clusters` c JOIN `{0}`.`instances` i ON i.cluster_id = c.cluster_id \
             WHERE i.server_uuid = @@server_uuid",
            METADATA_SCHEMA
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(topology, cluster_id, cluster_name)| LocalMetadata {
            topology: if topology.eq_ignore_ascii_case("replicaset") {
                TopologyType::ReplicaSet
            } else {
                TopologyType::Cluster
            },
            cluster_id,
            cluster_name,
        }))
    }
}
