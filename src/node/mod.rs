//! Node Access Module
//!
//! Sessions to cluster instances. The admission workflow only talks to
//! servers through these traits; `MySqlConnector` is the production
//! implementation.

mod mysql;

pub use mysql::{MySqlConnector, MySqlSession};

use std::sync::Arc;
use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::gtid::GtidSet;
use crate::topology::{MemberState, NodeIdentity};

/// Schema holding the per-instance copy of the cluster metadata
pub const METADATA_SCHEMA: &str = "wolfreplica_metadata";

/// Kind of topology an instance's local metadata says it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyType {
    Cluster,
    ReplicaSet,
}

impl std::fmt::Display for TopologyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyType::Cluster => write!(f, "Cluster"),
            TopologyType::ReplicaSet => write!(f, "ReplicaSet"),
        }
    }
}

/// Membership recorded in an instance's own copy of the metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
    pub topology: TopologyType,
    pub cluster_id: String,
    pub cluster_name: String,
}

/// Runtime status of a replication channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: String,
    pub receiver_running: bool,
    pub applier_running: bool,
    pub last_error: Option<String>,
}

/// An open session to one server
#[async_trait]
pub trait NodeSession: Send + Sync {
    /// Address this session was opened with
    fn address(&self) -> &str;

    /// Fetch identity, version and canonical address
    async fn identity(&self) -> Result<NodeIdentity>;

    /// Group replication state of the instance
    async fn member_state(&self) -> Result<MemberState>;

    /// Read a global system variable, `None` when NULL
    async fn sysvar(&self, name: &str) -> Result<Option<String>>;

    /// Set a global system variable
    async fn set_sysvar(&self, name: &str, value: &str) -> Result<()>;

    /// Execute an administrative statement
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query returning a single string value
    async fn query_string(&self, sql: &str) -> Result<Option<String>>;

    /// Names of the replication channels configured on the instance
    async fn replication_channels(&self) -> Result<Vec<String>>;

    /// Status of a replication channel, `None` if it does not exist
    async fn channel_status(&self, channel: &str) -> Result<Option<ChannelStatus>>;

    /// Membership according to the instance's own metadata schema
    async fn local_metadata(&self) -> Result<Option<LocalMetadata>>;

    /// Read a boolean global system variable
    async fn sysvar_bool(&self, name: &str) -> Result<bool> {
        Ok(self
            .sysvar(name)
            .await?
            .map(|v| matches!(v.trim().to_ascii_uppercase().as_str(), "ON" | "1" | "TRUE"))
            .unwrap_or(false))
    }

    /// Transactions applied by the instance
    async fn executed_gtid_set(&self) -> Result<GtidSet> {
        self.sysvar("gtid_executed").await?.unwrap_or_default().parse()
    }

    /// Transactions no longer available in the instance's binary logs
    async fn purged_gtid_set(&self) -> Result<GtidSet> {
        self.sysvar("gtid_purged").await?.unwrap_or_default().parse()
    }

    /// Drop the metadata schema from the instance
    async fn drop_metadata_schema(&self) -> Result<()> {
        self.execute(&format!("DROP SCHEMA IF EXISTS `{}`", METADATA_SCHEMA)).await
    }
}

/// Opens sessions to servers by address
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Connect to `address`, failing with `Error::Unreachable` if the
    /// server cannot be reached
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeSession>>;
}

/// Split `host:port` (or `[v6]:port`), defaulting to port 3306
pub fn split_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidOption("Empty address".into()));
    }

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::InvalidOption(format!("Invalid address '{}'", address)))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| Error::InvalidOption(format!("Invalid port in '{}'", address)))?,
            None => 3306,
        };
        return Ok((host.to_string(), port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| Error::InvalidOption(format!("Invalid port in '{}'", address)))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((address.to_string(), 3306)),
    }
}

/// Quote a string literal for SQL
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Check that a system variable or channel name is a plain identifier
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const SECRET_MARKERS: [&str; 2] = ["IDENTIFIED BY ", "SOURCE_PASSWORD="];
const LOGGED_SQL_CHARS: usize = 100;

/// Statement text fit for logs: quoted passwords masked, long text cut
pub fn redact_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len().min(LOGGED_SQL_CHARS + 8));
    let mut rest = sql;
    while let Some((pos, marker)) = SECRET_MARKERS
        .iter()
        .filter_map(|m| rest.find(m).map(|p| (p, *m)))
        .min_by_key(|(p, _)| *p)
    {
        let value = pos + marker.len();
        out.push_str(&rest[..value]);
        rest = &rest[value..];
        match quoted_len(rest) {
            Some(len) => {
                out.push_str("'***'");
                rest = &rest[len..];
            }
            None => {
                out.push_str("***");
                rest = "";
            }
        }
    }
    out.push_str(rest);

    if let Some((cut, _)) = out.char_indices().nth(LOGGED_SQL_CHARS) {
        out.truncate(cut);
        out.push_str("...");
    }
    out
}

/// Byte length of the quoted literal `s` starts with
fn quoted_len(s: &str) -> Option<usize> {
    let body = s.strip_prefix('\'')?;
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\'' if matches!(chars.peek(), Some((_, '\''))) => {
                chars.next();
            }
            '\'' => return Some(i + 2),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_sql_masks_passwords() {
        assert_eq!(
            redact_sql("CREATE USER 'rr'@'%' IDENTIFIED BY 'hunter2'"),
            "CREATE USER 'rr'@'%' IDENTIFIED BY '***'"
        );

        let change = format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_USER='rr', SOURCE_PASSWORD={}, SOURCE_AUTO_POSITION=1",
            sql_quote("it's a\\secret")
        );
        let logged = redact_sql(&change);
        assert_eq!(
            logged,
            "CHANGE REPLICATION SOURCE TO SOURCE_USER='rr', SOURCE_PASSWORD='***', SOURCE_AUTO_POSITION=1"
        );
        assert!(!logged.contains("secret"));

        assert_eq!(
            redact_sql("CLONE INSTANCE FROM 'rr'@'db1':3306 IDENTIFIED BY 'pw'"),
            "CLONE INSTANCE FROM 'rr'@'db1':3306 IDENTIFIED BY '***'"
        );
        assert_eq!(
            redact_sql("CREATE USER x IDENTIFIED BY 'unterminated"),
            "CREATE USER x IDENTIFIED BY ***"
        );
        assert_eq!(redact_sql("STOP REPLICA"), "STOP REPLICA");
    }

    #[test]
    fn test_redact_sql_truncates_on_char_boundary() {
        let sql = format!("SELECT '{}'", "é".repeat(150));
        let logged = redact_sql(&sql);
        assert!(logged.ends_with("..."));
        assert_eq!(logged.chars().count(), LOGGED_SQL_CHARS + 3);

        let password = format!("IDENTIFIED BY '{}'", "ü".repeat(200));
        assert_eq!(redact_sql(&password), "IDENTIFIED BY '***'");
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("db1:3307").unwrap(), ("db1".to_string(), 3307));
        assert_eq!(split_address("db1").unwrap(), ("db1".to_string(), 3306));
        assert_eq!(split_address("[::1]:3310").unwrap(), ("::1".to_string(), 3310));
        assert!(split_address("db1:port").is_err());
        assert!(split_address("").is_err());
    }

    #[test]
    fn test_sql_quote() {
        assert_eq!(sql_quote("it's"), "'it''s'");
        assert_eq!(sql_quote("a\\b"), "'a\\\\b'");
        assert!(is_identifier("super_read_only"));
        assert!(!is_identifier("x; DROP"));
    }
}
