//! Replication Module
//!
//! Replication sources of a read replica, the replication account its
//! channel uses, and the control interface that configures channels.

mod sql;

pub use sql::SqlReplicationControl;

use std::collections::HashSet;
use std::str::FromStr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::node::NodeSession;
use crate::topology::{NodeIdentity, SslMode};

/// Channel a read replica receives cluster transactions on
pub const READ_REPLICA_CHANNEL: &str = "read_replica_replication";

/// Weight given to the preferred role in managed source modes
pub const PREFERRED_WEIGHT: u8 = 80;
/// Weight given to the other role in managed source modes
pub const FALLBACK_WEIGHT: u8 = 60;
/// Weight used when a custom entry does not name one
pub const DEFAULT_WEIGHT: u8 = 100;

/// One replication source candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub address: String,
    /// Failover priority hint, 1 to 100
    pub weight: u8,
}

impl SourceEntry {
    pub fn new(address: impl Into<String>, weight: u8) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

/// Where a read replica replicates from, as requested by the operator
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReplicationSources {
    /// Follow the primary, fail over to secondaries
    #[default]
    Primary,
    /// Prefer secondaries, fail over to the primary
    Secondary,
    /// Ordered list of sources; the first one is the donor
    Custom(Vec<SourceEntry>),
}

impl ReplicationSources {
    /// Build a custom source list, rejecting empty lists, duplicate
    /// addresses and out of range weights
    pub fn custom(entries: Vec<SourceEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidOption(
                "Replication source list must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !(1..=100).contains(&entry.weight) {
                return Err(Error::InvalidOption(format!(
                    "Weight of '{}' must be between 1 and 100, got {}",
                    entry.address, entry.weight
                )));
            }
            if !seen.insert(entry.address.to_ascii_lowercase()) {
                return Err(Error::InvalidOption(format!(
                    "Duplicate replication source '{}'",
                    entry.address
                )));
            }
        }

        Ok(ReplicationSources::Custom(entries))
    }
}

impl FromStr for ReplicationSources {
    type Err = Error;

    /// Parse `primary`, `secondary` or `host:port[*weight],...`
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => return Ok(ReplicationSources::Primary),
            "secondary" => return Ok(ReplicationSources::Secondary),
            _ => {}
        }

        let mut entries = Vec::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let entry = match item.split_once('*') {
                Some((address, weight)) => {
                    let weight = weight.trim().parse::<u8>().map_err(|_| {
                        Error::InvalidOption(format!("Invalid weight in '{}'", item))
                    })?;
                    SourceEntry::new(address.trim(), weight)
                }
                None => SourceEntry::new(item, DEFAULT_WEIGHT),
            };
            entries.push(entry);
        }

        ReplicationSources::custom(entries)
    }
}

/// Resolved replication sources of a read replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceList {
    /// Managed failover over the group, primary preferred
    Primary { group_name: String, primary: String },
    /// Managed failover over the group, secondaries preferred
    Secondary { group_name: String, primary: String },
    /// Explicit sources in canonical form
    Custom(Vec<SourceEntry>),
}

impl SourceList {
    /// Primary and secondary weights for managed modes
    pub fn managed_weights(&self) -> Option<(u8, u8)> {
        match self {
            SourceList::Primary { .. } => Some((PREFERRED_WEIGHT, FALLBACK_WEIGHT)),
            SourceList::Secondary { .. } => Some((FALLBACK_WEIGHT, PREFERRED_WEIGHT)),
            SourceList::Custom(_) => None,
        }
    }

    /// Value stored in the `replicationSources` attribute
    pub fn metadata_value(&self) -> serde_json::Value {
        match self {
            SourceList::Primary { .. } => json!("PRIMARY"),
            SourceList::Secondary { .. } => json!("SECONDARY"),
            SourceList::Custom(entries) => json!(entries
                .iter()
                .map(|e| json!({ "address": e.address, "weight": e.weight }))
                .collect::<Vec<_>>()),
        }
    }
}

impl std::fmt::Display for SourceList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceList::Primary { .. } => write!(f, "PRIMARY"),
            SourceList::Secondary { .. } => write!(f, "SECONDARY"),
            SourceList::Custom(entries) => {
                let list: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{}*{}", e.address, e.weight))
                    .collect();
                write!(f, "{}", list.join(", "))
            }
        }
    }
}

/// Account the read replica's channel (and clone) authenticates with
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationAccount {
    pub user: String,
    pub host: String,
    pub password: String,
}

impl ReplicationAccount {
    /// Value stored in the `replicationAccount` attribute
    pub fn metadata_value(&self) -> serde_json::Value {
        json!({ "user": self.user, "host": self.host })
    }
}

impl std::fmt::Debug for ReplicationAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationAccount")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("password", &"<hidden>")
            .finish()
    }
}

/// Replication control primitives
#[async_trait]
pub trait ReplicationControl: Send + Sync {
    /// `(user, host)` of the account `create_replication_account` makes
    /// for `target`. Known before creation so its removal can be
    /// registered first.
    fn account_for(&self, target: &NodeIdentity) -> (String, String);

    /// Create the account for `target` on the primary
    async fn create_replication_account(
        &self,
        primary: &dyn NodeSession,
        target: &NodeIdentity,
        for_clone: bool,
    ) -> Result<ReplicationAccount>;

    async fn drop_replication_account(
        &self,
        primary: &dyn NodeSession,
        user: &str,
        host: &str,
    ) -> Result<()>;

    /// Point `channel` at `donor` with automatic failover over `sources`, and start it
    async fn configure_channel(
        &self,
        target: &dyn NodeSession,
        channel: &str,
        donor: &str,
        account: &ReplicationAccount,
        sources: &SourceList,
        ssl_mode: SslMode,
    ) -> Result<()>;

    /// Stop and remove `channel`; succeeds if it does not exist
    async fn remove_channel(&self, target: &dyn NodeSession, channel: &str) -> Result<()>;

    /// Drop every failover source registered for `channel`
    async fn reset_failover_config(&self, target: &dyn NodeSession, channel: &str) -> Result<()>;

    /// Stop and reset every channel present on the target, returning their names
    async fn stop_inherited_channels(&self, target: &dyn NodeSession) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!("PRIMARY".parse::<ReplicationSources>().unwrap(), ReplicationSources::Primary);
        assert_eq!("secondary".parse::<ReplicationSources>().unwrap(), ReplicationSources::Secondary);

        let custom: ReplicationSources = "db2:3306*50, db1:3306".parse().unwrap();
        assert_eq!(
            custom,
            ReplicationSources::Custom(vec![
                SourceEntry::new("db2:3306", 50),
                SourceEntry::new("db1:3306", DEFAULT_WEIGHT),
            ])
        );
    }

    #[test]
    fn test_custom_sources_are_validated() {
        assert!(ReplicationSources::custom(vec![]).is_err());
        assert!("db1:3306,db1:3306".parse::<ReplicationSources>().is_err());
        assert!("db1:3306*0".parse::<ReplicationSources>().is_err());
        assert!("db1:3306*abc".parse::<ReplicationSources>().is_err());
        assert!("".parse::<ReplicationSources>().is_err());
    }

    #[test]
    fn test_metadata_values() {
        let managed = SourceList::Secondary {
            group_name: "g".into(),
            primary: "db1:3306".into(),
        };
        assert_eq!(managed.metadata_value(), json!("SECONDARY"));
        assert_eq!(managed.managed_weights(), Some((60, 80)));

        let custom = SourceList::Custom(vec![SourceEntry::new("db2:3306", 50)]);
        assert_eq!(custom.metadata_value(), json!([{ "address": "db2:3306", "weight": 50 }]));
        assert_eq!(custom.to_string(), "db2:3306*50");

        let account = ReplicationAccount {
            user: "rr".into(),
            host: "%".into(),
            password: "secret".into(),
        };
        assert!(!format!("{:?}", account).contains("secret"));
        assert_eq!(account.metadata_value(), json!({ "user": "rr", "host": "%" }));
    }
}
