//! Metadata Module
//!
//! Durable record of managed clusters and their members. Writes go
//! through a buffered `MetadataTxn` committed atomically by the store,
//! which hands back the inverse SQL needed to revert it.

mod sqlite;

pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::{Cluster, ClusterMember};

/// Time the member joined, taken from the member's own clock
pub const ATTR_JOIN_TIME: &str = "joinTime";
/// Account the member's replication channel authenticates with
pub const ATTR_REPLICATION_ACCOUNT: &str = "replicationAccount";
/// Replication sources of a read replica
pub const ATTR_REPLICATION_SOURCES: &str = "replicationSources";

/// Member row to insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub cluster_id: String,
    #[serde(flatten)]
    pub member: ClusterMember,
}

/// Summary row of a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub cluster_id: String,
    pub name: String,
    pub cluster_set_id: Option<String>,
}

/// A single buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataWrite {
    InsertMember(MemberRecord),
    SetAttribute {
        server_uuid: String,
        key: String,
        value: serde_json::Value,
    },
}

/// Buffered metadata writes, applied all-or-nothing on commit
#[derive(Debug, Clone, Default)]
pub struct MetadataTxn {
    writes: Vec<MetadataWrite>,
}

impl MetadataTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_member(&mut self, record: MemberRecord) -> &mut Self {
        self.writes.push(MetadataWrite::InsertMember(record));
        self
    }

    pub fn update_attribute(
        &mut self,
        server_uuid: &str,
        key: &str,
        value: serde_json::Value,
    ) -> &mut Self {
        self.writes.push(MetadataWrite::SetAttribute {
            server_uuid: server_uuid.to_string(),
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn writes(&self) -> &[MetadataWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// One statement with positional parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Option<String>>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// Inverse statements of a committed transaction, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlUndoList {
    pub statements: Vec<SqlStatement>,
}

impl SqlUndoList {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }
}

/// Persistence of cluster metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Start a new buffered transaction
    fn begin(&self) -> MetadataTxn {
        MetadataTxn::new()
    }

    /// Apply every write of `txn` atomically; returns the inverse statements.
    /// On failure nothing is visible and `MetadataWriteFailed` is returned.
    async fn commit(&self, txn: MetadataTxn) -> Result<SqlUndoList>;

    /// Execute a previously returned undo list atomically
    async fn revert(&self, undo: &SqlUndoList) -> Result<()>;

    async fn member_by_address(&self, address: &str) -> Result<Option<MemberRecord>>;

    async fn member_by_uuid(&self, server_uuid: &str) -> Result<Option<MemberRecord>>;

    async fn member_attribute(&self, server_uuid: &str, key: &str) -> Result<Option<serde_json::Value>>;

    /// Load a cluster with its members and policy
    async fn cluster_by_name(&self, name: &str) -> Result<Option<Cluster>>;

    /// Clusters belonging to a cluster set
    async fn cluster_set_members(&self, cluster_set_id: &str) -> Result<Vec<ClusterRecord>>;
}
