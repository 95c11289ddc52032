//! WolfReplica - Read Replica Admission Manager
//!
//! Adds a standalone MySQL instance to a group-replication cluster as an
//! asynchronous, read-only replica.
//!
//! # Architecture
//!
//! The admission workflow validates the target, resolves its replication
//! sources and provisioning method, then performs each durable step with
//! a registered compensation. Any failure or interruption unwinds those
//! steps in reverse, so the cluster is left as it was found.
//!
//! # Features
//!
//! - Fail-fast validation before any change is made
//! - Primary, secondary or custom weighted replication sources
//! - Incremental recovery or clone provisioning, chosen from GTID state
//! - Atomic metadata records with an exact undo list
//! - Cancellation (Ctrl+C) with full rollback
//! - Bounded wait for the new replica to catch up

pub mod admission;
pub mod config;
pub mod error;
pub mod gtid;
pub mod metadata;
pub mod node;
pub mod provision;
pub mod replication;
pub mod report;
pub mod topology;

#[cfg(test)]
pub mod testkit;

pub use config::WolfReplicaConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{
        AdmissionFailure, AdmissionOptions, AdmissionReport, RecoveryMethod, ReplicaAdmission,
    };
    pub use crate::config::WolfReplicaConfig;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::gtid::GtidSet;
    pub use crate::metadata::{MetadataStore, SqliteMetadataStore};
    pub use crate::node::{MySqlConnector, NodeConnector, NodeSession};
    pub use crate::replication::{ReplicationSources, SourceEntry};
    pub use crate::topology::{Cluster, NodeIdentity};
}
