//! Read Replica Metadata
//!
//! Records a new read replica and its replication settings in one
//! metadata transaction.

use serde_json::json;

use crate::error::{Error, Result};
use crate::metadata::{
    MemberRecord, MetadataStore, SqlUndoList, ATTR_JOIN_TIME, ATTR_REPLICATION_ACCOUNT,
    ATTR_REPLICATION_SOURCES,
};
use crate::replication::{ReplicationAccount, SourceList};
use crate::topology::{ClusterMember, InstanceType, NodeIdentity};

/// Everything written for a new read replica
pub struct ReadReplicaRecord<'a> {
    pub cluster_id: &'a str,
    pub identity: &'a NodeIdentity,
    pub label: Option<&'a str>,
    pub join_time: &'a str,
    pub account: &'a ReplicationAccount,
    pub sources: &'a SourceList,
}

/// Write the membership row and attributes atomically; returns the undo list
pub async fn record_read_replica(
    store: &dyn MetadataStore,
    record: &ReadReplicaRecord<'_>,
) -> Result<SqlUndoList> {
    let identity = record.identity;
    let uuid = identity.server_uuid.as_str();

    let mut txn = store.begin();
    txn.insert_member(MemberRecord {
        cluster_id: record.cluster_id.to_string(),
        member: ClusterMember {
            server_uuid: identity.server_uuid.clone(),
            server_id: identity.server_id,
            address: identity.canonical_address.clone(),
            instance_type: InstanceType::ReadReplica,
            version: Some(identity.version),
            label: Some(
                record
                    .label
                    .map(str::to_string)
                    .unwrap_or_else(|| identity.canonical_address.clone()),
            ),
        },
    })
    .update_attribute(uuid, ATTR_JOIN_TIME, json!(record.join_time))
    .update_attribute(uuid, ATTR_REPLICATION_ACCOUNT, record.account.metadata_value())
    .update_attribute(uuid, ATTR_REPLICATION_SOURCES, record.sources.metadata_value());

    store.commit(txn).await.map_err(|e| match e {
        Error::MetadataWriteFailed(_) => e,
        other => Error::MetadataWriteFailed(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SqliteMetadataStore;
    use crate::replication::SourceEntry;
    use crate::topology::{ClusterPolicy, Version};

    fn identity() -> NodeIdentity {
        NodeIdentity {
            server_uuid: "uuid-t".into(),
            server_id: 42,
            version: Version::new(8, 0, 36),
            canonical_address: "rr1:3306".into(),
            platform: "Linux-x86_64".into(),
        }
    }

    fn account() -> ReplicationAccount {
        ReplicationAccount {
            user: "wolfreplica_rr_42".into(),
            host: "%".into(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn test_record_read_replica() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let cluster_id = store
            .create_cluster("prod", "g", "db1:3306", &ClusterPolicy::default(), None)
            .await
            .unwrap();
        let identity = identity();
        let account = account();
        let sources = SourceList::Custom(vec![SourceEntry::new("db2:3306", 50)]);

        let undo = record_read_replica(
            &store,
            &ReadReplicaRecord {
                cluster_id: &cluster_id,
                identity: &identity,
                label: None,
                join_time: "2024-05-01 10:00:00.000",
                account: &account,
                sources: &sources,
            },
        )
        .await
        .unwrap();

        let member = store.member_by_uuid("uuid-t").await.unwrap().unwrap().member;
        assert_eq!(member.label.as_deref(), Some("rr1:3306"));
        assert_eq!(member.instance_type, InstanceType::ReadReplica);
        assert_eq!(
            store.member_attribute("uuid-t", ATTR_REPLICATION_ACCOUNT).await.unwrap(),
            Some(json!({ "user": "wolfreplica_rr_42", "host": "%" }))
        );
        assert_eq!(
            store.member_attribute("uuid-t", ATTR_REPLICATION_SOURCES).await.unwrap(),
            Some(json!([{ "address": "db2:3306", "weight": 50 }]))
        );

        store.revert(&undo).await.unwrap();
        assert!(store.member_by_uuid("uuid-t").await.unwrap().is_none());
        assert!(store.member_attribute("uuid-t", ATTR_JOIN_TIME).await.unwrap().is_none());
    }
}
