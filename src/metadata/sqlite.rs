//! SQLite Metadata Store
//!
//! Keeps cluster metadata in a local SQLite database. Every commit runs
//! in a single SQLite transaction and records the inverse statements
//! from the rows' pre-images.

use std::path::Path;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tokio::sync::Mutex;

use super::{
    ClusterRecord, MemberRecord, MetadataStore, MetadataTxn, MetadataWrite, SqlStatement,
    SqlUndoList,
};
use crate::error::{Error, Result};
use crate::topology::{Cluster, ClusterMember, ClusterPolicy};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS clusters (
        cluster_id TEXT PRIMARY KEY,
        cluster_name TEXT NOT NULL UNIQUE,
        cluster_set_id TEXT,
        group_name TEXT NOT NULL,
        primary_address TEXT NOT NULL,
        ssl_mode TEXT NOT NULL,
        auth_type TEXT NOT NULL,
        gtid_set_is_complete INTEGER NOT NULL DEFAULT 0,
        disable_clone INTEGER NOT NULL DEFAULT 0,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS instances (
        server_uuid TEXT PRIMARY KEY,
        server_id INTEGER NOT NULL,
        cluster_id TEXT NOT NULL,
        address TEXT NOT NULL UNIQUE,
        instance_type TEXT NOT NULL,
        version TEXT,
        label TEXT,
        added_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_instances_cluster
        ON instances(cluster_id);

    CREATE TABLE IF NOT EXISTS instance_attributes (
        server_uuid TEXT NOT NULL,
        attr_key TEXT NOT NULL,
        attr_value TEXT NOT NULL,
        PRIMARY KEY (server_uuid, attr_key)
    );
"#;

const UPSERT_ATTRIBUTE: &str = r#"
    INSERT INTO instance_attributes (server_uuid, attr_key, attr_value) VALUES (?1, ?2, ?3)
    ON CONFLICT(server_uuid, attr_key) DO UPDATE SET attr_value = ?3
"#;

const DELETE_ATTRIBUTE: &str =
    "DELETE FROM instance_attributes WHERE server_uuid = ?1 AND attr_key = ?2";

const MEMBER_COLUMNS: &str =
    "cluster_id, server_uuid, server_id, address, instance_type, version, label";

/// Metadata store backed by SQLite
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Create or open the metadata database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Create a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register a cluster without members, returning its generated id
    pub async fn create_cluster(
        &self,
        name: &str,
        group_name: &str,
        primary: &str,
        policy: &ClusterPolicy,
        cluster_set_id: Option<&str>,
    ) -> Result<String> {
        self.register_cluster(name, group_name, primary, policy, cluster_set_id, Vec::new())
            .await
    }

    /// Register a cluster together with its members. Nothing is written
    /// unless every row is.
    pub async fn register_cluster(
        &self,
        name: &str,
        group_name: &str,
        primary: &str,
        policy: &ClusterPolicy,
        cluster_set_id: Option<&str>,
        members: Vec<ClusterMember>,
    ) -> Result<String> {
        let cluster_id = uuid::Uuid::new_v4().to_string();
        let writes: Vec<MetadataWrite> = members
            .into_iter()
            .map(|member| {
                MetadataWrite::InsertMember(MemberRecord {
                    cluster_id: cluster_id.clone(),
                    member,
                })
            })
            .collect();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO clusters (cluster_id, cluster_name, cluster_set_id, group_name,
                primary_address, ssl_mode, auth_type, gtid_set_is_complete, disable_clone)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                cluster_id,
                name,
                cluster_set_id,
                group_name,
                primary,
                policy.ssl_mode.as_str(),
                policy.auth_type.as_str(),
                policy.gtid_set_is_complete,
                policy.disable_clone,
            ],
        )?;
        write_all(&tx, &writes)?;
        tx.commit()?;

        tracing::info!("Registered cluster '{}' ({}) with {} members", name, cluster_id, writes.len());
        Ok(cluster_id)
    }

    fn load_members(conn: &Connection, cluster_id: &str) -> Result<Vec<ClusterMember>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM instances WHERE cluster_id = ?1 ORDER BY added_at, address",
            MEMBER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![cluster_id], read_member_row)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?.try_into_member()?);
        }
        Ok(members)
    }

    fn find_member(conn: &Connection, column: &str, value: &str) -> Result<Option<MemberRecord>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM instances WHERE {} = ?1 COLLATE NOCASE",
                    MEMBER_COLUMNS, column
                ),
                params![value],
                read_member_row,
            )
            .optional()?;

        match row {
            Some(raw) => {
                let cluster_id = raw.cluster_id.clone();
                Ok(Some(MemberRecord {
                    cluster_id,
                    member: raw.try_into_member()?,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Member row before its enum/version columns are parsed
struct RawMember {
    cluster_id: String,
    server_uuid: String,
    server_id: u32,
    address: String,
    instance_type: String,
    version: Option<String>,
    label: Option<String>,
}

impl RawMember {
    fn try_into_member(self) -> Result<ClusterMember> {
        Ok(ClusterMember {
            server_uuid: self.server_uuid,
            server_id: self.server_id,
            address: self.address,
            instance_type: self.instance_type.parse()?,
            version: self.version.map(|v| v.parse()).transpose()?,
            label: self.label,
        })
    }
}

fn read_member_row(row: &Row<'_>) -> rusqlite::Result<RawMember> {
    Ok(RawMember {
        cluster_id: row.get(0)?,
        server_uuid: row.get(1)?,
        server_id: row.get(2)?,
        address: row.get(3)?,
        instance_type: row.get(4)?,
        version: row.get(5)?,
        label: row.get(6)?,
    })
}

fn apply_writes(conn: &mut Connection, writes: &[MetadataWrite]) -> rusqlite::Result<SqlUndoList> {
    let tx = conn.transaction()?;
    let mut undo = write_all(&tx, writes)?;
    tx.commit()?;
    undo.reverse();
    Ok(SqlUndoList { statements: undo })
}

/// Apply `writes` inside `tx`, returning the inverse of each in order
fn write_all(tx: &Transaction<'_>, writes: &[MetadataWrite]) -> rusqlite::Result<Vec<SqlStatement>> {
    let mut undo = Vec::with_capacity(writes.len());

    for write in writes {
        match write {
            MetadataWrite::InsertMember(record) => {
                let m = &record.member;
                tx.execute(
                    r#"
                    INSERT INTO instances (server_uuid, server_id, cluster_id, address,
                        instance_type, version, label, added_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        m.server_uuid,
                        m.server_id,
                        record.cluster_id,
                        m.address,
                        m.instance_type.as_str(),
                        m.version.map(|v| v.to_string()),
                        m.label,
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
                undo.push(SqlStatement::new(
                    "DELETE FROM instances WHERE server_uuid = ?1",
                    vec![Some(m.server_uuid.clone())],
                ));
            }
            MetadataWrite::SetAttribute { server_uuid, key, value } => {
                let prior: Option<String> = tx
                    .query_row(
                        "SELECT attr_value FROM instance_attributes WHERE server_uuid = ?1 AND attr_key = ?2",
                        params![server_uuid, key],
                        |row| row.get(0),
                    )
                    .optional()?;

                tx.execute(UPSERT_ATTRIBUTE, params![server_uuid, key, value.to_string()])?;

                undo.push(match prior {
                    Some(old) => SqlStatement::new(
                        UPSERT_ATTRIBUTE,
                        vec![Some(server_uuid.clone()), Some(key.clone()), Some(old)],
                    ),
                    None => SqlStatement::new(
                        DELETE_ATTRIBUTE,
                        vec![Some(server_uuid.clone()), Some(key.clone())],
                    ),
                });
            }
        }
    }

    Ok(undo)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn commit(&self, txn: MetadataTxn) -> Result<SqlUndoList> {
        let mut conn = self.conn.lock().await;
        let undo = apply_writes(&mut conn, txn.writes())
            .map_err(|e| Error::MetadataWriteFailed(e.to_string()))?;
        tracing::debug!("Committed {} metadata writes", txn.writes().len());
        Ok(undo)
    }

    async fn revert(&self, undo: &SqlUndoList) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for stmt in &undo.statements {
            tx.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
        }
        tx.commit()?;
        tracing::debug!("Reverted {} metadata statements", undo.len());
        Ok(())
    }

    async fn member_by_address(&self, address: &str) -> Result<Option<MemberRecord>> {
        let conn = self.conn.lock().await;
        Self::find_member(&conn, "address", address)
    }

    async fn member_by_uuid(&self, server_uuid: &str) -> Result<Option<MemberRecord>> {
        let conn = self.conn.lock().await;
        Self::find_member(&conn, "server_uuid", server_uuid)
    }

    async fn member_attribute(&self, server_uuid: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT attr_value FROM instance_attributes WHERE server_uuid = ?1 AND attr_key = ?2",
                params![server_uuid, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    async fn cluster_by_name(&self, name: &str) -> Result<Option<Cluster>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"
                SELECT cluster_id, cluster_name, cluster_set_id, group_name, primary_address,
                    ssl_mode, auth_type, gtid_set_is_complete, disable_clone
                FROM clusters WHERE cluster_name = ?1
                "#,
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, bool>(7)?,
                        row.get::<_, bool>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, name, cluster_set_id, group_name, primary, ssl, auth, complete, no_clone)) = row else {
            return Ok(None);
        };

        let members = Self::load_members(&conn, &id)?;
        Ok(Some(Cluster {
            id,
            name,
            cluster_set_id,
            group_name,
            primary,
            members,
            policy: ClusterPolicy {
                ssl_mode: ssl.parse()?,
                auth_type: auth.parse()?,
                gtid_set_is_complete: complete,
                disable_clone: no_clone,
            },
        }))
    }

    async fn cluster_set_members(&self, cluster_set_id: &str) -> Result<Vec<ClusterRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT cluster_id, cluster_name, cluster_set_id FROM clusters WHERE cluster_set_id = ?1",
        )?;
        let rows = stmt.query_map(params![cluster_set_id], |row| {
            Ok(ClusterRecord {
                cluster_id: row.get(0)?,
                name: row.get(1)?,
                cluster_set_id: row.get(2)?,
            })
        })?;

        let mut clusters = Vec::new();
        for row in rows {
            clusters.push(row?);
        }
        Ok(clusters)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Metadata(format!("SQLite error: {}", e))
    }
}
