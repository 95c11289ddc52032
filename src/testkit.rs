//! In-memory fakes for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::node::{ChannelStatus, LocalMetadata, NodeConnector, NodeSession};
use crate::report::Reporter;
use crate::topology::{MemberState, NodeIdentity, Version};

/// Mutable state behind a `FakeNode`
#[derive(Debug, Clone)]
pub struct FakeNodeState {
    pub identity: NodeIdentity,
    pub member_state: MemberState,
    pub sysvars: HashMap<String, String>,
    /// Every statement passed to `execute`, in order
    pub statements: Vec<String>,
    /// Every `set_sysvar` call, in order
    pub sysvar_log: Vec<(String, String)>,
    pub channels: Vec<String>,
    pub channel_error: Option<String>,
    pub local_metadata: Option<LocalMetadata>,
    /// Canned answers for `query_string`, matched by substring
    pub queries: HashMap<String, String>,
    /// Statements containing this text fail
    pub fail_on: Option<String>,
    /// Statements containing this text never complete
    pub block_on: Option<String>,
    /// `gtid_executed` the node reaches once a clone or channel start completes
    pub catch_up_to: Option<String>,
    /// Channels a clone brings over from the donor
    pub cloned_channels: Vec<String>,
}

/// Scriptable `NodeSession`
pub struct FakeNode {
    address: String,
    state: Mutex<FakeNodeState>,
}

impl FakeNode {
    pub fn new(address: &str, server_uuid: &str, server_id: u32) -> Arc<Self> {
        let sysvars = [
            ("gtid_mode", "ON"),
            ("enforce_gtid_consistency", "ON"),
            ("gtid_executed", ""),
            ("gtid_purged", ""),
            ("super_read_only", "OFF"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Arc::new(Self {
            address: address.to_string(),
            state: Mutex::new(FakeNodeState {
                identity: NodeIdentity {
                    server_uuid: server_uuid.to_string(),
                    server_id,
                    version: Version::new(8, 0, 36),
                    canonical_address: address.to_string(),
                    platform: "Linux-x86_64".to_string(),
                },
                member_state: MemberState::Online,
                sysvars,
                statements: Vec::new(),
                sysvar_log: Vec::new(),
                channels: Vec::new(),
                channel_error: None,
                local_metadata: None,
                queries: HashMap::new(),
                fail_on: None,
                block_on: None,
                catch_up_to: None,
                cloned_channels: Vec::new(),
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeNodeState> {
        self.state.lock().unwrap()
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeNodeState)) {
        f(&mut self.state());
    }

    pub fn set_sysvar_value(&self, name: &str, value: &str) {
        self.state().sysvars.insert(name.to_string(), value.to_string());
    }

    pub fn sysvar_value(&self, name: &str) -> Option<String> {
        self.state().sysvars.get(name).cloned()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Check if any executed statement contains `needle`
    pub fn executed(&self, needle: &str) -> bool {
        self.state().statements.iter().any(|s| s.contains(needle))
    }

    pub fn channels(&self) -> Vec<String> {
        self.state().channels.clone()
    }
}

fn channel_of(sql: &str) -> Option<String> {
    let start = sql.rfind("FOR CHANNEL '")? + "FOR CHANNEL '".len();
    let rest = &sql[start..];
    rest.find('\'').map(|end| rest[..end].to_string())
}

#[async_trait]
impl NodeSession for FakeNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn identity(&self) -> Result<NodeIdentity> {
        Ok(self.state().identity.clone())
    }

    async fn member_state(&self) -> Result<MemberState> {
        Ok(self.state().member_state)
    }

    async fn sysvar(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state().sysvars.get(name).cloned())
    }

    async fn set_sysvar(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        state.sysvar_log.push((name.to_string(), value.to_string()));
        state.sysvars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let block = {
            let mut state = self.state();
            state.statements.push(sql.to_string());

            if state.fail_on.as_deref().is_some_and(|f| sql.contains(f)) {
                return Err(Error::Replication(format!("simulated failure on {}", self.address)));
            }

            if state.block_on.as_deref().is_some_and(|b| sql.contains(b)) {
                true
            } else {
                if sql.starts_with("CHANGE REPLICATION SOURCE") {
                    if let Some(channel) = channel_of(sql) {
                        if !state.channels.contains(&channel) {
                            state.channels.push(channel);
                        }
                    }
                } else if sql.starts_with("RESET REPLICA ALL") {
                    if let Some(channel) = channel_of(sql) {
                        state.channels.retain(|c| *c != channel);
                    }
                } else if sql.starts_with("START REPLICA") {
                    if let Some(gtids) = state.catch_up_to.clone() {
                        state.sysvars.insert("gtid_executed".into(), gtids);
                    }
                } else if sql.starts_with("CLONE INSTANCE") {
                    if let Some(gtids) = state.catch_up_to.clone() {
                        state.sysvars.insert("gtid_executed".into(), gtids);
                    }
                    state.channels = state.cloned_channels.clone();
                    state.local_metadata = None;
                } else if sql.starts_with("DROP SCHEMA") {
                    state.local_metadata = None;
                }
                false
            }
        };

        if block {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn query_string(&self, sql: &str) -> Result<Option<String>> {
        let state = self.state();
        Ok(state
            .queries
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, v)| v.clone()))
    }

    async fn replication_channels(&self) -> Result<Vec<String>> {
        Ok(self.state().channels.clone())
    }

    async fn channel_status(&self, channel: &str) -> Result<Option<ChannelStatus>> {
        let state = self.state();
        if !state.channels.iter().any(|c| c == channel) {
            return Ok(None);
        }
        Ok(Some(ChannelStatus {
            channel: channel.to_string(),
            receiver_running: state.channel_error.is_none(),
            applier_running: true,
            last_error: state.channel_error.clone(),
        }))
    }

    async fn local_metadata(&self) -> Result<Option<LocalMetadata>> {
        Ok(self.state().local_metadata.clone())
    }
}

/// Connector handing out registered `FakeNode`s
#[derive(Default)]
pub struct FakeConnector {
    nodes: Mutex<HashMap<String, Arc<FakeNode>>>,
    unreachable: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, node: &Arc<FakeNode>) {
        self.nodes.lock().unwrap().insert(node.address.clone(), node.clone());
    }

    /// Make `node` reachable under an additional address
    pub fn alias(&self, address: &str, node: &Arc<FakeNode>) {
        self.nodes.lock().unwrap().insert(address.to_string(), node.clone());
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Addresses passed to `connect`, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn NodeSession>> {
        self.attempts.lock().unwrap().push(address.to_string());

        if self.unreachable.lock().unwrap().contains(address) {
            return Err(Error::Unreachable {
                address: address.to_string(),
                reason: "connection refused".into(),
            });
        }

        let node = self.nodes.lock().unwrap().get(address).cloned();
        match node {
            Some(node) => Ok(node),
            None => Err(Error::Unreachable {
                address: address.to_string(),
                reason: "unknown host".into(),
            }),
        }
    }
}

/// Reporter that keeps every message
#[derive(Default)]
pub struct RecordingReporter {
    pub infos: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub answer: Option<bool>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer),
            ..Self::default()
        })
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    fn warning(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn confirm(&self, _question: &str) -> Option<bool> {
        self.answer
    }
}
