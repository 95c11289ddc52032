//! Topology Module
//!
//! Data model for nodes and clusters.

mod cluster;
mod node;

pub use cluster::{AuthType, Cluster, ClusterMember, ClusterPolicy, SslMode};
pub use node::{InstanceType, MemberState, NodeIdentity, Version};
