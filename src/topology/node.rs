//! Node Model
//!
//! Identity, version and state of a single server as seen by the
//! admission workflow.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Server version (major.minor.patch), suffixes such as `-log` are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Same major.minor release series
    pub fn same_series(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let core = s
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or("");

        let mut parts = core.split('.').map(|p| p.parse::<u32>());
        let mut next = || -> Result<u32> {
            match parts.next() {
                Some(Ok(v)) => Ok(v),
                Some(Err(_)) => Err(Error::InvalidOption(format!("Invalid version '{}'", s))),
                None => Ok(0),
            }
        };

        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if major == 0 {
            return Err(Error::InvalidOption(format!("Invalid version '{}'", s)));
        }
        Ok(Version::new(major, minor, patch))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Group replication member state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
}

impl std::fmt::Display for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberState::Online => write!(f, "ONLINE"),
            MemberState::Recovering => write!(f, "RECOVERING"),
            MemberState::Offline => write!(f, "OFFLINE"),
            MemberState::Error => write!(f, "ERROR"),
            MemberState::Unreachable => write!(f, "UNREACHABLE"),
        }
    }
}

impl FromStr for MemberState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(MemberState::Online),
            "RECOVERING" => Ok(MemberState::Recovering),
            "OFFLINE" => Ok(MemberState::Offline),
            "ERROR" => Ok(MemberState::Error),
            "UNREACHABLE" => Ok(MemberState::Unreachable),
            other => Err(Error::Replication(format!("Unknown member state '{}'", other))),
        }
    }
}

/// Role an instance plays inside a managed cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceType {
    /// Group replication member (primary or secondary)
    GroupMember,
    /// Asynchronous read-only replica
    ReadReplica,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::GroupMember => "group-member",
            InstanceType::ReadReplica => "read-replica",
        }
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "group-member" => Ok(InstanceType::GroupMember),
            "read-replica" => Ok(InstanceType::ReadReplica),
            other => Err(Error::Metadata(format!("Unknown instance type '{}'", other))),
        }
    }
}

/// Identity of a connected server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Server UUID (`@@server_uuid`)
    pub server_uuid: String,
    /// Server ID (`@@server_id`)
    pub server_id: u32,
    /// Server version
    pub version: Version,
    /// Address the instance reports for itself (report_host or hostname, plus port)
    pub canonical_address: String,
    /// Compile OS and machine, e.g. `Linux-x86_64`
    pub platform: String,
}
