//! Cloud resource identities, states and describe records
//!
//! Absence is modelled as a state (`NoExist`) rather than an error so that
//! delete verbs and waiters can treat "gone" as a regular observation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider-assigned identifier of a cloud resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(pub String);

impl ResourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceRef {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceRef {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of a cloud resource, used for error detail and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Volume,
    Snapshot,
    Image,
    FloatingIp,
    KeyPair,
    SecurityGroup,
    InstanceType,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Vm => write!(f, "VM"),
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Snapshot => write!(f, "snapshot"),
            ResourceKind::Image => write!(f, "image"),
            ResourceKind::FloatingIp => write!(f, "floating IP"),
            ResourceKind::KeyPair => write!(f, "key pair"),
            ResourceKind::SecurityGroup => write!(f, "security group"),
            ResourceKind::InstanceType => write!(f, "instance type"),
        }
    }
}

/// Common behaviour of the per-kind state enums
pub trait ResourceStatus: Copy + PartialEq + fmt::Display + Send + Sync {
    /// State observed when a describe call returns zero matches
    const ABSENT: Self;

    /// States after which the target can never be reached
    fn is_terminal_failure(&self) -> bool;

    /// Map a provider status string onto the state enum
    fn parse(raw: &str) -> Self;
}

fn is_failure_word(raw: &str) -> bool {
    matches!(raw, "error" | "failed" | "killed")
}

/// VM lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Pending,
    Running,
    Stopped,
    Suspended,
    Terminated,
    Ceased,
    NoExist,
    Error,
    Unknown,
}

impl VmState {
    /// Terminated and ceased instances count as absent
    pub fn is_gone(&self) -> bool {
        matches!(self, VmState::Terminated | VmState::Ceased | VmState::NoExist)
    }
}

impl ResourceStatus for VmState {
    const ABSENT: Self = VmState::NoExist;

    fn is_terminal_failure(&self) -> bool {
        *self == VmState::Error
    }

    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" | "starting" | "initializing" => VmState::Pending,
            "running" => VmState::Running,
            "stopped" | "stopping" => VmState::Stopped,
            "suspended" => VmState::Suspended,
            "terminated" | "shutting-down" => VmState::Terminated,
            "ceased" => VmState::Ceased,
            "" | "noexist" => VmState::NoExist,
            other if is_failure_word(other) => VmState::Error,
            _ => VmState::Unknown,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Pending => write!(f, "pending"),
            VmState::Running => write!(f, "running"),
            VmState::Stopped => write!(f, "stopped"),
            VmState::Suspended => write!(f, "suspended"),
            VmState::Terminated => write!(f, "terminated"),
            VmState::Ceased => write!(f, "ceased"),
            VmState::NoExist => write!(f, "noexist"),
            VmState::Error => write!(f, "error"),
            VmState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Block volume lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Ceased,
    NoExist,
    Error,
    Unknown,
}

impl VolumeState {
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            VolumeState::Deleted | VolumeState::Ceased | VolumeState::NoExist
        )
    }
}

impl ResourceStatus for VolumeState {
    const ABSENT: Self = VolumeState::NoExist;

    fn is_terminal_failure(&self) -> bool {
        *self == VolumeState::Error
    }

    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "creating" | "pending" => VolumeState::Creating,
            "available" => VolumeState::Available,
            "in-use" | "in_use" | "attached" => VolumeState::InUse,
            "deleting" => VolumeState::Deleting,
            "deleted" => VolumeState::Deleted,
            "ceased" => VolumeState::Ceased,
            "" | "noexist" => VolumeState::NoExist,
            other if is_failure_word(other) => VolumeState::Error,
            _ => VolumeState::Unknown,
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeState::Creating => write!(f, "creating"),
            VolumeState::Available => write!(f, "available"),
            VolumeState::InUse => write!(f, "in-use"),
            VolumeState::Deleting => write!(f, "deleting"),
            VolumeState::Deleted => write!(f, "deleted"),
            VolumeState::Ceased => write!(f, "ceased"),
            VolumeState::NoExist => write!(f, "noexist"),
            VolumeState::Error => write!(f, "error"),
            VolumeState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Snapshot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Creating,
    Available,
    Ceased,
    Deleted,
    NoExist,
    Error,
    Unknown,
}

impl SnapshotState {
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            SnapshotState::Ceased | SnapshotState::Deleted | SnapshotState::NoExist
        )
    }
}

impl ResourceStatus for SnapshotState {
    const ABSENT: Self = SnapshotState::NoExist;

    fn is_terminal_failure(&self) -> bool {
        *self == SnapshotState::Error
    }

    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "creating" | "pending" => SnapshotState::Creating,
            "available" | "completed" => SnapshotState::Available,
            "ceased" => SnapshotState::Ceased,
            "deleted" => SnapshotState::Deleted,
            "" | "noexist" => SnapshotState::NoExist,
            other if is_failure_word(other) => SnapshotState::Error,
            _ => SnapshotState::Unknown,
        }
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotState::Creating => write!(f, "creating"),
            SnapshotState::Available => write!(f, "available"),
            SnapshotState::Ceased => write!(f, "ceased"),
            SnapshotState::Deleted => write!(f, "deleted"),
            SnapshotState::NoExist => write!(f, "noexist"),
            SnapshotState::Error => write!(f, "error"),
            SnapshotState::Unknown => write!(f, "unknown"),
        }
    }
}

/// VM as reported by a describe call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: ResourceRef,

    /// Display name; also the key of the VM's agent settings
    pub name: String,

    pub state: VmState,

    pub private_ip: Option<String>,

    /// Security group names (or ids) the VM is a member of
    pub security_groups: Vec<String>,

    /// Floating IP address currently associated with the VM
    pub floating_ip: Option<String>,
}

/// Volume as reported by a describe call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: ResourceRef,
    pub name: String,
    pub state: VolumeState,
    pub size_gib: u32,

    /// VM the volume is attached to, if any
    pub attached_vm: Option<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: ResourceRef,
    pub state: SnapshotState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ResourceRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPairInfo {
    pub id: ResourceRef,
    pub name: String,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub id: ResourceRef,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatingIpInfo {
    pub id: ResourceRef,
    pub address: String,
    pub associated_vm: Option<ResourceRef>,
}
