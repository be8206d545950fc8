//! Agent settings document and the store it lives in
//!
//! The guest agent fetches its settings from the registry on boot. The CPI
//! writes the initial document at VM creation and keeps the persistent disk
//! device map and network section current afterwards.

use crate::error::SettingsError;
use crate::network::NetworkSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

pub const SYSTEM_DISK_DEVICE: &str = "/dev/sda";
pub const EPHEMERAL_DISK_DEVICE: &str = "/dev/sdb";

/// Device prefix and letters handed out to persistent disks
const DEVICE_PREFIX: &str = "/dev/sd";
const DEVICE_LETTERS: std::ops::RangeInclusive<char> = 'c'..='z';

/// Persistent disk id → guest block device path
pub type DeviceAllocation = BTreeMap<String, String>;

/// Keys owned by the typed fields, never taken from agent properties
const RESERVED_KEYS: &[&str] = &["vm", "agent_id", "networks", "disks", "env"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSettings {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSettings {
    pub system: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<String>,

    #[serde(default)]
    pub persistent: DeviceAllocation,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            system: SYSTEM_DISK_DEVICE.to_string(),
            ephemeral: None,
            persistent: DeviceAllocation::new(),
        }
    }
}

/// Per-VM settings document read by the guest agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub vm: VmSettings,

    pub agent_id: String,

    #[serde(default)]
    pub networks: NetworkSpec,

    #[serde(default)]
    pub disks: DiskSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Value>,

    /// Agent properties (mbus, ntp, blobstore, ...) kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentSettings {
    pub fn new(
        vm_name: impl Into<String>,
        agent_id: impl Into<String>,
        networks: NetworkSpec,
        env: Option<Value>,
    ) -> Self {
        Self {
            vm: VmSettings {
                name: vm_name.into(),
            },
            agent_id: agent_id.into(),
            networks,
            disks: DiskSettings::default(),
            env,
            extra: Map::new(),
        }
    }

    pub fn with_ephemeral_disk(mut self, device: impl Into<String>) -> Self {
        self.disks.ephemeral = Some(device.into());
        self
    }

    /// Merge agent properties without overriding the typed sections
    pub fn with_agent_properties(mut self, properties: &Map<String, Value>) -> Self {
        for (key, value) in properties {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// First device path under `/dev/sd[c-z]` not present in `allocation`
pub fn select_device_name(allocation: &DeviceAllocation) -> Option<String> {
    DEVICE_LETTERS
        .map(|letter| format!("{DEVICE_PREFIX}{letter}"))
        .find(|device| !allocation.values().any(|used| used == device))
}

/// Key-value store of agent settings, keyed by VM name
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Address the guest agent uses to reach the store
    fn endpoint(&self) -> &str;

    async fn read(&self, key: &str) -> Result<AgentSettings, SettingsError>;

    async fn update(&self, key: &str, settings: &AgentSettings) -> Result<(), SettingsError>;

    /// Remove the entry; removing an absent entry succeeds
    async fn delete(&self, key: &str) -> Result<(), SettingsError>;
}

/// In-process settings store
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    endpoint: String,
    entries: RwLock<HashMap<String, AgentSettings>>,
}

impl MemorySettingsStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read(&self, key: &str) -> Result<AgentSettings, SettingsError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| SettingsError::NotFound(key.to_string()))
    }

    async fn update(&self, key: &str, settings: &AgentSettings) -> Result<(), SettingsError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), settings.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
