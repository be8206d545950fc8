//! Typed CPI options

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_poll_interval() -> u64 {
    5
}

fn default_state_timeout() -> u64 {
    300
}

fn default_hwcloud_version() -> String {
    "2".to_string()
}

fn default_signature_method() -> String {
    "HmacSHA256".to_string()
}

/// Settings every backend shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonOptions {
    #[serde(default)]
    pub default_key_name: Option<String>,

    #[serde(default)]
    pub default_security_groups: Vec<String>,

    /// Seconds between resource state polls
    #[serde(default = "default_poll_interval")]
    pub wait_resource_poll_interval: u64,

    /// Seconds before a state wait gives up
    #[serde(default = "default_state_timeout")]
    pub state_timeout: u64,
}

impl CommonOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_resource_poll_interval)
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.state_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QingCloudOptions {
    #[serde(alias = "zone")]
    pub region: String,

    pub access_key_id: String,

    pub secret_access_key: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    /// Instance types per zone, replacing the built-in table
    #[serde(default)]
    pub instance_types: Option<BTreeMap<String, Vec<String>>>,

    #[serde(flatten)]
    pub common: CommonOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HwCloudOptions {
    pub url: String,

    #[serde(alias = "HWSAccessKeyId")]
    pub access_key_id: String,

    #[serde(alias = "key", alias = "Key")]
    pub secret_key: String,

    #[serde(alias = "RegionName")]
    pub region_name: String,

    #[serde(default = "default_hwcloud_version", alias = "Version")]
    pub version: String,

    #[serde(default = "default_signature_method", alias = "SignatureMethod")]
    pub signature_method: String,

    #[serde(default = "default_hwcloud_version", alias = "SignatureVersion")]
    pub signature_version: String,

    #[serde(default)]
    pub availability_zone: Option<String>,

    #[serde(default)]
    pub instance_types: Option<Vec<String>>,

    #[serde(flatten)]
    pub common: CommonOptions,
}

/// Backend selected by `cloud.plugin`
#[derive(Debug, Clone, PartialEq)]
pub enum CloudOptions {
    QingCloud(QingCloudOptions),
    HwCloud(HwCloudOptions),
}

impl CloudOptions {
    pub fn plugin(&self) -> &'static str {
        match self {
            CloudOptions::QingCloud(_) => "qingcloud",
            CloudOptions::HwCloud(_) => "hwcloud",
        }
    }

    pub fn common(&self) -> &CommonOptions {
        match self {
            CloudOptions::QingCloud(options) => &options.common,
            CloudOptions::HwCloud(options) => &options.common,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOptions {
    pub endpoint: String,
    pub user: String,
    pub password: String,
}

/// Fully validated CPI configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CpiConfig {
    pub cloud: CloudOptions,
    pub registry: RegistryOptions,

    /// Agent properties copied into every VM's settings
    pub agent: Map<String, Value>,
}
