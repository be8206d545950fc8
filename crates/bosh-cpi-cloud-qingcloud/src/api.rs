//! QingCloud IaaS API client
//!
//! Every action is a signed GET against `/iaas/`; responses carry a
//! `ret_code` that is zero on success.

use crate::error::{QingCloudError, Result};
use bosh_cpi_cloud::QueryParams;
use bosh_cpi_cloud::signing::{hmac_sha256_base64, percent_encode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub const QINGCLOUD_API_ENDPOINT: &str = "https://api.qingcloud.com/iaas/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings of the API client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub endpoint: String,
    pub zone: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl ApiConfig {
    /// Create ApiConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("QY_ACCESS_KEY_ID")
            .map_err(|_| QingCloudError::MissingEnvVar("QY_ACCESS_KEY_ID".to_string()))?;
        let secret_access_key = std::env::var("QY_SECRET_ACCESS_KEY")
            .map_err(|_| QingCloudError::MissingEnvVar("QY_SECRET_ACCESS_KEY".to_string()))?;
        let zone = std::env::var("QY_ZONE")
            .map_err(|_| QingCloudError::MissingEnvVar("QY_ZONE".to_string()))?;
        let endpoint =
            std::env::var("QY_ENDPOINT").unwrap_or_else(|_| QINGCLOUD_API_ENDPOINT.to_string());

        Ok(Self {
            endpoint,
            zone,
            access_key_id,
            secret_access_key,
        })
    }
}

/// Signed QingCloud API client
pub struct QingCloudApi {
    client: reqwest::Client,
    config: ApiConfig,
}

impl QingCloudApi {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn zone(&self) -> &str {
        &self.config.zone
    }

    /// Path component of the endpoint, part of the string to sign
    fn path(&self) -> &str {
        let without_scheme = self
            .config
            .endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.config.endpoint);
        without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("/")
    }

    /// Full request URL for `action` with a fresh timestamp and signature
    pub fn signed_url(&self, action: &str, params: QueryParams) -> Result<String> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        self.signed_url_at(action, params, &timestamp)
    }

    fn signed_url_at(&self, action: &str, params: QueryParams, timestamp: &str) -> Result<String> {
        let params = params
            .set("action", action)
            .set("zone", self.config.zone.as_str())
            .set("access_key_id", self.config.access_key_id.as_str())
            .set("signature_method", "HmacSHA256")
            .set("signature_version", "1")
            .set("version", "1")
            .set("time_stamp", timestamp);

        let canonical = params.canonical();
        let string_to_sign = format!("GET\n{}\n{}", self.path(), canonical);
        let signature = hmac_sha256_base64(&self.config.secret_access_key, &string_to_sign)
            .map_err(|e| QingCloudError::Signing(e.to_string()))?;

        Ok(format!(
            "{}?{}&signature={}",
            self.config.endpoint,
            canonical,
            percent_encode(&signature)
        ))
    }

    /// Invoke `action` and decode the successful response body
    pub async fn call<T: DeserializeOwned>(&self, action: &str, params: QueryParams) -> Result<T> {
        debug!("QingCloud API call: {}", action);
        let url = self.signed_url(action, params)?;

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(QingCloudError::Http {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }

        decode_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    message: Option<String>,
}

/// Check `ret_code` and decode the body into `T`
pub fn decode_response<T: DeserializeOwned>(body: &str) -> Result<T> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let envelope: Envelope = serde_json::from_value(value.clone())?;

    if envelope.ret_code != 0 {
        return Err(QingCloudError::Api {
            code: envelope.ret_code,
            message: envelope.message.unwrap_or_default(),
        });
    }

    Ok(serde_json::from_value(value)?)
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSet {
    #[serde(default)]
    pub instance_set: Vec<Instance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: String,
    pub status: String,
    #[serde(default)]
    pub vxnets: Vec<InstanceVxnet>,
    #[serde(default)]
    pub security_group: Option<SecurityGroupRef>,
    #[serde(default)]
    pub eip: Option<EipRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceVxnet {
    pub vxnet_id: String,
    #[serde(default)]
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroupRef {
    pub security_group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EipRef {
    #[serde(default)]
    pub eip_id: String,
    #[serde(default)]
    pub eip_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSet {
    #[serde(default)]
    pub volume_set: Vec<Volume>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    #[serde(default)]
    pub volume_name: String,
    pub status: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub instance: Option<VolumeInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeInstance {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSet {
    #[serde(default)]
    pub snapshot_set: Vec<Snapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSet {
    #[serde(default)]
    pub image_set: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub image_id: String,
    #[serde(default)]
    pub image_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyPairSet {
    #[serde(default)]
    pub keypair_set: Vec<KeyPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyPair {
    pub keypair_id: String,
    #[serde(default)]
    pub keypair_name: String,
    #[serde(default)]
    pub pub_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroupSet {
    #[serde(default)]
    pub security_group_set: Vec<SecurityGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityGroup {
    pub security_group_id: String,
    #[serde(default)]
    pub security_group_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EipSet {
    #[serde(default)]
    pub eip_set: Vec<Eip>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Eip {
    pub eip_id: String,
    pub eip_addr: String,
    #[serde(default)]
    pub resource: Option<EipResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EipResource {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub resource_type: String,
}

/// Ids returned by RunInstances
#[derive(Debug, Clone, Deserialize)]
pub struct InstancesCreated {
    pub instances: Vec<String>,
}

/// Ids returned by CreateVolumes
#[derive(Debug, Clone, Deserialize)]
pub struct VolumesCreated {
    pub volumes: Vec<String>,
}

/// Ids returned by CreateSnapshots
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotsCreated {
    pub snapshots: Vec<String>,
}

/// Body of actions that return nothing beyond `ret_code`
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub job_id: Option<String>,
}
