//! HwCloud query API client
//!
//! EC2-style signed GET requests. List parameters are zero-based
//! (`InstanceId[0]`) and result sets arrive double wrapped
//! (`"instancesSet": {"instancesSet": [...]}`), or as the string `"null"`
//! when empty.

use crate::error::{HwCloudError, Result};
use bosh_cpi_cloud::QueryParams;
use bosh_cpi_cloud::signing::{hmac_sha256_base64, percent_encode};
use reqwest::Url;
use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection and signing settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub url: String,
    pub access_key_id: String,
    pub secret_key: String,
    pub region_name: String,
    pub version: String,
    pub signature_method: String,
    pub signature_version: String,
}

impl ApiConfig {
    /// Create ApiConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| HwCloudError::MissingEnvVar(name.to_string()))
        };

        Ok(Self {
            url: var("HWCLOUD_URL")?,
            access_key_id: var("HWCLOUD_ACCESS_KEY_ID")?,
            secret_key: var("HWCLOUD_SECRET_KEY")?,
            region_name: var("HWCLOUD_REGION_NAME")?,
            version: std::env::var("HWCLOUD_VERSION").unwrap_or_else(|_| "2".to_string()),
            signature_method: "HmacSHA256".to_string(),
            signature_version: "2".to_string(),
        })
    }
}

/// Add `values` as the zero-based list `name[0]`, `name[1]`, ...
pub fn indexed<S: AsRef<str>>(mut params: QueryParams, name: &str, values: &[S]) -> QueryParams {
    for (i, value) in values.iter().enumerate() {
        params.insert(format!("{name}[{i}]"), value.as_ref());
    }
    params
}

/// Signed HwCloud API client
pub struct HwCloudApi {
    client: reqwest::Client,
    config: ApiConfig,
    endpoint: Url,
}

impl HwCloudApi {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.url)
            .map_err(|e| HwCloudError::InvalidUrl(format!("{}: {e}", config.url)))?;
        if endpoint.host_str().is_none() {
            return Err(HwCloudError::InvalidUrl(config.url.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn region_name(&self) -> &str {
        &self.config.region_name
    }

    /// `host[:port]` as it appears in the string to sign
    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn signed_url(&self, action: &str, params: QueryParams) -> Result<String> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        self.signed_url_at(action, params, &timestamp, &nonce)
    }

    fn signed_url_at(
        &self,
        action: &str,
        params: QueryParams,
        timestamp: &str,
        nonce: &str,
    ) -> Result<String> {
        let params = params
            .set("Action", action)
            .set("HWSAccessKeyId", self.config.access_key_id.as_str())
            .set("RegionName", self.config.region_name.as_str())
            .set("Version", self.config.version.as_str())
            .set("SignatureMethod", self.config.signature_method.as_str())
            .set("SignatureVersion", self.config.signature_version.as_str())
            .set("SignatureNonce", nonce)
            .set("Timestamp", timestamp);

        let canonical = params.canonical();
        let string_to_sign = format!(
            "GET\n{}\n{}\n{}",
            self.host(),
            self.endpoint.path(),
            canonical
        );
        let signature = hmac_sha256_base64(&self.config.secret_key, &string_to_sign)
            .map_err(|e| HwCloudError::Signing(e.to_string()))?;

        let mut url = self.endpoint.clone();
        url.set_query(Some(&format!(
            "{canonical}&Signature={}",
            percent_encode(&signature)
        )));
        Ok(url.to_string())
    }

    /// Invoke `action` and decode the successful response body
    pub async fn call<T: DeserializeOwned>(&self, action: &str, params: QueryParams) -> Result<T> {
        debug!("HwCloud API call: {}", action);
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

        if let Some(err) = api_error(&body) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(HwCloudError::Http {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Error carried in the body, if any
pub fn api_error(body: &str) -> Option<HwCloudError> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let code = parsed.code.filter(|c| !c.is_empty())?;
    Some(HwCloudError::Api {
        code,
        message: parsed.message.unwrap_or_default(),
    })
}

/// Unwrap `{"xSet": [...]}`; `"null"`, `null` and `{}` read as empty
fn item_set<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wrapped<T> {
        Items(BTreeMap<String, Vec<T>>),
        Other(serde_json::Value),
    }

    Ok(match Wrapped::<T>::deserialize(deserializer)? {
        Wrapped::Items(sets) => sets.into_values().flatten().collect(),
        Wrapped::Other(_) => Vec::new(),
    })
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub instances_set: Vec<Instance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub instance_state: Option<InstanceState>,
    #[serde(default)]
    pub private_ip_address: Option<String>,
    #[serde(default, deserialize_with = "item_set")]
    pub group_set: Vec<GroupItem>,
    #[serde(default, deserialize_with = "item_set")]
    pub public_ip_set: Vec<PublicIpItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceState {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupItem {
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpItem {
    pub public_ip: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumesResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub volume_set: Vec<Volume>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub volume_id: String,
    #[serde(default)]
    pub volume_name: String,
    pub status: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default, deserialize_with = "item_set")]
    pub attachment_set: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub instance_id: String,
    #[serde(default)]
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotsResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub snapshot_set: Vec<Snapshot>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub images_set: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairsResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub key_set: Vec<KeyPair>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub key_name: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupsResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub security_group_info: Vec<SecurityGroup>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressesResponse {
    #[serde(default, deserialize_with = "item_set")]
    pub addresses_set: Vec<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub public_ip: String,
    #[serde(default)]
    pub instance_id: Option<String>,

    /// `allocated` or `associated`
    #[serde(default, rename = "isAssige")]
    pub assignment: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCreated {
    pub volume_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreated {
    pub snapshot_id: String,
}

/// Body of actions that return nothing of interest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(default)]
    pub request_id: Option<String>,
}
