//! Identity of the VM the CPI itself runs on

use crate::error::ProviderError;
use crate::provider::ProviderResult;
use crate::resource::ResourceRef;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/instance-id/";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of the current instance id
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn instance_id(&self) -> ProviderResult<String>;
}

/// Link-local metadata service lookup
pub struct HttpMetadataSource {
    client: reqwest::Client,
    url: String,
}

impl HttpMetadataSource {
    pub fn new(url: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(METADATA_TIMEOUT)
            .timeout(METADATA_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn instance_id(&self) -> ProviderResult<String> {
        debug!("Fetching instance id from {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ServerError(format!(
                "metadata service returned {status}"
            )));
        }

        Ok(response.text().await?)
    }
}

/// Memoized current VM id
///
/// The first caller performs the lookup; concurrent first callers wait on
/// the slow-path lock and then observe the cached value.
pub struct CurrentVmId {
    source: Arc<dyn MetadataSource>,
    cached: RwLock<Option<ResourceRef>>,
    lookup: Mutex<()>,
}

impl CurrentVmId {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            lookup: Mutex::new(()),
        }
    }

    pub async fn get(&self) -> ProviderResult<ResourceRef> {
        if let Some(id) = self.cached.read().await.clone() {
            return Ok(id);
        }

        let _guard = self.lookup.lock().await;
        if let Some(id) = self.cached.read().await.clone() {
            return Ok(id);
        }

        let raw = self.source.instance_id().await?;
        let id = ResourceRef::new(raw.trim());
        if id.as_str().is_empty() {
            return Err(ProviderError::Decode(
                "metadata service returned an empty instance id".to_string(),
            ));
        }

        info!("Current VM id is `{}'", id);
        *self.cached.write().await = Some(id.clone());
        Ok(id)
    }
}
