//! HTTP client of the BOSH registry
//!
//! The registry keeps one settings document per instance name under
//! `/instances/{name}/settings`. Reads return the document as a JSON string
//! wrapped in `{"status": "ok", "settings": "..."}`.

use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use bosh_cpi_cloud::{AgentSettings, SettingsError, SettingsStore};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry location and credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub endpoint: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    #[serde(default)]
    settings: Option<String>,
}

/// [`SettingsStore`] backed by a BOSH registry
pub struct RegistryClient {
    client: reqwest::Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(mut config: RegistryConfig) -> Result<Self> {
        while config.endpoint.ends_with('/') {
            config.endpoint.pop();
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn settings_url(&self, instance: &str) -> String {
        format!("{}/instances/{}/settings", self.config.endpoint, instance)
    }

    /// Fetch the settings document of `instance`
    pub async fn read_settings(&self, instance: &str) -> Result<AgentSettings> {
        debug!("Reading registry settings of `{}'", instance);
        let response = self
            .client
            .get(self.settings_url(instance))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(instance.to_string()));
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        decode_settings(&body)
    }

    /// Replace the settings document of `instance`
    pub async fn update_settings(&self, instance: &str, settings: &AgentSettings) -> Result<()> {
        let payload = serde_json::to_string(settings)?;
        let response = self
            .client
            .put(self.settings_url(instance))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }
        info!("Updated registry settings of `{}'", instance);
        Ok(())
    }

    /// Remove the settings of `instance`; a missing entry is not an error
    pub async fn delete_settings(&self, instance: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.settings_url(instance))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Registry has no settings for `{}'", instance);
            return Ok(());
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }
        info!("Deleted registry settings of `{}'", instance);
        Ok(())
    }
}

/// Unwrap the `settings` string of a read response
pub fn decode_settings(body: &str) -> Result<AgentSettings> {
    let response: SettingsResponse = serde_json::from_str(body)?;
    let settings = response
        .settings
        .ok_or_else(|| RegistryError::Invalid("response has no `settings' field".to_string()))?;
    serde_json::from_str(&settings).map_err(|e| RegistryError::Invalid(e.to_string()))
}

#[async_trait]
impl SettingsStore for RegistryClient {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn read(&self, key: &str) -> std::result::Result<AgentSettings, SettingsError> {
        Ok(self.read_settings(key).await?)
    }

    async fn update(
        &self,
        key: &str,
        settings: &AgentSettings,
    ) -> std::result::Result<(), SettingsError> {
        Ok(self.update_settings(key, settings).await?)
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), SettingsError> {
        Ok(self.delete_settings(key).await?)
    }
}
