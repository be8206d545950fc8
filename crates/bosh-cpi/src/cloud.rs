//! Build a lifecycle manager from configuration

use anyhow::{Context, Result};
use bosh_cpi_cloud::metadata::DEFAULT_METADATA_URL;
use bosh_cpi_cloud::{
    CurrentVmId, DiskSizePolicy, HttpMetadataSource, LifecycleManager, LifecycleOptions,
    ProviderClient, TaskCheckpoint,
};
use bosh_cpi_cloud_hwcloud::HwCloudProvider;
use bosh_cpi_cloud_qingcloud::{QINGCLOUD_API_ENDPOINT, QingCloudProvider};
use bosh_cpi_config::{CloudOptions, CpiConfig, HwCloudOptions, QingCloudOptions};
use bosh_cpi_registry::{RegistryClient, RegistryConfig};
use std::sync::Arc;
use tracing::debug;

fn qingcloud(options: &QingCloudOptions) -> Result<Arc<dyn ProviderClient>> {
    let api = bosh_cpi_cloud_qingcloud::QingCloudApi::new(bosh_cpi_cloud_qingcloud::ApiConfig {
        endpoint: options
            .endpoint
            .clone()
            .unwrap_or_else(|| QINGCLOUD_API_ENDPOINT.to_string()),
        zone: options.region.clone(),
        access_key_id: options.access_key_id.clone(),
        secret_access_key: options.secret_access_key.clone(),
    })
    .context("QingCloud client")?;

    let mut provider = QingCloudProvider::new(api);
    if let Some(types) = &options.instance_types {
        provider = provider.with_instance_types(types.clone());
    }
    Ok(Arc::new(provider))
}

fn hwcloud(options: &HwCloudOptions) -> Result<Arc<dyn ProviderClient>> {
    let api = bosh_cpi_cloud_hwcloud::HwCloudApi::new(bosh_cpi_cloud_hwcloud::ApiConfig {
        url: options.url.clone(),
        access_key_id: options.access_key_id.clone(),
        secret_key: options.secret_key.clone(),
        region_name: options.region_name.clone(),
        version: options.version.clone(),
        signature_method: options.signature_method.clone(),
        signature_version: options.signature_version.clone(),
    })
    .context("HwCloud client")?;

    let mut provider =
        HwCloudProvider::new(api).with_availability_zone(options.availability_zone.clone());
    if let Some(types) = &options.instance_types {
        provider = provider.with_instance_types(types.clone());
    }
    Ok(Arc::new(provider))
}

/// Provider client for the configured plugin
pub fn provider(cloud: &CloudOptions) -> Result<Arc<dyn ProviderClient>> {
    match cloud {
        CloudOptions::QingCloud(options) => qingcloud(options),
        CloudOptions::HwCloud(options) => hwcloud(options),
    }
}

/// Lifecycle knobs derived from the cloud section
pub fn lifecycle_options(config: &CpiConfig) -> LifecycleOptions {
    let common = config.cloud.common();
    let (availability_zone, disk_policy) = match &config.cloud {
        CloudOptions::QingCloud(_) => (None, DiskSizePolicy::QINGCLOUD),
        CloudOptions::HwCloud(options) => {
            (options.availability_zone.clone(), DiskSizePolicy::HWCLOUD)
        }
    };

    LifecycleOptions {
        availability_zone,
        default_key_name: common.default_key_name.clone(),
        default_security_groups: common.default_security_groups.clone(),
        poll_interval: common.poll_interval(),
        state_timeout: common.state_timeout(),
        disk_policy,
        agent_properties: config.agent.clone(),
        ..LifecycleOptions::default()
    }
}

/// Wire provider, registry and metadata lookup into one manager
pub fn manager(config: &CpiConfig, checkpoint: Arc<dyn TaskCheckpoint>) -> Result<LifecycleManager> {
    debug!("Using `{}' plugin", config.cloud.plugin());

    let provider = provider(&config.cloud)?;
    let registry = RegistryClient::new(RegistryConfig {
        endpoint: config.registry.endpoint.clone(),
        user: config.registry.user.clone(),
        password: config.registry.password.clone(),
    })
    .context("registry client")?;
    let metadata = HttpMetadataSource::new(DEFAULT_METADATA_URL).context("metadata client")?;

    Ok(LifecycleManager::new(
        provider,
        Arc::new(registry),
        lifecycle_options(config),
        checkpoint,
    )
    .with_current_vm_id(CurrentVmId::new(Arc::new(metadata))))
}
